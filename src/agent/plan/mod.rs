//! Target plan: the set of call sites and managed methods a session traces.
//!
//! The plan is built by applying specification rules in order. Native targets are keyed by
//! address, so a later rule always overrides an earlier one at the same call site.
pub mod managed;

use crate::agent::capability::Capability;
use crate::agent::engine::{AltRuntime, ApiMatch, ManagedRuntime, ObjectRuntime, ProcessInspector};
use crate::agent::error::Error;
use crate::agent::pattern::{
    offset_display_name, parse_method_list, parse_module_function, parse_module_offset,
    parse_regex_list, property_name, setter_selector,
};
use crate::agent::signature::TypeSignature;
use crate::agent::spec::{Operation, Rule, Scope};
use crate::agent::target::{split_qualified_name, Address, MemberDescriptor, NativeTarget, TargetKind};
use crate::agent_debug;
use indexmap::IndexMap;
use managed::ManagedPlan;
use std::sync::Arc;

/// Lifecycle methods excluded together with the accessors of a class.
fn lifecycle_methods(class: &str) -> [String; 3] {
    [
        format!("-[{class} .cxx_destruct]"),
        format!("-[{class} dealloc]"),
        format!("+[{class} alloc]"),
    ]
}

/// Split an object-oriented method name `-[Class selector]` into class and `-selector`.
pub fn split_method_name(name: &str) -> Option<(&str, String)> {
    let kind = name.chars().next().filter(|c| *c == '-' || *c == '+')?;
    let inner = name[1..].strip_prefix('[')?.strip_suffix(']')?;
    let (class, selector) = inner.split_once(' ')?;
    Some((class, format!("{kind}{selector}")))
}

pub struct TargetPlan {
    inspector: Arc<dyn ProcessInspector>,
    object_runtime: Capability<Arc<dyn ObjectRuntime>>,
    alt_runtime: Capability<Arc<dyn AltRuntime>>,
    native: IndexMap<Address, NativeTarget>,
    managed: ManagedPlan,
    warnings: Vec<String>,
}

impl TargetPlan {
    pub fn new(inspector: Arc<dyn ProcessInspector>) -> Self {
        let objc_inspector = inspector.clone();
        let alt_inspector = inspector.clone();
        Self {
            inspector,
            object_runtime: Capability::new("object runtime", move || {
                objc_inspector.object_runtime()
            }),
            alt_runtime: Capability::new("alternate runtime", move || alt_inspector.alt_runtime()),
            native: IndexMap::new(),
            managed: ManagedPlan::default(),
            warnings: vec![],
        }
    }

    /// Apply one native rule. Managed rules are applied with [`TargetPlan::apply_managed_rule`].
    ///
    /// Fails only when a resolver required by the rule is unavailable, recoverable problems are
    /// collected as warnings.
    pub fn apply_rule(&mut self, rule: &Rule) -> Result<(), Error> {
        let pattern = rule.pattern.as_str();
        match (rule.operation, rule.scope) {
            (Operation::Include, Scope::ModuleExport) => {
                self.include_exports(&format!("{pattern}!*"));
            }
            (Operation::Exclude, Scope::ModuleExport) => {
                self.exclude_matches(self.inspector.exports_matching(&format!("{pattern}!*")));
            }
            (Operation::Include, Scope::Function) => {
                self.include_exports(&parse_module_function(pattern).glob());
            }
            (Operation::Exclude, Scope::Function) => {
                let glob = parse_module_function(pattern).glob();
                self.exclude_matches(self.inspector.exports_matching(&glob));
            }
            (Operation::Include, Scope::RelativeFunction) => self.include_relative(pattern),
            (Operation::Include, Scope::Imports) => self.include_imports(pattern),
            (Operation::Include, Scope::ObjectMethod) => self.include_object_methods(pattern)?,
            (Operation::Exclude, Scope::ObjectMethod) => {
                let runtime = self.object_runtime.get()?.clone();
                for fragment in parse_method_list(pattern) {
                    self.exclude_matches(runtime.methods_matching(fragment));
                }
            }
            (Operation::Filter, Scope::ObjectMethod) => self.filter(pattern),
            (Operation::Exclude, Scope::ObjectProperty) => {
                self.exclude_object_properties(pattern)?
            }
            (Operation::Include, Scope::ManagedFunc) => {
                let functions = self.alt_runtime.get()?.functions_matching(pattern);
                for m in functions {
                    let (module, function) = split_qualified_name(&m.name);
                    let target = NativeTarget {
                        kind: TargetKind::AltRuntime,
                        scope: module.to_string(),
                        member: MemberDescriptor::Name(function.to_string()),
                    };
                    self.native.insert(m.address, target);
                }
            }
            (Operation::Exclude, Scope::ManagedFunc) => {
                let functions = self.alt_runtime.get()?.functions_matching(pattern);
                self.exclude_matches(functions);
            }
            (Operation::Include, Scope::DebugSymbol) => {
                for symbol in self.inspector.symbols_matching(pattern) {
                    let target = NativeTarget::plain(symbol.module.unwrap_or_default(), symbol.name);
                    self.native.insert(symbol.address, target);
                }
            }
            (_, Scope::ManagedMethod) => {
                agent_debug!(target: "plan", "managed rule `{pattern}` is deferred");
            }
            (op, scope) => {
                agent_debug!(target: "plan", "no-op rule: {op} {scope} `{pattern}`");
            }
        }
        Ok(())
    }

    /// Apply a deferred managed-method rule. Must run on the managed runtime's context.
    pub fn apply_managed_rule(&mut self, rule: &Rule, runtime: &dyn ManagedRuntime) {
        match rule.operation {
            Operation::Include => self.managed.include(runtime.methods_matching(&rule.pattern)),
            Operation::Exclude => self.managed.exclude(runtime.methods_matching(&rule.pattern)),
            Operation::Filter => {
                agent_debug!(target: "plan", "no-op rule: filter managed-method `{}`", rule.pattern);
            }
        }
    }

    fn include_exports(&mut self, glob: &str) {
        for m in self.inspector.exports_matching(glob) {
            let (module, function) = split_qualified_name(&m.name);
            self.native.insert(m.address, NativeTarget::plain(module, function));
        }
    }

    fn exclude_matches(&mut self, matches: Vec<ApiMatch>) {
        for m in matches {
            self.native.shift_remove(&m.address);
        }
    }

    fn include_relative(&mut self, pattern: &str) {
        let query = match parse_module_offset(pattern) {
            Ok(query) => query,
            Err(e) => {
                self.warnings.push(e.to_string());
                return;
            }
        };

        let module = self
            .inspector
            .modules()
            .into_iter()
            .find(|module| module.name == query.module);
        let Some(module) = module else {
            self.warnings.push(Error::ModuleNotFound(query.module).to_string());
            return;
        };

        let target = NativeTarget::plain(module.name, offset_display_name(query.offset));
        self.native.insert(module.base.offset(query.offset), target);
    }

    fn include_imports(&mut self, pattern: &str) {
        let source = if pattern.is_empty() {
            match self.inspector.modules().into_iter().next() {
                Some(main) => main.name,
                None => {
                    self.warnings.push("no modules to take imports from".to_string());
                    return;
                }
            }
        } else {
            pattern.to_string()
        };

        for m in self.inspector.imports_matching(&format!("{source}!*")) {
            let (module, function) = split_qualified_name(&m.name);
            self.native.insert(m.address, NativeTarget::plain(module, function));
        }
    }

    fn include_object_methods(&mut self, pattern: &str) -> Result<(), Error> {
        let runtime = self.object_runtime.get()?.clone();
        for fragment in parse_method_list(pattern) {
            for m in runtime.methods_matching(fragment) {
                let (scope, name) = match split_method_name(&m.name) {
                    Some((class, selector)) => (class.to_string(), selector),
                    None => (String::new(), m.name.clone()),
                };
                let sel = name.trim_start_matches(['-', '+']);
                let signature = TypeSignature::derive(runtime.introspector(), &m.name, sel);
                let target = NativeTarget {
                    kind: TargetKind::ObjectOriented,
                    scope,
                    member: MemberDescriptor::Method {
                        name,
                        display: m.name,
                        signature,
                    },
                };
                self.native.insert(m.address, target);
            }
        }
        Ok(())
    }

    /// Keep only native targets whose display name matches at least one fragment.
    /// No valid fragment means no filtering at all.
    fn filter(&mut self, pattern: &str) {
        let regexes = parse_regex_list(pattern);
        if regexes.is_empty() {
            return;
        }
        self.native
            .retain(|_, target| regexes.iter().any(|re| re.is_match(target.display_name())));
    }

    fn exclude_object_properties(&mut self, pattern: &str) -> Result<(), Error> {
        let runtime = self.object_runtime.get()?.clone();
        for class in parse_method_list(pattern) {
            let Some(ivars) = runtime.instance_variables(class) else {
                self.warnings
                    .push(format!("unable to instantiate `{class}`, properties are kept"));
                continue;
            };

            let mut methods = Vec::with_capacity(ivars.len() * 2 + 3);
            for ivar in &ivars {
                methods.push(format!("-[{class} {}]", property_name(ivar)));
                methods.push(format!("-[{class} {}]", setter_selector(ivar)));
            }
            methods.extend(lifecycle_methods(class));

            for method in methods {
                self.exclude_matches(runtime.methods_matching(&method));
            }
        }
        Ok(())
    }

    pub fn native_targets(&self) -> impl Iterator<Item = (Address, &NativeTarget)> {
        self.native.iter().map(|(addr, target)| (*addr, target))
    }

    pub fn native_target(&self, address: Address) -> Option<&NativeTarget> {
        self.native.get(&address)
    }

    pub fn native_len(&self) -> usize {
        self.native.len()
    }

    pub fn managed(&self) -> &ManagedPlan {
        &self.managed
    }

    /// Drain warnings collected since the last call.
    pub fn take_warnings(&mut self) -> Vec<String> {
        std::mem::take(&mut self.warnings)
    }
}
