//! Managed targets, grouped by class loader and reconciled across enumeration passes.
use crate::agent::engine::{LoaderId, ManagedLoaderMatch};
use indexmap::IndexMap;

/// Method name without the overload part: `foo(int): void` -> `foo`.
pub fn bare_name(signature: &str) -> &str {
    signature
        .split_once('(')
        .map(|(name, _)| name)
        .unwrap_or(signature)
        .trim()
}

/// Methods of one class: bare name -> longest known overload signature.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManagedTargetClass {
    methods: IndexMap<String, String>,
}

impl ManagedTargetClass {
    /// Merge an overload signature, the longer (more specific) signature wins.
    pub fn merge(&mut self, signature: &str) {
        let bare = bare_name(signature);
        match self.methods.get_mut(bare) {
            Some(known) if known.len() >= signature.len() => {}
            Some(known) => *known = signature.to_string(),
            None => {
                self.methods.insert(bare.to_string(), signature.to_string());
            }
        }
    }

    /// Drop a method with all its overloads.
    pub fn remove(&mut self, signature: &str) {
        self.methods.shift_remove(bare_name(signature));
    }

    pub fn get(&self, bare: &str) -> Option<&str> {
        self.methods.get(bare).map(String::as_str)
    }

    /// Pairs of bare name and signature.
    pub fn methods(&self) -> impl Iterator<Item = (&str, &str)> {
        self.methods.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

/// Classes of one loader, `loader` is `None` for the default (absent) loader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedTargetGroup {
    pub loader: Option<LoaderId>,
    classes: IndexMap<String, ManagedTargetClass>,
}

impl ManagedTargetGroup {
    fn new(loader: Option<LoaderId>) -> Self {
        Self {
            loader,
            classes: IndexMap::new(),
        }
    }

    pub fn class(&self, name: &str) -> Option<&ManagedTargetClass> {
        self.classes.get(name)
    }

    pub fn classes(&self) -> impl Iterator<Item = (&str, &ManagedTargetClass)> {
        self.classes.iter().map(|(k, v)| (k.as_str(), v))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManagedPlan {
    groups: Vec<ManagedTargetGroup>,
}

impl ManagedPlan {
    fn group_mut(&mut self, loader: &Option<LoaderId>) -> Option<&mut ManagedTargetGroup> {
        self.groups.iter_mut().find(|g| &g.loader == loader)
    }

    /// Merge an enumeration pass.
    pub fn include(&mut self, matches: Vec<ManagedLoaderMatch>) {
        for m in matches {
            let group = match self.groups.iter().position(|g| g.loader == m.loader) {
                Some(idx) => &mut self.groups[idx],
                None => {
                    self.groups.push(ManagedTargetGroup::new(m.loader));
                    self.groups.last_mut().expect("infallible")
                }
            };

            for class in m.classes {
                let target = group.classes.entry(class.name).or_default();
                for signature in &class.methods {
                    target.merge(signature);
                }
            }
        }
    }

    /// Remove methods of an enumeration pass, classes and groups left empty are pruned.
    pub fn exclude(&mut self, matches: Vec<ManagedLoaderMatch>) {
        for m in matches {
            let Some(group) = self.group_mut(&m.loader) else {
                continue;
            };

            for class in m.classes {
                let Some(target) = group.classes.get_mut(&class.name) else {
                    continue;
                };
                for signature in &class.methods {
                    target.remove(signature);
                }
                if target.is_empty() {
                    group.classes.shift_remove(&class.name);
                }
            }
        }
        self.groups.retain(|g| !g.classes.is_empty());
    }

    pub fn groups(&self) -> &[ManagedTargetGroup] {
        &self.groups
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Number of distinct bare methods over all groups.
    pub fn method_count(&self) -> usize {
        self.groups
            .iter()
            .flat_map(|g| g.classes.values())
            .map(ManagedTargetClass::len)
            .sum()
    }
}
