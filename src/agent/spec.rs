//! Declarative trace specification: an ordered list of include/exclude/filter rules.
use crate::agent::error::Error;
use serde::Deserialize;
use std::str::FromStr;
use strum_macros::{Display, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Include,
    Exclude,
    Filter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Deserialize)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum Scope {
    ModuleExport,
    Function,
    RelativeFunction,
    Imports,
    ObjectMethod,
    ObjectProperty,
    /// Functions of the alternate native runtime.
    #[strum(to_string = "managed-func", serialize = "alt-runtime-func")]
    #[serde(alias = "alt-runtime-func")]
    ManagedFunc,
    ManagedMethod,
    DebugSymbol,
}

impl Scope {
    /// Managed rules are applied only once the managed runtime is confirmed available.
    pub fn is_deferred(self) -> bool {
        matches!(self, Scope::ManagedMethod)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "RawRule")]
pub struct Rule {
    pub operation: Operation,
    pub scope: Scope,
    pub pattern: String,
}

/// Wire forms of a rule: a `[operation, scope, pattern]` triple or an object.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawRule {
    Triple(Operation, Scope, String),
    Object {
        operation: Operation,
        scope: Scope,
        #[serde(default)]
        pattern: String,
    },
}

impl From<RawRule> for Rule {
    fn from(raw: RawRule) -> Self {
        match raw {
            RawRule::Triple(operation, scope, pattern) => Rule::new(operation, scope, pattern),
            RawRule::Object {
                operation,
                scope,
                pattern,
            } => Rule::new(operation, scope, pattern),
        }
    }
}

impl Rule {
    pub fn new(operation: Operation, scope: Scope, pattern: impl Into<String>) -> Self {
        Self {
            operation,
            scope,
            pattern: pattern.into(),
        }
    }
}

impl FromStr for Rule {
    type Err = Error;

    /// Parse the textual form `operation:scope:pattern`. The pattern may itself contain `:`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ':');
        let (Some(op), Some(scope)) = (parts.next(), parts.next()) else {
            return Err(Error::InvalidRule(s.to_string()));
        };
        let invalid = |_| Error::InvalidRule(s.to_string());
        let operation = Operation::from_str(op.trim()).map_err(invalid)?;
        let scope = Scope::from_str(scope.trim()).map_err(invalid)?;
        Ok(Rule::new(operation, scope, parts.next().unwrap_or_default()))
    }
}

/// Ordered rules, later rules override earlier ones at the same identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Specification(pub Vec<Rule>);

impl Specification {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self(rules)
    }

    pub fn from_json(json: &str) -> Result<Self, Error> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn rules(&self) -> &[Rule] {
        &self.0
    }
}

impl FromIterator<Rule> for Specification {
    fn from_iter<T: IntoIterator<Item = Rule>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}
