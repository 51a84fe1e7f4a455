use crate::agent::signature::TypeSignature;
use serde::{Deserialize, Serialize};
use std::fmt;
use strum_macros::{Display, EnumString, IntoStaticStr};

/// Call-site address inside the traced process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address(pub u64);

impl Address {
    pub fn offset(self, offset: u64) -> Self {
        Address(self.0.wrapping_add(offset))
    }
}

impl From<u64> for Address {
    fn from(value: u64) -> Self {
        Address(value)
    }
}

impl From<Address> for u64 {
    fn from(addr: Address) -> Self {
        addr.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Dense identifier assigned to a target at provisioning time.
pub type TargetId = u32;

/// Identity of the thread that triggers a probe, as reported by the engine.
pub type ThreadId = u64;

/// Technology family of a native target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
pub enum TargetKind {
    #[strum(serialize = "plain")]
    Plain,
    #[strum(serialize = "object-oriented")]
    ObjectOriented,
    #[strum(serialize = "alt-runtime")]
    AltRuntime,
}

/// Flavor of a provisioning batch.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, Serialize,
)]
pub enum Flavor {
    #[strum(serialize = "native-plain")]
    #[serde(rename = "native-plain")]
    NativePlain,
    #[strum(serialize = "native-object-oriented")]
    #[serde(rename = "native-object-oriented")]
    NativeObjectOriented,
    #[strum(serialize = "native-alt-runtime")]
    #[serde(rename = "native-alt-runtime")]
    NativeAltRuntime,
    #[strum(serialize = "managed")]
    #[serde(rename = "managed")]
    Managed,
}

impl From<TargetKind> for Flavor {
    fn from(kind: TargetKind) -> Self {
        match kind {
            TargetKind::Plain => Flavor::NativePlain,
            TargetKind::ObjectOriented => Flavor::NativeObjectOriented,
            TargetKind::AltRuntime => Flavor::NativeAltRuntime,
        }
    }
}

/// Member of a scope as it is described to the host.
///
/// Serialized untagged: a bare string, a `[name, display]` pair or, for object-oriented
/// methods, an object carrying the type signature.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MemberDescriptor {
    Name(String),
    Named(String, String),
    Method {
        name: String,
        display: String,
        signature: TypeSignature,
    },
}

impl MemberDescriptor {
    pub fn name(&self) -> &str {
        match self {
            MemberDescriptor::Name(name) => name,
            MemberDescriptor::Named(name, _) => name,
            MemberDescriptor::Method { name, .. } => name,
        }
    }

    /// Name used in warnings, filters and `update` requests.
    pub fn display_name(&self) -> &str {
        match self {
            MemberDescriptor::Name(name) => name,
            MemberDescriptor::Named(_, display) => display,
            MemberDescriptor::Method { display, .. } => display,
        }
    }
}

/// A resolved native call site.
#[derive(Debug, Clone, PartialEq)]
pub struct NativeTarget {
    pub kind: TargetKind,
    pub scope: String,
    pub member: MemberDescriptor,
}

impl NativeTarget {
    pub fn plain(scope: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: TargetKind::Plain,
            scope: scope.into(),
            member: MemberDescriptor::Name(name.into()),
        }
    }

    pub fn display_name(&self) -> &str {
        self.member.display_name()
    }
}

/// Split a `module!function` match name. Names without a separator belong to an empty scope.
pub fn split_qualified_name(qualified: &str) -> (&str, &str) {
    match qualified.split_once('!') {
        Some((module, function)) => (module, function),
        None => ("", qualified),
    }
}
