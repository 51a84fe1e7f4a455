use serde::Serialize;
use std::collections::BTreeMap;

/// Low level reflective queries about an object-oriented method.
pub trait MethodIntrospector: Send + Sync {
    /// Number of call arguments, receiver and selector included.
    fn argument_count(&self, method: &str) -> usize;

    /// Type descriptor of the argument at `index`.
    fn argument_type(&self, method: &str, index: usize) -> String;

    /// Type descriptor of the return value.
    fn return_type(&self, method: &str) -> String;
}

/// Classification of an object-oriented method's arguments and return value.
///
/// Behavior scripts use it to know which call arguments are opaque object references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeSignature {
    #[serde(rename = "argInfo")]
    arg_info: BTreeMap<usize, bool>,
    #[serde(rename = "retType")]
    ret_type: bool,
    sel: String,
}

/// Index of the first real argument, 0 and 1 hold the receiver and the selector.
const FIRST_ARGUMENT: usize = 2;

fn is_reference(descriptor: &str) -> bool {
    descriptor.starts_with('@')
}

impl TypeSignature {
    /// Derive signature of `method` (identified by its handle string) with selector `sel`.
    pub fn derive(introspector: &dyn MethodIntrospector, method: &str, sel: &str) -> Self {
        let arg_info = (FIRST_ARGUMENT..introspector.argument_count(method))
            .map(|idx| (idx, is_reference(&introspector.argument_type(method, idx))))
            .collect();

        Self {
            arg_info,
            ret_type: is_reference(&introspector.return_type(method)),
            sel: sel.to_string(),
        }
    }
}
