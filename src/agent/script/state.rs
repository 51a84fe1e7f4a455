use crate::agent::script::Value;
use std::collections::HashMap;
use std::sync::Mutex;

/// Session wide mutable state shared by every behavior.
///
/// Created at session `init` together with the init parameters, dropped at `dispose`.
#[derive(Debug, Default)]
pub struct TraceState {
    values: Mutex<HashMap<String, Value>>,
    params: HashMap<String, Value>,
}

impl TraceState {
    /// Create state with read-only parameters taken from a JSON object (other JSON is ignored).
    pub fn new(parameters: &serde_json::Value) -> Self {
        let params = parameters
            .as_object()
            .map(|obj| {
                obj.iter()
                    .map(|(key, value)| (key.clone(), Value::from(value)))
                    .collect()
            })
            .unwrap_or_default();

        Self {
            values: Mutex::default(),
            params,
        }
    }

    pub fn get(&self, key: &str) -> Value {
        self.values
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    pub fn set(&self, key: &str, value: Value) {
        self.values.lock().unwrap().insert(key.to_string(), value);
    }

    pub fn param(&self, key: &str) -> Value {
        self.params.get(key).cloned().unwrap_or_default()
    }
}
