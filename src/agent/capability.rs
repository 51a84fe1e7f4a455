use crate::agent::error::Error;
use once_cell::sync::OnceCell;

/// Lazily bound access to an optional facility of the traced process.
///
/// A successful binding is cached for the rest of the session. While the facility stays
/// unresolved every access retries the binding and fails with [`Error::CapabilityUnavailable`].
pub struct Capability<T> {
    name: &'static str,
    cell: OnceCell<T>,
    resolver: Box<dyn Fn() -> Option<T> + Send + Sync>,
}

impl<T> Capability<T> {
    pub fn new(name: &'static str, resolver: impl Fn() -> Option<T> + Send + Sync + 'static) -> Self {
        Self {
            name,
            cell: OnceCell::new(),
            resolver: Box::new(resolver),
        }
    }

    pub fn get(&self) -> Result<&T, Error> {
        self.cell
            .get_or_try_init(|| (self.resolver)().ok_or(Error::CapabilityUnavailable(self.name)))
    }
}
