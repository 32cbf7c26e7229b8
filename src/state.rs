use std::sync::Arc;

use crate::storage::Storage;

/// Shared application state. Handlers reach the backend only through the
/// [`Storage`] trait, so tests can swap in the in-memory backend.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Storage>,
}

impl AppState {
    pub fn new(store: Arc<dyn Storage>) -> Self {
        Self { store }
    }
}
