use std::sync::Arc;

use staysync_core::Engine;

use crate::auth::AuthRegistry;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub engine: Engine,
    pub auth: Arc<AuthRegistry>,
}

impl AppState {
    pub fn new(engine: Engine, auth: Arc<AuthRegistry>) -> Self {
        Self { engine, auth }
    }
}
