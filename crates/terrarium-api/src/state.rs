use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use terrarium_runner::TerrariumService;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<TerrariumService>,
    /// Bearer token required on every request except the readiness check.
    /// `None` leaves the API open.
    pub auth_token: Option<Arc<String>>,
    ready: Arc<AtomicBool>,
}

impl AppState {
    pub fn new(service: TerrariumService, auth_token: Option<String>) -> Self {
        Self {
            service: Arc::new(service),
            auth_token: auth_token.map(Arc::new),
            ready: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}
