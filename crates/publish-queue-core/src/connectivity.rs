//! Connectivity oracle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Answers whether the cloud link is currently usable.
pub trait Connectivity: Send + Sync {
    fn is_online(&self) -> bool;
}

/// Shared online/offline flag.
///
/// Clones observe the same flag, so one clone can be handed to the queue and
/// another kept by whatever watches the link.
#[derive(Debug, Clone, Default)]
pub struct ConnectivityFlag {
    online: Arc<AtomicBool>,
}

impl ConnectivityFlag {
    pub fn new(online: bool) -> Self {
        Self {
            online: Arc::new(AtomicBool::new(online)),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

impl Connectivity for ConnectivityFlag {
    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}
