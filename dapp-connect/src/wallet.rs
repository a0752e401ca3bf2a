//! Wallet status as seen by the router.

use std::sync::atomic::{AtomicBool, Ordering};

pub trait WalletStatus: Send + Sync {
    /// True for watch-only wallets that hold no signing keys
    fn is_read_only(&self) -> bool;
}

/// Read-only flag the host app flips when the selected wallet changes
#[derive(Debug, Default)]
pub struct ReadOnlyFlag(AtomicBool);

impl ReadOnlyFlag {
    pub fn new(read_only: bool) -> Self {
        Self(AtomicBool::new(read_only))
    }

    pub fn set(&self, read_only: bool) {
        self.0.store(read_only, Ordering::SeqCst);
    }
}

impl WalletStatus for ReadOnlyFlag {
    fn is_read_only(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
