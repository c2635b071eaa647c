//! Session cancellation: CancellationToken plus a generation guard.
//! Starting a new session cancels the previous one, and a stale consumer
//! must not publish results after a newer session has begun.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

/// Issues one guard per monitoring session on a device.
pub struct SessionControl {
    current_token: RwLock<CancellationToken>,
    generation: Arc<AtomicU64>,
}

impl Default for SessionControl {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionControl {
    pub fn new() -> Self {
        Self {
            current_token: RwLock::new(CancellationToken::new()),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Cancel the running session, advance the generation, and hand out a
    /// guard for the new one.
    pub fn begin(&self) -> SessionGuard {
        let mut token_guard = self.current_token.write();
        token_guard.cancel();
        let root = CancellationToken::new();
        let child = root.child_token();
        *token_guard = root;
        let my_generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        SessionGuard {
            generation: Arc::clone(&self.generation),
            my_generation,
            token: child,
        }
    }

    pub fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Cancel the running session without starting another.
    pub fn cancel(&self) {
        self.current_token.read().cancel();
    }
}

/// Checked by the consumer before each frame and before publishing.
#[derive(Clone)]
pub struct SessionGuard {
    generation: Arc<AtomicU64>,
    my_generation: u64,
    token: CancellationToken,
}

impl SessionGuard {
    #[inline]
    pub fn is_current(&self) -> bool {
        self.generation.load(Ordering::SeqCst) == self.my_generation
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    #[inline]
    pub fn should_continue(&self) -> bool {
        !self.is_cancelled() && self.is_current()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn generation(&self) -> u64 {
        self.my_generation
    }
}
