//! Microphone ownership
//!
//! The microphone has one owner at a time. Whoever wants to listen (or speak,
//! so the system never transcribes its own voice) first takes a [`MicLease`];
//! dropping the lease hands the microphone to the next waiter in FIFO order.

use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard, watch};

/// Who holds the microphone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MicOwner {
    CommandListener,
    Conversation,
    Alert,
}

impl std::fmt::Display for MicOwner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::CommandListener => "command-listener",
            Self::Conversation => "conversation",
            Self::Alert => "alert",
        };
        f.write_str(name)
    }
}

/// Hands out exclusive microphone leases
#[derive(Debug, Clone)]
pub struct MicArbiter {
    lock: Arc<Mutex<()>>,
    owner: Arc<watch::Sender<Option<MicOwner>>>,
}

/// Exclusive right to use the microphone
///
/// Released when the lease and every handle made with [`MicLease::share`]
/// have been dropped.
#[derive(Debug)]
pub struct MicLease {
    held: Arc<Held>,
}

#[derive(Debug)]
struct Held {
    owner: MicOwner,
    holder: Arc<watch::Sender<Option<MicOwner>>>,
    _guard: OwnedMutexGuard<()>,
}

impl Default for MicArbiter {
    fn default() -> Self {
        Self::new()
    }
}

impl MicArbiter {
    #[must_use]
    pub fn new() -> Self {
        let (owner, _) = watch::channel(None);
        Self {
            lock: Arc::new(Mutex::new(())),
            owner: Arc::new(owner),
        }
    }

    /// Wait for the microphone
    pub async fn acquire(&self, owner: MicOwner) -> MicLease {
        let guard = Arc::clone(&self.lock).lock_owned().await;
        self.grant(owner, guard)
    }

    /// Take the microphone only if it is free
    #[must_use]
    pub fn try_acquire(&self, owner: MicOwner) -> Option<MicLease> {
        let guard = Arc::clone(&self.lock).try_lock_owned().ok()?;
        Some(self.grant(owner, guard))
    }

    fn grant(&self, owner: MicOwner, guard: OwnedMutexGuard<()>) -> MicLease {
        self.owner.send_replace(Some(owner));
        tracing::trace!(%owner, "microphone acquired");
        MicLease {
            held: Arc::new(Held {
                owner,
                holder: Arc::clone(&self.owner),
                _guard: guard,
            }),
        }
    }

    /// Current holder, if any
    #[must_use]
    pub fn owner(&self) -> Option<MicOwner> {
        *self.owner.borrow()
    }

    /// Receiver that wakes whenever ownership changes
    #[must_use]
    pub fn watch_owner(&self) -> watch::Receiver<Option<MicOwner>> {
        self.owner.subscribe()
    }
}

impl MicLease {
    #[must_use]
    pub fn owner(&self) -> MicOwner {
        self.held.owner
    }

    /// Another handle on the same lease
    ///
    /// Work that can outlive its caller (a blocking capture thread) keeps one
    /// of these until the device is closed.
    #[must_use]
    pub fn share(&self) -> Self {
        Self {
            held: Arc::clone(&self.held),
        }
    }
}

impl Drop for Held {
    fn drop(&mut self) {
        // Cleared before the guard field drops, so the next holder's grant wins
        self.holder.send_replace(None);
        tracing::trace!(owner = %self.owner, "microphone released");
    }
}
