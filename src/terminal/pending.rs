//! Registry of unresolved confirmation waits, keyed by correlation id.
//!
//! Each wait owns a one-shot resolver. Resolving takes the resolver under
//! the lock before firing, so whichever channel gets there first wins and
//! every later attempt is a no-op. The entry itself stays registered until
//! the waiter drops its guard, which lets a late force cancel tell a wait
//! that is still settling apart from no wait at all.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::TerminalError;
use crate::terminal::protocol::ProviderStatus;

/// How a confirmation wait ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Paid,
    /// Expired, canceled or failed on the provider side.
    NotPaid(ProviderStatus),
    ForceCancelled,
    Exhausted { attempts: u32 },
    TimedOut,
}

struct PendingConfirmation {
    /// `None` once resolved.
    resolver: Option<oneshot::Sender<Resolution>>,
    registered_at: Instant,
}

/// Shared map of pending confirmations. Cloning shares the map.
#[derive(Clone, Default)]
pub struct PendingConfirmations {
    inner: Arc<Mutex<HashMap<String, PendingConfirmation>>>,
}

impl PendingConfirmations {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self) -> MutexGuard<'_, HashMap<String, PendingConfirmation>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a wait for `uid`. The returned guard removes the entry when
    /// dropped, so an abandoned wait never lingers.
    pub fn register(
        &self,
        uid: &str,
    ) -> Result<(PendingGuard, oneshot::Receiver<Resolution>), TerminalError> {
        let mut map = self.map();
        if map.contains_key(uid) {
            return Err(TerminalError::AlreadyAwaiting(uid.to_string()));
        }
        let (tx, rx) = oneshot::channel();
        map.insert(
            uid.to_string(),
            PendingConfirmation {
                resolver: Some(tx),
                registered_at: Instant::now(),
            },
        );
        debug!(uid = %uid, pending = map.len(), "confirmation wait registered");
        Ok((
            PendingGuard {
                registry: self.clone(),
                uid: uid.to_string(),
            },
            rx,
        ))
    }

    /// Resolve the wait for `uid`. Returns `false` when there is nothing to
    /// resolve (never registered, or already resolved).
    pub fn resolve(&self, uid: &str, resolution: Resolution) -> bool {
        let taken = self
            .map()
            .get_mut(uid)
            .and_then(|pending| Some((pending.resolver.take()?, pending.registered_at)));
        match taken {
            Some((resolver, registered_at)) => {
                debug!(
                    uid = %uid,
                    ?resolution,
                    waited_ms = registered_at.elapsed().as_millis() as u64,
                    "confirmation resolved"
                );
                // The receiver may already be gone if the waiter was dropped.
                let _ = resolver.send(resolution);
                true
            }
            None => {
                debug!(uid = %uid, ?resolution, "confirmation already resolved, ignoring");
                false
            }
        }
    }

    /// Whether a wait for `uid` exists and has not been resolved yet.
    pub fn is_pending(&self, uid: &str) -> bool {
        self.map()
            .get(uid)
            .is_some_and(|pending| pending.resolver.is_some())
    }

    /// Whether a waiter still holds `uid`, resolved or not.
    pub fn is_registered(&self, uid: &str) -> bool {
        self.map().contains_key(uid)
    }

    /// Correlation ids of the unresolved waits.
    pub fn pending_uids(&self) -> Vec<String> {
        self.map()
            .iter()
            .filter(|(_, pending)| pending.resolver.is_some())
            .map(|(uid, _)| uid.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map().is_empty()
    }
}

/// Removes its registry entry on drop.
pub struct PendingGuard {
    registry: PendingConfirmations,
    uid: String,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        let removed = self.registry.map().remove(&self.uid);
        if removed.is_some_and(|pending| pending.resolver.is_some()) {
            debug!(uid = %self.uid, "confirmation wait abandoned");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
