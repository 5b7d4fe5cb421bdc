//! One-time CSRF state tokens binding an outbound login to its callback
//!
//! A single pending slot: issuing replaces the previous token, and any
//! validation attempt empties the slot whether it succeeds or not.

use super::types::redact;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use parking_lot::Mutex;
use rand::rngs::OsRng;
use rand::RngCore;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::AbortHandle;
use tokio::time::Instant;

/// 256 bits of entropy
const STATE_TOKEN_BYTES: usize = 32;

pub const DEFAULT_STATE_TTL: Duration = Duration::from_secs(5 * 60);

struct PendingState {
    value: String,
    issued_at: DateTime<Utc>,
    expires_at: Instant,
    generation: u64,
    expiry_timer: Option<AbortHandle>,
}

impl PendingState {
    fn cancel_timer(&mut self) {
        if let Some(timer) = self.expiry_timer.take() {
            timer.abort();
        }
    }
}

#[derive(Default)]
struct Slot {
    pending: Option<PendingState>,
    generation: u64,
}

pub struct StateTokenManager {
    ttl: Duration,
    slot: Arc<Mutex<Slot>>,
}

impl StateTokenManager {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: Arc::new(Mutex::new(Slot::default())),
        }
    }

    /// Issue a fresh token, discarding any pending one
    pub fn issue(&self) -> String {
        let mut bytes = [0u8; STATE_TOKEN_BYTES];
        OsRng.fill_bytes(&mut bytes);
        let value = URL_SAFE_NO_PAD.encode(bytes);

        let mut slot = self.slot.lock();
        if let Some(mut previous) = slot.pending.take() {
            debug!("Discarding previous pending state token");
            previous.cancel_timer();
        }
        slot.generation = slot.generation.wrapping_add(1);
        let generation = slot.generation;

        slot.pending = Some(PendingState {
            value: value.clone(),
            issued_at: Utc::now(),
            expires_at: Instant::now() + self.ttl,
            generation,
            expiry_timer: self.spawn_expiry_timer(generation),
        });

        info!("Issued state token {}", redact(&value));
        value
    }

    /// Clears the slot after the TTL. Without a runtime the deadline check in
    /// `validate` still applies, the slot just isn't emptied eagerly.
    fn spawn_expiry_timer(&self, generation: u64) -> Option<AbortHandle> {
        let handle = tokio::runtime::Handle::try_current().ok()?;
        let slot = Arc::clone(&self.slot);
        let ttl = self.ttl;
        let task = handle.spawn(async move {
            tokio::time::sleep(ttl).await;
            let mut slot = slot.lock();
            if slot
                .pending
                .as_ref()
                .is_some_and(|p| p.generation == generation)
            {
                slot.pending = None;
                info!("Pending login expired without a callback");
            }
        });
        Some(task.abort_handle())
    }

    /// Consume the pending token. True only for an unexpired exact match;
    /// the slot is emptied on every call.
    pub fn validate(&self, candidate: &str) -> bool {
        let pending = self.slot.lock().pending.take();
        let Some(mut pending) = pending else {
            debug!("State validation with no pending token");
            return false;
        };
        pending.cancel_timer();

        if Instant::now() >= pending.expires_at {
            warn!(
                "State token issued at {} has expired",
                pending.issued_at.to_rfc3339()
            );
            return false;
        }

        let matches = constant_time_eq(pending.value.as_bytes(), candidate.as_bytes());
        if !matches {
            warn!("State token mismatch (got {})", redact(candidate));
        }
        matches
    }

    pub fn is_pending(&self) -> bool {
        self.slot
            .lock()
            .pending
            .as_ref()
            .is_some_and(|p| Instant::now() < p.expires_at)
    }

    /// Drop the pending token without validating it
    pub fn cancel(&self) {
        if let Some(mut pending) = self.slot.lock().pending.take() {
            pending.cancel_timer();
            info!("Cancelled pending login");
        }
    }
}

impl Default for StateTokenManager {
    fn default() -> Self {
        Self::new(DEFAULT_STATE_TTL)
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
