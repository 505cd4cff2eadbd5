//! Pickup queue for owners polling the daemon directly.

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use warden_core::{ApprovalMethod, Result, SignRequest};

use crate::adapter::{SignDispatch, SigningChannel};

/// Always-available fallback. Sign requests wait here until an owner
/// client fetches them; the answer comes back through the daemon API.
pub struct RestChannel {
    pending: Mutex<VecDeque<SignRequest>>,
    max_pending: usize,
}

impl RestChannel {
    pub fn new(max_pending: usize) -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
            max_pending: max_pending.max(1),
        }
    }

    /// Undelivered requests, oldest first.
    pub fn pending(&self) -> Vec<SignRequest> {
        self.pending.lock().iter().cloned().collect()
    }

    pub fn get(&self, request_id: Uuid) -> Option<SignRequest> {
        self.pending
            .lock()
            .iter()
            .find(|r| r.request_id == request_id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}

#[async_trait]
impl SigningChannel for RestChannel {
    fn method(&self) -> ApprovalMethod {
        ApprovalMethod::Rest
    }

    fn is_available(&self) -> bool {
        true
    }

    async fn send_request(&self, dispatch: &SignDispatch) -> Result<()> {
        let mut pending = self.pending.lock();
        pending.retain(|r| r.request_id != dispatch.request.request_id);
        if pending.len() >= self.max_pending {
            if let Some(dropped) = pending.pop_front() {
                warn!(request_id = %dropped.request_id, "rest pickup queue full, dropping oldest");
            }
        }
        pending.push_back(dispatch.request.clone());
        debug!(request_id = %dispatch.request.request_id, "sign request queued for rest pickup");
        Ok(())
    }

    fn cancel(&self, request_id: Uuid) {
        self.pending.lock().retain(|r| r.request_id != request_id);
    }
}
