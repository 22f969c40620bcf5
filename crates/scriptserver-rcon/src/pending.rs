//! In-flight request table keyed by request id

use scriptserver_core::{Result, ScriptServerError};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

/// Channel used to hand a command's outcome back to its caller
pub(crate) type Responder = oneshot::Sender<Result<String>>;

/// A dispatched command waiting for its response
#[derive(Debug)]
pub(crate) struct PendingRequest {
    pub submitted_at: Instant,
    pub responder: Responder,
}

#[derive(Debug, Default)]
pub(crate) struct PendingRequests {
    requests: HashMap<i32, PendingRequest>,
}

impl PendingRequests {
    pub fn insert(&mut self, request_id: i32, responder: Responder) {
        self.requests.insert(
            request_id,
            PendingRequest {
                submitted_at: Instant::now(),
                responder,
            },
        );
    }

    /// Deliver a response. Returns false when nobody is waiting for `request_id`.
    pub fn resolve(&mut self, request_id: i32, body: String) -> bool {
        match self.requests.remove(&request_id) {
            Some(request) => {
                // The caller may have stopped waiting; that is not our problem
                let _ = request.responder.send(Ok(body));
                true
            }
            None => false,
        }
    }

    /// Fail every request older than `timeout`. Returns the expired ids.
    pub fn expire(&mut self, timeout: Duration) -> Vec<i32> {
        let now = Instant::now();
        let expired: Vec<i32> = self
            .requests
            .iter()
            .filter(|(_, request)| now.duration_since(request.submitted_at) >= timeout)
            .map(|(id, _)| *id)
            .collect();

        for id in &expired {
            if let Some(request) = self.requests.remove(id) {
                let _ = request.responder.send(Err(ScriptServerError::Timeout(timeout)));
            }
        }

        expired
    }

    /// Fail everything with [`ScriptServerError::Disconnected`]
    pub fn reject_all(&mut self) -> usize {
        let count = self.requests.len();
        for (_, request) in self.requests.drain() {
            let _ = request.responder.send(Err(ScriptServerError::Disconnected));
        }
        count
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }
}
