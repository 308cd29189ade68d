//! Background column validation.
//!
//! Creating a table queues a job that re-checks its columns against the
//! query engine. Submission never blocks and its outcome is never awaited.

use std::sync::mpsc::{self, Receiver, Sender};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::catalog::{ScopeId, TableId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationJob {
    pub scope_id: ScopeId,
    pub table_id: TableId,
}

/// Fire-and-forget queue for validation jobs.
pub trait ValidationJobs: Send + Sync {
    fn submit(&self, scope_id: ScopeId, table_id: TableId);
}

/// Drops every job.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscardJobs;

impl ValidationJobs for DiscardJobs {
    fn submit(&self, scope_id: ScopeId, table_id: TableId) {
        debug!(scope = %scope_id, table = %table_id, "discarding validation job");
    }
}

/// Hands jobs to a worker over a channel.
pub struct ChannelJobs {
    tx: Mutex<Sender<ValidationJob>>,
}

impl ChannelJobs {
    pub fn new() -> (Self, Receiver<ValidationJob>) {
        let (tx, rx) = mpsc::channel();
        (Self { tx: Mutex::new(tx) }, rx)
    }
}

impl ValidationJobs for ChannelJobs {
    fn submit(&self, scope_id: ScopeId, table_id: TableId) {
        let job = ValidationJob { scope_id, table_id };
        if let Err(mpsc::SendError(job)) = self.tx.lock().send(job) {
            warn!(scope = %job.scope_id, table = %job.table_id, "validation worker is gone, job dropped");
        }
    }
}
