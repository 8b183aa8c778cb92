/*!
 * Task Registry
 * Token-keyed request bookkeeping shared with worker processes
 *
 * Mirrors the channel contract spoken by forked workers: register-task,
 * get-current-task, remove-pending-tasks, pull-once. The wire protocol
 * itself lives outside this crate.
 */

use crate::core::types::{RequestId, Token};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

pub trait TaskRegistry: Send + Sync {
    /// Bind a batch of requests to a fresh single-use token
    fn register(&self, token: Token, requests: Vec<RequestId>);

    /// Request currently in flight for a token
    fn current(&self, token: Token) -> Option<RequestId>;

    /// Drop and return every request not yet completed for a token
    fn remove_pending(&self, token: Token) -> Vec<RequestId>;

    /// Hand the worker its next request, consuming it
    fn pull_once(&self, token: Token) -> Option<RequestId>;

    /// Signal the end of the run
    fn terminate(&self);
}

/// In-memory registry used for in-process runs and tests
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    tasks: DashMap<Token, VecDeque<RequestId>>,
    terminated: AtomicBool,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }
}

impl TaskRegistry for InMemoryRegistry {
    fn register(&self, token: Token, requests: Vec<RequestId>) {
        self.tasks.insert(token, requests.into());
    }

    fn current(&self, token: Token) -> Option<RequestId> {
        self.tasks
            .get(&token)
            .and_then(|queue| queue.front().copied())
    }

    fn remove_pending(&self, token: Token) -> Vec<RequestId> {
        self.tasks
            .remove(&token)
            .map(|(_, queue)| queue.into_iter().collect())
            .unwrap_or_default()
    }

    fn pull_once(&self, token: Token) -> Option<RequestId> {
        self.tasks.get_mut(&token).and_then(|mut q| q.pop_front())
    }

    fn terminate(&self) {
        self.terminated.store(true, Ordering::Release);
    }
}
