//! Background worker tasks.
//!
//! Every install, update and uninstall runs as one task. Request handlers
//! submit and return immediately; tests can join the handle instead of
//! racing the worker.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::error::Result;

#[derive(Clone, Default)]
pub struct TaskRunner {
    active: Arc<AtomicUsize>,
}

impl TaskRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a workflow; its error is logged, never propagated
    pub fn submit<F>(&self, name: impl Into<String>, workflow: F) -> TaskHandle
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let name = name.into();
        let active = self.active.clone();
        active.fetch_add(1, Ordering::SeqCst);

        let task_name = name.clone();
        let handle = tokio::spawn(async move {
            tracing::debug!(task = %task_name, "Task started");
            let result = workflow.await;
            active.fetch_sub(1, Ordering::SeqCst);

            match result {
                Ok(()) => {
                    tracing::debug!(task = %task_name, "Task completed");
                    true
                }
                Err(e) => {
                    tracing::error!(task = %task_name, error = %e, "Task failed");
                    false
                }
            }
        });

        TaskHandle { name, handle }
    }

    /// Number of tasks still running
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

pub struct TaskHandle {
    name: String,
    handle: JoinHandle<bool>,
}

impl TaskHandle {
    /// Wait for the task; `true` when the workflow returned `Ok`
    pub async fn join(self) -> bool {
        match self.handle.await {
            Ok(succeeded) => succeeded,
            Err(e) => {
                tracing::error!(task = %self.name, "Task panicked or was cancelled: {}", e);
                false
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}
