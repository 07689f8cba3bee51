//! Task supervisor
//!
//! Every periodic task (shaping, arbitration, feedback, recording) gets a
//! child token of one root token. Shutdown cancels the root and then waits a
//! bounded time per task; a task that does not stop in time is aborted and
//! reported, never waited on forever.

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SupervisorError {
    #[error("Task {0} is already running")]
    DuplicateTask(String),

    #[error("Supervisor is shutting down")]
    ShuttingDown,
}

/// How each task ended during shutdown
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub joined: Vec<String>,
    /// Did not stop within the join timeout and were aborted
    pub abandoned: Vec<String>,
    /// Panicked or were cancelled from outside
    pub failed: Vec<String>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.abandoned.is_empty() && self.failed.is_empty()
    }
}

struct SupervisedTask {
    name: String,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct TaskSupervisor {
    root: CancellationToken,
    tasks: Vec<SupervisedTask>,
    join_timeout: Duration,
}

impl TaskSupervisor {
    pub fn new(join_timeout: Duration) -> Self {
        Self {
            root: CancellationToken::new(),
            tasks: Vec::new(),
            join_timeout,
        }
    }

    /// Token that fires once shutdown starts
    pub fn token(&self) -> CancellationToken {
        self.root.clone()
    }

    pub fn spawn<F, Fut>(&mut self, name: &str, task: F) -> Result<(), SupervisorError>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.root.is_cancelled() {
            return Err(SupervisorError::ShuttingDown);
        }
        if self.tasks.iter().any(|t| t.name == name) {
            return Err(SupervisorError::DuplicateTask(name.to_string()));
        }

        let token = self.root.child_token();
        let handle = tokio::spawn(task(token.clone()));
        debug!("Spawned task {}", name);
        self.tasks.push(SupervisedTask {
            name: name.to_string(),
            token,
            handle,
        });
        Ok(())
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.tasks
            .iter()
            .any(|t| t.name == name && !t.handle.is_finished())
    }

    pub fn task_names(&self) -> Vec<String> {
        self.tasks.iter().map(|t| t.name.clone()).collect()
    }

    /// Stops a single task, waiting at most the join timeout
    pub async fn stop(&mut self, name: &str) -> Option<bool> {
        let position = self.tasks.iter().position(|t| t.name == name)?;
        let task = self.tasks.remove(position);
        task.token.cancel();
        let join_timeout = self.join_timeout;
        Some(matches!(join(task, join_timeout).await, TaskEnd::Joined))
    }

    /// Cancels everything and waits for each task in spawn order
    pub async fn shutdown(mut self) -> ShutdownReport {
        info!("Shutting down {} tasks", self.tasks.len());
        self.root.cancel();

        let mut report = ShutdownReport::default();
        for task in self.tasks.drain(..) {
            let name = task.name.clone();
            match join(task, self.join_timeout).await {
                TaskEnd::Joined => report.joined.push(name),
                TaskEnd::Abandoned => report.abandoned.push(name),
                TaskEnd::Failed => report.failed.push(name),
            }
        }

        if report.is_clean() {
            info!("All {} tasks stopped", report.joined.len());
        } else {
            warn!(
                "Shutdown finished with abandoned tasks {:?} and failed tasks {:?}",
                report.abandoned, report.failed
            );
        }
        report
    }
}

impl Drop for TaskSupervisor {
    fn drop(&mut self) {
        self.root.cancel();
    }
}

enum TaskEnd {
    Joined,
    Abandoned,
    Failed,
}

async fn join(task: SupervisedTask, join_timeout: Duration) -> TaskEnd {
    let SupervisedTask {
        name, mut handle, ..
    } = task;
    match timeout(join_timeout, &mut handle).await {
        Ok(Ok(())) => {
            debug!("Task {} stopped", name);
            TaskEnd::Joined
        }
        Ok(Err(e)) => {
            error!("Task {} ended abnormally: {}", name, e);
            TaskEnd::Failed
        }
        Err(_) => {
            warn!(
                "Task {} did not stop within {:?}, aborting",
                name, join_timeout
            );
            handle.abort();
            TaskEnd::Abandoned
        }
    }
}
