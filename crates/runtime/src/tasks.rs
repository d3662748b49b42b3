//! Background task queue for supplementary collection off the measurement path.
//!
//! Tasks run one at a time in FIFO order on a dedicated drainer task.
//! Failures are logged and never reach the step that enqueued them.

use std::future::Future;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

enum Message {
    Run {
        name: String,
        task: BoxFuture<'static, anyhow::Result<()>>,
    },
    Close,
}

/// Cloneable handle used to enqueue deferred work.
#[derive(Clone)]
pub struct TaskQueue {
    tx: mpsc::UnboundedSender<Message>,
}

/// Owns the drainer task. Await [`TaskDrainer::flush`] on shutdown.
pub struct TaskDrainer {
    handle: JoinHandle<usize>,
}

impl TaskQueue {
    /// Spawn the drainer and return the enqueue handle alongside it.
    pub fn start() -> (Self, TaskDrainer) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(drain(rx));
        (Self { tx }, TaskDrainer { handle })
    }

    /// Queue `task`. Returns `false` once the queue has been closed.
    pub fn enqueue<F>(&self, name: impl Into<String>, task: F) -> bool
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let name = name.into();
        debug!(task = %name, "enqueued background task");
        self.tx
            .send(Message::Run {
                name,
                task: task.boxed(),
            })
            .is_ok()
    }

    /// Stop accepting work. Tasks queued before the call still run.
    pub fn close(&self) {
        let _ = self.tx.send(Message::Close);
    }
}

impl TaskDrainer {
    /// Wait for every task queued before [`TaskQueue::close`] to finish.
    /// Returns the number of tasks that ran.
    pub async fn flush(self) -> usize {
        match self.handle.await {
            Ok(count) => count,
            Err(e) => {
                warn!(error = %e, "background task drainer panicked");
                0
            }
        }
    }
}

async fn drain(mut rx: mpsc::UnboundedReceiver<Message>) -> usize {
    let mut completed = 0usize;
    while let Some(message) = rx.recv().await {
        match message {
            Message::Run { name, task } => {
                let start = std::time::Instant::now();
                match task.await {
                    Ok(()) => debug!(
                        task = %name,
                        duration_ms = start.elapsed().as_millis() as u64,
                        "background task finished"
                    ),
                    Err(e) => warn!(task = %name, error = %e, "background task failed"),
                }
                completed += 1;
                tokio::task::yield_now().await;
            }
            Message::Close => {
                rx.close();
            }
        }
    }
    info!(completed, "background task queue drained");
    completed
}
