use std::future::Future;
use std::pin::Pin;

use tracing::Instrument;

pub type BoxTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Fire-and-forget execution of work that outlives the request that started it.
pub trait BackgroundTasks: Send + Sync {
    fn spawn(&self, task: BoxTask);
}

/// Spawns onto the current tokio runtime, carrying the caller's tracing span.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioBackgroundTasks;

impl BackgroundTasks for TokioBackgroundTasks {
    fn spawn(&self, task: BoxTask) {
        tokio::spawn(task.instrument(tracing::Span::current()));
    }
}
