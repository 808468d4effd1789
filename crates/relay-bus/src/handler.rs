//! Handler return values.
//!
//! Handlers run synchronously inside `emit`. A handler that needs to do async
//! work returns [`HandlerOutput::Task`]; the bus spawns it on the ambient
//! tokio runtime and only logs its failure. Dispatch never waits for it.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::event::TypedEvent;

/// Boxed future returned by an async handler.
pub type HandlerFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'static>>;

/// Type-erased handler as stored in the subscription indices.
pub(crate) type Handler = Arc<dyn Fn(&TypedEvent) -> HandlerOutput + Send + Sync>;

/// What a handler produced for one event.
pub enum HandlerOutput {
    /// Finished synchronously.
    Done,
    /// Failed synchronously; logged by the bus.
    Failed(anyhow::Error),
    /// Continues asynchronously; spawned with a log-only failure continuation.
    Task(HandlerFuture),
}

impl HandlerOutput {
    /// Wrap a future as a fire-and-forget continuation.
    pub fn task<F>(future: F) -> Self
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self::Task(Box::pin(future))
    }
}

impl From<()> for HandlerOutput {
    fn from((): ()) -> Self {
        Self::Done
    }
}

impl<E> From<Result<(), E>> for HandlerOutput
where
    E: Into<anyhow::Error>,
{
    fn from(result: Result<(), E>) -> Self {
        match result {
            Ok(()) => Self::Done,
            Err(e) => Self::Failed(e.into()),
        }
    }
}

impl std::fmt::Debug for HandlerOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Done => f.write_str("Done"),
            Self::Failed(e) => f.debug_tuple("Failed").field(e).finish(),
            Self::Task(_) => f.write_str("Task(..)"),
        }
    }
}

/// Erase a caller's handler into the stored representation.
pub(crate) fn erase<F, R>(handler: F) -> Handler
where
    F: Fn(&TypedEvent) -> R + Send + Sync + 'static,
    R: Into<HandlerOutput>,
{
    Arc::new(move |event| handler(event).into())
}
