//! Started handles for long-running commands.
//!
//! Every command the UI issues returns immediately with a handle; the
//! work runs on a tokio task. The UI later calls
//! [`Started::await_completion`] (or [`StreamStarted::await_next`] for
//! streaming commands) to receive the terminal message. A handle carries
//! one result channel and one error channel; exactly one of them fires.

use std::future::Future;

use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::error::ClientError;

/// Terminal message of a command.
#[derive(Debug)]
pub enum Completion<T> {
    /// The command finished with a value.
    Succeeded(T),
    /// The command failed.
    Failed(ClientError),
}

impl<T> Completion<T> {
    /// Converts into a `Result`.
    ///
    /// # Errors
    ///
    /// Returns the command's error for `Failed`.
    pub fn into_result(self) -> Result<T, ClientError> {
        match self {
            Completion::Succeeded(v) => Ok(v),
            Completion::Failed(e) => Err(e),
        }
    }

    /// Returns `true` for `Succeeded`.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Completion::Succeeded(_))
    }
}

/// Handle to a running command.
#[must_use = "a started command reports its outcome only through await_completion"]
#[derive(Debug)]
pub struct Started<T> {
    result: oneshot::Receiver<T>,
    error: oneshot::Receiver<ClientError>,
}

impl<T: Send + 'static> Started<T> {
    /// Runs `operation` on a new task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<F>(operation: &'static str, work: F) -> Self
    where
        F: Future<Output = Result<T, ClientError>> + Send + 'static,
    {
        let (result_tx, result) = oneshot::channel();
        let (error_tx, error) = oneshot::channel();
        tokio::spawn(async move {
            match work.await {
                Ok(value) => {
                    let _ = result_tx.send(value);
                }
                Err(e) => {
                    debug!(operation, error = %e, "command failed");
                    let _ = error_tx.send(e);
                }
            }
        });
        Self { result, error }
    }

    /// A handle that is already complete.
    pub fn ready(outcome: Result<T, ClientError>) -> Self {
        let (result_tx, result) = oneshot::channel();
        let (error_tx, error) = oneshot::channel();
        match outcome {
            Ok(value) => {
                let _ = result_tx.send(value);
            }
            Err(e) => {
                let _ = error_tx.send(e);
            }
        }
        Self { result, error }
    }

    /// Waits for the terminal message.
    pub async fn await_completion(self) -> Completion<T> {
        let Self {
            mut result,
            mut error,
        } = self;
        tokio::select! {
            value = &mut result => match value {
                Ok(v) => Completion::Succeeded(v),
                Err(_) => match error.await {
                    Ok(e) => Completion::Failed(e),
                    Err(_) => Completion::Failed(abandoned()),
                },
            },
            failure = &mut error => match failure {
                Ok(e) => Completion::Failed(e),
                Err(_) => match result.await {
                    Ok(v) => Completion::Succeeded(v),
                    Err(_) => Completion::Failed(abandoned()),
                },
            },
        }
    }
}

fn abandoned() -> ClientError {
    ClientError::Internal("command task ended without reporting".into())
}

/// Message from a streaming command.
#[derive(Debug)]
pub enum StreamEvent<T> {
    /// One incremental item.
    Item(T),
    /// The command failed; no more items follow.
    Failed(ClientError),
    /// The stream ended normally.
    Finished,
}

/// Handle to a running command that produces a stream of items.
#[must_use = "a started stream reports its items only through await_next"]
#[derive(Debug)]
pub struct StreamStarted<T> {
    items: mpsc::Receiver<T>,
    error: oneshot::Receiver<ClientError>,
    items_done: bool,
    error_done: bool,
}

impl<T: Send + 'static> StreamStarted<T> {
    /// Runs `work` on a new task. `work` receives the item sender and
    /// returns when the stream is complete.
    pub fn spawn<F, Fut>(operation: &'static str, buffer: usize, work: F) -> Self
    where
        F: FnOnce(mpsc::Sender<T>) -> Fut,
        Fut: Future<Output = Result<(), ClientError>> + Send + 'static,
    {
        let (items_tx, items) = mpsc::channel(buffer.max(1));
        let (error_tx, error) = oneshot::channel();
        let work = work(items_tx);
        tokio::spawn(async move {
            if let Err(e) = work.await {
                debug!(operation, error = %e, "stream failed");
                let _ = error_tx.send(e);
            }
        });
        Self {
            items,
            error,
            items_done: false,
            error_done: false,
        }
    }

    /// Waits for the next item or the end of the stream. Items sent
    /// before a failure are delivered before it.
    pub async fn await_next(&mut self) -> StreamEvent<T> {
        loop {
            tokio::select! {
                biased;
                item = self.items.recv(), if !self.items_done => match item {
                    Some(item) => return StreamEvent::Item(item),
                    None => self.items_done = true,
                },
                failure = &mut self.error, if !self.error_done => {
                    self.error_done = true;
                    if let Ok(e) = failure {
                        return StreamEvent::Failed(e);
                    }
                }
                else => return StreamEvent::Finished,
            }
        }
    }

    /// Drains the stream into a vector.
    ///
    /// # Errors
    ///
    /// Returns the stream's failure, discarding the items received so far.
    pub async fn collect(mut self) -> Result<Vec<T>, ClientError> {
        let mut out = Vec::new();
        loop {
            match self.await_next().await {
                StreamEvent::Item(item) => out.push(item),
                StreamEvent::Failed(e) => return Err(e),
                StreamEvent::Finished => return Ok(out),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_started_success() {
        let started = Started::spawn("test", async { Ok::<_, ClientError>(42) });
        let completion = started.await_completion().await;
        assert!(completion.is_success());
        assert_eq!(completion.into_result().unwrap(), 42);
    }

    #[tokio::test]
    async fn test_started_failure() {
        let started: Started<()> =
            Started::spawn("test", async { Err(ClientError::NotFound("topic x".into())) });
        match started.await_completion().await {
            Completion::Failed(ClientError::NotFound(msg)) => assert_eq!(msg, "topic x"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_started_panicking_task_reports_internal() {
        let started: Started<u8> = Started::spawn("test", async {
            if true {
                panic!("boom");
            }
            Ok(0)
        });
        assert!(matches!(
            started.await_completion().await,
            Completion::Failed(ClientError::Internal(_))
        ));
    }

    #[tokio::test]
    async fn test_ready_handle() {
        let started: Started<u8> = Started::ready(Err(ClientError::NotConfigured("schema registry")));
        let err = started.await_completion().await.into_result().unwrap_err();
        assert!(err.to_string().contains("schema registry"));
    }

    #[tokio::test]
    async fn test_stream_items_then_finished() {
        let mut stream = StreamStarted::spawn("test", 4, |tx| async move {
            for i in 0..3 {
                tx.send(i).await.map_err(|_| ClientError::Cancelled)?;
            }
            Ok(())
        });
        for expected in 0..3 {
            match stream.await_next().await {
                StreamEvent::Item(i) => assert_eq!(i, expected),
                other => panic!("unexpected {other:?}"),
            }
        }
        assert!(matches!(stream.await_next().await, StreamEvent::Finished));
        assert!(matches!(stream.await_next().await, StreamEvent::Finished));
    }

    #[tokio::test]
    async fn test_stream_items_before_failure() {
        let mut stream = StreamStarted::spawn("test", 4, |tx| async move {
            tx.send("first").await.map_err(|_| ClientError::Cancelled)?;
            Err(ClientError::Protocol("bad body".into()))
        });
        assert!(matches!(stream.await_next().await, StreamEvent::Item("first")));
        assert!(matches!(
            stream.await_next().await,
            StreamEvent::Failed(ClientError::Protocol(_))
        ));
        assert!(matches!(stream.await_next().await, StreamEvent::Finished));
    }

    #[tokio::test]
    async fn test_stream_collect() {
        let stream = StreamStarted::spawn("test", 1, |tx| async move {
            for i in 0..5 {
                tx.send(i).await.map_err(|_| ClientError::Cancelled)?;
            }
            Ok(())
        });
        assert_eq!(stream.collect().await.unwrap(), vec![0, 1, 2, 3, 4]);
    }
}
