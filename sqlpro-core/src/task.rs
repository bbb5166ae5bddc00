//! Deferred work and one-shot result handles.
//!
//! Every submission pairs a [`Completer`] with a [`TaskHandle`]. The
//! completer travels inside the queued [`Task`] and is consumed when it
//! delivers the result, so a handle is resolved at most once. If the task is
//! dropped without running (queue drained at shutdown, panic on the worker)
//! the completer goes with it and the handle resolves to
//! [`SqlError::Aborted`]; a handle therefore never stays pending forever.
//!
//! Handles can be awaited from async code or waited on from a plain thread:
//!
//! ```rust
//! use sqlpro_core::task::{completion, TaskHandle};
//!
//! let (completer, handle) = completion::<u32>();
//! std::thread::spawn(move || completer.complete(Ok(7)));
//! assert_eq!(handle.wait().unwrap(), 7);
//!
//! let rejected: TaskHandle<u32> = TaskHandle::rejected(sqlpro_core::SqlError::PoolClosed);
//! assert!(rejected.wait().is_err());
//! ```

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::error::{SqlError, SqlResult};

/// A unit of deferred work executed by a pool worker.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Create a linked completer/handle pair.
pub fn completion<T>() -> (Completer<T>, TaskHandle<T>) {
    let (tx, rx) = oneshot::channel();
    (
        Completer { tx },
        TaskHandle {
            state: HandleState::Pending(rx),
        },
    )
}

/// The producing half of a task result.
#[derive(Debug)]
pub struct Completer<T> {
    tx: oneshot::Sender<SqlResult<T>>,
}

impl<T> Completer<T> {
    /// Deliver the result. A caller that already dropped its handle is ignored.
    pub fn complete(self, result: SqlResult<T>) {
        let _ = self.tx.send(result);
    }
}

#[derive(Debug)]
enum HandleState<T> {
    Pending(oneshot::Receiver<SqlResult<T>>),
    Ready(Option<SqlResult<T>>),
}

/// The consuming half of a task result.
///
/// Resolves to the task's [`SqlResult`]. A saturation rejection or a closed
/// pool yields an already-resolved handle.
#[derive(Debug)]
#[must_use = "a task handle does nothing unless awaited or waited on"]
pub struct TaskHandle<T> {
    state: HandleState<T>,
}

impl<T> TaskHandle<T> {
    /// A handle already resolved with `err`.
    pub fn rejected(err: SqlError) -> Self {
        Self {
            state: HandleState::Ready(Some(Err(err))),
        }
    }

    /// Check if the handle was resolved at creation time.
    pub fn is_ready(&self) -> bool {
        matches!(self.state, HandleState::Ready(_))
    }

    /// Block the current thread until the result is available.
    ///
    /// Must not be called from inside an async runtime; `.await` the handle
    /// there instead.
    pub fn wait(self) -> SqlResult<T> {
        match self.state {
            HandleState::Pending(rx) => rx.blocking_recv().unwrap_or(Err(SqlError::Aborted)),
            HandleState::Ready(result) => result.unwrap_or(Err(SqlError::Aborted)),
        }
    }

    /// Take the result if it is available, without blocking.
    pub fn try_take(&mut self) -> Option<SqlResult<T>> {
        match &mut self.state {
            HandleState::Pending(rx) => match rx.try_recv() {
                Ok(result) => {
                    self.state = HandleState::Ready(None);
                    Some(result)
                }
                Err(oneshot::error::TryRecvError::Empty) => None,
                Err(oneshot::error::TryRecvError::Closed) => {
                    self.state = HandleState::Ready(None);
                    Some(Err(SqlError::Aborted))
                }
            },
            HandleState::Ready(result) => result.take(),
        }
    }
}

// The result is never pinned in place; it is moved out once ready.
impl<T> Unpin for TaskHandle<T> {}

impl<T> Future for TaskHandle<T> {
    type Output = SqlResult<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match &mut this.state {
            HandleState::Pending(rx) => match Pin::new(rx).poll(cx) {
                Poll::Ready(result) => {
                    this.state = HandleState::Ready(None);
                    Poll::Ready(result.unwrap_or(Err(SqlError::Aborted)))
                }
                Poll::Pending => Poll::Pending,
            },
            HandleState::Ready(result) => {
                Poll::Ready(result.take().unwrap_or(Err(SqlError::Aborted)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_wait_receives_value() {
        let (completer, handle) = completion();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            completer.complete(Ok("done"));
        });
        assert_eq!(handle.wait().unwrap(), "done");
    }

    #[test]
    fn test_dropped_completer_aborts() {
        let (completer, handle) = completion::<()>();
        drop(completer);
        assert!(handle.wait().unwrap_err().is_aborted());
    }

    #[test]
    fn test_rejected_handle() {
        let handle: TaskHandle<()> = TaskHandle::rejected(SqlError::saturated(2));
        assert!(handle.is_ready());
        assert!(handle.wait().unwrap_err().is_saturated());
    }

    #[test]
    fn test_try_take() {
        let (completer, mut handle) = completion();
        assert!(handle.try_take().is_none());

        completer.complete(Ok(5));
        assert_eq!(handle.try_take().unwrap().unwrap(), 5);
        assert!(handle.try_take().is_none());
    }

    #[test]
    fn test_complete_after_handle_dropped() {
        let (completer, handle) = completion::<u8>();
        drop(handle);
        completer.complete(Ok(1));
    }

    #[tokio::test]
    async fn test_await_handle() {
        let (completer, handle) = completion();
        thread::spawn(move || completer.complete(Ok(vec![1, 2, 3])));
        assert_eq!(handle.await.unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_await_rejected_handle() {
        let handle: TaskHandle<u8> = TaskHandle::rejected(SqlError::PoolClosed);
        assert!(matches!(handle.await, Err(SqlError::PoolClosed)));
    }
}
