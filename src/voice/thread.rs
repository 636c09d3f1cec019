//! Named background threads with a bounded join

use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};

use crate::{Error, Result};

/// Outcome of waiting for a worker thread
pub enum Joined<T> {
    /// Thread returned normally
    Finished(T),
    /// Thread panicked
    Panicked,
    /// Thread is still running; the handle is given back
    TimedOut(WorkerThread<T>),
}

/// A spawned thread that signals completion through a channel
///
/// `JoinHandle::join` cannot time out, so the thread holds the sending half
/// of a channel that disconnects when it exits.
pub struct WorkerThread<T> {
    handle: JoinHandle<T>,
    done: Receiver<()>,
}

impl<T: Send + 'static> WorkerThread<T> {
    /// Spawn `f` on a thread called `name`
    ///
    /// # Errors
    ///
    /// Returns error if the OS refuses to create the thread
    pub fn spawn<F>(name: &str, f: F) -> Result<Self>
    where
        F: FnOnce() -> T + Send + 'static,
    {
        let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(0);

        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let _done = done_tx;
                f()
            })
            .map_err(|e| Error::Voice(format!("failed to spawn {name} thread: {e}")))?;

        Ok(Self {
            handle,
            done: done_rx,
        })
    }

    /// Wait up to `timeout` for the thread to exit
    pub fn join_timeout(self, timeout: Duration) -> Joined<T> {
        match self.done.recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => Joined::TimedOut(self),
            Ok(()) | Err(RecvTimeoutError::Disconnected) => match self.handle.join() {
                Ok(value) => Joined::Finished(value),
                Err(_) => Joined::Panicked,
            },
        }
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_returns_value() {
        let thread = WorkerThread::spawn("adder", || 2 + 2).unwrap();
        match thread.join_timeout(Duration::from_secs(1)) {
            Joined::Finished(v) => assert_eq!(v, 4),
            _ => panic!("thread should have finished"),
        }
    }

    #[test]
    fn test_join_times_out() {
        let (release_tx, release_rx) = crossbeam_channel::bounded::<()>(0);
        let thread = WorkerThread::spawn("blocked", move || release_rx.recv().is_ok()).unwrap();

        let Joined::TimedOut(thread) = thread.join_timeout(Duration::from_millis(50)) else {
            panic!("thread should still be running");
        };

        release_tx.send(()).unwrap();
        assert!(matches!(
            thread.join_timeout(Duration::from_secs(1)),
            Joined::Finished(true)
        ));
    }

    #[test]
    fn test_join_reports_panic() {
        let thread = WorkerThread::spawn("panics", || -> u8 { panic!("boom") }).unwrap();
        assert!(matches!(
            thread.join_timeout(Duration::from_secs(1)),
            Joined::Panicked
        ));
    }
}
