//! Non-real-time recovery queue and interruption retry bookkeeping.
//!
//! The queue is a dedicated OS thread driving a current-thread tokio
//! runtime, so jobs execute one at a time in submission order and may block.
//! It is never used from the real-time path.

use std::future::Future;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tokio::runtime::{Builder, Handle};
use tokio::sync::oneshot;

use crate::error::AudioError;

pub struct RecoveryQueue {
    handle: Handle,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl RecoveryQueue {
    pub fn start(name: &str) -> Result<Self, AudioError> {
        let runtime = Builder::new_current_thread()
            .enable_time()
            .build()
            .map_err(|e| AudioError::Scheduler(e.to_string()))?;
        let handle = runtime.handle().clone();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let thread = thread::Builder::new()
            .name(name.into())
            .spawn(move || {
                // Either an explicit shutdown or the sender being dropped ends the loop.
                let _ = runtime.block_on(shutdown_rx);
                log::debug!("Recovery queue stopped");
            })
            .map_err(|e| AudioError::Scheduler(e.to_string()))?;

        Ok(Self {
            handle,
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        })
    }

    /// Runs `job` on the queue as soon as earlier jobs have finished.
    pub fn dispatch<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.handle.spawn(async move { job() });
    }

    /// Runs `job` on the queue after `delay`.
    pub fn dispatch_after<F>(&self, delay: Duration, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            job()
        });
    }

    /// Runs `job` every `period` (first run after one period) until the
    /// returned handle is cancelled or dropped.
    pub fn every<F>(&self, period: Duration, mut job: F) -> TaskHandle
    where
        F: FnMut() + Send + 'static,
    {
        let task = self.handle.spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                ticker.tick().await;
                job();
            }
        });
        TaskHandle { task: Some(task) }
    }

    /// Drives an arbitrary future on the queue.
    pub fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handle.spawn(future);
    }
}

impl Drop for RecoveryQueue {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        // The last engine reference may be released from a job on this very
        // thread; joining there would deadlock, so only join from elsewhere.
        if let Some(thread) = self.thread.take() {
            if thread.thread().id() != thread::current().id() {
                let _ = thread.join();
            }
        }
    }
}

/// Cancellable periodic task.
pub struct TaskHandle {
    task: Option<tokio::task::JoinHandle<()>>,
}

impl TaskHandle {
    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Outcome of recording a failed restart attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Schedule another attempt; carries the attempt count so far.
    Retry { attempt: u32, chain: u64 },
    /// Attempts exhausted; the chain is over.
    GiveUp { attempts: u32 },
}

/// Bounded retry counter for one direction's interruption recovery.
///
/// Each interruption end starts a new chain; scheduled attempts carry the
/// chain id they belong to so a superseded chain stops on its next tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryState {
    attempts: u32,
    chain: u64,
    max_attempts: u32,
}

impl RetryState {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            attempts: 0,
            chain: 0,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Starts a fresh chain and returns its id.
    pub fn begin_chain(&mut self) -> u64 {
        self.chain = self.chain.wrapping_add(1);
        self.attempts = 0;
        self.chain
    }

    pub fn is_current(&self, chain: u64) -> bool {
        self.chain == chain
    }

    pub fn record_failure(&mut self) -> RetryDecision {
        self.attempts += 1;
        if self.attempts < self.max_attempts {
            RetryDecision::Retry {
                attempt: self.attempts,
                chain: self.chain,
            }
        } else {
            let attempts = self.attempts;
            self.attempts = 0;
            RetryDecision::GiveUp { attempts }
        }
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, mpsc};

    #[test]
    fn retry_gives_up_after_max_attempts() {
        let mut retry = RetryState::new(5);
        let chain = retry.begin_chain();
        for attempt in 1..5 {
            assert_eq!(
                retry.record_failure(),
                RetryDecision::Retry { attempt, chain }
            );
        }
        assert_eq!(retry.record_failure(), RetryDecision::GiveUp { attempts: 5 });
        assert_eq!(retry.attempts(), 0);
    }

    #[test]
    fn new_chain_supersedes_old() {
        let mut retry = RetryState::new(5);
        let first = retry.begin_chain();
        retry.record_failure();
        let second = retry.begin_chain();
        assert_ne!(first, second);
        assert!(!retry.is_current(first));
        assert!(retry.is_current(second));
        assert_eq!(retry.attempts(), 0);
    }

    #[test]
    fn jobs_run_in_order() {
        let queue = RecoveryQueue::start("test-recovery").unwrap();
        let (tx, rx) = mpsc::channel();
        for i in 0..5 {
            let tx = tx.clone();
            queue.dispatch(move || tx.send(i).unwrap());
        }
        let got: Vec<i32> = (0..5)
            .map(|_| rx.recv_timeout(Duration::from_secs(2)).unwrap())
            .collect();
        assert_eq!(got, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn delayed_job_runs_after_delay() {
        let queue = RecoveryQueue::start("test-recovery").unwrap();
        let (tx, rx) = mpsc::channel();
        let started = std::time::Instant::now();
        queue.dispatch_after(Duration::from_millis(30), move || tx.send(()).unwrap());
        rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn periodic_task_stops_when_cancelled() {
        let queue = RecoveryQueue::start("test-recovery").unwrap();
        let ticks = Arc::new(AtomicU32::new(0));
        let mut handle = {
            let ticks = ticks.clone();
            queue.every(Duration::from_millis(10), move || {
                ticks.fetch_add(1, Ordering::SeqCst);
            })
        };
        std::thread::sleep(Duration::from_millis(100));
        handle.cancel();
        std::thread::sleep(Duration::from_millis(20));
        let after_cancel = ticks.load(Ordering::SeqCst);
        assert!(after_cancel >= 2);
        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(ticks.load(Ordering::SeqCst), after_cancel);
    }
}
