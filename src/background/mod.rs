//! Task queue + worker pool for the engine's maintenance work ([`TaskKind`]):
//! flush, compaction, retention, cache maintenance, and metrics collection,
//! expressed as plain-data tasks over a bounded channel rather than
//! "submit with callback".
//!
//! `Flush` tasks travel on their own channel so they preempt everything
//! else a worker might otherwise pick up; shutdown drains that channel up
//! to a timeout before forcibly stopping, a cooperative-shutdown flag
//! checked between steps rather than forced cancellation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::error::{Error, Result};

/// The default time `shutdown` waits for outstanding `Flush` tasks to
/// drain before forcibly stopping.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// A unit of background work. Variants carry no payload: each tells the
/// engine (which owns the handler closure) to act on its own current
/// state -- e.g. `Flush` means "flush whatever is sealed right now",
/// not "flush this specific block".
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TaskKind {
    Flush,
    Compaction,
    Retention,
    CacheMaintenance,
    MetricsCollection,
}

impl TaskKind {
    fn is_high_priority(self) -> bool {
        matches!(self, Self::Flush)
    }
}

#[derive(Default)]
struct StopSignal(std::sync::atomic::AtomicBool);

impl StopSignal {
    fn send(&self) {
        self.0.store(true, Ordering::Release);
    }

    fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

type Handler = Arc<dyn Fn(TaskKind) + Send + Sync>;

/// The background processor: a fixed worker pool draining a high-priority
/// (`Flush`) channel ahead of a normal-priority channel carrying every
/// other task kind.
pub struct BackgroundProcessor {
    high_tx: mpsc::Sender<TaskKind>,
    normal_tx: mpsc::Sender<TaskKind>,
    stop: Arc<StopSignal>,
    pending_flush: Arc<AtomicUsize>,
    handles: Vec<JoinHandle<()>>,
}

impl BackgroundProcessor {
    /// Spawns `num_threads` workers (minimum 1), each running `handler`
    /// for every task it dequeues.
    pub fn spawn(num_threads: usize, handler: Handler) -> Self {
        let (high_tx, high_rx) = mpsc::channel::<TaskKind>();
        let (normal_tx, normal_rx) = mpsc::channel::<TaskKind>();
        let high_rx = Arc::new(Mutex::new(high_rx));
        let normal_rx = Arc::new(Mutex::new(normal_rx));
        let stop = Arc::new(StopSignal::default());
        let pending_flush = Arc::new(AtomicUsize::new(0));

        let handles = (0..num_threads.max(1))
            .map(|worker_id| {
                let high_rx = Arc::clone(&high_rx);
                let normal_rx = Arc::clone(&normal_rx);
                let stop = Arc::clone(&stop);
                let handler = Arc::clone(&handler);
                let pending_flush = Arc::clone(&pending_flush);
                thread::spawn(move || worker_loop(worker_id, &high_rx, &normal_rx, &stop, &handler, &pending_flush))
            })
            .collect();

        Self { high_tx, normal_tx, stop, pending_flush, handles }
    }

    /// Enqueues `kind`. Returns [`Error::Unavailable`] if the processor is
    /// shutting down and has dropped its receivers.
    pub fn submit(&self, kind: TaskKind) -> Result<()> {
        if kind.is_high_priority() {
            self.pending_flush.fetch_add(1, Ordering::Relaxed);
            self.high_tx.send(kind).map_err(|_| Error::Unavailable("background processor is shutting down".into()))
        } else {
            self.normal_tx.send(kind).map_err(|_| Error::Unavailable("background processor is shutting down".into()))
        }
    }

    #[must_use]
    pub fn pending_flush_count(&self) -> usize {
        self.pending_flush.load(Ordering::Relaxed)
    }

    /// Signals shutdown, waits up to `timeout` for outstanding `Flush`
    /// tasks to drain, then stops workers unconditionally (abandoning any
    /// remaining `Compaction`/`Retention`/etc. tasks:
    /// "Shutdown drains remaining Flush tasks but may cancel Compaction").
    pub fn shutdown(mut self, timeout: Duration) {
        self.stop.send();
        let deadline = Instant::now() + timeout;
        while self.pending_flush.load(Ordering::Relaxed) > 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        if self.pending_flush.load(Ordering::Relaxed) > 0 {
            warn!(
                "background processor shutdown timed out with {} flush task(s) still pending",
                self.pending_flush.load(Ordering::Relaxed)
            );
        }

        drop(std::mem::replace(&mut self.high_tx, mpsc::channel().0));
        drop(std::mem::replace(&mut self.normal_tx, mpsc::channel().0));

        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop(
    worker_id: usize,
    high_rx: &Arc<Mutex<mpsc::Receiver<TaskKind>>>,
    normal_rx: &Arc<Mutex<mpsc::Receiver<TaskKind>>>,
    stop: &Arc<StopSignal>,
    handler: &Handler,
    pending_flush: &Arc<AtomicUsize>,
) {
    loop {
        let high_task = high_rx.lock().expect("lock is poisoned").try_recv().ok();

        let task = match high_task {
            Some(task) => Some(task),
            None => match normal_rx.lock().expect("lock is poisoned").recv_timeout(Duration::from_millis(100)) {
                Ok(task) => Some(task),
                Err(RecvTimeoutError::Timeout) => None,
                Err(RecvTimeoutError::Disconnected) => {
                    if stop.is_stopped() {
                        return;
                    }
                    None
                }
            },
        };

        match task {
            Some(task) => {
                debug!("background worker {worker_id} running {task:?}");
                let is_flush = task.is_high_priority();
                handler(task);
                if is_flush {
                    pending_flush.fetch_sub(1, Ordering::Relaxed);
                }
            }
            None => {
                if stop.is_stopped() && drain_remaining_flush(high_rx, handler, pending_flush) {
                    return;
                }
            }
        }
    }
}

/// On shutdown, runs any `Flush` tasks still sitting in the high-priority
/// channel before a worker exits, so a slow-to-submit flush isn't dropped
/// just because this worker happened to be idle when `stop` fired.
fn drain_remaining_flush(
    high_rx: &Arc<Mutex<mpsc::Receiver<TaskKind>>>,
    handler: &Handler,
    pending_flush: &Arc<AtomicUsize>,
) -> bool {
    let rx = high_rx.lock().expect("lock is poisoned");
    match rx.try_recv() {
        Ok(task) => {
            drop(rx);
            handler(task);
            pending_flush.fetch_sub(1, Ordering::Relaxed);
            false
        }
        Err(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn flush_and_other_tasks_both_run() {
        let flushes = Arc::new(AtomicU32::new(0));
        let others = Arc::new(AtomicU32::new(0));
        let (f, o) = (Arc::clone(&flushes), Arc::clone(&others));

        let processor = BackgroundProcessor::spawn(
            2,
            Arc::new(move |kind| match kind {
                TaskKind::Flush => {
                    f.fetch_add(1, Ordering::SeqCst);
                }
                _ => {
                    o.fetch_add(1, Ordering::SeqCst);
                }
            }),
        );

        processor.submit(TaskKind::Flush).unwrap();
        processor.submit(TaskKind::Compaction).unwrap();
        processor.submit(TaskKind::Retention).unwrap();

        processor.shutdown(DEFAULT_SHUTDOWN_TIMEOUT);

        assert_eq!(1, flushes.load(Ordering::SeqCst));
        assert_eq!(2, others.load(Ordering::SeqCst));
    }

    #[test]
    fn shutdown_drains_pending_flush_tasks() {
        let flushes = Arc::new(AtomicU32::new(0));
        let f = Arc::clone(&flushes);

        let processor = BackgroundProcessor::spawn(1, Arc::new(move |_| { f.fetch_add(1, Ordering::SeqCst); }));
        for _ in 0..5 {
            processor.submit(TaskKind::Flush).unwrap();
        }
        processor.shutdown(DEFAULT_SHUTDOWN_TIMEOUT);

        assert_eq!(5, flushes.load(Ordering::SeqCst));
    }

    #[test]
    fn shutdown_with_no_pending_tasks_returns_promptly() {
        let processor = BackgroundProcessor::spawn(1, Arc::new(|_| {}));
        let started = Instant::now();
        processor.shutdown(DEFAULT_SHUTDOWN_TIMEOUT);
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
