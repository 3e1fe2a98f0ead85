//! Segmented, append-only write-ahead log: length-prefixed, CRC32
//! checksummed records, a configurable fsync policy, and replay on open.

pub mod segment;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::id::IdGenerator;
use crate::label::Labels;
use crate::sample::{Sample, TimeSeries};

use segment::Segment;

/// How (and when) the WAL durably syncs writes to disk.
#[derive(Copy, Clone, Debug)]
pub enum FsyncPolicy {
    /// Every `append` fsyncs before returning.
    PerWrite,
    /// Fsync once every `batch_size` appends; callers in between wait for
    /// the batch that covers their write to be synced.
    PerBatch { batch_size: usize },
    /// A dedicated worker fsyncs every `interval_ms`; callers wait for
    /// the next worker-driven sync that covers their write.
    Periodic { interval_ms: u64 },
}

impl Default for FsyncPolicy {
    fn default() -> Self {
        Self::PerBatch { batch_size: 64 }
    }
}

/// Tracks how many fsync "generations" have completed. A writer records
/// the generation in effect when it appended, then waits until the
/// generation counter passes that value -- i.e. until a sync covering its
/// write has happened.
#[derive(Default)]
struct FsyncState {
    generation: u64,
    pending_since_sync: usize,
}

struct FsyncCoordinator {
    state: Mutex<FsyncState>,
    cv: Condvar,
}

impl FsyncCoordinator {
    fn new() -> Self {
        Self {
            state: Mutex::new(FsyncState::default()),
            cv: Condvar::new(),
        }
    }

    fn current_generation(&self) -> u64 {
        self.state.lock().expect("lock is poisoned").generation
    }

    fn record_pending(&self) {
        self.state.lock().expect("lock is poisoned").pending_since_sync += 1;
    }

    fn advance(&self) {
        let mut guard = self.state.lock().expect("lock is poisoned");
        guard.generation += 1;
        guard.pending_since_sync = 0;
        self.cv.notify_all();
    }

    fn wait_past(&self, generation: u64) {
        let guard = self.state.lock().expect("lock is poisoned");
        let _unused = self
            .cv
            .wait_while(guard, |s| s.generation <= generation)
            .expect("lock is poisoned");
    }

    fn pending_count(&self) -> usize {
        self.state.lock().expect("lock is poisoned").pending_since_sync
    }
}

/// The write-ahead log: one active [`Segment`] plus rotation/replay
/// machinery over the `wal/` subdirectory.
pub struct Wal {
    dir: PathBuf,
    segment_max_bytes: u64,
    policy: FsyncPolicy,
    active: Arc<Mutex<Segment>>,
    segment_ids: IdGenerator,
    fsync: Arc<FsyncCoordinator>,
    periodic_worker: Mutex<Option<PeriodicWorker>>,
}

struct PeriodicWorker {
    stop: std::sync::mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl Wal {
    /// Opens (creating if absent) the WAL directory, replaying every
    /// existing segment via `on_record`, and starting a fresh active
    /// segment for new writes.
    pub fn open(data_dir: &Path, segment_max_bytes: u64, policy: FsyncPolicy, mut on_record: impl FnMut(TimeSeries)) -> Result<Self> {
        let dir = data_dir.join("wal");
        fs::create_dir_all(&dir)?;

        let mut segment_ids = 0u64;
        let mut entries: Vec<PathBuf> = fs::read_dir(&dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.file_name().and_then(|n| n.to_str()).is_some_and(|n| n.starts_with("wal_")))
            .collect();
        entries.sort();

        for path in &entries {
            if let Some(id) = segment::parse_segment_id(path) {
                segment_ids = segment_ids.max(id + 1);
            }
            segment::replay(path, &mut on_record)?;
        }

        let id_gen = IdGenerator::starting_at(segment_ids);
        let active = Segment::create(&dir, id_gen.next())?;

        let wal = Self {
            dir,
            segment_max_bytes,
            policy,
            active: Arc::new(Mutex::new(active)),
            segment_ids: id_gen,
            fsync: Arc::new(FsyncCoordinator::new()),
            periodic_worker: Mutex::new(None),
        };

        if let FsyncPolicy::Periodic { interval_ms } = policy {
            wal.start_periodic_worker(interval_ms);
        }

        Ok(wal)
    }

    fn start_periodic_worker(&self, interval_ms: u64) {
        let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();
        let active = Arc::clone(&self.active);
        let fsync = Arc::clone(&self.fsync);

        let handle = std::thread::Builder::new()
            .name("wal-fsync".into())
            .spawn(move || loop {
                match stop_rx.recv_timeout(Duration::from_millis(interval_ms)) {
                    Ok(()) | Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
                    Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
                        if fsync.pending_count() > 0 {
                            let _ = active.lock().expect("lock is poisoned").sync();
                        }
                        fsync.advance();
                    }
                }
            })
            .expect("failed to spawn wal-fsync thread");

        *self.periodic_worker.lock().expect("lock is poisoned") = Some(PeriodicWorker { stop: stop_tx, handle });
    }

    /// Appends one record and, per the configured [`FsyncPolicy`], blocks
    /// until it is durable before returning.
    pub fn append(&self, series: &TimeSeries) -> Result<()> {
        let generation_before = self.fsync.current_generation();
        let payload = encode_record(series);

        {
            let mut segment = self.active.lock().expect("lock is poisoned");
            segment.append(&payload)?;
            if segment.len_bytes() >= self.segment_max_bytes {
                let new_segment = Segment::create(&self.dir, self.segment_ids.next())?;
                let old = std::mem::replace(&mut *segment, new_segment);
                old.sync()?;
            }
        }

        match self.policy {
            FsyncPolicy::PerWrite => {
                self.active.lock().expect("lock is poisoned").sync()?;
                self.fsync.advance();
            }
            FsyncPolicy::PerBatch { batch_size } => {
                self.fsync.record_pending();
                if self.fsync.pending_count() >= batch_size {
                    self.active.lock().expect("lock is poisoned").sync()?;
                    self.fsync.advance();
                } else {
                    self.fsync.wait_past(generation_before);
                }
            }
            FsyncPolicy::Periodic { .. } => {
                self.fsync.record_pending();
                self.fsync.wait_past(generation_before);
            }
        }

        Ok(())
    }

    /// Truncates the WAL after a clean shutdown that has flushed every
    /// block to a cold file; subsequent `open` has nothing to replay.
    pub fn truncate(&self) -> Result<()> {
        let mut segment = self.active.lock().expect("lock is poisoned");
        segment.truncate()?;
        Ok(())
    }
}

impl Drop for Wal {
    fn drop(&mut self) {
        if let Some(worker) = self.periodic_worker.lock().expect("lock is poisoned").take() {
            let _ = worker.stop.send(());
            let _ = worker.handle.join();
        }
    }
}

fn encode_record(series: &TimeSeries) -> Vec<u8> {
    segment::encode_time_series(series)
}

#[cfg(test)]
pub(crate) fn decode_record_for_test(data: &[u8]) -> Option<(Labels, Vec<Sample>)> {
    segment::decode_time_series(data).map(|ts| (ts.labels, ts.samples))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn replays_appended_records_after_reopen() {
        let dir = tempdir().unwrap();
        let mut replayed = Vec::new();

        {
            let wal = Wal::open(dir.path(), 1024 * 1024, FsyncPolicy::PerWrite, |_| {}).unwrap();
            let mut ts = TimeSeries::new(Labels::from_pairs([("__name__", "cpu")]));
            ts.samples.push(Sample::new(1000, 1.0));
            wal.append(&ts).unwrap();
        }

        let _wal = Wal::open(dir.path(), 1024 * 1024, FsyncPolicy::PerWrite, |ts| replayed.push(ts)).unwrap();

        assert_eq!(1, replayed.len());
        assert_eq!(Some("cpu"), replayed[0].labels.name());
        assert_eq!(1000, replayed[0].samples[0].timestamp);
    }

    #[test]
    fn truncate_empties_replay_on_next_open() {
        let dir = tempdir().unwrap();

        {
            let wal = Wal::open(dir.path(), 1024 * 1024, FsyncPolicy::PerWrite, |_| {}).unwrap();
            let mut ts = TimeSeries::new(Labels::from_pairs([("__name__", "cpu")]));
            ts.samples.push(Sample::new(1, 1.0));
            wal.append(&ts).unwrap();
            wal.truncate().unwrap();
        }

        let mut replayed = Vec::new();
        let _wal = Wal::open(dir.path(), 1024 * 1024, FsyncPolicy::PerWrite, |ts| replayed.push(ts)).unwrap();
        assert!(replayed.is_empty());
    }

    #[test]
    fn per_batch_policy_eventually_delivers_without_deadlock() {
        let dir = tempdir().unwrap();
        let wal = Wal::open(dir.path(), 1024 * 1024, FsyncPolicy::PerBatch { batch_size: 4 }, |_| {}).unwrap();
        for i in 0..10 {
            let mut ts = TimeSeries::new(Labels::from_pairs([("__name__", "cpu")]));
            ts.samples.push(Sample::new(i, i as f64));
            wal.append(&ts).unwrap();
        }
    }
}
