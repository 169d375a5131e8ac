//! Process-wide per-monitor mutual exclusion.
//!
//! One [`LockRecord`] per live [`IoPath`]; record creation is lazy and
//! records are kept for the process lifetime (bounded by hardware monitor
//! count). Only the `lock_by_io_path`/`unlock_by_io_path` surface is
//! exposed; the legacy per-handle locking API the original tool carried
//! is not reproduced here.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::error::LockError;
use crate::path::IoPath;

const DEFAULT_MAX_LOCK_WAIT_MS: u64 = 4000;
const DEFAULT_LOCK_POLL_INTERVAL_MS: u64 = 100;

#[derive(Debug)]
struct LockRecord {
    owner: Mutex<Option<ThreadId>>,
}

impl LockRecord {
    fn new() -> Self {
        LockRecord {
            owner: Mutex::new(None),
        }
    }
}

/// Process-wide table of [`LockRecord`]s keyed by [`IoPath`].
#[derive(Debug)]
pub struct LockTable {
    records: Mutex<HashMap<IoPath, Arc<LockRecord>>>,
    max_wait: Duration,
    poll_interval: Duration,
}

impl Default for LockTable {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LOCK_WAIT_MS, DEFAULT_LOCK_POLL_INTERVAL_MS)
    }
}

impl LockTable {
    pub fn new(max_wait_ms: u64, poll_interval_ms: u64) -> Self {
        LockTable {
            records: Mutex::new(HashMap::new()),
            max_wait: Duration::from_millis(max_wait_ms),
            poll_interval: Duration::from_millis(poll_interval_ms),
        }
    }

    fn record_for(&self, io_path: IoPath) -> Arc<LockRecord> {
        let mut records = self.records.lock().unwrap();
        records
            .entry(io_path)
            .or_insert_with(|| Arc::new(LockRecord::new()))
            .clone()
    }

    /// Acquire the lock for `io_path`. If `wait` is true, blocks until
    /// acquired; otherwise polls at the configured interval up to the
    /// configured cap before failing with [`LockError::Locked`].
    pub fn lock(&self, io_path: IoPath, wait: bool) -> Result<LockToken<'_>, LockError> {
        let record = self.record_for(io_path);
        let this_thread = thread::current().id();

        {
            let owner = record.owner.lock().unwrap();
            if *owner == Some(this_thread) {
                return Err(LockError::AlreadyOpen(io_path));
            }
        }

        let deadline = Instant::now() + self.max_wait;
        loop {
            {
                let mut owner = record.owner.lock().unwrap();
                if owner.is_none() {
                    *owner = Some(this_thread);
                    debug!("acquired lock for {io_path}");
                    return Ok(LockToken {
                        table: self,
                        io_path,
                    });
                }
                if !wait && Instant::now() >= deadline {
                    let holder = owner.unwrap();
                    return Err(LockError::Locked(io_path, holder));
                }
            }
            thread::sleep(self.poll_interval);
        }
    }

    /// Release the lock for `io_path`. Fails `Locked` if the current
    /// thread is not the recorded owner; the record is left untouched in
    /// that case.
    pub fn unlock(&self, io_path: IoPath) -> Result<(), LockError> {
        let record = self.record_for(io_path);
        let this_thread = thread::current().id();
        let mut owner = record.owner.lock().unwrap();
        match *owner {
            Some(id) if id == this_thread => {
                *owner = None;
                Ok(())
            }
            Some(id) => Err(LockError::Locked(io_path, id)),
            None => Err(LockError::Locked(io_path, this_thread)),
        }
    }

    /// Release every lock owned by the current thread. Used when a session
    /// terminates without pairing every open with a close.
    pub fn unlock_all_for_current_thread(&self) -> usize {
        let this_thread = thread::current().id();
        let records = self.records.lock().unwrap();
        let mut released = 0;
        for record in records.values() {
            let mut owner = record.owner.lock().unwrap();
            if *owner == Some(this_thread) {
                *owner = None;
                released += 1;
            }
        }
        if released > 0 {
            warn!("released {released} lock(s) left held by a terminating session");
        }
        released
    }
}

/// RAII guard returned by [`LockTable::lock`]; drops release the lock.
#[derive(Debug)]
pub struct LockToken<'a> {
    table: &'a LockTable,
    io_path: IoPath,
}

impl Drop for LockToken<'_> {
    fn drop(&mut self) {
        let _ = self.table.unlock(self.io_path);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Arc as StdArc;
    use std::time::Instant;

    #[test]
    fn same_thread_reacquire_fails_immediately() {
        let table = LockTable::default();
        let path = IoPath::I2c { bus_number: 1 };
        let _first = table.lock(path, false).unwrap();
        let err = table.lock(path, false).unwrap_err();
        assert!(matches!(err, LockError::AlreadyOpen(_)));
    }

    #[test]
    fn unlock_by_non_owner_fails_without_mutating() {
        let table = LockTable::default();
        let path = IoPath::I2c { bus_number: 2 };
        let token = table.lock(path, false).unwrap();
        let handle = std::thread::spawn({
            let table = StdArc::new(table);
            move || table.unlock(path)
        });
        // since `table` was moved into the Arc for the spawned thread, this
        // test only checks same-process non-owner semantics indirectly via
        // the spawned thread's own attempt.
        let result = handle.join().unwrap();
        assert!(result.is_err());
        drop(token);
    }

    #[test]
    fn contention_respects_cap() {
        let table = StdArc::new(LockTable::new(300, 20));
        let path = IoPath::I2c { bus_number: 3 };
        let _held = table.lock(path, false).unwrap();
        let t = std::thread::spawn({
            let table = table.clone();
            move || {
                let start = Instant::now();
                let err = table.lock(path, false).unwrap_err();
                (start.elapsed(), err)
            }
        });
        let (elapsed, err) = t.join().unwrap();
        assert!(matches!(err, LockError::Locked(_, _)));
        assert!(elapsed.as_millis() >= 300);
    }
}
