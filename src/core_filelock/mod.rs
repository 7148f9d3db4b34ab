//! Process-wide cooperative file locking.
//!
//! One table per server, keyed by physical absolute path. Locks are
//! advisory: sessions of this server honor them, the OS does not know
//! about them. The policy is writer-preferring: once a writer is waiting
//! on a path, new readers queue up behind it.
//!
//! An entry is garbage-collected as soon as its three counters reach
//! zero, so the table only ever holds paths with outstanding interest.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct LockEntry {
    readers: usize,
    writers: usize,
    waiting_writers: usize,
    notify: Arc<Notify>,
}

impl LockEntry {
    fn is_idle(&self) -> bool {
        self.readers == 0 && self.writers == 0 && self.waiting_writers == 0
    }
}

/// Handle to the process-wide lock table. Cheap to clone; create one at
/// startup and pass it into each session.
#[derive(Debug, Clone, Default)]
pub struct LockTable {
    entries: Arc<Mutex<HashMap<PathBuf, LockEntry>>>,
}

/// Shared (reader) hold on a path. Released on drop.
#[derive(Debug)]
pub struct SharedGuard {
    table: LockTable,
    path: PathBuf,
}

/// Exclusive (writer) hold on a path. Released on drop.
#[derive(Debug)]
pub struct ExclusiveGuard {
    table: LockTable,
    path: PathBuf,
}

/// Either kind of hold, for callers that carry one generically.
#[derive(Debug)]
pub enum LockGuard {
    Shared(SharedGuard),
    Exclusive(ExclusiveGuard),
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires a shared lock, waiting while a writer holds the path or
    /// any writer is queued for it.
    pub async fn acquire_shared(&self, path: &Path) -> SharedGuard {
        loop {
            let notify = {
                let mut map = self.entries.lock().unwrap();
                let entry = map.entry(path.to_path_buf()).or_default();
                if entry.writers == 0 && entry.waiting_writers == 0 {
                    entry.readers += 1;
                    return SharedGuard {
                        table: self.clone(),
                        path: path.to_path_buf(),
                    };
                }
                entry.notify.clone()
            };

            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            // Re-check after registering interest: a release between the
            // first check and enable() would otherwise be missed.
            {
                let mut map = self.entries.lock().unwrap();
                let entry = map.entry(path.to_path_buf()).or_default();
                if entry.writers == 0 && entry.waiting_writers == 0 {
                    entry.readers += 1;
                    return SharedGuard {
                        table: self.clone(),
                        path: path.to_path_buf(),
                    };
                }
            }

            notified.await;
        }
    }

    /// Acquires an exclusive lock, waiting until no reader or writer
    /// holds the path. The waiting-writer registration is what makes new
    /// readers queue behind this call.
    pub async fn acquire_exclusive(&self, path: &Path) -> ExclusiveGuard {
        let mut registration = WaitingWriter::register(self, path);

        loop {
            let notify = {
                let mut map = self.entries.lock().unwrap();
                let entry = map.entry(path.to_path_buf()).or_default();
                if entry.writers == 0 && entry.readers == 0 {
                    entry.waiting_writers -= 1;
                    entry.writers = 1;
                    registration.disarm();
                    return ExclusiveGuard {
                        table: self.clone(),
                        path: path.to_path_buf(),
                    };
                }
                entry.notify.clone()
            };

            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut map = self.entries.lock().unwrap();
                let entry = map.entry(path.to_path_buf()).or_default();
                if entry.writers == 0 && entry.readers == 0 {
                    entry.waiting_writers -= 1;
                    entry.writers = 1;
                    registration.disarm();
                    return ExclusiveGuard {
                        table: self.clone(),
                        path: path.to_path_buf(),
                    };
                }
            }

            notified.await;
        }
    }

    /// True when a writer currently holds the path. Only good enough for
    /// phrasing a "busy" reply; the blocking acquire is the actual
    /// serialization point.
    pub fn is_exclusive_locked(&self, path: &Path) -> bool {
        let map = self.entries.lock().unwrap();
        map.get(path).map(|e| e.writers > 0).unwrap_or(false)
    }

    /// Number of readers currently holding the path. Same caveat as
    /// [`LockTable::is_exclusive_locked`].
    pub fn shared_count(&self, path: &Path) -> usize {
        let map = self.entries.lock().unwrap();
        map.get(path).map(|e| e.readers).unwrap_or(0)
    }

    /// Number of live entries; zero when nothing holds or awaits a lock.
    pub fn entry_count(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    fn release_shared(&self, path: &Path) {
        let mut map = self.entries.lock().unwrap();
        if let Some(entry) = map.get_mut(path) {
            if entry.readers == 0 {
                log::warn!("Shared release with no readers for {:?}", path);
            } else {
                entry.readers -= 1;
            }
            entry.notify.notify_waiters();
            if entry.is_idle() {
                map.remove(path);
            }
        } else {
            log::warn!("Release of unknown lock entry {:?}", path);
        }
    }

    fn release_exclusive(&self, path: &Path) {
        let mut map = self.entries.lock().unwrap();
        if let Some(entry) = map.get_mut(path) {
            if entry.writers == 0 {
                log::warn!("Exclusive release with no writer for {:?}", path);
            }
            entry.writers = 0;
            entry.notify.notify_waiters();
            if entry.is_idle() {
                map.remove(path);
            }
        } else {
            log::warn!("Release of unknown lock entry {:?}", path);
        }
    }

    fn drop_waiting_writer(&self, path: &Path) {
        let mut map = self.entries.lock().unwrap();
        if let Some(entry) = map.get_mut(path) {
            entry.waiting_writers = entry.waiting_writers.saturating_sub(1);
            entry.notify.notify_waiters();
            if entry.is_idle() {
                map.remove(path);
            }
        }
    }
}

/// Keeps the waiting-writer count honest if an acquire future is dropped
/// mid-wait: the registration un-counts itself so queued readers are not
/// blocked forever.
struct WaitingWriter<'a> {
    table: &'a LockTable,
    path: PathBuf,
    armed: bool,
}

impl<'a> WaitingWriter<'a> {
    fn register(table: &'a LockTable, path: &Path) -> Self {
        let mut map = table.entries.lock().unwrap();
        let entry = map.entry(path.to_path_buf()).or_default();
        entry.waiting_writers += 1;
        drop(map);
        Self {
            table,
            path: path.to_path_buf(),
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for WaitingWriter<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.table.drop_waiting_writer(&self.path);
        }
    }
}

impl Drop for SharedGuard {
    fn drop(&mut self) {
        self.table.release_shared(&self.path);
    }
}

impl Drop for ExclusiveGuard {
    fn drop(&mut self) {
        self.table.release_exclusive(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    const SHORT: Duration = Duration::from_millis(50);
    const LONG: Duration = Duration::from_secs(2);

    #[tokio::test]
    async fn concurrent_readers_are_allowed() {
        let table = LockTable::new();
        let path = Path::new("/srv/a.bin");

        let g1 = table.acquire_shared(path).await;
        let g2 = table.acquire_shared(path).await;
        assert_eq!(table.shared_count(path), 2);
        assert!(!table.is_exclusive_locked(path));

        drop(g1);
        drop(g2);
        assert_eq!(table.entry_count(), 0);
    }

    #[tokio::test]
    async fn writer_excludes_readers() {
        let table = LockTable::new();
        let path = Path::new("/srv/a.bin");

        let writer = table.acquire_exclusive(path).await;
        assert!(table.is_exclusive_locked(path));

        let table2 = table.clone();
        let reader = tokio::spawn(async move {
            let _g = table2.acquire_shared(Path::new("/srv/a.bin")).await;
        });

        // The reader must not get in while the writer holds the lock.
        tokio::time::sleep(SHORT).await;
        assert!(!reader.is_finished());

        drop(writer);
        timeout(LONG, reader).await.unwrap().unwrap();
        assert_eq!(table.entry_count(), 0);
    }

    #[tokio::test]
    async fn second_writer_waits_for_first() {
        let table = LockTable::new();
        let path = Path::new("/srv/a.bin");

        let first = table.acquire_exclusive(path).await;

        let table2 = table.clone();
        let second = tokio::spawn(async move {
            let _g = table2.acquire_exclusive(Path::new("/srv/a.bin")).await;
        });

        tokio::time::sleep(SHORT).await;
        assert!(!second.is_finished());

        drop(first);
        timeout(LONG, second).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn waiting_writer_blocks_new_readers() {
        let table = LockTable::new();
        let path = Path::new("/srv/a.bin");

        let reader = table.acquire_shared(path).await;

        let table_w = table.clone();
        let writer = tokio::spawn(async move {
            let _g = table_w.acquire_exclusive(Path::new("/srv/a.bin")).await;
            tokio::time::sleep(SHORT).await;
        });

        // Give the writer a moment to register as waiting.
        tokio::time::sleep(SHORT).await;

        let table_r = table.clone();
        let late_reader = tokio::spawn(async move {
            let _g = table_r.acquire_shared(Path::new("/srv/a.bin")).await;
        });

        // Writer preference: the late reader must still be queued even
        // though only a shared lock is held right now.
        tokio::time::sleep(SHORT).await;
        assert!(!late_reader.is_finished());

        drop(reader);
        timeout(LONG, writer).await.unwrap().unwrap();
        timeout(LONG, late_reader).await.unwrap().unwrap();
        assert_eq!(table.entry_count(), 0);
    }

    #[tokio::test]
    async fn distinct_paths_do_not_contend() {
        let table = LockTable::new();
        let _w = table.acquire_exclusive(Path::new("/srv/a.bin")).await;
        let _r = timeout(LONG, table.acquire_shared(Path::new("/srv/b.bin")))
            .await
            .unwrap();
        assert_eq!(table.entry_count(), 2);
    }

    #[tokio::test]
    async fn cancelled_writer_wait_unblocks_readers() {
        let table = LockTable::new();
        let path = Path::new("/srv/a.bin");

        let reader = table.acquire_shared(path).await;

        // Start a writer acquire and drop it before it ever gets the lock.
        {
            let acquire = table.acquire_exclusive(path);
            tokio::pin!(acquire);
            assert!(timeout(SHORT, acquire.as_mut()).await.is_err());
        }

        // With the stale waiting-writer registration gone, a new reader
        // gets straight in.
        let _second = timeout(LONG, table.acquire_shared(path)).await.unwrap();

        drop(reader);
    }
}
