//! Polling-based directory watching: registered directories are
//! re-snapshotted on a fixed interval and differences become events on
//! per-registration keys.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use bitflags::bitflags;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{FsError, FsResult};
use crate::name::Name;
use crate::path::FsPath;
use crate::state::{FileSystemState, ManagedResource};
use crate::time::FileTime;

/// Maximum events queued per key before overflow kicks in.
pub const MAX_QUEUE_SIZE: usize = 256;

bitflags! {
    /// The event kinds a registration subscribes to.
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct EventFilter: u8 {
        const CREATE = 1;
        const DELETE = 1 << 1;
        const MODIFY = 1 << 2;
    }
}

/// What happened to a watched directory entry.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    Create,
    Delete,
    Modify,
    /// Synthetic marker for events dropped past [`MAX_QUEUE_SIZE`]; its
    /// count is the number dropped.
    Overflow,
}

/// One watch event. Consecutive identical events coalesce by incrementing
/// `count`. `context` is the child name as a relative path (absent for
/// overflow).
#[derive(Debug, Clone, PartialEq)]
pub struct WatchEvent {
    pub kind: EventKind,
    pub count: usize,
    pub context: Option<FsPath>,
}

/// Modification fingerprint of one directory entry.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct EntryFingerprint {
    pub modified: FileTime,
}

/// Snapshot of a directory's entries at one poll.
#[derive(Debug, Clone, Default)]
pub struct DirectorySnapshot {
    entries: HashMap<Name, EntryFingerprint>,
}

impl DirectorySnapshot {
    pub fn new(entries: HashMap<Name, EntryFingerprint>) -> Self {
        DirectorySnapshot { entries }
    }
}

/// Provides the directory snapshots the poller diffs; implemented by the
/// filesystem.
pub trait SnapshotSource: Send + Sync {
    /// Snapshots the entries of the directory at `path`.
    fn snapshot(&self, path: &FsPath) -> FsResult<DirectorySnapshot>;
}

/// Observes directories for entry creation, deletion and modification.
#[async_trait]
pub trait WatchService: Send + Sync {
    /// Registers `directory` for the kinds in `filter`, returning a key in
    /// the READY state.
    fn register(&self, directory: &FsPath, filter: EventFilter) -> FsResult<Arc<WatchKey>>;

    /// Dequeues a signalled key if one is immediately available.
    fn poll(&self) -> FsResult<Option<Arc<WatchKey>>>;

    /// Dequeues a signalled key, waiting up to `timeout`; expiry returns
    /// `None` without error.
    async fn poll_timeout(&self, timeout: Duration) -> FsResult<Option<Arc<WatchKey>>>;

    /// Dequeues a signalled key, waiting as long as it takes.
    async fn take(&self) -> FsResult<Arc<WatchKey>>;

    /// Closes the service: every key invalidates and all waiters fail with
    /// *closed-watch-service*.
    fn close(&self) -> FsResult<()>;
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
enum KeySignal {
    Ready,
    Signalled,
}

struct KeyState {
    signal: KeySignal,
    valid: bool,
    events: Vec<WatchEvent>,
}

/// One registration: its pending events and READY/SIGNALLED lifecycle.
pub struct WatchKey {
    id: u64,
    directory: FsPath,
    filter: EventFilter,
    state: Mutex<KeyState>,
    snapshot: Mutex<DirectorySnapshot>,
    ready: async_channel::Sender<Arc<WatchKey>>,
    me: Weak<WatchKey>,
}

impl WatchKey {
    /// The watched directory.
    pub fn watchable(&self) -> &FsPath {
        &self.directory
    }

    /// False once cancelled or the service closed.
    pub fn is_valid(&self) -> bool {
        self.state.lock().expect("watch key poisoned").valid
    }

    /// Drains and returns the pending events.
    pub fn poll_events(&self) -> Vec<WatchEvent> {
        let mut state = self.state.lock().expect("watch key poisoned");
        std::mem::take(&mut state.events)
    }

    /// Returns the key to READY. If events accumulated while draining, the
    /// key re-enqueues immediately. Returns false on a cancelled key.
    pub fn reset(&self) -> bool {
        let mut state = self.state.lock().expect("watch key poisoned");
        if !state.valid {
            return false;
        }
        if state.signal == KeySignal::Signalled {
            if state.events.is_empty() {
                state.signal = KeySignal::Ready;
            } else if let Some(me) = self.me.upgrade() {
                let _ = self.ready.try_send(me);
            }
        }
        true
    }

    /// Permanently invalidates the key.
    pub fn cancel(&self) {
        let mut state = self.state.lock().expect("watch key poisoned");
        state.valid = false;
    }

    /// Appends an event, coalescing consecutive duplicates and accounting
    /// overflow, then signals the key if it was READY.
    fn post(&self, kind: EventKind, context: Option<FsPath>) {
        let mut state = self.state.lock().expect("watch key poisoned");
        if !state.valid {
            return;
        }
        let queued = state.events.len();
        let coalesced = match state.events.last_mut() {
            Some(last) if last.kind == kind && last.context == context => {
                last.count += 1;
                true
            }
            Some(last) if last.kind == EventKind::Overflow => {
                last.count += 1;
                true
            }
            _ => false,
        };
        if !coalesced {
            if queued >= MAX_QUEUE_SIZE {
                state.events.push(WatchEvent {
                    kind: EventKind::Overflow,
                    count: 1,
                    context: None,
                });
            } else {
                state.events.push(WatchEvent { kind, count: 1, context });
            }
        }

        if state.signal == KeySignal::Ready {
            state.signal = KeySignal::Signalled;
            if let Some(me) = self.me.upgrade() {
                let _ = self.ready.try_send(me);
            }
        }
    }
}

struct Registrations {
    keys: HashMap<u64, Arc<WatchKey>>,
    poller: Option<JoinHandle<()>>,
}

struct WatchShared {
    source: Arc<dyn SnapshotSource>,
    registrations: Mutex<Registrations>,
    ready_tx: async_channel::Sender<Arc<WatchKey>>,
    closed: AtomicBool,
    next_key: AtomicU64,
    interval: Duration,
}

/// [`WatchService`] backed by one polling task on the supplied runtime.
///
/// The task starts with the first registration, stops when the last key
/// cancels, and restarts on a later registration.
pub struct PollingWatchService {
    shared: Arc<WatchShared>,
    ready_rx: async_channel::Receiver<Arc<WatchKey>>,
    handle: Handle,
    state: Arc<FileSystemState>,
    resource_id: AtomicU64,
}

impl PollingWatchService {
    /// Default polling interval.
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

    /// Creates a service polling `source` every `interval` on `handle`'s
    /// runtime. Registers itself as a filesystem resource.
    pub fn new(
        source: Arc<dyn SnapshotSource>,
        interval: Duration,
        handle: Handle,
        state: Arc<FileSystemState>,
    ) -> Arc<Self> {
        let (ready_tx, ready_rx) = async_channel::unbounded();
        let service = Arc::new(PollingWatchService {
            shared: Arc::new(WatchShared {
                source,
                registrations: Mutex::new(Registrations { keys: HashMap::new(), poller: None }),
                ready_tx,
                closed: AtomicBool::new(false),
                next_key: AtomicU64::new(0),
                interval,
            }),
            ready_rx,
            handle,
            state: state.clone(),
            resource_id: AtomicU64::new(0),
        });
        let id = state.register(Arc::downgrade(&service) as Weak<dyn ManagedResource>);
        service.resource_id.store(id, Ordering::Release);
        service
    }

    fn check_open(&self) -> FsResult<()> {
        if self.shared.closed.load(Ordering::Acquire) {
            Err(FsError::ClosedWatchService)
        } else {
            Ok(())
        }
    }

    /// True while the internal polling task is running.
    pub fn is_polling(&self) -> bool {
        self.shared.registrations.lock().expect("registrations poisoned").poller.is_some()
    }
}

#[async_trait]
impl WatchService for PollingWatchService {
    fn register(&self, directory: &FsPath, filter: EventFilter) -> FsResult<Arc<WatchKey>> {
        self.check_open()?;
        let snapshot = self.shared.source.snapshot(directory)?;
        let id = self.shared.next_key.fetch_add(1, Ordering::AcqRel);
        let key = Arc::new_cyclic(|me| WatchKey {
            id,
            directory: directory.clone(),
            filter,
            state: Mutex::new(KeyState {
                signal: KeySignal::Ready,
                valid: true,
                events: Vec::new(),
            }),
            snapshot: Mutex::new(snapshot),
            ready: self.shared.ready_tx.clone(),
            me: me.clone(),
        });

        let mut registrations =
            self.shared.registrations.lock().expect("registrations poisoned");
        registrations.keys.insert(id, key.clone());
        if registrations.poller.is_none() {
            debug!(directory = %directory, "starting watch poller");
            let shared = self.shared.clone();
            registrations.poller = Some(self.handle.spawn(poll_loop(shared)));
        }
        Ok(key)
    }

    fn poll(&self) -> FsResult<Option<Arc<WatchKey>>> {
        self.check_open()?;
        match self.ready_rx.try_recv() {
            Ok(key) => Ok(Some(key)),
            Err(async_channel::TryRecvError::Empty) => Ok(None),
            Err(async_channel::TryRecvError::Closed) => Err(FsError::ClosedWatchService),
        }
    }

    async fn poll_timeout(&self, timeout: Duration) -> FsResult<Option<Arc<WatchKey>>> {
        self.check_open()?;
        match tokio::time::timeout(timeout, self.ready_rx.recv()).await {
            Err(_elapsed) => Ok(None),
            Ok(Ok(key)) => Ok(Some(key)),
            Ok(Err(_closed)) => Err(FsError::ClosedWatchService),
        }
    }

    async fn take(&self) -> FsResult<Arc<WatchKey>> {
        self.check_open()?;
        self.ready_rx.recv().await.map_err(|_| FsError::ClosedWatchService)
    }

    fn close(&self) -> FsResult<()> {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut registrations =
            self.shared.registrations.lock().expect("registrations poisoned");
        for key in registrations.keys.values() {
            key.cancel();
        }
        registrations.keys.clear();
        if let Some(poller) = registrations.poller.take() {
            poller.abort();
        }
        drop(registrations);
        // Wakes every waiter with a closed-channel error.
        self.shared.ready_tx.close();
        self.state.unregister(self.resource_id.load(Ordering::Acquire));
        Ok(())
    }
}

impl ManagedResource for PollingWatchService {
    fn close_resource(&self) -> FsResult<()> {
        WatchService::close(self)
    }
}

/// The polling task: re-snapshot every registered directory per tick, post
/// differences, exit when no valid key remains.
async fn poll_loop(shared: Arc<WatchShared>) {
    loop {
        tokio::time::sleep(shared.interval).await;
        if shared.closed.load(Ordering::Acquire) {
            return;
        }
        let keys: Vec<Arc<WatchKey>> = {
            let mut registrations =
                shared.registrations.lock().expect("registrations poisoned");
            registrations.keys.retain(|_, key| key.is_valid());
            if registrations.keys.is_empty() {
                debug!("no valid watch keys left; stopping poller");
                registrations.poller = None;
                return;
            }
            registrations.keys.values().cloned().collect()
        };

        for key in keys {
            match shared.source.snapshot(&key.directory) {
                Ok(current) => {
                    let mut previous =
                        key.snapshot.lock().expect("watch snapshot poisoned");
                    post_differences(&key, &previous, &current);
                    *previous = current;
                }
                Err(error) => {
                    warn!(key = key.id, directory = %key.directory, %error, "watched directory no longer accessible; cancelling key");
                    key.cancel();
                }
            }
        }
    }
}

fn post_differences(key: &WatchKey, old: &DirectorySnapshot, new: &DirectorySnapshot) {
    let service = key.directory.service().clone();
    for name in old.entries.keys() {
        if !new.entries.contains_key(name) && key.filter.contains(EventFilter::DELETE) {
            key.post(EventKind::Delete, Some(service.single(name.clone())));
        }
    }
    for (name, fingerprint) in &new.entries {
        match old.entries.get(name) {
            None => {
                if key.filter.contains(EventFilter::CREATE) {
                    key.post(EventKind::Create, Some(service.single(name.clone())));
                }
            }
            Some(previous) => {
                if previous != fingerprint && key.filter.contains(EventFilter::MODIFY) {
                    key.post(EventKind::Modify, Some(service.single(name.clone())));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::{PathFlavor, PathService};
    use crate::time::SystemTimeSource;

    /// Snapshot source backed by a mutable map of directory states.
    struct FakeSource {
        directories: Mutex<HashMap<FsPath, DirectorySnapshot>>,
    }

    impl FakeSource {
        fn new() -> Arc<Self> {
            Arc::new(FakeSource { directories: Mutex::new(HashMap::new()) })
        }

        fn put(&self, path: &FsPath, entries: &[(&str, i64)]) {
            let map = entries
                .iter()
                .map(|(name, seconds)| {
                    (
                        Name::simple(*name),
                        EntryFingerprint { modified: FileTime::from_seconds(*seconds) },
                    )
                })
                .collect();
            self.directories
                .lock()
                .unwrap()
                .insert(path.clone(), DirectorySnapshot::new(map));
        }

        fn remove(&self, path: &FsPath) {
            self.directories.lock().unwrap().remove(path);
        }
    }

    impl SnapshotSource for FakeSource {
        fn snapshot(&self, path: &FsPath) -> FsResult<DirectorySnapshot> {
            self.directories
                .lock()
                .unwrap()
                .get(path)
                .cloned()
                .ok_or_else(|| FsError::no_such_file(path.to_string()))
        }
    }

    fn posix_path(input: &str) -> FsPath {
        PathService::new(PathFlavor::Posix, vec![], vec![], true).parse(input).unwrap()
    }

    fn service(source: &Arc<FakeSource>) -> Arc<PollingWatchService> {
        PollingWatchService::new(
            source.clone(),
            Duration::from_millis(4),
            Handle::current(),
            FileSystemState::new(Arc::new(SystemTimeSource)),
        )
    }

    fn names(events: &[WatchEvent]) -> Vec<(EventKind, String)> {
        events
            .iter()
            .map(|event| {
                (
                    event.kind,
                    event
                        .context
                        .as_ref()
                        .map(|path| path.to_string())
                        .unwrap_or_default(),
                )
            })
            .collect()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn creations_and_deletions_become_events() {
        let source = FakeSource::new();
        let dir = posix_path("/d");
        source.put(&dir, &[]);
        let watch = service(&source);
        let key = watch.register(&dir, EventFilter::CREATE | EventFilter::DELETE).unwrap();

        source.put(&dir, &[("a", 1)]);
        let signalled = watch.poll_timeout(Duration::from_millis(500)).await.unwrap().unwrap();
        assert_eq!(signalled.id, key.id);
        assert_eq!(names(&signalled.poll_events()), vec![(EventKind::Create, "a".to_string())]);
        assert!(signalled.reset());

        source.put(&dir, &[]);
        let signalled = watch.poll_timeout(Duration::from_millis(500)).await.unwrap().unwrap();
        assert_eq!(names(&signalled.poll_events()), vec![(EventKind::Delete, "a".to_string())]);
        assert!(signalled.reset());
        assert!(watch.poll().unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn modifications_fire_only_for_subscribed_kinds() {
        let source = FakeSource::new();
        let dir = posix_path("/d");
        source.put(&dir, &[("a", 1)]);
        let watch = service(&source);
        let key = watch.register(&dir, EventFilter::MODIFY).unwrap();

        // Creation is not subscribed; nothing fires.
        source.put(&dir, &[("a", 1), ("b", 1)]);
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(watch.poll().unwrap().is_none());

        source.put(&dir, &[("a", 2), ("b", 1)]);
        let signalled = watch.poll_timeout(Duration::from_millis(500)).await.unwrap().unwrap();
        assert_eq!(names(&signalled.poll_events()), vec![(EventKind::Modify, "a".to_string())]);
        let _ = key;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn overflow_appends_one_synthetic_event() {
        let source = FakeSource::new();
        let dir = posix_path("/d");
        source.put(&dir, &[]);
        let watch = service(&source);
        let key = watch.register(&dir, EventFilter::CREATE).unwrap();

        let extra = 10;
        let files: Vec<(String, i64)> =
            (0..MAX_QUEUE_SIZE + extra).map(|i| (format!("f{i:04}"), 1)).collect();
        let view: Vec<(&str, i64)> =
            files.iter().map(|(name, time)| (name.as_str(), *time)).collect();
        source.put(&dir, &view);

        let signalled = watch.poll_timeout(Duration::from_millis(500)).await.unwrap().unwrap();
        let events = signalled.poll_events();
        assert_eq!(events.len(), MAX_QUEUE_SIZE + 1);
        assert!(events[..MAX_QUEUE_SIZE]
            .iter()
            .all(|event| event.kind == EventKind::Create && event.count == 1));
        let overflow = events.last().unwrap();
        assert_eq!(overflow.kind, EventKind::Overflow);
        assert_eq!(overflow.count, extra);
        assert_eq!(overflow.context, None);
        let _ = key;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn reset_requeues_when_events_arrived_while_draining() {
        let source = FakeSource::new();
        let dir = posix_path("/d");
        source.put(&dir, &[]);
        let watch = service(&source);
        watch.register(&dir, EventFilter::CREATE).unwrap();

        source.put(&dir, &[("a", 1)]);
        let key = watch.take().await.unwrap();
        // Drain, then let another event land before reset.
        assert_eq!(key.poll_events().len(), 1);
        key.post(EventKind::Create, None);
        assert!(key.reset());

        let again = watch.poll_timeout(Duration::from_millis(500)).await.unwrap().unwrap();
        assert_eq!(again.poll_events().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cancelled_key_stops_polling_and_cannot_reset() {
        let source = FakeSource::new();
        let dir = posix_path("/d");
        source.put(&dir, &[]);
        let watch = service(&source);
        let key = watch.register(&dir, EventFilter::CREATE).unwrap();
        assert!(watch.is_polling());

        key.cancel();
        assert!(!key.is_valid());
        assert!(!key.reset());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!watch.is_polling());

        // A new registration restarts the poller.
        watch.register(&dir, EventFilter::CREATE).unwrap();
        assert!(watch.is_polling());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn vanished_directory_cancels_its_key() {
        let source = FakeSource::new();
        let dir = posix_path("/d");
        source.put(&dir, &[]);
        let watch = service(&source);
        let key = watch.register(&dir, EventFilter::CREATE).unwrap();

        source.remove(&dir);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!key.is_valid());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn closed_service_invalidates_keys_and_rejects_calls() {
        let source = FakeSource::new();
        let dir = posix_path("/d");
        source.put(&dir, &[]);
        let watch = service(&source);
        let key = watch.register(&dir, EventFilter::CREATE).unwrap();

        WatchService::close(&*watch).unwrap();
        assert!(!key.is_valid());
        assert!(matches!(watch.poll(), Err(FsError::ClosedWatchService)));
        assert!(matches!(watch.take().await, Err(FsError::ClosedWatchService)));
        assert!(matches!(
            watch.register(&dir, EventFilter::CREATE),
            Err(FsError::ClosedWatchService)
        ));
    }
}
