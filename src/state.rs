//! Shared filesystem state: the clock and the open-resource registry with
//! close-once semantics.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tracing::debug;

use crate::error::{FsError, FsResult};
use crate::time::{FileTime, FileTimeSource};

/// A resource opened from the filesystem that must be closed when the
/// filesystem closes: channels, streams, watch services.
pub trait ManagedResource: Send + Sync {
    /// Closes the resource. Implementations must tolerate repeat calls.
    fn close_resource(&self) -> FsResult<()>;
}

/// Central state of one filesystem instance.
pub struct FileSystemState {
    time: Arc<dyn FileTimeSource>,
    open: AtomicBool,
    next_resource: AtomicU64,
    resources: Mutex<HashMap<u64, Weak<dyn ManagedResource>>>,
    on_close: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl FileSystemState {
    pub fn new(time: Arc<dyn FileTimeSource>) -> Arc<Self> {
        Arc::new(FileSystemState {
            time,
            open: AtomicBool::new(true),
            next_resource: AtomicU64::new(0),
            resources: Mutex::new(HashMap::new()),
            on_close: Mutex::new(None),
        })
    }

    /// The current time from the configured clock.
    pub fn now(&self) -> FileTime {
        self.time.now()
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Fails with *closed-filesystem* once [`close`](Self::close) has run.
    pub fn check_open(&self) -> FsResult<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(FsError::ClosedFileSystem)
        }
    }

    /// Registers an open resource; the returned token unregisters it.
    pub fn register(&self, resource: Weak<dyn ManagedResource>) -> u64 {
        let id = self.next_resource.fetch_add(1, Ordering::AcqRel);
        self.resources.lock().expect("resource registry poisoned").insert(id, resource);
        id
    }

    /// Removes a resource that closed on its own.
    pub fn unregister(&self, id: u64) {
        self.resources.lock().expect("resource registry poisoned").remove(&id);
    }

    /// Installs the hook run exactly once when the filesystem closes.
    pub fn set_on_close(&self, hook: Box<dyn FnOnce() + Send>) {
        *self.on_close.lock().expect("on_close lock poisoned") = Some(hook);
    }

    /// Closes the filesystem: every registered resource is closed, failures
    /// are collected (first primary, rest suppressed), the on-close hook
    /// runs once, and later calls are no-ops.
    pub fn close(&self) -> FsResult<()> {
        if !self.open.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        let drained: Vec<Weak<dyn ManagedResource>> = {
            let mut resources = self.resources.lock().expect("resource registry poisoned");
            resources.drain().map(|(_, resource)| resource).collect()
        };
        debug!(resources = drained.len(), "closing filesystem");

        let mut failures = Vec::new();
        for resource in drained {
            if let Some(resource) = resource.upgrade() {
                if let Err(error) = resource.close_resource() {
                    failures.push(error);
                }
            }
        }

        if let Some(hook) = self.on_close.lock().expect("on_close lock poisoned").take() {
            hook();
        }

        if failures.is_empty() {
            Ok(())
        } else {
            let primary = failures.remove(0);
            Err(FsError::CloseSuppressed { primary: Box::new(primary), suppressed: failures })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::SystemTimeSource;
    use std::sync::atomic::AtomicU32;

    struct CountingResource {
        closes: AtomicU32,
        fail: bool,
    }

    impl ManagedResource for CountingResource {
        fn close_resource(&self) -> FsResult<()> {
            self.closes.fetch_add(1, Ordering::AcqRel);
            if self.fail {
                Err(FsError::ClosedChannel)
            } else {
                Ok(())
            }
        }
    }

    fn resource(fail: bool) -> Arc<CountingResource> {
        Arc::new(CountingResource { closes: AtomicU32::new(0), fail })
    }

    #[test]
    fn close_closes_registered_resources_once() {
        let state = FileSystemState::new(Arc::new(SystemTimeSource));
        let a = resource(false);
        let b = resource(false);
        state.register(Arc::downgrade(&a) as Weak<dyn ManagedResource>);
        state.register(Arc::downgrade(&b) as Weak<dyn ManagedResource>);

        state.close().unwrap();
        assert_eq!(a.closes.load(Ordering::Acquire), 1);
        assert_eq!(b.closes.load(Ordering::Acquire), 1);

        // Second close is a no-op.
        state.close().unwrap();
        assert_eq!(a.closes.load(Ordering::Acquire), 1);
        assert!(matches!(state.check_open(), Err(FsError::ClosedFileSystem)));
    }

    #[test]
    fn close_failures_aggregate_with_first_as_primary() {
        let state = FileSystemState::new(Arc::new(SystemTimeSource));
        let failing_a = resource(true);
        let failing_b = resource(true);
        state.register(Arc::downgrade(&failing_a) as Weak<dyn ManagedResource>);
        state.register(Arc::downgrade(&failing_b) as Weak<dyn ManagedResource>);

        match state.close() {
            Err(FsError::CloseSuppressed { primary, suppressed }) => {
                assert!(matches!(*primary, FsError::ClosedChannel));
                assert_eq!(suppressed.len(), 1);
            }
            other => panic!("expected aggregated failure, got {other:?}"),
        }
    }

    #[test]
    fn on_close_hook_runs_exactly_once() {
        let state = FileSystemState::new(Arc::new(SystemTimeSource));
        let count = Arc::new(AtomicU32::new(0));
        let hook_count = count.clone();
        state.set_on_close(Box::new(move || {
            hook_count.fetch_add(1, Ordering::AcqRel);
        }));

        state.close().unwrap();
        state.close().unwrap();
        assert_eq!(count.load(Ordering::Acquire), 1);
    }

    #[test]
    fn unregistered_resources_are_not_closed() {
        let state = FileSystemState::new(Arc::new(SystemTimeSource));
        let a = resource(false);
        let id = state.register(Arc::downgrade(&a) as Weak<dyn ManagedResource>);
        state.unregister(id);
        state.close().unwrap();
        assert_eq!(a.closes.load(Ordering::Acquire), 0);
    }
}
