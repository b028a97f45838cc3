//! Synchronous file channels: positioned random-access I/O over a regular
//! file, with interruptible blocking and close-once lifecycle.

pub mod asynchronous;

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::content::{ReadGuard, RegularContent, WriteGuard};
use crate::error::{FsError, FsResult};
use crate::file::File;
use crate::state::{FileSystemState, ManagedResource};

struct ChannelStatus {
    open: AtomicBool,
    interrupted: AtomicBool,
}

/// A simulated whole-file or range lock. Always granted; valid until
/// released or until the owning channel closes.
pub struct FileRangeLock {
    valid: Arc<AtomicBool>,
    shared: bool,
}

impl FileRangeLock {
    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    pub fn is_shared(&self) -> bool {
        self.shared
    }

    pub fn release(&self) {
        self.valid.store(false, Ordering::Release);
    }
}

/// Synchronous channel over one regular file.
///
/// Operations using the channel position advance it; positioned variants do
/// not. In append mode every write lands at the current end of file. A
/// blocked operation aborts with *closed-by-interrupt* when
/// [`interrupt`](Self::interrupt) is called (closing the channel), and with
/// *asynchronous-close* when another thread closes the channel under it.
pub struct FileChannel {
    file: Arc<File>,
    read: bool,
    write: bool,
    append: bool,
    position: Mutex<u64>,
    status: ChannelStatus,
    range_locks: Mutex<Vec<Arc<AtomicBool>>>,
    on_close: Mutex<Option<Box<dyn FnOnce() + Send>>>,
    state: Arc<FileSystemState>,
    resource_id: AtomicU64,
}

impl FileChannel {
    /// Opens a channel over `file`, which must be a regular file. The
    /// channel registers itself with the filesystem's resource registry and
    /// holds one open handle on the file until closed.
    pub fn open(
        file: Arc<File>,
        read: bool,
        write: bool,
        append: bool,
        state: Arc<FileSystemState>,
    ) -> FsResult<Arc<FileChannel>> {
        let content = file
            .content()
            .ok_or_else(|| FsError::illegal("cannot open a channel on a non-regular file"))?;
        content.opened();

        let channel = Arc::new(FileChannel {
            file,
            read,
            write,
            append,
            position: Mutex::new(0),
            status: ChannelStatus {
                open: AtomicBool::new(true),
                interrupted: AtomicBool::new(false),
            },
            range_locks: Mutex::new(Vec::new()),
            on_close: Mutex::new(None),
            state: state.clone(),
            resource_id: AtomicU64::new(0),
        });
        let id = state.register(Arc::downgrade(&channel) as Weak<dyn ManagedResource>);
        channel.resource_id.store(id, Ordering::Release);
        Ok(channel)
    }

    /// Installs a hook run once when the channel closes; used for
    /// delete-on-close semantics.
    pub(crate) fn set_on_close(&self, hook: Box<dyn FnOnce() + Send>) {
        *self.on_close.lock().expect("on_close lock poisoned") = Some(hook);
    }

    /// The file this channel operates on.
    pub fn file(&self) -> &Arc<File> {
        &self.file
    }

    pub fn is_open(&self) -> bool {
        self.status.open.load(Ordering::Acquire)
    }

    fn content(&self) -> &RegularContent {
        self.file.content().expect("channel opened on non-regular file")
    }

    fn check_open(&self) -> FsResult<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(FsError::ClosedChannel)
        }
    }

    fn check_readable(&self) -> FsResult<()> {
        if self.read {
            Ok(())
        } else {
            Err(FsError::NonReadable)
        }
    }

    fn check_writable(&self) -> FsResult<()> {
        if self.write {
            Ok(())
        } else {
            Err(FsError::NonWritable)
        }
    }

    /// Run before every wait on the file lock and after every wakeup.
    fn check_blocked(&self) -> FsResult<()> {
        if self.status.interrupted.swap(false, Ordering::AcqRel) {
            return Err(FsError::ClosedByInterrupt);
        }
        if !self.is_open() {
            return Err(FsError::AsynchronousClose);
        }
        Ok(())
    }

    fn read_lock(&self) -> FsResult<ReadGuard<'_>> {
        match self.content().file_lock().read(|| self.check_blocked()) {
            Err(FsError::ClosedByInterrupt) => {
                let _ = self.close();
                Err(FsError::ClosedByInterrupt)
            }
            other => other,
        }
    }

    fn write_lock(&self) -> FsResult<WriteGuard<'_>> {
        match self.content().file_lock().write(|| self.check_blocked()) {
            Err(FsError::ClosedByInterrupt) => {
                let _ = self.close();
                Err(FsError::ClosedByInterrupt)
            }
            other => other,
        }
    }

    /// The channel position.
    pub fn position(&self) -> FsResult<u64> {
        self.check_open()?;
        Ok(*self.position.lock().expect("position lock poisoned"))
    }

    /// Moves the channel position.
    pub fn set_position(&self, position: u64) -> FsResult<()> {
        self.check_open()?;
        *self.position.lock().expect("position lock poisoned") = position;
        Ok(())
    }

    /// Current file size.
    pub fn size(&self) -> FsResult<u64> {
        self.check_open()?;
        Ok(self.content().size())
    }

    /// Reads at the channel position, advancing it by the bytes read.
    /// Returns `None` at end of file.
    pub fn read(&self, dst: &mut [u8]) -> FsResult<Option<usize>> {
        self.check_open()?;
        self.check_readable()?;
        let mut position = self.position.lock().expect("position lock poisoned");
        let _guard = self.read_lock()?;
        let result = self.content().read(*position, dst);
        if let Some(count) = result {
            *position += count as u64;
        }
        self.file.set_access_time(self.state.now());
        Ok(result)
    }

    /// Reads at an explicit position; the channel position is untouched.
    pub fn read_at(&self, position: u64, dst: &mut [u8]) -> FsResult<Option<usize>> {
        self.check_open()?;
        self.check_readable()?;
        let _guard = self.read_lock()?;
        let result = self.content().read(position, dst);
        self.file.set_access_time(self.state.now());
        Ok(result)
    }

    /// Writes at the channel position (or at end of file in append mode),
    /// advancing the position past the written bytes.
    pub fn write(&self, src: &[u8]) -> FsResult<usize> {
        self.check_open()?;
        self.check_writable()?;
        let mut position = self.position.lock().expect("position lock poisoned");
        let _guard = self.write_lock()?;
        let at = if self.append { self.content().size() } else { *position };
        let written = self.content().write(at, src)?;
        *position = at + written as u64;
        self.file.set_modified_time(self.state.now());
        Ok(written)
    }

    /// Writes at an explicit position without moving the channel position.
    /// In append mode the write still lands at end of file.
    pub fn write_at(&self, position: u64, src: &[u8]) -> FsResult<usize> {
        self.check_open()?;
        self.check_writable()?;
        let _guard = self.write_lock()?;
        let at = if self.append { self.content().size() } else { position };
        let written = self.content().write(at, src)?;
        self.file.set_modified_time(self.state.now());
        Ok(written)
    }

    /// Shrinks the file to `size`; the channel position clamps to the new
    /// size when it pointed past it.
    pub fn truncate(&self, size: u64) -> FsResult<()> {
        self.check_open()?;
        self.check_writable()?;
        let mut position = self.position.lock().expect("position lock poisoned");
        let _guard = self.write_lock()?;
        self.content().truncate(size);
        if *position > size {
            *position = size;
        }
        self.file.set_modified_time(self.state.now());
        Ok(())
    }

    /// Reads up to `count` bytes from `src` into the file at `position`.
    pub fn transfer_from(
        &self,
        src: &mut dyn io::Read,
        position: u64,
        count: u64,
    ) -> FsResult<u64> {
        self.check_open()?;
        self.check_writable()?;
        let _guard = self.write_lock()?;
        let at = if self.append { self.content().size() } else { position };
        let transferred = self.content().transfer_from(src, at, count)?;
        self.file.set_modified_time(self.state.now());
        Ok(transferred)
    }

    /// Writes up to `count` bytes from the file at `position` into `dst`.
    pub fn transfer_to(
        &self,
        position: u64,
        count: u64,
        dst: &mut dyn io::Write,
    ) -> FsResult<u64> {
        self.check_open()?;
        self.check_readable()?;
        let _guard = self.read_lock()?;
        let transferred = self.content().transfer_to(position, count, dst)?;
        self.file.set_access_time(self.state.now());
        Ok(transferred)
    }

    /// Acquires a simulated lock over the whole file. Never blocks.
    pub fn try_lock(&self, shared: bool) -> FsResult<FileRangeLock> {
        self.check_open()?;
        if shared {
            self.check_readable()?;
        } else {
            self.check_writable()?;
        }
        let valid = Arc::new(AtomicBool::new(true));
        self.range_locks.lock().expect("range locks poisoned").push(valid.clone());
        Ok(FileRangeLock { valid, shared })
    }

    /// Acquires a simulated lock over the whole file; identical to
    /// [`try_lock`](Self::try_lock) since there is no contention to wait on.
    pub fn lock(&self, shared: bool) -> FsResult<FileRangeLock> {
        self.try_lock(shared)
    }

    /// Requests interruption of the operation blocked on this channel: that
    /// operation aborts with *closed-by-interrupt* and closes the channel.
    pub fn interrupt(&self) {
        self.status.interrupted.store(true, Ordering::Release);
        self.content().file_lock().wake_waiters();
    }

    /// Closes the channel: pending blocked operations abort, issued range
    /// locks invalidate, the open handle on the file releases. Repeat
    /// closes are no-ops.
    pub fn close(&self) -> FsResult<()> {
        if self.status.open.swap(false, Ordering::AcqRel) {
            for lock in self.range_locks.lock().expect("range locks poisoned").drain(..) {
                lock.store(false, Ordering::Release);
            }
            self.content().file_lock().wake_waiters();
            self.state.unregister(self.resource_id.load(Ordering::Acquire));
            self.content().closed();
            if let Some(hook) = self.on_close.lock().expect("on_close lock poisoned").take() {
                hook();
            }
        }
        Ok(())
    }
}

impl ManagedResource for FileChannel {
    fn close_resource(&self) -> FsResult<()> {
        self.close()
    }
}

impl Drop for FileChannel {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
