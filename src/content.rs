//! Byte storage for regular files: a block list on the shared disk plus the
//! readers/writer lock that channel operations block on.

use std::io;
use std::sync::{Arc, Condvar, Mutex};

use crate::disk::{Block, Disk};
use crate::error::{FsError, FsResult};

/// Readers/writer lock whose acquisition can be abandoned mid-wait.
///
/// Channel operations pass a check closure that inspects the channel's
/// close/interrupt flags; the channel's close path calls [`wake_waiters`]
/// (FileLock::wake_waiters) so a blocked acquisition re-runs its check and
/// bails out instead of sleeping forever.
pub(crate) struct FileLock {
    state: Mutex<LockState>,
    cond: Condvar,
}

#[derive(Default)]
struct LockState {
    readers: usize,
    writer: bool,
    writers_waiting: usize,
}

impl FileLock {
    fn new() -> Self {
        FileLock { state: Mutex::new(LockState::default()), cond: Condvar::new() }
    }

    /// Acquires the lock in shared mode. `check` runs before every wait and
    /// after every wakeup; its error aborts the acquisition.
    pub(crate) fn read(&self, check: impl Fn() -> FsResult<()>) -> FsResult<ReadGuard<'_>> {
        let mut state = self.state.lock().expect("file lock poisoned");
        loop {
            check()?;
            if !state.writer && state.writers_waiting == 0 {
                state.readers += 1;
                return Ok(ReadGuard { lock: self });
            }
            state = self.cond.wait(state).expect("file lock poisoned");
        }
    }

    /// Acquires the lock in exclusive mode; see [`read`](Self::read).
    pub(crate) fn write(&self, check: impl Fn() -> FsResult<()>) -> FsResult<WriteGuard<'_>> {
        let mut state = self.state.lock().expect("file lock poisoned");
        state.writers_waiting += 1;
        loop {
            if let Err(error) = check() {
                state.writers_waiting -= 1;
                self.cond.notify_all();
                return Err(error);
            }
            if !state.writer && state.readers == 0 {
                state.writers_waiting -= 1;
                state.writer = true;
                return Ok(WriteGuard { lock: self });
            }
            state = self.cond.wait(state).expect("file lock poisoned");
        }
    }

    /// Wakes every blocked acquisition so it re-runs its check closure.
    pub(crate) fn wake_waiters(&self) {
        let _state = self.state.lock().expect("file lock poisoned");
        self.cond.notify_all();
    }

    fn release_read(&self) {
        let mut state = self.state.lock().expect("file lock poisoned");
        state.readers -= 1;
        if state.readers == 0 {
            self.cond.notify_all();
        }
    }

    fn release_write(&self) {
        let mut state = self.state.lock().expect("file lock poisoned");
        state.writer = false;
        self.cond.notify_all();
    }
}

pub(crate) struct ReadGuard<'a> {
    lock: &'a FileLock,
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        self.lock.release_read();
    }
}

pub(crate) struct WriteGuard<'a> {
    lock: &'a FileLock,
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        self.lock.release_write();
    }
}

/// Never-failing check for internal callers that cannot be interrupted.
pub(crate) fn uninterruptible() -> FsResult<()> {
    Ok(())
}

struct ContentState {
    blocks: Vec<Block>,
    size: u64,
    open_count: u32,
    deleted: bool,
}

/// Random-access byte content of one regular file.
///
/// The blocks live on the filesystem's shared [`Disk`] and return to it when
/// the file has been unlinked everywhere and the last open handle closes.
pub struct RegularContent {
    disk: Arc<Disk>,
    lock: FileLock,
    state: Mutex<ContentState>,
}

impl RegularContent {
    pub(crate) fn new(disk: Arc<Disk>) -> Self {
        RegularContent {
            disk,
            lock: FileLock::new(),
            state: Mutex::new(ContentState {
                blocks: Vec::new(),
                size: 0,
                open_count: 0,
                deleted: false,
            }),
        }
    }

    pub(crate) fn file_lock(&self) -> &FileLock {
        &self.lock
    }

    /// Current size in bytes.
    pub fn size(&self) -> u64 {
        self.state.lock().expect("content lock poisoned").size
    }

    /// Number of blocks currently backing this file.
    pub fn block_count(&self) -> usize {
        self.state.lock().expect("content lock poisoned").blocks.len()
    }

    /// Reads up to `dst.len()` bytes starting at `pos`. Returns `None` iff
    /// `pos` is at or past the end of the file.
    pub fn read(&self, pos: u64, dst: &mut [u8]) -> Option<usize> {
        let state = self.state.lock().expect("content lock poisoned");
        if pos >= state.size {
            return None;
        }
        let block_size = self.disk.block_size();
        let mut remaining = dst.len().min((state.size - pos) as usize);
        let mut copied = 0;
        let mut cursor = pos;
        while remaining > 0 {
            let block = &state.blocks[(cursor / block_size) as usize];
            let offset = (cursor % block_size) as usize;
            let chunk = remaining.min(block.len() - offset);
            dst[copied..copied + chunk].copy_from_slice(&block[offset..offset + chunk]);
            copied += chunk;
            cursor += chunk as u64;
            remaining -= chunk;
        }
        Some(copied)
    }

    /// Writes `src` at `pos`, extending the file as needed; a gap between
    /// the old size and `pos` reads back as zeros.
    ///
    /// On disk exhaustion the bytes that fit are kept, the size reflects
    /// them, and [`FsError::NoSpace`] is returned.
    pub fn write(&self, pos: u64, src: &[u8]) -> FsResult<usize> {
        let mut state = self.state.lock().expect("content lock poisoned");
        let end = pos + src.len() as u64;
        let capacity_result = self.ensure_capacity(&mut state, end);

        let block_size = self.disk.block_size();
        let capacity = state.blocks.len() as u64 * block_size;
        let writable_end = end.min(capacity);
        let mut copied = 0;
        let mut cursor = pos;
        while cursor < writable_end {
            let index = (cursor / block_size) as usize;
            let offset = (cursor % block_size) as usize;
            let chunk = ((writable_end - cursor) as usize).min(block_size as usize - offset);
            state.blocks[index][offset..offset + chunk].copy_from_slice(&src[copied..copied + chunk]);
            copied += chunk;
            cursor += chunk as u64;
        }
        if writable_end > state.size {
            state.size = writable_end;
        }
        capacity_result.map(|()| copied)
    }

    /// Shrinks the file to `new_size`; growing is a no-op. Trailing blocks
    /// return to the disk and the kept tail is zeroed so later extension
    /// reads back zeros.
    pub fn truncate(&self, new_size: u64) {
        let mut state = self.state.lock().expect("content lock poisoned");
        if new_size >= state.size {
            return;
        }
        let old_size = state.size;
        let block_size = self.disk.block_size();
        let needed = Self::blocks_for(new_size, block_size);
        if state.blocks.len() > needed {
            let excess = (state.blocks.len() - needed) as u64;
            self.disk.free(&mut state.blocks, excess);
        }
        let capacity = state.blocks.len() as u64 * block_size;
        let zero_end = old_size.min(capacity);
        let mut cursor = new_size;
        while cursor < zero_end {
            let index = (cursor / block_size) as usize;
            let offset = (cursor % block_size) as usize;
            let chunk = ((zero_end - cursor) as usize).min(block_size as usize - offset);
            state.blocks[index][offset..offset + chunk].fill(0);
            cursor += chunk as u64;
        }
        state.size = new_size;
    }

    /// Reads up to `count` bytes from `src` into the file starting at `pos`,
    /// stopping early at source EOF. Returns the bytes transferred.
    ///
    /// A transfer of zero bytes leaves the block list and size untouched, so
    /// an empty source never costs an allocation.
    pub fn transfer_from(
        &self,
        src: &mut dyn io::Read,
        pos: u64,
        count: u64,
    ) -> FsResult<u64> {
        let mut state = self.state.lock().expect("content lock poisoned");
        let old_size = state.size;
        let block_size = self.disk.block_size();
        let mut transferred = 0u64;
        let mut outcome = Ok(());

        while transferred < count {
            let cursor = pos + transferred;
            if let Err(error) = self.ensure_capacity(&mut state, cursor + 1) {
                outcome = Err(error);
                break;
            }
            let index = (cursor / block_size) as usize;
            let offset = (cursor % block_size) as usize;
            let room = ((count - transferred) as usize).min(block_size as usize - offset);
            let block = &mut state.blocks[index];
            match src.read(&mut block[offset..offset + room]) {
                Ok(0) => break,
                Ok(n) => transferred += n as u64,
                Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
                Err(error) => {
                    outcome = Err(error.into());
                    break;
                }
            }
        }

        let final_size = if transferred > 0 { old_size.max(pos + transferred) } else { old_size };
        state.size = final_size;
        let needed = Self::blocks_for(final_size, block_size);
        if state.blocks.len() > needed {
            let excess = (state.blocks.len() - needed) as u64;
            self.disk.free(&mut state.blocks, excess);
        }
        outcome.map(|()| transferred)
    }

    /// Writes up to `count` bytes starting at `pos` to `dst`, bounded by the
    /// file size. Returns the bytes transferred.
    pub fn transfer_to(&self, pos: u64, count: u64, dst: &mut dyn io::Write) -> FsResult<u64> {
        let state = self.state.lock().expect("content lock poisoned");
        if pos >= state.size {
            return Ok(0);
        }
        let block_size = self.disk.block_size();
        let mut remaining = count.min(state.size - pos);
        let mut cursor = pos;
        let mut transferred = 0u64;
        while remaining > 0 {
            let block = &state.blocks[(cursor / block_size) as usize];
            let offset = (cursor % block_size) as usize;
            let chunk = (remaining as usize).min(block_size as usize - offset);
            dst.write_all(&block[offset..offset + chunk])?;
            transferred += chunk as u64;
            cursor += chunk as u64;
            remaining -= chunk as u64;
        }
        Ok(transferred)
    }

    /// Copies this file's bytes into `target`, which ends up with the same
    /// size and an independent block list. All-or-nothing on allocation.
    pub fn copy_content_to(&self, target: &RegularContent) -> FsResult<()> {
        let source = self.state.lock().expect("content lock poisoned");
        let mut dest = target.state.lock().expect("content lock poisoned");
        debug_assert!(dest.blocks.is_empty(), "copy target already has content");
        target.disk.allocate(&mut dest.blocks, source.blocks.len() as u64)?;
        for (from, to) in source.blocks.iter().zip(dest.blocks.iter_mut()) {
            to.copy_from_slice(from);
        }
        dest.size = source.size;
        Ok(())
    }

    /// Records one more open handle on this file.
    pub(crate) fn opened(&self) {
        let mut state = self.state.lock().expect("content lock poisoned");
        state.open_count += 1;
    }

    /// Records an open handle closing; the last close of an unlinked file
    /// returns its blocks to the disk.
    pub(crate) fn closed(&self) {
        let mut state = self.state.lock().expect("content lock poisoned");
        state.open_count -= 1;
        if state.open_count == 0 && state.deleted {
            self.discard(&mut state);
        }
    }

    /// Marks the file as unlinked from every directory; content survives
    /// until the last open handle closes.
    pub(crate) fn deleted(&self) {
        let mut state = self.state.lock().expect("content lock poisoned");
        state.deleted = true;
        if state.open_count == 0 {
            self.discard(&mut state);
        }
    }

    fn discard(&self, state: &mut ContentState) {
        self.disk.free_all(&mut state.blocks);
        state.size = 0;
    }

    /// Grows the block list to cover `bytes` bytes of content. When the disk
    /// cannot satisfy the whole request, whatever blocks remain are still
    /// claimed so a partial write can land, and `NoSpace` is returned.
    fn ensure_capacity(&self, state: &mut ContentState, bytes: u64) -> FsResult<()> {
        let block_size = self.disk.block_size();
        let needed = Self::blocks_for(bytes, block_size);
        if needed > state.blocks.len() {
            let missing = (needed - state.blocks.len()) as u64;
            match self.disk.allocate(&mut state.blocks, missing) {
                Ok(()) => {}
                Err(FsError::NoSpace) => {
                    while state.blocks.len() < needed
                        && self.disk.allocate(&mut state.blocks, 1).is_ok()
                    {}
                    return Err(FsError::NoSpace);
                }
                Err(other) => return Err(other),
            }
        }
        Ok(())
    }

    fn blocks_for(bytes: u64, block_size: u64) -> usize {
        (bytes.div_ceil(block_size)) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn content_on(disk: &Arc<Disk>) -> RegularContent {
        RegularContent::new(disk.clone())
    }

    fn small_disk() -> Arc<Disk> {
        // 8 blocks of 8 bytes.
        Arc::new(Disk::new(8, 64, None))
    }

    #[test]
    fn written_bytes_read_back() {
        let disk = small_disk();
        let content = content_on(&disk);
        content.write(0, b"hello world, hello blocks").unwrap();
        assert_eq!(content.size(), 25);

        let mut buf = vec![0u8; 25];
        assert_eq!(content.read(0, &mut buf), Some(25));
        assert_eq!(&buf, b"hello world, hello blocks");
    }

    #[test]
    fn read_past_size_is_eof_repeatedly() {
        let disk = small_disk();
        let content = content_on(&disk);
        content.write(0, b"abc").unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(content.read(3, &mut buf), None);
        assert_eq!(content.read(100, &mut buf), None);
    }

    #[test]
    fn write_past_size_zero_fills_gap() {
        let disk = small_disk();
        let content = content_on(&disk);
        content.write(0, b"ab").unwrap();
        content.write(12, b"cd").unwrap();
        assert_eq!(content.size(), 14);

        let mut buf = vec![0xFFu8; 14];
        assert_eq!(content.read(0, &mut buf), Some(14));
        assert_eq!(&buf[..2], b"ab");
        assert!(buf[2..12].iter().all(|&b| b == 0));
        assert_eq!(&buf[12..], b"cd");
    }

    #[test]
    fn partial_write_on_full_disk_keeps_what_fit() {
        let disk = Arc::new(Disk::new(4, 8, None));
        let content = content_on(&disk);
        let result = content.write(0, b"0123456789");
        assert!(matches!(result, Err(FsError::NoSpace)));
        assert_eq!(content.size(), 8);

        let mut buf = [0u8; 8];
        assert_eq!(content.read(0, &mut buf), Some(8));
        assert_eq!(&buf, b"01234567");
    }

    #[test]
    fn truncate_frees_trailing_blocks_and_zeroes_tail() {
        let disk = small_disk();
        let content = content_on(&disk);
        content.write(0, b"0123456789abcdef").unwrap();
        assert_eq!(content.block_count(), 2);

        content.truncate(4);
        assert_eq!(content.size(), 4);
        assert_eq!(content.block_count(), 1);

        // Extending past the truncation point reads back zeros.
        content.write(6, b"zz").unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(content.read(0, &mut buf), Some(8));
        assert_eq!(&buf, b"0123\0\0zz");
    }

    #[test]
    fn truncate_up_is_a_no_op() {
        let disk = small_disk();
        let content = content_on(&disk);
        content.write(0, b"abc").unwrap();
        content.truncate(100);
        assert_eq!(content.size(), 3);
    }

    #[test]
    fn transfer_from_empty_source_allocates_nothing() {
        let disk = small_disk();
        let content = content_on(&disk);
        let transferred = content.transfer_from(&mut Cursor::new(Vec::new()), 0, 100).unwrap();
        assert_eq!(transferred, 0);
        assert_eq!(content.block_count(), 0);
        assert_eq!(content.size(), 0);
        assert_eq!(disk.allocated_blocks(), 0);
    }

    #[test]
    fn transfer_from_block_boundary_leaves_no_empty_tail() {
        let disk = small_disk();
        let content = content_on(&disk);
        let data = vec![7u8; 16];
        let transferred = content.transfer_from(&mut Cursor::new(data), 0, 100).unwrap();
        assert_eq!(transferred, 16);
        assert_eq!(content.block_count(), 2);
    }

    #[test]
    fn transfer_to_respects_count_and_size() {
        let disk = small_disk();
        let content = content_on(&disk);
        content.write(0, b"0123456789").unwrap();

        let mut out = Vec::new();
        assert_eq!(content.transfer_to(2, 4, &mut out).unwrap(), 4);
        assert_eq!(&out, b"2345");

        out.clear();
        assert_eq!(content.transfer_to(8, 100, &mut out).unwrap(), 2);
        assert_eq!(&out, b"89");

        assert_eq!(content.transfer_to(100, 5, &mut Vec::new()).unwrap(), 0);
    }

    #[test]
    fn copied_content_is_equal_but_independent() {
        let disk = small_disk();
        let content = content_on(&disk);
        content.write(0, b"original bytes").unwrap();

        let copy = content_on(&disk);
        content.copy_content_to(&copy).unwrap();
        assert_eq!(copy.size(), content.size());

        copy.write(0, b"X").unwrap();
        let mut original = [0u8; 1];
        content.read(0, &mut original).unwrap();
        assert_eq!(&original, b"o");
    }

    #[test]
    fn blocks_return_to_disk_after_delete_and_close() {
        let disk = small_disk();
        let content = content_on(&disk);
        content.opened();
        content.write(0, b"some data").unwrap();
        assert!(disk.allocated_blocks() > 0);

        content.deleted();
        // Still readable while a handle is open.
        let mut buf = [0u8; 4];
        assert_eq!(content.read(0, &mut buf), Some(4));

        content.closed();
        assert_eq!(disk.allocated_blocks(), 0);
        assert_eq!(content.size(), 0);
    }

    #[test]
    fn lock_excludes_writers_until_readers_release() {
        let lock = FileLock::new();
        let read = lock.read(uninterruptible).unwrap();
        // A second reader is fine.
        let read2 = lock.read(uninterruptible).unwrap();
        drop(read);
        drop(read2);
        let write = lock.write(uninterruptible).unwrap();
        drop(write);
        let _read3 = lock.read(uninterruptible).unwrap();
    }
}
