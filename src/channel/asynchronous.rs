//! Asynchronous channel: the synchronous channel's operations submitted
//! onto the tokio blocking pool, surfaced as futures or completion
//! callbacks.

use std::io;
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::task::JoinError;

use crate::channel::{FileChannel, FileRangeLock};
use crate::error::{FsError, FsResult};

/// Asynchronous wrapper over a [`FileChannel`].
///
/// Each operation runs the synchronous equivalent on the worker pool of the
/// supplied runtime handle. Closing the channel while operations are in
/// flight completes them with *asynchronous-close*.
pub struct AsyncFileChannel {
    inner: Arc<FileChannel>,
    handle: Handle,
}

impl AsyncFileChannel {
    /// Wraps `channel`, running its operations on `handle`'s blocking pool.
    pub fn new(channel: Arc<FileChannel>, handle: Handle) -> Self {
        AsyncFileChannel { inner: channel, handle }
    }

    /// The wrapped synchronous channel.
    pub fn channel(&self) -> &Arc<FileChannel> {
        &self.inner
    }

    pub fn is_open(&self) -> bool {
        self.inner.is_open()
    }

    async fn submit<T, F>(&self, operation: F) -> FsResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&FileChannel) -> FsResult<T> + Send + 'static,
    {
        let channel = self.inner.clone();
        self.handle
            .spawn_blocking(move || operation(&channel))
            .await
            .unwrap_or_else(|error| Err(join_error(error)))
    }

    /// Reads up to `len` bytes at `position`; `None` signals end of file.
    pub async fn read_at(&self, position: u64, len: usize) -> FsResult<Option<Vec<u8>>> {
        self.submit(move |channel| {
            let mut buf = vec![0u8; len];
            match channel.read_at(position, &mut buf)? {
                Some(count) => {
                    buf.truncate(count);
                    Ok(Some(buf))
                }
                None => Ok(None),
            }
        })
        .await
    }

    /// Writes `data` at `position`, returning the bytes written.
    pub async fn write_at(&self, position: u64, data: Vec<u8>) -> FsResult<usize> {
        self.submit(move |channel| channel.write_at(position, &data)).await
    }

    /// Reads from `src` into the file at `position`.
    pub async fn transfer_from<R>(&self, mut src: R, position: u64, count: u64) -> FsResult<u64>
    where
        R: io::Read + Send + 'static,
    {
        self.submit(move |channel| channel.transfer_from(&mut src, position, count)).await
    }

    pub async fn size(&self) -> FsResult<u64> {
        self.submit(|channel| channel.size()).await
    }

    pub async fn truncate(&self, size: u64) -> FsResult<()> {
        self.submit(move |channel| channel.truncate(size)).await
    }

    /// Acquires the simulated whole-file lock.
    pub async fn lock(&self, shared: bool) -> FsResult<FileRangeLock> {
        self.submit(move |channel| channel.lock(shared)).await
    }

    /// Immediate variant of [`lock`](Self::lock); never blocks.
    pub fn try_lock(&self, shared: bool) -> FsResult<FileRangeLock> {
        self.inner.try_lock(shared)
    }

    /// Runs a read and hands the outcome to `handler` instead of returning
    /// a future to await.
    pub fn read_at_with<F>(&self, position: u64, len: usize, handler: F)
    where
        F: FnOnce(FsResult<Option<Vec<u8>>>) + Send + 'static,
    {
        let channel = self.inner.clone();
        self.handle.spawn_blocking(move || {
            let mut buf = vec![0u8; len];
            let result = channel.read_at(position, &mut buf).map(|read| {
                read.map(|count| {
                    buf.truncate(count);
                    buf
                })
            });
            handler(result);
        });
    }

    /// Runs a write and hands the outcome to `handler`.
    pub fn write_at_with<F>(&self, position: u64, data: Vec<u8>, handler: F)
    where
        F: FnOnce(FsResult<usize>) + Send + 'static,
    {
        let channel = self.inner.clone();
        self.handle.spawn_blocking(move || {
            handler(channel.write_at(position, &data));
        });
    }

    /// Closes the underlying channel; in-flight operations complete with
    /// *asynchronous-close*.
    pub fn close(&self) -> FsResult<()> {
        self.inner.close()
    }
}

fn join_error(error: JoinError) -> FsError {
    if error.is_cancelled() {
        FsError::AsynchronousClose
    } else {
        FsError::illegal(format!("async channel worker failed: {error}"))
    }
}
