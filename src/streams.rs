//! Byte-stream adapters over file channels, implementing the std I/O
//! traits.

use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::Arc;

use crate::channel::FileChannel;
use crate::error::FsResult;

/// Reads a file through the std [`Read`] trait. End of file surfaces as the
/// conventional zero-length read.
pub struct FileReader {
    channel: Arc<FileChannel>,
}

impl FileReader {
    pub fn new(channel: Arc<FileChannel>) -> Self {
        FileReader { channel }
    }

    /// Closes the stream; repeat closes are tolerated.
    pub fn close(&self) -> FsResult<()> {
        self.channel.close()
    }
}

impl Read for FileReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        match self.channel.read(buf) {
            Ok(Some(count)) => Ok(count),
            Ok(None) => Ok(0),
            Err(error) => Err(error.into()),
        }
    }
}

impl Seek for FileReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        seek_channel(&self.channel, pos)
    }
}

/// Writes a file through the std [`Write`] trait. In append mode every
/// write lands at the current end of file.
pub struct FileWriter {
    channel: Arc<FileChannel>,
}

impl FileWriter {
    pub fn new(channel: Arc<FileChannel>) -> Self {
        FileWriter { channel }
    }

    /// Closes the stream; repeat closes are tolerated.
    pub fn close(&self) -> FsResult<()> {
        self.channel.close()
    }
}

impl Write for FileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.channel.write(buf).map_err(Into::into)
    }

    /// Nothing is buffered; flushing is a no-op and never fails, even on a
    /// closed stream.
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for FileWriter {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        seek_channel(&self.channel, pos)
    }
}

fn seek_channel(channel: &FileChannel, pos: SeekFrom) -> io::Result<u64> {
    let target = match pos {
        SeekFrom::Start(offset) => offset as i128,
        SeekFrom::End(delta) => channel.size().map_err(io::Error::from)? as i128 + delta as i128,
        SeekFrom::Current(delta) => {
            channel.position().map_err(io::Error::from)? as i128 + delta as i128
        }
    };
    if target < 0 {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "seek before start of file"));
    }
    let target = target as u64;
    channel.set_position(target).map_err(io::Error::from)?;
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::Disk;
    use crate::error::FsError;
    use crate::file::FileFactory;
    use crate::state::FileSystemState;
    use crate::time::SystemTimeSource;

    fn open(read: bool, write: bool, append: bool) -> Arc<FileChannel> {
        let state = FileSystemState::new(Arc::new(SystemTimeSource));
        let factory =
            FileFactory::new(Arc::new(SystemTimeSource), Arc::new(Disk::new(8, 4096, None)));
        FileChannel::open(factory.create_regular(), read, write, append, state).unwrap()
    }

    #[test]
    fn bytes_written_stream_back() {
        let channel = open(true, true, false);
        let mut writer = FileWriter::new(channel.clone());
        writer.write_all(b"line one\n").unwrap();
        writer.flush().unwrap();

        channel.set_position(0).unwrap();
        let mut reader = FileReader::new(channel);
        let mut text = String::new();
        reader.read_to_string(&mut text).unwrap();
        assert_eq!(text, "line one\n");
        // Reading at EOF keeps returning zero.
        let mut buf = [0u8; 4];
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn append_writer_ignores_seeks_for_writes() {
        let channel = open(true, true, true);
        let mut writer = FileWriter::new(channel.clone());
        writer.write_all(b"AB").unwrap();
        writer.seek(SeekFrom::Start(0)).unwrap();
        writer.write_all(b"CD").unwrap();

        let mut buf = [0u8; 4];
        assert_eq!(channel.read_at(0, &mut buf).unwrap(), Some(4));
        assert_eq!(&buf, b"ABCD");
    }

    #[test]
    fn closed_stream_rejects_io_but_tolerates_flush_and_close() {
        let channel = open(true, true, false);
        let mut writer = FileWriter::new(channel.clone());
        let mut reader = FileReader::new(channel);

        writer.close().unwrap();
        writer.close().unwrap();
        writer.flush().unwrap();

        assert!(writer.write(b"x").is_err());
        let mut buf = [0u8; 1];
        assert!(reader.read(&mut buf).is_err());
    }

    #[test]
    fn seek_reports_and_moves_the_position() {
        let channel = open(true, true, false);
        let mut writer = FileWriter::new(channel.clone());
        writer.write_all(b"0123456789").unwrap();

        let mut reader = FileReader::new(channel);
        assert_eq!(reader.seek(SeekFrom::End(-2)).unwrap(), 8);
        let mut buf = [0u8; 2];
        assert_eq!(reader.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf, b"89");

        assert!(reader.seek(SeekFrom::Current(-100)).is_err());
    }

    #[test]
    fn error_kinds_map_to_io_errors() {
        let channel = open(false, true, false);
        let mut reader = FileReader::new(channel);
        let mut buf = [0u8; 1];
        let error = reader.read(&mut buf).unwrap_err();
        let inner = error.into_inner().unwrap().downcast::<FsError>().unwrap();
        assert!(matches!(*inner, FsError::NonReadable));
    }
}
