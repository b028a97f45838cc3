//! memfs-mamont - an in-memory virtual filesystem in Rust.
//!
//! The crate emulates POSIX-like and Windows-like filesystem semantics
//! entirely on the heap: hierarchical directories, block-backed regular
//! files with random-access channels, symbolic and hard links, attribute
//! views, glob/regex path matching and a polling directory watch service.
//! It is meant as a sandboxed stand-in for a real filesystem in tests and
//! ephemeral storage.
//!
//! Construction goes through [`config::Config`]:
//!
//! ```no_run
//! use memfs_mamont::config::Config;
//! use memfs_mamont::fs::MemFileSystem;
//!
//! let fs = MemFileSystem::new(Config::unix().build()?)?;
//! let path = fs.path("/work/notes.txt")?;
//! fs.create_file(&path)?;
//! # Ok::<(), memfs_mamont::error::FsError>(())
//! ```

pub mod attr;
pub mod channel;
pub mod config;
pub mod content;
pub mod dir;
pub mod disk;
pub mod error;
pub mod file;
pub mod fs;
pub mod glob;
pub mod name;
pub mod path;
pub mod state;
pub mod streams;
pub mod time;
pub mod tree;
pub mod watch;

pub use config::Config;
pub use error::{FsError, FsResult};
pub use fs::{CopyFlags, MemFileSystem, OpenFlags};
pub use path::FsPath;
