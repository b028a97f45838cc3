//! The filesystem facade: wires the disk, tree, attribute service and
//! resource registry together and exposes the user-facing operations.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use bitflags::bitflags;
use tokio::runtime::Handle;
use tracing::debug;

use crate::attr::{AttrValue, AttributeService, BasicAttributes, DosAttributes, PosixAttributes};
use crate::channel::asynchronous::AsyncFileChannel;
use crate::channel::FileChannel;
use crate::config::{Config, WatchConfig};
use crate::content::uninterruptible;
use crate::dir::DirectoryTable;
use crate::disk::Disk;
use crate::error::{FsError, FsResult};
use crate::file::{File, FileFactory};
use crate::path::{FsPath, PathMatcher, PathService};
use crate::state::FileSystemState;
use crate::streams::{FileReader, FileWriter};
use crate::tree::{FileTree, Lookup};
use crate::watch::{DirectorySnapshot, EntryFingerprint, PollingWatchService, SnapshotSource};

bitflags! {
    /// Options for opening a file channel.
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct OpenFlags: u32 {
        const READ = 1;
        const WRITE = 1 << 1;
        const APPEND = 1 << 2;
        const CREATE = 1 << 3;
        const CREATE_NEW = 1 << 4;
        const TRUNCATE_EXISTING = 1 << 5;
        const DELETE_ON_CLOSE = 1 << 6;
    }
}

bitflags! {
    /// Options for move and copy operations.
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct CopyFlags: u32 {
        const REPLACE_EXISTING = 1;
        const COPY_ATTRIBUTES = 1 << 1;
        const ATOMIC_MOVE = 1 << 2;
    }
}

/// An in-memory filesystem instance.
///
/// All state lives on the heap: regular file bytes in the block [`Disk`],
/// the directory forest in [`FileTree`], per-file metadata behind the
/// [`AttributeService`]. Relative paths resolve against the configured
/// working directory.
pub struct MemFileSystem {
    state: Arc<FileSystemState>,
    disk: Arc<Disk>,
    path_service: Arc<PathService>,
    tree: FileTree,
    factory: FileFactory,
    attrs: AttributeService,
    working_directory: Arc<File>,
    working_directory_path: FsPath,
    watch_config: WatchConfig,
}

impl MemFileSystem {
    /// Builds a filesystem from a validated configuration: creates the
    /// roots, the working directory chain, and the shared services.
    pub fn new(config: Config) -> FsResult<Arc<MemFileSystem>> {
        let path_service = PathService::new(
            config.path_flavor,
            config.name_canonical_normalization.clone(),
            config.name_display_normalization.clone(),
            config.path_equality_uses_canonical_form,
        );
        let disk = Arc::new(Disk::new(
            config.block_size,
            config.max_size,
            config.max_cache_size,
        ));
        let state = FileSystemState::new(config.time_source.clone());
        let factory = FileFactory::new(config.time_source.clone(), disk.clone());
        let attrs = AttributeService::new(
            &config.attribute_views,
            config.attribute_providers.clone(),
            &config.default_attribute_values,
        )?;

        let mut roots = HashMap::new();
        for root in &config.roots {
            let name = path_service.name(root);
            let file = factory.create_root_directory(name.clone());
            attrs.seed_initial_attributes(&file);
            roots.insert(name, file);
        }
        let tree = FileTree::new(roots);

        let working_directory_path = path_service.parse(&config.working_directory)?;
        let root_name = working_directory_path
            .root()
            .ok_or_else(|| FsError::illegal("working directory must be absolute"))?;
        let mut current = tree
            .root(root_name)
            .ok_or_else(|| FsError::illegal("working directory root is not configured"))?;
        for name in working_directory_path.names() {
            let table = current.directory().expect("working directory chain is directories");
            let next = match table.get(name) {
                Some(entry) => entry.file,
                None => {
                    let dir = factory.create_directory();
                    attrs.seed_initial_attributes(&dir);
                    table.link(name.clone(), dir.clone())?;
                    dir
                }
            };
            current = next;
        }

        Ok(Arc::new(MemFileSystem {
            state,
            disk,
            path_service,
            tree,
            factory,
            attrs,
            working_directory: current,
            working_directory_path,
            watch_config: config.watch,
        }))
    }

    /// Parses a path string in this filesystem's flavor.
    pub fn path(&self, input: &str) -> FsResult<FsPath> {
        self.path_service.parse(input)
    }

    /// The path service, for building and matching paths directly.
    pub fn path_service(&self) -> &Arc<PathService> {
        &self.path_service
    }

    /// Compiles a `glob:` or `regex:` matcher for this filesystem.
    pub fn path_matcher(&self, specification: &str) -> FsResult<PathMatcher> {
        self.path_service.path_matcher(specification)
    }

    /// The configured root paths, sorted.
    pub fn root_paths(&self) -> Vec<FsPath> {
        self.tree
            .root_names()
            .into_iter()
            .map(|name| self.path_service.path(Some(name), Vec::new()))
            .collect()
    }

    /// The directory relative paths resolve against.
    pub fn working_directory_path(&self) -> &FsPath {
        &self.working_directory_path
    }

    /// Total disk capacity in bytes.
    pub fn total_space(&self) -> u64 {
        self.disk.total_space()
    }

    /// Bytes not backing any file and not parked in the block cache.
    pub fn unallocated_space(&self) -> u64 {
        self.disk.unallocated_space()
    }

    /// The configured block size.
    pub fn block_size(&self) -> u64 {
        self.disk.block_size()
    }

    pub fn is_open(&self) -> bool {
        self.state.is_open()
    }

    /// Closes the filesystem: every open channel, stream and watch service
    /// closes, with failures aggregated. Repeat closes are no-ops.
    pub fn close(&self) -> FsResult<()> {
        self.state.close()
    }

    fn lookup(&self, path: &FsPath, follow: bool) -> FsResult<Lookup> {
        self.state.check_open()?;
        self.tree.lookup(&self.working_directory, path, follow)
    }

    /// True when `path` resolves to an existing file.
    pub fn exists(&self, path: &FsPath, follow: bool) -> bool {
        matches!(self.lookup(path, follow), Ok(lookup) if lookup.entry.is_some())
    }

    fn create_node(
        &self,
        path: &FsPath,
        make: impl FnOnce(&FileFactory) -> Arc<File>,
        attributes: &[(&str, AttrValue)],
    ) -> FsResult<Arc<File>> {
        let lookup = self.lookup(path, false)?;
        if lookup.entry.is_some() {
            return Err(FsError::FileAlreadyExists(path.to_string()));
        }
        let file = make(&self.factory);
        self.attrs.seed_initial_attributes(&file);
        for (key, value) in attributes {
            self.attrs.set_attribute(&file, key, value.clone(), true)?;
        }
        let parent_table = lookup.parent.directory().expect("lookup parent is a directory");
        parent_table.link(lookup.name.clone(), file.clone())?;
        lookup.parent.set_modified_time(self.state.now());
        debug!(path = %path, id = file.id(), "created");
        Ok(file)
    }

    /// Creates an empty directory.
    pub fn create_directory(&self, path: &FsPath) -> FsResult<()> {
        self.create_node(path, FileFactory::create_directory, &[]).map(|_| ())
    }

    /// Creates an empty regular file.
    pub fn create_file(&self, path: &FsPath) -> FsResult<()> {
        self.create_node(path, FileFactory::create_regular, &[]).map(|_| ())
    }

    /// Creates an empty regular file with initial attribute values
    /// (`view:attr` keys); attributes that cannot be set at creation fail
    /// with *unsupported-operation*.
    pub fn create_file_with_attributes(
        &self,
        path: &FsPath,
        attributes: &[(&str, AttrValue)],
    ) -> FsResult<()> {
        self.create_node(path, FileFactory::create_regular, attributes).map(|_| ())
    }

    /// Creates a symbolic link at `link` storing `target`.
    pub fn create_symlink(&self, link: &FsPath, target: &FsPath) -> FsResult<()> {
        let target = target.clone();
        self.create_node(link, move |factory| factory.create_symlink(target), &[]).map(|_| ())
    }

    /// Creates a hard link at `link` to the regular file at `existing`.
    pub fn create_link(&self, link: &FsPath, existing: &FsPath) -> FsResult<()> {
        let source = self.lookup(existing, true)?.require_exists(existing)?;
        if !source.file.is_regular() {
            return Err(FsError::illegal(format!("{existing} is not a regular file")));
        }
        let lookup = self.lookup(link, false)?;
        if lookup.entry.is_some() {
            return Err(FsError::FileAlreadyExists(link.to_string()));
        }
        let parent_table = lookup.parent.directory().expect("lookup parent is a directory");
        parent_table.link(lookup.name.clone(), source.file)?;
        lookup.parent.set_modified_time(self.state.now());
        Ok(())
    }

    /// Deletes the entry at `path`. A symbolic link is deleted itself, not
    /// its target; a directory must be empty.
    pub fn delete(&self, path: &FsPath) -> FsResult<()> {
        let lookup = self.lookup(path, false)?;
        let entry = lookup.entry.ok_or_else(|| FsError::no_such_file(path.to_string()))?;
        if let Some(table) = entry.file.directory() {
            if self.is_root(&entry.file) {
                return Err(FsError::illegal(format!("cannot delete root directory {path}")));
            }
            if !table.is_empty() {
                return Err(FsError::DirectoryNotEmpty(path.to_string()));
            }
        }
        let parent_table = lookup.parent.directory().expect("lookup parent is a directory");
        parent_table.unlink(&entry.name)?;
        if entry.file.link_count() == 0 {
            entry.file.deleted();
        }
        lookup.parent.set_modified_time(self.state.now());
        debug!(path = %path, "deleted");
        Ok(())
    }

    /// Reads the target stored in the symbolic link at `path`.
    pub fn read_symlink(&self, path: &FsPath) -> FsResult<FsPath> {
        let entry = self.lookup(path, false)?.require_exists(path)?;
        entry
            .file
            .symlink_target()
            .cloned()
            .ok_or_else(|| FsError::illegal(format!("{path} is not a symbolic link")))
    }

    /// Lists a directory: one path per entry, sorted by display name.
    pub fn list_directory(&self, path: &FsPath) -> FsResult<Vec<FsPath>> {
        let entry = self.lookup(path, true)?.require_exists(path)?;
        let table = entry
            .file
            .directory()
            .ok_or_else(|| FsError::NotADirectory(path.to_string()))?;
        Ok(table.snapshot().into_iter().map(|name| path.child(name)).collect())
    }

    /// Opens a channel on the regular file at `path` per `flags`.
    pub fn open_channel(
        self: &Arc<Self>,
        path: &FsPath,
        flags: OpenFlags,
    ) -> FsResult<Arc<FileChannel>> {
        if flags.contains(OpenFlags::APPEND) {
            if flags.contains(OpenFlags::READ) {
                return Err(FsError::illegal("READ + APPEND is not allowed"));
            }
            if flags.contains(OpenFlags::TRUNCATE_EXISTING) {
                return Err(FsError::illegal("APPEND + TRUNCATE_EXISTING is not allowed"));
            }
        }
        let write = flags.intersects(OpenFlags::WRITE | OpenFlags::APPEND);
        let read = flags.contains(OpenFlags::READ) || !write;

        let lookup = self.lookup(path, true)?;
        let (file, existed) = match lookup.entry {
            Some(entry) => {
                if flags.contains(OpenFlags::CREATE_NEW) {
                    return Err(FsError::FileAlreadyExists(path.to_string()));
                }
                (entry.file, true)
            }
            None => {
                if write && flags.intersects(OpenFlags::CREATE | OpenFlags::CREATE_NEW) {
                    let file = self.factory.create_regular();
                    self.attrs.seed_initial_attributes(&file);
                    let parent_table =
                        lookup.parent.directory().expect("lookup parent is a directory");
                    parent_table.link(lookup.name.clone(), file.clone())?;
                    lookup.parent.set_modified_time(self.state.now());
                    (file, false)
                } else {
                    return Err(FsError::no_such_file(path.to_string()));
                }
            }
        };
        if !file.is_regular() {
            return Err(FsError::illegal(format!("{path} is a directory")));
        }
        if existed && write && flags.contains(OpenFlags::TRUNCATE_EXISTING) {
            let content = file.content().expect("regular file has content");
            let _guard = content.file_lock().write(uninterruptible)?;
            content.truncate(0);
            file.set_modified_time(self.state.now());
        }

        let channel = FileChannel::open(
            file,
            read,
            write,
            flags.contains(OpenFlags::APPEND),
            self.state.clone(),
        )?;
        if flags.contains(OpenFlags::DELETE_ON_CLOSE) {
            let fs = self.clone();
            let path = path.clone();
            channel.set_on_close(Box::new(move || {
                let _ = fs.delete(&path);
            }));
        }
        Ok(channel)
    }

    /// Opens a read stream on the file at `path`.
    pub fn open_reader(self: &Arc<Self>, path: &FsPath) -> FsResult<FileReader> {
        Ok(FileReader::new(self.open_channel(path, OpenFlags::READ)?))
    }

    /// Opens a write stream, creating the file if needed. `append` writes
    /// at end of file; otherwise existing content truncates away.
    pub fn open_writer(self: &Arc<Self>, path: &FsPath, append: bool) -> FsResult<FileWriter> {
        let flags = if append {
            OpenFlags::APPEND | OpenFlags::CREATE
        } else {
            OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::TRUNCATE_EXISTING
        };
        Ok(FileWriter::new(self.open_channel(path, flags)?))
    }

    /// Opens an asynchronous channel running on `handle`'s worker pool.
    pub fn open_async_channel(
        self: &Arc<Self>,
        path: &FsPath,
        flags: OpenFlags,
        handle: Handle,
    ) -> FsResult<AsyncFileChannel> {
        Ok(AsyncFileChannel::new(self.open_channel(path, flags)?, handle))
    }

    fn is_root(&self, file: &Arc<File>) -> bool {
        self.tree
            .root_names()
            .iter()
            .any(|name| self.tree.root(name).is_some_and(|root| Arc::ptr_eq(&root, file)))
    }

    fn is_ancestor(&self, candidate: &Arc<File>, start: &Arc<File>) -> bool {
        let mut dir = start.clone();
        loop {
            if Arc::ptr_eq(candidate, &dir) {
                return true;
            }
            let parent = dir.directory().and_then(DirectoryTable::parent);
            match parent {
                Some(parent) if !Arc::ptr_eq(&parent, &dir) => dir = parent,
                _ => return false,
            }
        }
    }

    /// Moves the entry at `from` to `to`. The link itself moves — symbolic
    /// links are never followed. With `REPLACE_EXISTING` an existing target
    /// (empty directory or file) is deleted first.
    pub fn rename(&self, from: &FsPath, to: &FsPath, flags: CopyFlags) -> FsResult<()> {
        let source = self.lookup(from, false)?.require_exists(from)?;
        if self.is_root(&source.file) {
            return Err(FsError::illegal(format!("cannot move root directory {from}")));
        }

        let target = self.lookup(to, false)?;
        if let Some(existing) = &target.entry {
            if Arc::ptr_eq(&existing.file, &source.file) {
                return Ok(());
            }
            if !flags.contains(CopyFlags::REPLACE_EXISTING) {
                return Err(FsError::FileAlreadyExists(to.to_string()));
            }
            self.delete(to)?;
        }
        if source.file.is_directory() && self.is_ancestor(&source.file, &target.parent) {
            return Err(FsError::illegal(format!(
                "cannot move {from} into its own subtree {to}"
            )));
        }

        let from_parent = self.lookup(from, false)?;
        let from_table = from_parent.parent.directory().expect("lookup parent is a directory");
        let entry = from_table.unlink(&from_parent.name)?;
        let to_table = target.parent.directory().expect("lookup parent is a directory");
        match to_table.link(target.name.clone(), entry.file.clone()) {
            Ok(()) => {}
            Err(error) => {
                // Restore the source entry so a failed move changes nothing.
                from_table.link(entry.name.clone(), entry.file)?;
                return Err(error);
            }
        }
        let now = self.state.now();
        from_parent.parent.set_modified_time(now);
        target.parent.set_modified_time(now);
        debug!(from = %from, to = %to, "moved");
        Ok(())
    }

    /// Copies the file at `from` (following symbolic links) to `to`.
    /// Content copies for regular files; directories copy empty. With
    /// `COPY_ATTRIBUTES` the timestamps and stored attributes carry over.
    pub fn copy(&self, from: &FsPath, to: &FsPath, flags: CopyFlags) -> FsResult<()> {
        if flags.contains(CopyFlags::ATOMIC_MOVE) {
            return Err(FsError::unsupported("ATOMIC_MOVE does not apply to copy"));
        }
        let source = self.lookup(from, true)?.require_exists(from)?;

        let target = self.lookup(to, false)?;
        if let Some(existing) = &target.entry {
            if Arc::ptr_eq(&existing.file, &source.file) {
                return Ok(());
            }
            if !flags.contains(CopyFlags::REPLACE_EXISTING) {
                return Err(FsError::FileAlreadyExists(to.to_string()));
            }
            self.delete(to)?;
        }

        let copy = self.factory.copy_without_content(&source.file);
        self.attrs.seed_initial_attributes(&copy);
        if let (Some(source_content), Some(copy_content)) =
            (source.file.content(), copy.content())
        {
            // Lock ordering for cross-file operations: ascending file id.
            if source.file.id() < copy.id() {
                let _source_guard = source_content.file_lock().read(uninterruptible)?;
                let _copy_guard = copy_content.file_lock().write(uninterruptible)?;
                source_content.copy_content_to(copy_content)?;
            } else {
                let _copy_guard = copy_content.file_lock().write(uninterruptible)?;
                let _source_guard = source_content.file_lock().read(uninterruptible)?;
                source_content.copy_content_to(copy_content)?;
            }
        }
        if flags.contains(CopyFlags::COPY_ATTRIBUTES) {
            copy.set_times(source.file.times());
            source.file.copy_stored_attributes_to(&copy);
        }

        let to_table = target.parent.directory().expect("lookup parent is a directory");
        to_table.link(target.name.clone(), copy)?;
        target.parent.set_modified_time(self.state.now());
        debug!(from = %from, to = %to, "copied");
        Ok(())
    }

    /// Reads one attribute, addressed `view:attr`.
    pub fn get_attribute(&self, path: &FsPath, key: &str, follow: bool) -> FsResult<AttrValue> {
        let entry = self.lookup(path, follow)?.require_exists(path)?;
        self.attrs.get_attribute(&entry.file, key)
    }

    /// Writes one attribute, addressed `view:attr`.
    pub fn set_attribute(
        &self,
        path: &FsPath,
        key: &str,
        value: AttrValue,
        follow: bool,
    ) -> FsResult<()> {
        let entry = self.lookup(path, follow)?.require_exists(path)?;
        self.attrs.set_attribute(&entry.file, key, value, false)
    }

    /// Reads an attribute set: `view:*` or `view:a,b,c`.
    pub fn read_attributes(
        &self,
        path: &FsPath,
        specification: &str,
        follow: bool,
    ) -> FsResult<BTreeMap<String, AttrValue>> {
        let entry = self.lookup(path, follow)?.require_exists(path)?;
        self.attrs.read_attributes(&entry.file, specification)
    }

    /// Typed snapshot of the basic view.
    pub fn basic_attributes(&self, path: &FsPath, follow: bool) -> FsResult<BasicAttributes> {
        let entry = self.lookup(path, follow)?.require_exists(path)?;
        Ok(self.attrs.basic_attributes(&entry.file))
    }

    /// Typed snapshot of the posix view.
    pub fn posix_attributes(&self, path: &FsPath, follow: bool) -> FsResult<PosixAttributes> {
        let entry = self.lookup(path, follow)?.require_exists(path)?;
        self.attrs.posix_attributes(&entry.file)
    }

    /// Typed snapshot of the dos view.
    pub fn dos_attributes(&self, path: &FsPath, follow: bool) -> FsResult<DosAttributes> {
        let entry = self.lookup(path, follow)?.require_exists(path)?;
        self.attrs.dos_attributes(&entry.file)
    }

    /// Hard-link count of the file at `path`.
    pub fn link_count(&self, path: &FsPath, follow: bool) -> FsResult<u32> {
        let entry = self.lookup(path, follow)?.require_exists(path)?;
        Ok(entry.file.link_count())
    }

    /// Creates a watch service polling with the configured interval on
    /// `handle`'s runtime.
    pub fn new_watch_service(self: &Arc<Self>, handle: Handle) -> Arc<PollingWatchService> {
        PollingWatchService::new(
            self.clone() as Arc<dyn SnapshotSource>,
            self.watch_config.interval,
            handle,
            self.state.clone(),
        )
    }
}

impl SnapshotSource for MemFileSystem {
    fn snapshot(&self, path: &FsPath) -> FsResult<DirectorySnapshot> {
        let entry = self.lookup(path, true)?.require_exists(path)?;
        let table = entry
            .file
            .directory()
            .ok_or_else(|| FsError::NotADirectory(path.to_string()))?;
        let mut entries = HashMap::new();
        for child in table.entries() {
            entries.insert(
                child.name,
                EntryFingerprint { modified: child.file.times().modified },
            );
        }
        Ok(DirectorySnapshot::new(entries))
    }
}

impl std::fmt::Debug for MemFileSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemFileSystem")
            .field("working_directory", &self.working_directory_path.to_string())
            .field("open", &self.is_open())
            .finish()
    }
}

impl Drop for MemFileSystem {
    fn drop(&mut self) {
        let _ = self.state.close();
    }
}
