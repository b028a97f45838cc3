//! The file entity: identity, kind, link accounting, timestamps and the
//! attribute map shared by every attribute view.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::attr::AttrValue;
use crate::content::RegularContent;
use crate::dir::DirectoryTable;
use crate::disk::Disk;
use crate::name::Name;
use crate::path::FsPath;
use crate::time::{FileTime, FileTimeSource};

/// Kind-specific payload of a file.
pub enum FileKind {
    /// A directory with its entry table.
    Directory(DirectoryTable),
    /// A regular file with block-backed content.
    Regular(RegularContent),
    /// A symbolic link storing its target path.
    Symlink(FsPath),
}

/// Creation, access and modification timestamps of a file.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FileTimes {
    pub created: FileTime,
    pub accessed: FileTime,
    pub modified: FileTime,
}

/// A filesystem object. Shared via `Arc`; directory entries own their
/// children, `.`/`..` back-references are weak.
pub struct File {
    id: u64,
    kind: FileKind,
    links: AtomicU32,
    times: Mutex<FileTimes>,
    attributes: Mutex<HashMap<String, AttrValue>>,
}

impl File {
    /// Stable identifier, unique within the filesystem.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The kind-specific payload.
    pub fn kind(&self) -> &FileKind {
        &self.kind
    }

    pub fn is_directory(&self) -> bool {
        matches!(self.kind, FileKind::Directory(_))
    }

    pub fn is_regular(&self) -> bool {
        matches!(self.kind, FileKind::Regular(_))
    }

    pub fn is_symlink(&self) -> bool {
        matches!(self.kind, FileKind::Symlink(_))
    }

    /// The entry table, for directories.
    pub fn directory(&self) -> Option<&DirectoryTable> {
        match &self.kind {
            FileKind::Directory(table) => Some(table),
            _ => None,
        }
    }

    /// The content, for regular files.
    pub fn content(&self) -> Option<&RegularContent> {
        match &self.kind {
            FileKind::Regular(content) => Some(content),
            _ => None,
        }
    }

    /// The stored target, for symbolic links.
    pub fn symlink_target(&self) -> Option<&FsPath> {
        match &self.kind {
            FileKind::Symlink(target) => Some(target),
            _ => None,
        }
    }

    /// Size in bytes: content size for regular files, 0 otherwise.
    pub fn size(&self) -> u64 {
        match &self.kind {
            FileKind::Regular(content) => content.size(),
            _ => 0,
        }
    }

    /// Number of directory entries pointing at this file.
    pub fn link_count(&self) -> u32 {
        self.links.load(Ordering::Acquire)
    }

    pub(crate) fn increment_links(&self) {
        self.links.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn decrement_links(&self) {
        self.links.fetch_sub(1, Ordering::AcqRel);
    }

    /// Snapshot of all three timestamps.
    pub fn times(&self) -> FileTimes {
        *self.times.lock().expect("times lock poisoned")
    }

    pub fn set_creation_time(&self, time: FileTime) {
        self.times.lock().expect("times lock poisoned").created = time;
    }

    pub fn set_access_time(&self, time: FileTime) {
        self.times.lock().expect("times lock poisoned").accessed = time;
    }

    pub fn set_modified_time(&self, time: FileTime) {
        self.times.lock().expect("times lock poisoned").modified = time;
    }

    pub(crate) fn set_times(&self, times: FileTimes) {
        *self.times.lock().expect("times lock poisoned") = times;
    }

    /// Reads a stored attribute value.
    pub fn get_stored_attribute(&self, view: &str, attribute: &str) -> Option<AttrValue> {
        let attributes = self.attributes.lock().expect("attributes lock poisoned");
        attributes.get(&format!("{view}:{attribute}")).cloned()
    }

    /// Stores an attribute value.
    pub fn set_stored_attribute(&self, view: &str, attribute: &str, value: AttrValue) {
        let mut attributes = self.attributes.lock().expect("attributes lock poisoned");
        attributes.insert(format!("{view}:{attribute}"), value);
    }

    /// Removes a stored attribute value.
    pub fn delete_stored_attribute(&self, view: &str, attribute: &str) {
        let mut attributes = self.attributes.lock().expect("attributes lock poisoned");
        attributes.remove(&format!("{view}:{attribute}"));
    }

    /// Attribute names stored under `view`, for dynamic views.
    pub fn stored_attribute_names(&self, view: &str) -> Vec<String> {
        let prefix = format!("{view}:");
        let attributes = self.attributes.lock().expect("attributes lock poisoned");
        attributes.keys().filter_map(|key| key.strip_prefix(&prefix)).map(str::to_string).collect()
    }

    /// Copies every stored attribute onto `target`.
    pub(crate) fn copy_stored_attributes_to(&self, target: &File) {
        let source = self.attributes.lock().expect("attributes lock poisoned").clone();
        let mut dest = target.attributes.lock().expect("attributes lock poisoned");
        *dest = source;
    }

    /// Called when the file's last directory entry goes away.
    pub(crate) fn deleted(&self) {
        if let FileKind::Regular(content) = &self.kind {
            content.deleted();
        }
    }
}

impl std::fmt::Debug for File {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match &self.kind {
            FileKind::Directory(_) => "directory",
            FileKind::Regular(_) => "regular",
            FileKind::Symlink(_) => "symlink",
        };
        f.debug_struct("File").field("id", &self.id).field("kind", &kind).finish()
    }
}

/// Creates files, assigning ids and initial timestamps.
pub struct FileFactory {
    next_id: AtomicU64,
    time: Arc<dyn FileTimeSource>,
    disk: Arc<Disk>,
}

impl FileFactory {
    pub fn new(time: Arc<dyn FileTimeSource>, disk: Arc<Disk>) -> Self {
        FileFactory { next_id: AtomicU64::new(0), time, disk }
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::AcqRel)
    }

    fn new_file(&self, id: u64, kind: FileKind) -> File {
        let now = self.time.now();
        File {
            id,
            kind,
            links: AtomicU32::new(0),
            times: Mutex::new(FileTimes { created: now, accessed: now, modified: now }),
            attributes: Mutex::new(HashMap::new()),
        }
    }

    /// Creates an empty directory. Its self entry accounts for one link.
    pub fn create_directory(&self) -> Arc<File> {
        let id = self.next_id();
        let file = Arc::new_cyclic(|weak| {
            self.new_file(id, FileKind::Directory(DirectoryTable::new(weak.clone())))
        });
        file.increment_links();
        file
    }

    /// Creates a root directory: its parent is itself and its name is the
    /// root token, for two links total.
    pub fn create_root_directory(&self, root: Name) -> Arc<File> {
        let file = self.create_directory();
        let table = file.directory().expect("just created a directory");
        table.set_parent(file.clone(), root);
        file.increment_links();
        file
    }

    /// Creates an empty regular file backed by the shared disk.
    pub fn create_regular(&self) -> Arc<File> {
        let id = self.next_id();
        Arc::new(self.new_file(id, FileKind::Regular(RegularContent::new(self.disk.clone()))))
    }

    /// Creates a symbolic link storing `target`.
    pub fn create_symlink(&self, target: FsPath) -> Arc<File> {
        let id = self.next_id();
        Arc::new(self.new_file(id, FileKind::Symlink(target)))
    }

    /// Creates a fresh file of the same kind as `source` with empty content
    /// and current timestamps; stored attributes do not carry over.
    pub fn copy_without_content(&self, source: &File) -> Arc<File> {
        match source.kind() {
            FileKind::Directory(_) => self.create_directory(),
            FileKind::Regular(_) => self.create_regular(),
            FileKind::Symlink(target) => self.create_symlink(target.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::SystemTimeSource;

    fn factory() -> FileFactory {
        FileFactory::new(Arc::new(SystemTimeSource), Arc::new(Disk::new(8, 1024, None)))
    }

    #[test]
    fn ids_are_unique_and_increasing() {
        let factory = factory();
        let a = factory.create_regular();
        let b = factory.create_directory();
        assert!(b.id() > a.id());
    }

    #[test]
    fn new_directory_counts_its_self_entry() {
        let factory = factory();
        let dir = factory.create_directory();
        assert_eq!(dir.link_count(), 1);
        assert!(dir.is_directory());
    }

    #[test]
    fn root_directory_is_its_own_parent() {
        let factory = factory();
        let root = factory.create_root_directory(Name::simple("/"));
        assert_eq!(root.link_count(), 2);
        let table = root.directory().unwrap();
        let parent = table.parent().unwrap();
        assert_eq!(parent.id(), root.id());
    }

    #[test]
    fn copy_without_content_preserves_kind_only() {
        let factory = factory();
        let regular = factory.create_regular();
        regular.content().unwrap().write(0, b"bytes").unwrap();
        regular.set_stored_attribute("user", "tag", AttrValue::Bytes(vec![1]));

        let copy = factory.copy_without_content(&regular);
        assert!(copy.is_regular());
        assert_eq!(copy.size(), 0);
        assert!(copy.get_stored_attribute("user", "tag").is_none());
        assert_ne!(copy.id(), regular.id());
    }
}
