//! Directory entry tables: name → file mapping with `.`/`..` handling and
//! hard-link accounting.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use crate::error::{FsError, FsResult};
use crate::file::{File, FileKind};
use crate::name::Name;

/// One directory entry: a name bound to a file.
#[derive(Clone)]
pub struct DirEntry {
    /// The name the file is linked under.
    pub name: Name,
    /// The linked file.
    pub file: Arc<File>,
}

impl DirEntry {
    pub fn new(name: Name, file: Arc<File>) -> Self {
        DirEntry { name, file }
    }
}

struct DirState {
    entries: HashMap<Name, DirEntry>,
    /// Back-reference to the owning file, for the synthesized `.` entry.
    self_ref: Weak<File>,
    /// The containing directory, for the synthesized `..` entry. A root
    /// directory points at itself; an unlinked directory at nothing.
    parent: Weak<File>,
    /// Name this directory is linked under in its parent.
    name: Name,
}

/// Entry table of one directory, keyed by canonical name.
///
/// The reserved `.` and `..` entries are synthesized from the self and
/// parent references rather than stored, and can never be linked or
/// unlinked as user entries.
pub struct DirectoryTable {
    state: Mutex<DirState>,
}

impl DirectoryTable {
    pub(crate) fn new(self_ref: Weak<File>) -> Self {
        DirectoryTable {
            state: Mutex::new(DirState {
                entries: HashMap::new(),
                self_ref,
                parent: Weak::new(),
                name: Name::simple("?"),
            }),
        }
    }

    /// Looks up an entry, handling `.` and `..`.
    pub fn get(&self, name: &Name) -> Option<DirEntry> {
        let state = self.state.lock().expect("directory lock poisoned");
        match name.display() {
            "." => state.self_ref.upgrade().map(|file| DirEntry::new(Name::self_name(), file)),
            ".." => state.parent.upgrade().map(|file| DirEntry::new(Name::parent_name(), file)),
            _ => state.entries.get(name).cloned(),
        }
    }

    /// Links `file` under `name`. Rejects the reserved names and duplicates.
    pub fn link(&self, name: Name, file: Arc<File>) -> FsResult<()> {
        if name.is_reserved() {
            return Err(FsError::illegal(format!("cannot link reserved name {name}")));
        }
        let mut state = self.state.lock().expect("directory lock poisoned");
        if state.entries.contains_key(&name) {
            return Err(FsError::FileAlreadyExists(name.display().to_string()));
        }
        let me = state.self_ref.upgrade().expect("directory file dropped while linked");
        file.increment_links();
        if let FileKind::Directory(child) = file.kind() {
            child.set_parent(me.clone(), name.clone());
            // The child's `..` entry references this directory.
            me.increment_links();
        }
        state.entries.insert(name.clone(), DirEntry::new(name, file));
        Ok(())
    }

    /// Removes the entry for `name` and returns it. Rejects the reserved
    /// names; missing names fail with *no-such-file*.
    pub fn unlink(&self, name: &Name) -> FsResult<DirEntry> {
        if name.is_reserved() {
            return Err(FsError::illegal(format!("cannot unlink reserved name {name}")));
        }
        let mut state = self.state.lock().expect("directory lock poisoned");
        let entry = state
            .entries
            .remove(name)
            .ok_or_else(|| FsError::no_such_file(name.display().to_string()))?;
        let me = state.self_ref.upgrade().expect("directory file dropped while linked");
        entry.file.decrement_links();
        if let FileKind::Directory(child) = entry.file.kind() {
            child.clear_parent();
            me.decrement_links();
        }
        Ok(entry)
    }

    /// Names of all regular entries, sorted lexicographically by display
    /// form; `.` and `..` are not included.
    pub fn snapshot(&self) -> Vec<Name> {
        let state = self.state.lock().expect("directory lock poisoned");
        let mut names: Vec<Name> = state.entries.values().map(|entry| entry.name.clone()).collect();
        names.sort_by(|a, b| a.display().cmp(b.display()));
        names
    }

    /// All entries, unordered; used by the watch service's polling scan.
    pub(crate) fn entries(&self) -> Vec<DirEntry> {
        let state = self.state.lock().expect("directory lock poisoned");
        state.entries.values().cloned().collect()
    }

    /// Entry count including `.` and, when this directory is linked (or is
    /// a root), `..`.
    pub fn entry_count(&self) -> usize {
        let state = self.state.lock().expect("directory lock poisoned");
        let parent_entry = usize::from(state.parent.upgrade().is_some());
        state.entries.len() + 1 + parent_entry
    }

    /// True when the directory has no entries besides `.` and `..`.
    pub fn is_empty(&self) -> bool {
        let state = self.state.lock().expect("directory lock poisoned");
        state.entries.is_empty()
    }

    /// The containing directory, if this directory is linked anywhere.
    pub fn parent(&self) -> Option<Arc<File>> {
        let state = self.state.lock().expect("directory lock poisoned");
        state.parent.upgrade()
    }

    /// The entry describing this directory within its parent.
    pub(crate) fn entry_in_parent(&self) -> Option<DirEntry> {
        let state = self.state.lock().expect("directory lock poisoned");
        let file = state.self_ref.upgrade()?;
        state.parent.upgrade()?;
        Some(DirEntry::new(state.name.clone(), file))
    }

    pub(crate) fn set_parent(&self, parent: Arc<File>, name: Name) {
        let mut state = self.state.lock().expect("directory lock poisoned");
        state.parent = Arc::downgrade(&parent);
        state.name = name;
    }

    pub(crate) fn clear_parent(&self) {
        let mut state = self.state.lock().expect("directory lock poisoned");
        state.parent = Weak::new();
        state.name = Name::simple("?");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::Disk;
    use crate::file::FileFactory;
    use crate::time::SystemTimeSource;

    fn factory() -> FileFactory {
        FileFactory::new(Arc::new(SystemTimeSource), Arc::new(Disk::new(8, 1024, None)))
    }

    #[test]
    fn linked_entries_are_found_and_snapshot_sorts_by_display() {
        let factory = factory();
        let dir = factory.create_directory();
        let table = dir.directory().unwrap();

        for name in ["zebra", "apple", "Mango"] {
            table.link(Name::simple(name), factory.create_regular()).unwrap();
        }

        assert!(table.get(&Name::simple("apple")).is_some());
        assert!(table.get(&Name::simple("missing")).is_none());

        let snapshot: Vec<String> =
            table.snapshot().iter().map(|n| n.display().to_string()).collect();
        assert_eq!(snapshot, vec!["Mango", "apple", "zebra"]);
    }

    #[test]
    fn duplicate_and_reserved_links_are_rejected() {
        let factory = factory();
        let dir = factory.create_directory();
        let table = dir.directory().unwrap();

        table.link(Name::simple("a"), factory.create_regular()).unwrap();
        assert!(matches!(
            table.link(Name::simple("a"), factory.create_regular()),
            Err(FsError::FileAlreadyExists(_))
        ));
        assert!(matches!(
            table.link(Name::self_name(), factory.create_regular()),
            Err(FsError::IllegalArgument(_))
        ));
        assert!(matches!(table.unlink(&Name::parent_name()), Err(FsError::IllegalArgument(_))));
        assert!(matches!(table.unlink(&Name::simple("ghost")), Err(FsError::NoSuchFile(_))));
    }

    #[test]
    fn dot_and_dotdot_resolve_to_self_and_parent() {
        let factory = factory();
        let root = factory.create_root_directory(Name::simple("/"));
        let root_table = root.directory().unwrap();

        let child = factory.create_directory();
        root_table.link(Name::simple("child"), child.clone()).unwrap();
        let child_table = child.directory().unwrap();

        assert_eq!(child_table.get(&Name::self_name()).unwrap().file.id(), child.id());
        assert_eq!(child_table.get(&Name::parent_name()).unwrap().file.id(), root.id());
        // Root's parent is itself.
        assert_eq!(root_table.get(&Name::parent_name()).unwrap().file.id(), root.id());
    }

    #[test]
    fn link_counts_track_self_parent_and_children() {
        let factory = factory();
        let root = factory.create_root_directory(Name::simple("/"));
        let root_table = root.directory().unwrap();
        assert_eq!(root.link_count(), 2);

        let child = factory.create_directory();
        root_table.link(Name::simple("child"), child.clone()).unwrap();
        // Child: self + entry in root. Root: self + own parent + child's `..`.
        assert_eq!(child.link_count(), 2);
        assert_eq!(root.link_count(), 3);

        let file = factory.create_regular();
        root_table.link(Name::simple("file"), file.clone()).unwrap();
        assert_eq!(file.link_count(), 1);
        assert_eq!(root.link_count(), 3);

        root_table.unlink(&Name::simple("child")).unwrap();
        assert_eq!(child.link_count(), 1);
        assert_eq!(root.link_count(), 2);
        assert!(child.directory().unwrap().parent().is_none());
    }

    #[test]
    fn entry_count_includes_dot_entries() {
        let factory = factory();
        let root = factory.create_root_directory(Name::simple("/"));
        let table = root.directory().unwrap();
        assert_eq!(table.entry_count(), 2);

        table.link(Name::simple("a"), factory.create_regular()).unwrap();
        assert_eq!(table.entry_count(), 3);

        let detached = factory.create_directory();
        // No parent yet: only `.` plus the stored entries.
        assert_eq!(detached.directory().unwrap().entry_count(), 1);
    }

    #[test]
    fn case_folded_names_collide_in_the_table() {
        let factory = factory();
        let dir = factory.create_directory();
        let table = dir.directory().unwrap();

        table.link(Name::new("FOO", "foo"), factory.create_regular()).unwrap();
        assert!(table.get(&Name::new("foo", "foo")).is_some());
        assert!(matches!(
            table.link(Name::new("Foo", "foo"), factory.create_regular()),
            Err(FsError::FileAlreadyExists(_))
        ));
    }
}
