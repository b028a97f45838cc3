//! Path resolution: walking names through the directory tree, chasing
//! symbolic links with a bounded hop count.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::trace;

use crate::dir::DirEntry;
use crate::error::{FsError, FsResult};
use crate::file::File;
use crate::name::Name;
use crate::path::FsPath;

/// Maximum symbolic-link resolutions per lookup before failing with *loop*.
pub const MAX_SYMBOLIC_LINK_DEPTH: u32 = 40;

/// Result of resolving a path: the directory the final name lives in, the
/// final name itself, and the entry when it exists. A missing `entry` with
/// an existing `parent` is what create operations build on.
pub struct Lookup {
    pub parent: Arc<File>,
    pub name: Name,
    pub entry: Option<DirEntry>,
}

impl Lookup {
    /// The resolved file, when the entry exists.
    pub fn file(&self) -> Option<&Arc<File>> {
        self.entry.as_ref().map(|entry| &entry.file)
    }

    /// Unwraps the entry or fails with *no-such-file* for `path`.
    pub fn require_exists(self, path: &FsPath) -> FsResult<DirEntry> {
        self.entry.ok_or_else(|| FsError::no_such_file(path.to_string()))
    }
}

/// The directory forest of one filesystem: its configured roots.
pub struct FileTree {
    roots: HashMap<Name, Arc<File>>,
}

impl FileTree {
    pub fn new(roots: HashMap<Name, Arc<File>>) -> Self {
        FileTree { roots }
    }

    /// The root directory for `name`, if configured.
    pub fn root(&self, name: &Name) -> Option<Arc<File>> {
        self.roots.get(name).cloned()
    }

    /// Root tokens sorted by display form.
    pub fn root_names(&self) -> Vec<Name> {
        let mut names: Vec<Name> = self.roots.keys().cloned().collect();
        names.sort_by(|a, b| a.display().cmp(b.display()));
        names
    }

    /// Resolves `path` against `working_dir`, following a symbolic link in
    /// the final position only when `follow_final` is set. Intermediate
    /// links are always followed.
    pub fn lookup(
        &self,
        working_dir: &Arc<File>,
        path: &FsPath,
        follow_final: bool,
    ) -> FsResult<Lookup> {
        let mut depth = 0u32;
        trace!(path = %path, follow_final, "lookup");
        self.walk(working_dir, path, follow_final, &mut depth, path)
    }

    fn walk(
        &self,
        working_dir: &Arc<File>,
        path: &FsPath,
        follow_final: bool,
        depth: &mut u32,
        original: &FsPath,
    ) -> FsResult<Lookup> {
        let mut current: Arc<File> = match path.root() {
            Some(root) => self
                .root(root)
                .ok_or_else(|| FsError::no_such_file(original.to_string()))?,
            None => working_dir.clone(),
        };

        let names = path.names();
        for (i, name) in names.iter().enumerate() {
            let last = i + 1 == names.len();
            let table = current
                .directory()
                .ok_or_else(|| FsError::no_such_file(original.to_string()))?;

            match name.display() {
                "." => {
                    if last {
                        return Ok(Self::describe_directory(&current));
                    }
                }
                ".." => {
                    // A root is its own parent; a detached directory keeps
                    // resolving to itself as well.
                    let parent = table.parent().unwrap_or_else(|| current.clone());
                    current = parent;
                    if last {
                        return Ok(Self::describe_directory(&current));
                    }
                }
                _ => {
                    let entry = table.get(name);
                    if last {
                        if follow_final {
                            if let Some(found) = &entry {
                                if found.file.is_symlink() {
                                    let link = found.file.clone();
                                    let target =
                                        link.symlink_target().expect("symlink without target");
                                    self.count_hop(depth, original)?;
                                    return self.walk(&current, target, true, depth, original);
                                }
                            }
                        }
                        return Ok(Lookup { parent: current, name: name.clone(), entry });
                    }

                    let found =
                        entry.ok_or_else(|| FsError::no_such_file(original.to_string()))?;
                    if found.file.is_symlink() {
                        let link = found.file.clone();
                        let target = link.symlink_target().expect("symlink without target");
                        self.count_hop(depth, original)?;
                        let resolved = self
                            .walk(&current, target, true, depth, original)?
                            .require_exists(original)?;
                        current = resolved.file;
                    } else {
                        current = found.file;
                    }
                }
            }
        }

        Ok(Self::describe_directory(&current))
    }

    fn count_hop(&self, depth: &mut u32, original: &FsPath) -> FsResult<()> {
        *depth += 1;
        if *depth > MAX_SYMBOLIC_LINK_DEPTH {
            return Err(FsError::SymlinkLoop(original.to_string()));
        }
        Ok(())
    }

    /// Builds the lookup describing an already-resolved directory.
    fn describe_directory(dir: &Arc<File>) -> Lookup {
        let table = dir.directory().expect("describe_directory on non-directory");
        match table.entry_in_parent() {
            Some(entry) => {
                let parent = table.parent().unwrap_or_else(|| dir.clone());
                Lookup { parent, name: entry.name.clone(), entry: Some(entry) }
            }
            None => Lookup {
                parent: dir.clone(),
                name: Name::self_name(),
                entry: Some(DirEntry::new(Name::self_name(), dir.clone())),
            },
        }
    }
}
