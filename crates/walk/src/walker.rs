//! Deterministic depth-first directory traversal.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ScanError;

/// One traversal step: the entry's location plus the cheap type information
/// the walker already learned from the directory listing.
#[derive(Debug)]
pub struct WalkItem {
    /// Absolute path of the entry.
    pub full_path: PathBuf,
    /// Path relative to the traversal root.
    pub relative_path: PathBuf,
    /// Whether the entry is a directory the walker will descend into.
    pub is_dir: bool,
}

/// Depth-first iterator over the entries beneath a root directory.
///
/// Directory entries are sorted lexicographically before being yielded, so
/// the sequence is stable across platforms and filesystems. The root itself
/// is not emitted. Symbolic links are yielded as plain entries and never
/// followed, so a link cycle cannot trap the traversal.
pub struct Walker {
    stack: Vec<DirectoryState>,
    finished: bool,
}

impl Walker {
    /// Starts a traversal beneath `root`.
    ///
    /// Fails when the root cannot be inspected or is not a directory
    /// listing-wise readable. A root that is a regular file yields no
    /// entries.
    pub fn new(root: &Path) -> Result<Self, ScanError> {
        let metadata = fs::symlink_metadata(root).map_err(|source| ScanError::Root {
            path: root.to_path_buf(),
            source,
        })?;

        let mut stack = Vec::new();
        if metadata.is_dir() {
            stack.push(DirectoryState::new(root.to_path_buf(), PathBuf::new())?);
        }

        Ok(Self {
            stack,
            finished: false,
        })
    }

    fn descend(&mut self, full_path: PathBuf, relative_path: PathBuf) -> Result<(), ScanError> {
        self.stack
            .push(DirectoryState::new(full_path, relative_path)?);
        Ok(())
    }
}

impl Iterator for Walker {
    type Item = Result<WalkItem, ScanError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        loop {
            let (full_path, relative_path, is_dir) = {
                let state = self.stack.last_mut()?;

                match state.next_name() {
                    Some((name, is_dir)) => {
                        let full_path = state.fs_path.join(&name);
                        let relative_path = if state.relative_prefix.as_os_str().is_empty() {
                            PathBuf::from(&name)
                        } else {
                            state.relative_prefix.join(&name)
                        };
                        (full_path, relative_path, is_dir)
                    }
                    None => {
                        self.stack.pop();
                        continue;
                    }
                }
            };

            if is_dir {
                if let Err(error) = self.descend(full_path.clone(), relative_path.clone()) {
                    self.finished = true;
                    return Some(Err(error));
                }
            }

            return Some(Ok(WalkItem {
                full_path,
                relative_path,
                is_dir,
            }));
        }
    }
}

struct DirectoryState {
    fs_path: PathBuf,
    relative_prefix: PathBuf,
    entries: Vec<(OsString, bool)>,
    index: usize,
}

impl DirectoryState {
    fn new(fs_path: PathBuf, relative_prefix: PathBuf) -> Result<Self, ScanError> {
        let read_dir = fs::read_dir(&fs_path).map_err(|source| ScanError::ReadDir {
            path: fs_path.clone(),
            source,
        })?;

        let mut entries = Vec::new();
        for entry in read_dir {
            let entry = entry.map_err(|source| ScanError::ReadDir {
                path: fs_path.clone(),
                source,
            })?;
            // file_type() comes from the directory listing on every major
            // platform; entries whose type cannot be determined are dropped
            // rather than failing the walk. Symlinks count as non-directories
            // here so the walker never descends through one.
            match entry.file_type() {
                Ok(file_type) => {
                    let is_dir = file_type.is_dir();
                    entries.push((entry.file_name(), is_dir));
                }
                Err(error) => {
                    tracing::debug!(
                        path = %fs_path.join(entry.file_name()).display(),
                        %error,
                        "dropping entry with unreadable file type"
                    );
                }
            }
        }
        entries.sort();

        Ok(Self {
            fs_path,
            relative_prefix,
            entries,
            index: 0,
        })
    }

    fn next_name(&mut self) -> Option<(OsString, bool)> {
        let entry = self.entries.get(self.index)?;
        self.index += 1;
        Some(entry.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn collect_relative_paths(walker: Walker) -> Vec<PathBuf> {
        walker
            .map(|item| item.expect("walk item").relative_path)
            .collect()
    }

    #[test]
    fn walk_errors_when_root_missing() {
        let error = match Walker::new(Path::new("/nonexistent/path/for/walker")) {
            Ok(_) => panic!("missing root should fail"),
            Err(error) => error,
        };
        assert!(error.is_root_not_found());
    }

    #[test]
    fn walk_of_regular_file_root_yields_nothing() {
        let temp = tempfile::tempdir().expect("tempdir");
        let file = temp.path().join("file.txt");
        fs::write(&file, b"contents").expect("write");

        let mut walker = Walker::new(&file).expect("build walker");
        assert!(walker.next().is_none());
    }

    #[test]
    fn walk_yields_deterministic_depth_first_order() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path().join("root");
        fs::create_dir(&root).expect("create root");
        fs::create_dir(root.join("b")).expect("dir b");
        fs::create_dir(root.join("a")).expect("dir a");
        fs::write(root.join("a/inner.txt"), b"data").expect("write inner");
        fs::write(root.join("c.txt"), b"data").expect("write file");

        let walker = Walker::new(&root).expect("build walker");
        let paths = collect_relative_paths(walker);
        assert_eq!(
            paths,
            vec![
                PathBuf::from("a"),
                PathBuf::from("a/inner.txt"),
                PathBuf::from("b"),
                PathBuf::from("c.txt"),
            ]
        );
    }

    #[cfg(unix)]
    #[test]
    fn walk_never_descends_through_symlinks() {
        use std::os::unix::fs::symlink;

        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path().join("root");
        let target = temp.path().join("target");
        fs::create_dir(&root).expect("create root");
        fs::create_dir(&target).expect("create target");
        fs::write(target.join("inner.txt"), b"data").expect("write inner");
        symlink(&target, root.join("link")).expect("create symlink");

        let walker = Walker::new(&root).expect("build walker");
        let paths = collect_relative_paths(walker);
        assert_eq!(paths, vec![PathBuf::from("link")]);
    }
}
