use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::PagesError;
// Directory enumeration for site uploads (symlinks reported, never followed)

/// Kind of filesystem object that can be published
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    RegularFile,
    Directory,
    Symlink,
}

impl EntryKind {
    pub fn label(self) -> &'static str {
        match self {
            EntryKind::RegularFile => "file",
            EntryKind::Directory => "dir",
            EntryKind::Symlink => "symlink",
        }
    }
}

/// One node of the walked tree
#[derive(Debug, Clone)]
pub struct TreeEntry {
    /// Slash separated path relative to the walk root; the root itself is "."
    pub path: String,
    pub kind: EntryKind,
    pub size: u64,
    /// Raw link target, only for symlinks
    pub link_target: Option<String>,
    source: PathBuf,
}

impl TreeEntry {
    pub fn is_root(&self) -> bool {
        self.path == "."
    }

    /// Location of the entry on the local filesystem
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Read the full content of a regular file
    pub fn read_content(&self) -> Result<Vec<u8>> {
        fs::read(&self.source).with_context(|| format!("failed to read {}", self.source.display()))
    }
}

/// Walk `root` in a stable order: lexicographic per directory, parents first.
///
/// The walk holds no state between calls, so every negotiation round can call
/// it again and get the same sequence for an unchanged tree.
pub fn walk_tree(root: &Path) -> impl Iterator<Item = Result<TreeEntry>> {
    let root = root.to_path_buf();
    WalkDir::new(&root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .map(move |entry| {
            let entry = entry.with_context(|| format!("failed to walk {}", root.display()))?;
            tree_entry(&root, &entry)
        })
}

fn tree_entry(root: &Path, entry: &walkdir::DirEntry) -> Result<TreeEntry> {
    let path = relative_name(root, entry.path())?;
    let file_type = entry.file_type();
    let source = entry.path().to_path_buf();

    if file_type.is_dir() {
        Ok(TreeEntry {
            path,
            kind: EntryKind::Directory,
            size: 0,
            link_target: None,
            source,
        })
    } else if file_type.is_file() {
        let size = entry
            .metadata()
            .with_context(|| format!("failed to stat {}", source.display()))?
            .len();
        Ok(TreeEntry {
            path,
            kind: EntryKind::RegularFile,
            size,
            link_target: None,
            source,
        })
    } else if file_type.is_symlink() {
        let target = fs::read_link(&source)
            .with_context(|| format!("failed to read link {}", source.display()))?;
        let target = target
            .to_str()
            .ok_or_else(|| PagesError::NonUtf8Path(target.clone()))?
            .to_string();
        Ok(TreeEntry {
            path,
            kind: EntryKind::Symlink,
            size: 0,
            link_target: Some(target),
            source,
        })
    } else {
        Err(PagesError::UnsupportedFileType(source).into())
    }
}

/// Relative, slash separated name of `path` under `root`
fn relative_name(root: &Path, path: &Path) -> Result<String> {
    let rel = path.strip_prefix(root).unwrap_or(path);
    let mut parts = Vec::new();
    for component in rel.components() {
        let part = component
            .as_os_str()
            .to_str()
            .ok_or_else(|| PagesError::NonUtf8Path(path.to_path_buf()))?;
        parts.push(part);
    }
    if parts.is_empty() {
        Ok(".".to_string())
    } else {
        Ok(parts.join("/"))
    }
}

/// One line per entry, as shown in verbose mode before an upload.
///
/// Unlike [`walk_tree`] this does not fail on unsupported objects; they are
/// listed as "other" so the operator can see what the upload will trip on.
pub fn describe_tree(root: &Path, prefix: &str) -> Result<Vec<String>> {
    let mut lines = Vec::new();
    for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
        let entry = entry.with_context(|| format!("failed to walk {}", root.display()))?;
        let file_type = entry.file_type();
        let label = if file_type.is_dir() {
            EntryKind::Directory.label()
        } else if file_type.is_file() {
            EntryKind::RegularFile.label()
        } else if file_type.is_symlink() {
            EntryKind::Symlink.label()
        } else {
            "other"
        };
        let rel = entry.path().strip_prefix(root).unwrap_or(entry.path());
        let name = if rel.as_os_str().is_empty() {
            ".".to_string()
        } else {
            rel.to_string_lossy().replace('\\', "/")
        };
        lines.push(format!("{:<8}{}{}", label, prefix, name));
    }
    Ok(lines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_tree() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("b/nested")).unwrap();
        fs::create_dir_all(dir.path().join("a")).unwrap();
        fs::write(dir.path().join("index.html"), b"<html/>").unwrap();
        fs::write(dir.path().join("a/one.txt"), b"1").unwrap();
        fs::write(dir.path().join("b/nested/two.txt"), b"22").unwrap();
        fs::write(dir.path().join("b/three.txt"), b"333").unwrap();
        dir
    }

    fn paths(root: &Path) -> Vec<String> {
        walk_tree(root).map(|e| e.unwrap().path).collect()
    }

    #[test]
    fn test_walk_order_is_lexicographic_parents_first() {
        let dir = sample_tree();
        assert_eq!(
            paths(dir.path()),
            vec![
                ".",
                "a",
                "a/one.txt",
                "b",
                "b/nested",
                "b/nested/two.txt",
                "b/three.txt",
                "index.html",
            ]
        );
    }

    #[test]
    fn test_walk_is_restartable() {
        let dir = sample_tree();
        let first: Vec<_> = walk_tree(dir.path())
            .map(|e| {
                let e = e.unwrap();
                (e.path, e.kind, e.size)
            })
            .collect();
        let second: Vec<_> = walk_tree(dir.path())
            .map(|e| {
                let e = e.unwrap();
                (e.path, e.kind, e.size)
            })
            .collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_file_entries_carry_size_and_content() {
        let dir = sample_tree();
        let entry = walk_tree(dir.path())
            .map(|e| e.unwrap())
            .find(|e| e.path == "b/three.txt")
            .unwrap();
        assert_eq!(entry.kind, EntryKind::RegularFile);
        assert_eq!(entry.size, 3);
        assert_eq!(entry.read_content().unwrap(), b"333");
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_are_reported_not_followed() {
        let dir = sample_tree();
        std::os::unix::fs::symlink("a", dir.path().join("link")).unwrap();
        let entries: Vec<_> = walk_tree(dir.path()).map(|e| e.unwrap()).collect();
        let link = entries.iter().find(|e| e.path == "link").unwrap();
        assert_eq!(link.kind, EntryKind::Symlink);
        assert_eq!(link.link_target.as_deref(), Some("a"));
        assert!(!entries.iter().any(|e| e.path.starts_with("link/")));
    }

    #[cfg(unix)]
    #[test]
    fn test_unsupported_objects_fail_the_walk() {
        let dir = sample_tree();
        let _socket = std::os::unix::net::UnixListener::bind(dir.path().join("sock")).unwrap();
        let err = walk_tree(dir.path())
            .find_map(|e| e.err())
            .expect("socket should fail the walk");
        assert!(matches!(
            err.downcast_ref::<PagesError>(),
            Some(PagesError::UnsupportedFileType(_))
        ));

        let listing = describe_tree(dir.path(), "").unwrap();
        assert!(listing.contains(&"other   sock".to_string()));
    }

    #[test]
    fn test_describe_tree_applies_prefix() {
        let dir = sample_tree();
        let listing = describe_tree(dir.path(), "site/").unwrap();
        assert_eq!(listing[0], "dir     site/.");
        assert!(listing.contains(&"file    site/a/one.txt".to_string()));
    }
}
