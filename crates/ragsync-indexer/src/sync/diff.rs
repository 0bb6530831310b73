//! Change detection between the current scan and the stored map.
//!
//! Renames are not detected: a vanished path and a new path with identical
//! content are one removal plus one addition.

use crate::scanner::FileSet;
use crate::storage::FileMap;
use std::collections::BTreeSet;

/// Disjoint partition of scan paths ∪ map paths.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffResult {
    /// In scan, not in map
    pub added: BTreeSet<String>,
    /// In both, hashes differ (or the current hash is unknown)
    pub modified: BTreeSet<String>,
    /// In map, not in scan
    pub removed: BTreeSet<String>,
    /// In both, hashes equal
    pub unchanged: BTreeSet<String>,
}

impl DiffResult {
    /// Whether nothing needs re-processing.
    pub fn is_clean(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.removed.is_empty()
    }

    /// Paths that need splitting and insertion.
    pub fn to_index(&self) -> impl Iterator<Item = &String> {
        self.added.iter().chain(self.modified.iter())
    }

    pub fn total(&self) -> usize {
        self.added.len() + self.modified.len() + self.removed.len() + self.unchanged.len()
    }
}

/// Compare `(path, hash)` pairs against the stored map.
///
/// A `None` hash means the file could not be read; if the path is known it is
/// classified as modified so it gets re-processed.
pub fn diff<'a, I>(current: I, stored: Option<&FileMap>) -> DiffResult
where
    I: IntoIterator<Item = (&'a str, Option<&'a str>)>,
{
    let mut result = DiffResult::default();
    let mut seen = BTreeSet::new();

    for (path, hash) in current {
        seen.insert(path);
        match stored.and_then(|map| map.get(path)) {
            None => {
                result.added.insert(path.to_string());
            }
            Some(record) => {
                if hash == Some(record.content_hash.as_str()) {
                    result.unchanged.insert(path.to_string());
                } else {
                    result.modified.insert(path.to_string());
                }
            }
        }
    }

    if let Some(map) = stored {
        for path in map.files.keys() {
            if !seen.contains(path.as_str()) {
                result.removed.insert(path.clone());
            }
        }
    }

    result
}

/// Diff a scanned file set.
pub fn diff_file_set(scan: &FileSet, stored: Option<&FileMap>) -> DiffResult {
    diff(
        scan.iter().map(|f| (f.path.as_str(), f.hash.as_deref())),
        stored,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::FileRecord;
    use chrono::Utc;

    fn map_of(entries: &[(&str, &str)]) -> FileMap {
        let mut map = FileMap::new("local:/repo", "emb#1");
        for (path, hash) in entries {
            map.insert(FileRecord {
                path: path.to_string(),
                content_hash: hash.to_string(),
                node_ids: vec![format!("{}-0", path)],
                size: 1,
                last_seen_at: Utc::now(),
            });
        }
        map
    }

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_first_run_everything_added() {
        let result = diff(vec![("a.py", Some("h1")), ("b.py", Some("h2"))], None);
        assert_eq!(result.added, set(&["a.py", "b.py"]));
        assert!(result.modified.is_empty());
        assert!(result.removed.is_empty());
        assert!(result.unchanged.is_empty());
    }

    #[test]
    fn test_classification() {
        let map = map_of(&[("a.py", "h1"), ("b.py", "h2"), ("gone.py", "h9")]);
        let result = diff(
            vec![("a.py", Some("h1")), ("b.py", Some("h2x")), ("c.py", Some("h3"))],
            Some(&map),
        );

        assert_eq!(result.unchanged, set(&["a.py"]));
        assert_eq!(result.modified, set(&["b.py"]));
        assert_eq!(result.added, set(&["c.py"]));
        assert_eq!(result.removed, set(&["gone.py"]));
        assert!(!result.is_clean());
    }

    #[test]
    fn test_unknown_hash_is_modified() {
        let map = map_of(&[("a.py", "h1")]);
        let result = diff(vec![("a.py", None)], Some(&map));
        assert_eq!(result.modified, set(&["a.py"]));
    }

    #[test]
    fn test_rename_is_remove_plus_add() {
        let map = map_of(&[("old.py", "same")]);
        let result = diff(vec![("new.py", Some("same"))], Some(&map));
        assert_eq!(result.removed, set(&["old.py"]));
        assert_eq!(result.added, set(&["new.py"]));
    }

    #[test]
    fn test_partition_is_complete_and_disjoint() {
        let map = map_of(&[("a", "1"), ("b", "2"), ("c", "3"), ("d", "4")]);
        let current = vec![
            ("b", Some("2")),
            ("c", Some("x")),
            ("d", None),
            ("e", Some("5")),
            ("f", None),
        ];
        let result = diff(current.clone(), Some(&map));

        let mut union: BTreeSet<String> = map.files.keys().cloned().collect();
        union.extend(current.iter().map(|(p, _)| p.to_string()));

        let parts = [&result.added, &result.modified, &result.removed, &result.unchanged];
        let mut combined = BTreeSet::new();
        for part in parts {
            for path in part {
                assert!(combined.insert(path.clone()), "{} appears twice", path);
            }
        }
        assert_eq!(combined, union);
        assert_eq!(result.total(), union.len());
    }

    #[test]
    fn test_no_changes_is_clean() {
        let map = map_of(&[("a.py", "h1")]);
        let result = diff(vec![("a.py", Some("h1"))], Some(&map));
        assert!(result.is_clean());
        assert_eq!(result.to_index().count(), 0);
    }
}
