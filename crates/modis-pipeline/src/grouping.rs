//! Mosaic grouping of tile file names.
//!
//! MODIS tiles of one acquisition share a product/date prefix and a
//! band/extension suffix and differ only in the tile and production tokens
//! between them:
//!
//! ```text
//! MOD13Q1.A2020001.h08v05.006.2020018000000.NDVI.tif
//! MOD13Q1.A2020001.h09v05.006.2020018000123.NDVI.tif
//!   -> MOD13Q1.A2020001.NDVI.tif
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{PipelineError, Result};

/// Derive the mosaic key of a file name: its first two and last two
/// `.`-separated tokens.
///
/// Names with only two or three tokens overlap, e.g. `a.b` maps to
/// `a.b.a.b`. Fewer than two tokens is an error.
pub fn group_key(file_name: &str) -> Result<String> {
    let tokens: Vec<&str> = file_name.split('.').collect();
    if tokens.len() < 2 {
        return Err(PipelineError::MalformedFileName(file_name.to_string()));
    }

    let head = &tokens[..2];
    let tail = &tokens[tokens.len() - 2..];
    Ok(format!("{}.{}", head.join("."), tail.join(".")))
}

/// Maps a file name to the key of the mosaic it belongs to.
pub trait GroupingStrategy: Send + Sync {
    fn key(&self, file_name: &str) -> Result<String>;
}

impl<F> GroupingStrategy for F
where
    F: Fn(&str) -> Result<String> + Send + Sync,
{
    fn key(&self, file_name: &str) -> Result<String> {
        self(file_name)
    }
}

/// The default strategy, see [`group_key`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ModisDateKey;

impl GroupingStrategy for ModisDateKey {
    fn key(&self, file_name: &str) -> Result<String> {
        group_key(file_name)
    }
}

/// Insertion-ordered map of mosaic key to members.
///
/// Members are file names by default; the mosaic stage groups full paths.
#[derive(Debug, Clone, PartialEq)]
pub struct MosaicGroups<T = String> {
    groups: Vec<(String, Vec<T>)>,
    index: HashMap<String, usize>,
}

impl<T> Default for MosaicGroups<T> {
    fn default() -> Self {
        Self {
            groups: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<T> MosaicGroups<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `member` to the group for `key`, creating it on first sight.
    pub fn insert(&mut self, key: String, member: T) {
        match self.index.get(&key) {
            Some(&i) => self.groups[i].1.push(member),
            None => {
                self.index.insert(key.clone(), self.groups.len());
                self.groups.push((key, vec![member]));
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&[T]> {
        self.index.get(key).map(|&i| self.groups[i].1.as_slice())
    }

    /// Groups in first-seen key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[T])> {
        self.groups.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.groups.iter().map(|(k, _)| k.as_str())
    }

    /// Number of groups.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Total number of members across all groups.
    pub fn member_count(&self) -> usize {
        self.groups.iter().map(|(_, v)| v.len()).sum()
    }
}

/// Partition file names into mosaic groups in a single pass.
///
/// Key order follows first appearance and members keep input order.
/// Duplicate names are kept as separate members.
pub fn group_files<I, S>(names: I, strategy: &dyn GroupingStrategy) -> Result<MosaicGroups>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut groups = MosaicGroups::new();
    for name in names {
        let name = name.as_ref();
        let key = strategy.key(name)?;
        groups.insert(key, name.to_string());
    }
    Ok(groups)
}

/// Group paths by the key of their file name, keeping the full paths as
/// members.
pub fn group_paths<P>(
    paths: &[P],
    strategy: &dyn GroupingStrategy,
) -> Result<MosaicGroups<PathBuf>>
where
    P: AsRef<Path>,
{
    let mut groups = MosaicGroups::new();
    for path in paths {
        let path = path.as_ref();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy())
            .ok_or_else(|| PipelineError::MalformedFileName(path.display().to_string()))?;
        let key = strategy.key(&name)?;
        groups.insert(key, path.to_path_buf());
    }
    Ok(groups)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_key_modis_tiles() {
        assert_eq!(
            group_key("MOD13Q1.A2020001.h08v05.006.2020018000000.NDVI.tif").unwrap(),
            "MOD13Q1.A2020001.NDVI.tif"
        );
        assert_eq!(
            group_key("MOD16A2.A2020009.h08v05.006.2020020.ET.tif").unwrap(),
            "MOD16A2.A2020009.ET.tif"
        );
    }

    #[test]
    fn test_group_key_short_names_overlap() {
        assert_eq!(group_key("a.b").unwrap(), "a.b.a.b");
        assert_eq!(group_key("a.b.c").unwrap(), "a.b.b.c");
        assert_eq!(group_key("A.NDVI.tif").unwrap(), "A.NDVI.NDVI.tif");
    }

    #[test]
    fn test_group_key_rejects_single_token() {
        let err = group_key("noextension").unwrap_err();
        assert!(matches!(err, PipelineError::MalformedFileName(ref n) if n == "noextension"));
    }

    #[test]
    fn test_group_files_partitions_in_first_seen_order() {
        let names = [
            "MOD13Q1.A2020017.h08v05.006.1.NDVI.tif",
            "MOD13Q1.A2020001.h08v05.006.1.NDVI.tif",
            "MOD13Q1.A2020017.h09v05.006.2.NDVI.tif",
            "MOD13Q1.A2020001.h09v05.006.2.NDVI.tif",
        ];

        let groups = group_files(names, &ModisDateKey).unwrap();

        let keys: Vec<_> = groups.keys().collect();
        assert_eq!(keys, ["MOD13Q1.A2020017.NDVI.tif", "MOD13Q1.A2020001.NDVI.tif"]);
        assert_eq!(
            groups.get("MOD13Q1.A2020017.NDVI.tif").unwrap(),
            ["MOD13Q1.A2020017.h08v05.006.1.NDVI.tif", "MOD13Q1.A2020017.h09v05.006.2.NDVI.tif"]
        );
        assert_eq!(groups.member_count(), names.len());
    }

    #[test]
    fn test_group_files_keeps_duplicates() {
        let names = ["a.b.c.d", "a.b.c.d"];
        let groups = group_files(names, &ModisDateKey).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups.get("a.b.c.d").unwrap().len(), 2);
    }

    #[test]
    fn test_group_files_is_deterministic() {
        let names = ["x.1.p.tif", "y.1.q.tif", "x.1.r.tif"];
        let a = group_files(names, &ModisDateKey).unwrap();
        let b = group_files(names, &ModisDateKey).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_group_files_accepts_closures() {
        let by_first = |name: &str| -> Result<String> {
            Ok(name.split('.').next().unwrap_or_default().to_string())
        };
        let groups = group_files(["a.1", "b.2", "a.3"], &by_first).unwrap();
        assert_eq!(groups.get("a").unwrap(), ["a.1", "a.3"]);
    }

    #[test]
    fn test_group_paths_keys_on_file_name_only() {
        let paths = [
            PathBuf::from("/data/v1.0/1_extract/MOD16A2.A2020009.h08v05.006.x.ET.tif"),
            PathBuf::from("/data/v1.0/1_extract/MOD16A2.A2020009.h09v05.006.y.ET.tif"),
        ];
        let groups = group_paths(&paths, &ModisDateKey).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups.get("MOD16A2.A2020009.ET.tif").unwrap(), &paths[..]);
    }

    #[test]
    fn test_group_files_fails_on_malformed_member() {
        assert!(group_files(["a.b.c", "bad"], &ModisDateKey).is_err());
        assert!(group_files(Vec::<String>::new(), &ModisDateKey).unwrap().is_empty());
    }
}
