use heapless::{String, Vec};

use crate::{
    block::BlockDevice,
    error::{StorageError, StorageResult},
    SD_NAME_MAX, SD_PATH_BYTES, SD_PATH_MAX,
};

use super::{
    dir_scan::{find_entry, next_raw_entry},
    types::{DirectoryCursor, EntryName, Fat32Volume, ResolvedEntry, MAX_DIR_DEPTH},
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Resolution {
    /// A directory; `entry` is `None` for the root, the starting directory and dot components.
    Directory {
        cluster: u32,
        entry: Option<ResolvedEntry>,
    },
    /// A file or volume-label entry.
    Entry(ResolvedEntry),
    /// Every intermediate directory exists but the last component does not.
    Missing,
}

/// Resolves `path` from the root when absolute, otherwise from `cwd`.
/// A missing or non-directory intermediate component is `InvalidPath`.
pub(crate) fn resolve<D: BlockDevice + ?Sized>(
    dev: &mut D,
    volume: &Fat32Volume,
    cwd: u32,
    path: &str,
) -> StorageResult<Resolution> {
    if path.chars().count() > SD_PATH_MAX {
        return Err(StorageError::InvalidPath);
    }

    let mut cluster = if path.starts_with('/') {
        volume.root_cluster
    } else {
        cwd
    };
    let mut entry = None;
    let mut components = path.split('/').filter(|part| !part.is_empty()).peekable();

    while let Some(component) = components.next() {
        if component.chars().count() > SD_NAME_MAX {
            return Err(StorageError::InvalidPath);
        }
        let terminal = components.peek().is_none();

        if component == "." || (component == ".." && cluster == volume.root_cluster) {
            entry = None;
            continue;
        }

        match find_entry(dev, volume, cluster, component)? {
            Some(found) if found.is_directory() => {
                cluster = volume.directory_cluster(found.first_cluster);
                entry = Some(found);
            }
            Some(found) if terminal => return Ok(Resolution::Entry(found)),
            None if terminal => return Ok(Resolution::Missing),
            _ => return Err(StorageError::InvalidPath),
        }
    }

    Ok(Resolution::Directory { cluster, entry })
}

/// Absolute path of `cwd`, found by following `..` links up to the root.
pub(crate) fn directory_path<D: BlockDevice + ?Sized>(
    dev: &mut D,
    volume: &Fat32Volume,
    cwd: u32,
) -> StorageResult<String<SD_PATH_BYTES>> {
    let mut links: Vec<(u32, u32), MAX_DIR_DEPTH> = Vec::new();
    let mut cluster = cwd;

    while cluster != volume.root_cluster && !links.is_full() {
        let Some(parent) = parent_cluster(dev, volume, cluster)? else {
            break;
        };
        let _ = links.push((parent, cluster));
        cluster = parent;
    }

    let mut path = String::new();
    let mut chars = 0usize;
    for &(parent, child) in links.iter().rev() {
        let Some(name) = child_name(dev, volume, parent, child)? else {
            log::warn!("fat: orphan_dir cluster={} parent={}", child, parent);
            return Err(StorageError::ReadFailed);
        };
        chars += 1 + name.chars().count();
        if chars > SD_PATH_MAX {
            return Err(StorageError::InvalidPath);
        }
        path.push('/')
            .and_then(|_| path.push_str(&name))
            .map_err(|_| StorageError::InvalidPath)?;
    }
    if path.is_empty() {
        let _ = path.push('/');
    }
    Ok(path)
}

/// `..` sits among the first entries of a subdirectory.
fn parent_cluster<D: BlockDevice + ?Sized>(
    dev: &mut D,
    volume: &Fat32Volume,
    dir_cluster: u32,
) -> StorageResult<Option<u32>> {
    let mut cursor = DirectoryCursor::at(dir_cluster, 0);
    for _ in 0..3 {
        let Some(entry) = next_raw_entry(dev, volume, &mut cursor)? else {
            break;
        };
        if entry.is_directory() && entry.name == ".." {
            return Ok(Some(volume.directory_cluster(entry.first_cluster)));
        }
    }
    Ok(None)
}

fn child_name<D: BlockDevice + ?Sized>(
    dev: &mut D,
    volume: &Fat32Volume,
    parent: u32,
    child: u32,
) -> StorageResult<Option<EntryName>> {
    let mut cursor = DirectoryCursor::at(parent, 0);
    while let Some(entry) = next_raw_entry(dev, volume, &mut cursor)? {
        if entry.is_directory()
            && entry.first_cluster == child
            && entry.name != "."
            && entry.name != ".."
        {
            return Ok(Some(entry.name));
        }
    }
    Ok(None)
}
