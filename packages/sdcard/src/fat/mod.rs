mod cluster_utils;
mod dir_scan;
mod fat_mount;
mod file;
mod names_lfn;
mod path;
mod space;
mod types;


pub use cluster_utils::{next_cluster, read_fat_entry, write_fat_entry};
pub use names_lfn::{short_name_checksum, short_name_to_text};
pub use types::{
    Attributes, DirectoryCursor, EntryName, Fat32Volume, FatTimestamp, FileHandle, FsInfo,
    ResolvedEntry,
};

pub(crate) use dir_scan::{find_volume_label, next_raw_entry};
pub(crate) use fat_mount::mount;
pub(crate) use file::{read as read_file, seek as seek_file};
pub(crate) use names_lfn::label_text;
pub(crate) use path::{directory_path, resolve, Resolution};
pub(crate) use space::{count_free_clusters, free_bytes, read_fsinfo};
