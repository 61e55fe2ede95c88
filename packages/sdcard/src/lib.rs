#![cfg_attr(not(test), no_std)]

#[cfg(any(test, feature = "test-util"))]
extern crate alloc;

pub mod api;
pub mod block;
mod cache;
pub mod error;
pub mod fat;
#[cfg(any(test, feature = "test-util"))]
pub mod image;
pub mod probe;

pub use api::Storage;
pub use block::{BlockDevice, CardKind, Sector, SECTOR_SIZE};
pub use cache::SectorCache;
pub use error::{StorageError, StorageResult};
pub use fat::{
    Attributes, DirectoryCursor, EntryName, Fat32Volume, FatTimestamp, FileHandle, FsInfo,
    ResolvedEntry,
};
pub use probe::{SdCard, SdCardError, SdCardVersion, SdSpiBus};

/// Path and name limits count characters; the byte capacities below hold that many
/// characters decoded from UTF-16, at most three UTF-8 bytes each.
pub const SD_PATH_MAX: usize = 512;
pub const SD_NAME_MAX: usize = 255;
pub const SD_PATH_BYTES: usize = SD_PATH_MAX * 3;
pub const SD_NAME_BYTES: usize = SD_NAME_MAX * 3;
pub const SD_LABEL_MAX: usize = 11;
