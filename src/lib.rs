#![cfg_attr(not(test), no_std)]

pub mod storage;

pub use sdcard::{StorageError, StorageResult};
pub use storage::{run_presence_task, PresenceEvent, PresenceMonitor, SharedStorage};
