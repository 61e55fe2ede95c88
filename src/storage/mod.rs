//! Card service: one `Storage` shared between command handlers and the presence poll.

use embassy_sync::{blocking_mutex::raw::RawMutex, mutex::Mutex};
use embassy_time::Timer;
use sdcard::{BlockDevice, Storage, StorageError, StorageResult};

mod presence;
#[cfg(test)]
mod tests;

pub use presence::{PresenceEvent, PresenceMonitor};

pub const SD_POLL_INTERVAL_MS: u64 = 500;
/// Polls to wait after insertion before mounting.
pub const SD_INSERT_SETTLE_POLLS: u8 = 2;

struct Inner<D: BlockDevice> {
    storage: Storage<D>,
    monitor: PresenceMonitor,
}

/// All access, including the presence poll, goes through one lock, which also
/// serialises the SPI bus behind `D`.
pub struct SharedStorage<M: RawMutex, D: BlockDevice> {
    inner: Mutex<M, Inner<D>>,
}

impl<M: RawMutex, D: BlockDevice> SharedStorage<M, D> {
    pub fn new(device: D) -> Self {
        Self {
            inner: Mutex::new(Inner {
                storage: Storage::new(device),
                monitor: PresenceMonitor::new(),
            }),
        }
    }

    /// Runs `op` with exclusive access to the volume.
    pub async fn with<R>(&self, op: impl FnOnce(&mut Storage<D>) -> R) -> R {
        let mut inner = self.inner.lock().await;
        op(&mut inner.storage)
    }

    pub async fn poll(&self) -> PresenceEvent {
        let mut guard = self.inner.lock().await;
        let Inner { storage, monitor } = &mut *guard;
        let event = monitor.poll(storage);
        if !matches!(event, PresenceEvent::Absent | PresenceEvent::Steady) {
            log::debug!("storage: presence event={}", event.label());
        }
        event
    }

    /// Forgets the remembered mount error and mounts now.
    pub async fn remount(&self) -> StorageResult<()> {
        let mut guard = self.inner.lock().await;
        let Inner { storage, monitor } = &mut *guard;
        monitor.clear_error();
        let result = storage.mount();
        monitor.record_mount(result);
        result
    }

    pub async fn last_mount_error(&self) -> Option<StorageError> {
        self.inner.lock().await.monitor.last_error()
    }

    pub async fn is_mounted(&self) -> bool {
        self.inner.lock().await.storage.is_mounted()
    }
}

pub async fn run_presence_task<M: RawMutex, D: BlockDevice>(shared: &SharedStorage<M, D>) -> ! {
    log::info!("storage: presence_task start interval_ms={}", SD_POLL_INTERVAL_MS);
    loop {
        shared.poll().await;
        Timer::after_millis(SD_POLL_INTERVAL_MS).await;
    }
}
