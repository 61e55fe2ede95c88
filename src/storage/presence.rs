use sdcard::{BlockDevice, Storage, StorageError};

use super::SD_INSERT_SETTLE_POLLS;

/// Outcome of one presence poll.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresenceEvent {
    /// No card, nothing to do.
    Absent,
    /// Card mounted, nothing to do.
    Steady,
    /// The card disappeared; the volume was unmounted.
    Removed,
    /// Card seen, waiting before the mount attempt.
    Settling { remaining: u8 },
    Mounted,
    MountFailed(StorageError),
    /// A previous mount attempt failed; not retried until removal or `remount`.
    Held(StorageError),
}

impl PresenceEvent {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Absent => "absent",
            Self::Steady => "steady",
            Self::Removed => "removed",
            Self::Settling { .. } => "settling",
            Self::Mounted => "mounted",
            Self::MountFailed(_) => "mount_failed",
            Self::Held(_) => "held",
        }
    }
}

/// Tracks insertion and removal across polls.
#[derive(Clone, Copy, Debug, Default)]
pub struct PresenceMonitor {
    was_present: bool,
    settle_remaining: u8,
    last_error: Option<StorageError>,
}

impl PresenceMonitor {
    pub const fn new() -> Self {
        Self {
            was_present: false,
            settle_remaining: 0,
            last_error: None,
        }
    }

    pub fn last_error(&self) -> Option<StorageError> {
        self.last_error
    }

    pub fn clear_error(&mut self) {
        self.last_error = None;
    }

    pub(crate) fn record_mount(&mut self, result: Result<(), StorageError>) {
        self.last_error = result.err();
        if self.last_error.is_none() {
            self.was_present = true;
            self.settle_remaining = 0;
        }
    }

    pub fn poll<D: BlockDevice>(&mut self, storage: &mut Storage<D>) -> PresenceEvent {
        if !storage.card_present() {
            let was_present = core::mem::replace(&mut self.was_present, false);
            self.settle_remaining = 0;
            self.last_error = None;
            if !was_present && !storage.is_mounted() {
                return PresenceEvent::Absent;
            }
            storage.unmount();
            log::info!("storage: card_removed");
            return PresenceEvent::Removed;
        }

        if !self.was_present {
            self.was_present = true;
            self.settle_remaining = SD_INSERT_SETTLE_POLLS;
            log::info!("storage: card_inserted settle_polls={}", SD_INSERT_SETTLE_POLLS);
        }
        if storage.is_mounted() {
            self.settle_remaining = 0;
            return PresenceEvent::Steady;
        }
        if self.settle_remaining > 0 {
            self.settle_remaining -= 1;
            return PresenceEvent::Settling {
                remaining: self.settle_remaining,
            };
        }
        if let Some(err) = self.last_error {
            return PresenceEvent::Held(err);
        }

        match storage.mount() {
            Ok(()) => PresenceEvent::Mounted,
            Err(err) => {
                log::warn!("storage: mount_failed err={}", err.label());
                self.last_error = Some(err);
                PresenceEvent::MountFailed(err)
            }
        }
    }
}
