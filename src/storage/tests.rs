use embassy_futures::block_on;
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use sdcard::{
    image::{ImageBuilder, RamDisk},
    StorageError,
};

use super::{PresenceEvent, SharedStorage, SD_INSERT_SETTLE_POLLS};

fn formatted_card() -> RamDisk {
    let mut image = ImageBuilder::new().format();
    let root = image.root();
    image.add_file(root, "boot.cfg", b"theme=dark\n");
    image.finish()
}

fn shared(device: RamDisk) -> SharedStorage<NoopRawMutex, RamDisk> {
    SharedStorage::new(device)
}

fn settle(storage: &SharedStorage<NoopRawMutex, RamDisk>) {
    for remaining in (0..SD_INSERT_SETTLE_POLLS).rev() {
        assert_eq!(
            block_on(storage.poll()),
            PresenceEvent::Settling { remaining }
        );
    }
}

#[test]
fn inserted_card_mounts_after_settling() {
    let storage = shared(formatted_card());

    settle(&storage);
    assert!(!block_on(storage.is_mounted()));
    assert_eq!(block_on(storage.poll()), PresenceEvent::Mounted);
    assert_eq!(block_on(storage.poll()), PresenceEvent::Steady);

    let size = block_on(storage.with(|s| s.stat("boot.cfg").map(|entry| entry.size)));
    assert_eq!(size, Ok(11));
}

#[test]
fn removal_unmounts_and_reinsertion_settles_again() {
    let storage = shared(formatted_card());
    settle(&storage);
    assert_eq!(block_on(storage.poll()), PresenceEvent::Mounted);

    block_on(storage.with(|s| s.device_mut().set_present(false)));
    assert_eq!(block_on(storage.poll()), PresenceEvent::Removed);
    assert!(!block_on(storage.is_mounted()));
    assert_eq!(block_on(storage.poll()), PresenceEvent::Absent);

    block_on(storage.with(|s| s.device_mut().set_present(true)));
    settle(&storage);
    assert_eq!(block_on(storage.poll()), PresenceEvent::Mounted);
}

#[test]
fn failed_mount_is_not_retried_until_removal() {
    let storage = shared(RamDisk::new(4096));
    settle(&storage);

    assert_eq!(
        block_on(storage.poll()),
        PresenceEvent::MountFailed(StorageError::InvalidFormat)
    );
    for _ in 0..3 {
        assert_eq!(
            block_on(storage.poll()),
            PresenceEvent::Held(StorageError::InvalidFormat)
        );
    }
    assert_eq!(
        block_on(storage.last_mount_error()),
        Some(StorageError::InvalidFormat)
    );
    let reads = block_on(storage.with(|s| s.device().reads()));
    block_on(storage.poll());
    assert_eq!(block_on(storage.with(|s| s.device().reads())), reads);

    block_on(storage.with(|s| s.device_mut().set_present(false)));
    assert_eq!(block_on(storage.poll()), PresenceEvent::Removed);
    assert_eq!(block_on(storage.last_mount_error()), None);

    block_on(storage.with(|s| *s.device_mut() = formatted_card()));
    settle(&storage);
    assert_eq!(block_on(storage.poll()), PresenceEvent::Mounted);
}

#[test]
fn remount_clears_remembered_error() {
    let storage = shared(RamDisk::new(4096));
    settle(&storage);
    block_on(storage.poll());
    assert!(block_on(storage.last_mount_error()).is_some());

    block_on(storage.with(|s| *s.device_mut() = formatted_card()));
    assert_eq!(block_on(storage.remount()), Ok(()));
    assert_eq!(block_on(storage.last_mount_error()), None);
    assert!(block_on(storage.is_mounted()));
    assert_eq!(block_on(storage.poll()), PresenceEvent::Steady);
}

#[test]
fn missing_card_reports_no_card() {
    let mut card = formatted_card();
    card.set_present(false);
    let storage = shared(card);

    assert_eq!(block_on(storage.poll()), PresenceEvent::Absent);
    assert_eq!(block_on(storage.remount()), Err(StorageError::NoCard));
    assert_eq!(block_on(storage.last_mount_error()), Some(StorageError::NoCard));
    assert_eq!(
        block_on(storage.with(|s| s.free_space())),
        Err(StorageError::NotMounted)
    );

    assert_eq!(block_on(storage.poll()), PresenceEvent::Absent);
    assert_eq!(block_on(storage.last_mount_error()), None);
}

#[test]
fn removal_seen_by_a_command_still_reports_removed() {
    let storage = shared(formatted_card());
    settle(&storage);
    block_on(storage.poll());

    block_on(storage.with(|s| s.device_mut().set_present(false)));
    assert_eq!(
        block_on(storage.with(|s| s.free_space())),
        Err(StorageError::NoCard)
    );
    assert_eq!(block_on(storage.poll()), PresenceEvent::Removed);
}
