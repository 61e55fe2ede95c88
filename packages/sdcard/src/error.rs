use core::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageError {
    NoCard,
    InitFailed,
    InvalidFormat,
    ReadFailed,
    WriteFailed,
    NotMounted,
    FileNotFound,
    InvalidPath,
    NotADirectory,
    NotAFile,
    DirNotEmpty,
    DirNotFound,
    DiskFull,
    FileExists,
    InvalidParameter,
}

pub type StorageResult<T> = Result<T, StorageError>;

impl StorageError {
    /// Text shown to the user by the command layer.
    pub const fn message(self) -> &'static str {
        match self {
            Self::NoCard => "No SD card present",
            Self::InitFailed => "SD card initialization failed",
            Self::InvalidFormat => "Invalid SD card format",
            Self::ReadFailed => "Read operation failed",
            Self::WriteFailed => "Write operation failed",
            Self::NotMounted => "File system not mounted",
            Self::FileNotFound => "File not found",
            Self::InvalidPath => "Invalid path",
            Self::NotADirectory => "Not a directory",
            Self::NotAFile => "Not a file",
            Self::DirNotEmpty => "Directory not empty",
            Self::DirNotFound => "Directory not found",
            Self::DiskFull => "Disk full",
            Self::FileExists => "File already exists",
            Self::InvalidParameter => "Invalid parameter",
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::NoCard => "no_card",
            Self::InitFailed => "init_failed",
            Self::InvalidFormat => "invalid_format",
            Self::ReadFailed => "read_failed",
            Self::WriteFailed => "write_failed",
            Self::NotMounted => "not_mounted",
            Self::FileNotFound => "file_not_found",
            Self::InvalidPath => "invalid_path",
            Self::NotADirectory => "not_a_directory",
            Self::NotAFile => "not_a_file",
            Self::DirNotEmpty => "dir_not_empty",
            Self::DirNotFound => "dir_not_found",
            Self::DiskFull => "disk_full",
            Self::FileExists => "file_exists",
            Self::InvalidParameter => "invalid_parameter",
        }
    }

    /// Errors that leave the volume unmounted until the card is re-inserted
    /// or a mount is requested explicitly.
    pub const fn is_mount_fatal(self) -> bool {
        matches!(self, Self::InvalidFormat | Self::InitFailed)
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_match_command_layer_text() {
        assert_eq!(StorageError::NoCard.message(), "No SD card present");
        assert_eq!(StorageError::NotAFile.message(), "Not a file");
        assert_eq!(
            std::format!("{}", StorageError::InvalidParameter),
            "Invalid parameter"
        );
    }

    #[test]
    fn only_format_and_init_are_mount_fatal() {
        assert!(StorageError::InvalidFormat.is_mount_fatal());
        assert!(StorageError::InitFailed.is_mount_fatal());
        assert!(!StorageError::ReadFailed.is_mount_fatal());
        assert!(!StorageError::NoCard.is_mount_fatal());
    }
}
