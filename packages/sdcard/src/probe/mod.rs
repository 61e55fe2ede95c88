mod card;
mod helpers;
mod init;
mod io;
#[cfg(test)]
mod tests;

pub use card::{SdCard, SdCardError, SdCardVersion, SdSpiBus};
pub use helpers::decode_capacity_bytes;
