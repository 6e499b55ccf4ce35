//! TCP file transfer.
//!
//! One transfer per connection: a length-prefixed `name|size` header
//! followed by exactly `size` raw bytes, after which the sender closes.
//! Directories travel as zip archives and are unpacked on arrival.

pub mod constants;
pub mod protocol;
pub mod receiver;
pub mod sender;
pub mod server;
pub mod utils;

// Re-export public API
pub use constants::{ARCHIVE_SUFFIX, DEFAULT_CHUNK_SIZE, TRANSFER_PORT};
pub use protocol::TransferHeader;
pub use receiver::{ReceivedFile, ReceiverState, receive_file};
pub use sender::{SendReport, send_path, send_to_peer};
pub use server::Receiver;
