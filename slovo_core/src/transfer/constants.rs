use crate::discovery::DISCOVERY_PORT;
use std::time::Duration;

/// Default TCP port for file transfer (always one above the discovery port)
pub const TRANSFER_PORT: u16 = DISCOVERY_PORT + 1;

/// Transfer port paired with `discovery_port`, if there is room above it
pub fn transfer_port_for(discovery_port: u16) -> Option<u16> {
    discovery_port.checked_add(1)
}

/// Chunk size for file transfer (64KB)
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Upper bound for the encoded `name|size` header
pub const MAX_HEADER_LEN: usize = 1024;

/// Separator between file name and size in the header
pub const HEADER_DELIMITER: char = '|';

/// Extension marking a packed directory; the receiver unpacks these
pub const ARCHIVE_SUFFIX: &str = ".zip";

/// Suffix used while a download is still incomplete
pub const PARTIAL_SUFFIX: &str = ".part";

/// Maximum filename length accepted by the receiver
pub const MAX_FILENAME_LENGTH: usize = 255;

/// How long a read may stay silent before the transfer is abandoned
pub const READ_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Added to elapsed seconds so throughput never divides by zero
pub const ELAPSED_EPSILON_SECS: f64 = 0.001;

/// Upper bound for establishing the TCP connection to a receiver
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
