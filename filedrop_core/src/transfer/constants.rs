use std::time::Duration;

/// Default TCP port for file transfer
pub const TRANSFER_PORT: u16 = 5000;

/// Chunk size used when streaming file bodies (64KB)
pub const BUFFER_SIZE: usize = 64 * 1024;

/// Longest file name accepted on the wire, in bytes
pub const MAX_FILENAME_LENGTH: usize = 255;

/// Largest count payload: the decimal digits of u32::MAX
pub const MAX_COUNT_LENGTH: usize = 10;

/// Largest body a single frame can describe
pub const MAX_BODY_SIZE: u64 = u32::MAX as u64;

/// Emit a progress event at least every this many bytes
pub const PROGRESS_STEP: u64 = 256 * 1024;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound on any single read or write on an established connection
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(30);
