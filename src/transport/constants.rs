//! Constants for the HTTP transport (timeouts, buffering).

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default HTTP read timeout (5 minutes for large files).
pub const READ_TIMEOUT_SECS: u64 = 300;

/// Buffered body bytes that trigger a data-available event (~256 KB).
pub const READ_THRESHOLD_BYTES: usize = 256_000;

/// Network reads pause once this many thresholds' worth of bytes sit undrained.
pub const HIGH_WATER_FACTOR: usize = 4;

/// Chunk size used when turning an upload reader into a body stream.
pub const UPLOAD_CHUNK_BYTES: usize = 64 * 1024;
