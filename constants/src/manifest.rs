/// Source used when a manifest line names no image
pub const FALLBACK_SOURCE: &str = "test.jpg";

/// Longest source token kept from a manifest line, in bytes
pub const MAX_SOURCE_LEN: usize = 1023;

/// Record delimiter in manifest files
pub const RECORD_DELIMITER: u8 = b'\n';

/// Read block size used when counting manifest records
pub const SCAN_BLOCK_SIZE: usize = 1024 * 1024;

/// Literal prefixes that route a source to the network fetcher
pub const REMOTE_PREFIXES: &[&str] = &["http://", "https://"];

/// Largest remote image body accepted, in bytes
pub const MAX_REMOTE_BODY_BYTES: u64 = 64 * 1024 * 1024;
