//! # Utility Functions
//!
//! Canonical event hashing, hex helpers and amount/time conversion.

use bitcoin::Amount;
use sha2::{Digest, Sha256};

use crate::event::Tag;

/// Seconds in a day.
pub const SECONDS_PER_DAY: u64 = 24 * 3600;

/// Satoshis in one bitcoin.
pub const SATS_PER_BTC: u64 = 100_000_000;

/// Hash a message using SHA256
pub fn sha256_hash(message: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(message.as_bytes());
    let hash = hasher.finalize();
    hex::encode(hash)
}

/// Compute an event id as described in `https://nips.nostr.com/1`.
///
/// The id is the SHA256 of the compact JSON array
/// `[0, pubkey, created_at, kind, tags, content]`. The array is positional, so
/// field order is fixed and tag order (including the order of strings inside a
/// tag) is significant.
pub fn compute_event_id(
    pubkey: &str,
    created_at: u64,
    kind: u32,
    tags: &[Tag],
    content: &str,
) -> String {
    let mut hasher = Sha256::new();
    let to_serialize = (0, pubkey, created_at, kind, tags, content);
    hasher.update(
        serde_json::to_string(&to_serialize)
            .unwrap_or_default()
            .as_bytes(),
    );
    let hash = hasher.finalize();
    hex::encode(hash)
}

/// Whether `value` is exactly `len` hex characters.
pub fn is_hex_of_len(value: &str, len: usize) -> bool {
    value.len() == len && value.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Length of the leading run of `'0'` characters of a hex digest.
pub fn leading_zero_nibbles(hex_digest: &str) -> usize {
    hex_digest.bytes().take_while(|&b| b == b'0').count()
}

/// Current Unix time in seconds.
pub fn now_unix() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

/// Convert satoshis to Bitcoin
pub fn satoshi_to_btc(satoshi: u64) -> f64 {
    Amount::from_sat(satoshi).to_btc()
}

/// Format timestamp as human-readable string
pub fn format_timestamp(timestamp: u64) -> String {
    use chrono::DateTime;
    let dt = DateTime::from_timestamp(timestamp as i64, 0).unwrap_or_default();
    dt.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

/// Shorten a hex key for display: first 16 characters followed by `...`.
pub fn short_key(key: &str) -> String {
    let prefix: String = key.chars().take(16).collect();
    format!("{prefix}...")
}
