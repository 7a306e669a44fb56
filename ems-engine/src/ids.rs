//! Entity id generation.
//!
//! Ids are 17 characters: the first 13 are the base58-encoded nanosecond
//! timestamp (right-padded with '0'), the last 4 are random digits. Equal
//! length plus the ascii-ordered base58 alphabet keeps ids sortable by
//! creation time.

use rand::Rng;
use std::time::{SystemTime, UNIX_EPOCH};

const TIMESTAMP_WIDTH: usize = 13;
const RANDOM_DIGITS: usize = 4;

/// Generate a fresh 17-character entity id
pub fn generate_id() -> String {
    let timestamp_ns = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    from_timestamp(timestamp_ns)
}

fn from_timestamp(timestamp_ns: u64) -> String {
    let mut encoded = bs58::encode(timestamp_ns.to_be_bytes()).into_string();
    if encoded.len() < TIMESTAMP_WIDTH {
        while encoded.len() < TIMESTAMP_WIDTH {
            encoded.push('0');
        }
    } else {
        encoded.truncate(TIMESTAMP_WIDTH);
    }

    let mut rng = rand::thread_rng();
    for _ in 0..RANDOM_DIGITS {
        encoded.push(char::from(b'0' + rng.gen_range(0..10u8)));
    }
    encoded
}
