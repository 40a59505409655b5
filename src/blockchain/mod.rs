pub mod block;
pub mod model;

pub use block::{Block, hash_meets_difficulty};
pub use model::{Blockchain, ChainSnapshot};

use chrono::Utc;

/// Default Proof-of-Work difficulty (number of leading zero hex digits).
pub const DEFAULT_DIFFICULTY: u32 = 2;

/// Previous-hash sentinel carried by every genesis block.
pub const GENESIS_PREVIOUS_HASH: &str = "0";

/// Current Unix time in fractional seconds (microsecond resolution).
pub fn unix_now() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}
