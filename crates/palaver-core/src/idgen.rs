//! Message-id and unique-name generators
//!
//! Message ids are monotonically increasing integers rendered as base-10
//! strings, reseeded from a randomized starting point on every new
//! connection so ids never collide across reconnects. The unique-string
//! generator produces short base-32 names unique within the process.

use std::sync::atomic::{AtomicI64, Ordering};

use rand::Rng;

/// Subtracted from the wall clock before shifting, to keep unique names short.
const UNIQUE_EPOCH_MS: i64 = 1_414_213_562_373;

const BASE32_DIGITS: &[u8; 32] = b"0123456789abcdefghijklmnopqrstuv";

/// Generates request message ids and process-unique strings.
#[derive(Debug)]
pub struct IdGenerator {
    message_id: AtomicI64,
    name_counter: AtomicI64,
}

impl IdGenerator {
    pub fn new() -> Self {
        let gen = Self {
            message_id: AtomicI64::new(0),
            name_counter: AtomicI64::new(0),
        };
        gen.reseed();
        gen
    }

    /// Re-randomize the message-id counter. Called on every new connection.
    pub fn reseed(&self) {
        let seed = 0xffff + rand::thread_rng().gen_range(0..=0xffff_i64);
        self.message_id.store(seed, Ordering::Release);
    }

    /// Next request id as a base-10 string.
    pub fn next_id(&self) -> String {
        (self.message_id.fetch_add(1, Ordering::AcqRel) + 1).to_string()
    }

    /// Next process-unique string: the elapsed milliseconds shifted left 16
    /// bits, or-ed with a wrapping counter, in base-32.
    pub fn next_unique(&self) -> String {
        let now = chrono::Utc::now().timestamp_millis();
        let counter = self.name_counter.fetch_add(1, Ordering::AcqRel);
        let value = ((now - UNIQUE_EPOCH_MS) << 16) | (counter & 0xffff);
        to_base32(value)
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

fn to_base32(mut value: i64) -> String {
    if value <= 0 {
        return "0".into();
    }
    let mut digits = Vec::new();
    while value > 0 {
        digits.push(BASE32_DIGITS[(value & 0x1f) as usize]);
        value >>= 5;
    }
    digits.reverse();
    String::from_utf8(digits).expect("base32 digits are ascii")
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
