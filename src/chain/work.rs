//! Cumulative proof-of-work accounting.
//!
//! Work is the expected number of hash attempts to satisfy a target,
//! `2^256 / (target + 1)`, accumulated over a chain segment to decide which
//! of two chains is best.

use std::cmp::Ordering;
use std::ops::Add;

use bitcoin::block::Header as BlockHeader;
use bitcoin::Target;

/// Cumulative chain work as a 256-bit integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainWork {
    /// The work value as bytes in big-endian order.
    work: [u8; 32],
}

impl ChainWork {
    /// Zero work.
    pub fn zero() -> Self {
        Self { work: [0u8; 32] }
    }

    /// Work contributed by a single header.
    pub fn from_header(header: &BlockHeader) -> Self {
        Self::from_target(header.target())
    }

    /// Work for a target: `2^256 / (target + 1)`.
    pub fn from_target(target: Target) -> Self {
        Self {
            work: target.to_work().to_be_bytes(),
        }
    }

    /// Add the work of one more header to this accumulator.
    pub fn add_header(self, header: &BlockHeader) -> Self {
        self.combine(Self::from_header(header))
    }

    /// Sum of two work values.
    pub fn combine(self, other: Self) -> Self {
        let mut result = [0u8; 32];
        let mut carry = 0u16;

        // Add from least significant byte (right) to most significant (left).
        for i in (0..32).rev() {
            let sum = self.work[i] as u16 + other.work[i] as u16 + carry;
            result[i] = (sum & 0xff) as u8;
            carry = sum >> 8;
        }

        Self { work: result }
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.work
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self { work: bytes }
    }

    pub fn is_zero(&self) -> bool {
        self.work.iter().all(|&b| b == 0)
    }

    /// Parse a big-endian hex string, with or without a `0x` prefix.
    pub fn from_hex(hex: &str) -> Result<Self, String> {
        let hex = hex.strip_prefix("0x").unwrap_or(hex);
        let bytes = hex::decode(hex).map_err(|e| format!("invalid hex: {}", e))?;

        if bytes.len() != 32 {
            return Err(format!("invalid work length: expected 32 bytes, got {}", bytes.len()));
        }

        let mut work = [0u8; 32];
        work.copy_from_slice(&bytes);
        Ok(Self { work })
    }
}

impl Ord for ChainWork {
    fn cmp(&self, other: &Self) -> Ordering {
        // Compare as big-endian integers.
        for i in 0..32 {
            match self.work[i].cmp(&other.work[i]) {
                Ordering::Equal => continue,
                other => return other,
            }
        }
        Ordering::Equal
    }
}

impl PartialOrd for ChainWork {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Default for ChainWork {
    fn default() -> Self {
        Self::zero()
    }
}

impl Add for ChainWork {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        self.combine(other)
    }
}
