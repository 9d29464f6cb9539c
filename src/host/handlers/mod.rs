//! Host operations run on the main thread, organized by domain.
//!
//! Every function here takes the host directly and must only be invoked
//! from inside a [`MainThread`](crate::host::MainThread) job.

pub mod coloring;
pub mod navigation;
pub mod session;

use crate::error::HostError;

/// Parse an address string supporting hex (0x), binary (0b), octal (0o), and decimal.
pub fn parse_address(s: &str) -> Result<u64, HostError> {
    let mut s = s.trim().to_string();
    s.retain(|c| c != '_');
    let invalid = |s: &str| HostError::NotFound(format!("invalid address: {s}"));
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).map_err(|_| invalid(&s))
    } else if let Some(bin) = s.strip_prefix("0b").or_else(|| s.strip_prefix("0B")) {
        u64::from_str_radix(bin, 2).map_err(|_| invalid(&s))
    } else if let Some(oct) = s.strip_prefix("0o").or_else(|| s.strip_prefix("0O")) {
        u64::from_str_radix(oct, 8).map_err(|_| invalid(&s))
    } else {
        s.parse::<u64>().map_err(|_| invalid(&s))
    }
}
