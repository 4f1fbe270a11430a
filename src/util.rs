use crate::converter::OrphanPolicy;
use log::{LevelFilter, info};
use std::time::{SystemTime, UNIX_EPOCH};

pub fn parse_verbosity(input: &str) -> LevelFilter {
    match input.to_lowercase().as_str() {
        "off" | "none" => LevelFilter::Off,
        "critical" | "error" | "e" => LevelFilter::Error,
        "warning" | "warn" | "w" => LevelFilter::Warn,
        "info" | "i" => LevelFilter::Info,
        "debug" | "d" => LevelFilter::Debug,
        "trace" | "t" => LevelFilter::Trace,
        other => {
            info!("Unknown verbosity '{}', defaulting to `info`..!", other);
            LevelFilter::Info
        }
    }
}

pub fn parse_orphan_policy(s: &str) -> OrphanPolicy {
    match s.to_lowercase().as_str() {
        "i" | "ignore" => OrphanPolicy::Ignore,
        "c" | "count" => OrphanPolicy::Count,
        "r" | "reject" => OrphanPolicy::Reject,
        other => {
            info!("Unknown orphan policy '{}', defaulting to `count`..!", other);
            OrphanPolicy::Count
        }
    }
}

/// Byte-swaps the low 32 bits of the millisecond clock, so runs started close together
/// still get seeds that differ in their high bits.
pub fn seed_from_millis(t: u64) -> u64 {
    ((t & 0xff00_0000) >> 24) + ((t & 0x00ff_0000) >> 8) + ((t & 0x0000_ff00) << 8) + ((t & 0x0000_00ff) << 24)
}

pub fn seed_from_time() -> u64 {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);

    seed_from_millis(millis)
}

/// `round(share * total)`, half away from zero, clamped to `total`.
pub fn share_of(total: usize, share: f64) -> usize {
    ((share.clamp(0.0, 1.0) * total as f64).round() as usize).min(total)
}
