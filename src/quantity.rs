//! Parse and format Kubernetes-style resource Quantity strings.
//!
//! CPU is tracked in millicores, memory in mebibytes. Both directions (parse
//! and format) are needed here, unlike a pure inspection tool that only ever
//! compares against a live cluster value.

use serde::{Deserialize, Serialize};
use std::fmt;

/// CPU quantity in millicores (e.g. `500m` == 500, `2` == 2000).
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct CpuMillis(pub i64);

/// Memory quantity in mebibytes (e.g. `256Mi` == 256, `1Gi` == 1024).
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct MemMebis(pub i64);

fn strip_quotes(s: &str) -> &str {
    let s = s.trim();
    s.trim_matches(|c| c == '"' || c == '\'')
}

fn round_half_away_from_zero(v: f64) -> i64 {
    if v >= 0.0 {
        (v + 0.5).floor() as i64
    } else {
        (v - 0.5).ceil() as i64
    }
}

impl CpuMillis {
    pub const ZERO: CpuMillis = CpuMillis(0);

    /// Round a raw millicore value (e.g. a buffered/step-limited target) to
    /// the nearest whole millicore, half away from zero.
    pub fn from_f64(v: f64) -> CpuMillis {
        CpuMillis(round_half_away_from_zero(v))
    }

    /// Parse a CPU quantity string to millicores. `"500m"` -> 500, `"2"` -> 2000.
    pub fn parse(s: &str) -> Option<CpuMillis> {
        let s = strip_quotes(s);
        if s.is_empty() {
            return None;
        }
        if let Some(m) = s.strip_suffix('m') {
            return m.parse::<f64>().ok().map(|n| CpuMillis(round_half_away_from_zero(n)));
        }
        s.parse::<f64>()
            .ok()
            .map(|cores| CpuMillis(round_half_away_from_zero(cores * 1000.0)))
    }

    /// Format as a canonical `Nm` string, clamped to non-negative.
    pub fn format(&self) -> String {
        format!("{}m", self.0.max(0))
    }

    pub fn as_f64(&self) -> f64 {
        self.0 as f64
    }
}

impl fmt::Display for CpuMillis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format())
    }
}

/// Suffix -> multiplier to Mi. Binary suffixes use 1024-base relative to Mi;
/// decimal suffixes use 1000-base bytes converted to Mi.
const MEM_UNITS: &[(&str, f64)] = &[
    ("Ki", 1.0 / 1024.0),
    ("Mi", 1.0),
    ("Gi", 1024.0),
    ("Ti", 1024.0 * 1024.0),
    ("Pi", 1024.0 * 1024.0 * 1024.0),
    ("K", 1000.0 / (1024.0 * 1024.0)),
    ("M", 1_000_000.0 / (1024.0 * 1024.0)),
    ("G", 1_000_000_000.0 / (1024.0 * 1024.0)),
    ("T", 1_000_000_000_000.0 / (1024.0 * 1024.0)),
];

impl MemMebis {
    pub const ZERO: MemMebis = MemMebis(0);

    /// Round a raw mebibyte value to the nearest whole mebibyte, half away
    /// from zero.
    pub fn from_f64(v: f64) -> MemMebis {
        MemMebis(round_half_away_from_zero(v))
    }

    /// Parse a memory quantity string to mebibytes. Bare numbers are bytes.
    pub fn parse(s: &str) -> Option<MemMebis> {
        let s = strip_quotes(s);
        if s.is_empty() {
            return None;
        }
        // Longest suffix first so "Ki" isn't matched by a stray "K" check order bug.
        let mut units: Vec<&(&str, f64)> = MEM_UNITS.iter().collect();
        units.sort_by_key(|(suffix, _)| std::cmp::Reverse(suffix.len()));
        for (suffix, factor) in units {
            if let Some(num) = s.strip_suffix(suffix) {
                return num.parse::<f64>().ok().map(|n| MemMebis(round_half_away_from_zero(n * factor)));
            }
        }
        // Unknown suffix or bare number: treat as raw bytes.
        s.parse::<f64>()
            .ok()
            .map(|bytes| MemMebis(round_half_away_from_zero(bytes / (1024.0 * 1024.0))))
    }

    /// Format as a canonical `NMi` string, clamped to non-negative.
    pub fn format(&self) -> String {
        format!("{}Mi", self.0.max(0))
    }

    pub fn as_f64(&self) -> f64 {
        self.0 as f64
    }
}

impl fmt::Display for MemMebis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_round_trip_canonical() {
        for n in [0i64, 1, 25, 500, 999, 12345] {
            let s = CpuMillis(n).format();
            assert_eq!(CpuMillis::parse(&s).unwrap().0, n);
        }
    }

    #[test]
    fn mem_round_trip_canonical() {
        for n in [0i64, 1, 64, 512, 4096] {
            let s = MemMebis(n).format();
            assert_eq!(MemMebis::parse(&s).unwrap().0, n);
        }
    }

    #[test]
    fn cpu_alternate_units() {
        assert_eq!(CpuMillis::parse("1000m").unwrap().0, 1000);
        assert_eq!(CpuMillis::parse("1").unwrap().0, 1000);
        assert_eq!(CpuMillis::parse("0.5").unwrap().0, 500);
    }

    #[test]
    fn mem_alternate_units() {
        assert_eq!(MemMebis::parse("1Gi").unwrap().0, 1024);
        assert_eq!(MemMebis::parse("1048576").unwrap().0, 1);
        assert_eq!(MemMebis::parse("1Ki").unwrap().0, 0);
        assert_eq!(MemMebis::parse("2048Ki").unwrap().0, 2);
    }

    #[test]
    fn mem_decimal_m_rounds_correctly() {
        // 1,000,000 bytes = 0.953674... Mi -> rounds to 1
        assert_eq!(MemMebis::parse("1M").unwrap().0, 1);
    }

    #[test]
    fn strips_quotes() {
        assert_eq!(CpuMillis::parse("\"500m\"").unwrap().0, 500);
        assert_eq!(MemMebis::parse("'256Mi'").unwrap().0, 256);
    }

    #[test]
    fn clamps_negative_on_format() {
        assert_eq!(CpuMillis(-5).format(), "0m");
        assert_eq!(MemMebis(-5).format(), "0Mi");
    }

    #[test]
    fn empty_string_is_none() {
        assert!(CpuMillis::parse("").is_none());
        assert!(MemMebis::parse("  ").is_none());
    }
}
