// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Memory capacities for the device and pinned-host address spaces.
//!
//! A [`MemoryBudget`] is the hard ceiling of one address space. It parses
//! human-readable strings (`"256M"`, `"1G"`) so capacities can be written
//! in TOML configuration and on the command line, and it deserializes from
//! either a raw byte count or such a string.

use crate::DeviceError;
use std::fmt;

const KIB: usize = 1024;
const MIB: usize = 1024 * KIB;
const GIB: usize = 1024 * MIB;

/// Suffixes in match order. Two-letter forms come first so `"MB"` is not
/// read as a number ending in `"B"`.
const UNITS: [(&str, usize); 7] = [
    ("GB", GIB),
    ("MB", MIB),
    ("KB", KIB),
    ("G", GIB),
    ("M", MIB),
    ("K", KIB),
    ("B", 1),
];

/// Capacity of one memory space, in bytes.
///
/// # Examples
/// ```
/// use accel_device::MemoryBudget;
///
/// let b = MemoryBudget::parse("1M").unwrap();
/// assert_eq!(b.as_bytes(), 1 << 20);
/// assert_eq!(b.to_string(), "1 MB");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "BudgetRepr", into = "String")]
pub struct MemoryBudget {
    bytes: usize,
}

impl MemoryBudget {
    /// Creates a budget from a byte count.
    pub fn from_bytes(bytes: usize) -> Self {
        Self { bytes }
    }

    /// Creates a budget from mebibytes.
    pub fn from_mb(mb: usize) -> Self {
        Self { bytes: mb * MIB }
    }

    /// Creates a budget from gibibytes.
    pub fn from_gb(gb: usize) -> Self {
        Self { bytes: gb * GIB }
    }

    pub fn as_bytes(&self) -> usize {
        self.bytes
    }

    /// Budget in mebibytes (truncated).
    pub fn as_mb(&self) -> usize {
        self.bytes / MIB
    }

    /// Parses `"512M"`, `"512MB"`, `"1G"`, `"64K"`, `"100B"` or a plain
    /// byte count. Suffixes are case-insensitive; whitespace between the
    /// number and the suffix is allowed. Zero is rejected.
    pub fn parse(s: &str) -> Result<Self, DeviceError> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(DeviceError::InvalidBudget("empty budget string".into()));
        }

        let upper = trimmed.to_ascii_uppercase();
        let (digits, multiplier) = UNITS
            .iter()
            .find(|(suffix, _)| upper.ends_with(suffix))
            .map(|(suffix, mult)| (&trimmed[..trimmed.len() - suffix.len()], *mult))
            .unwrap_or((trimmed, 1));

        let value: usize = digits.trim().parse().map_err(|_| {
            DeviceError::InvalidBudget(format!(
                "'{trimmed}' is not a number with an optional K/M/G suffix"
            ))
        })?;

        let bytes = value
            .checked_mul(multiplier)
            .ok_or_else(|| DeviceError::InvalidBudget(format!("'{trimmed}' overflows usize")))?;

        if bytes == 0 {
            return Err(DeviceError::InvalidBudget(format!("'{trimmed}' is zero")));
        }

        Ok(Self { bytes })
    }
}

impl fmt::Display for MemoryBudget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.bytes {
            b if b >= GIB && b % GIB == 0 => write!(f, "{} GB", b / GIB),
            b if b >= MIB && b % MIB == 0 => write!(f, "{} MB", b / MIB),
            b if b >= KIB && b % KIB == 0 => write!(f, "{} KB", b / KIB),
            b => write!(f, "{b} B"),
        }
    }
}

impl std::str::FromStr for MemoryBudget {
    type Err = DeviceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// ── Serde plumbing ─────────────────────────────────────────────

#[derive(serde::Deserialize)]
#[serde(untagged)]
enum BudgetRepr {
    Bytes(usize),
    Text(String),
}

impl TryFrom<BudgetRepr> for MemoryBudget {
    type Error = DeviceError;

    fn try_from(repr: BudgetRepr) -> Result<Self, Self::Error> {
        match repr {
            BudgetRepr::Bytes(0) => Err(DeviceError::InvalidBudget("budget of 0 bytes".into())),
            BudgetRepr::Bytes(bytes) => Ok(Self::from_bytes(bytes)),
            BudgetRepr::Text(text) => Self::parse(&text),
        }
    }
}

impl From<MemoryBudget> for String {
    fn from(budget: MemoryBudget) -> Self {
        budget.to_string()
    }
}
