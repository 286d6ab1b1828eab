/// Byte-denominated memory quantities.
///
/// `MemoryUnit` is a signed byte count with binary (1024-based) named units.
/// Sizes can be written in config files and on the command line as `"300KB"`,
/// `"512 MB"` or a bare integer number of bytes.
use serde::Deserialize;
use std::fmt;
use std::ops::{Add, Mul, Sub};
use std::str::FromStr;

/// A memory size in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MemoryUnit(i64);

pub const BYTE: MemoryUnit = MemoryUnit(1);
pub const KILOBYTE: MemoryUnit = MemoryUnit(1024);
pub const MEGABYTE: MemoryUnit = MemoryUnit(1024 * 1024);
pub const GIGABYTE: MemoryUnit = MemoryUnit(1024 * 1024 * 1024);
pub const TERABYTE: MemoryUnit = MemoryUnit(1024 * 1024 * 1024 * 1024);

/// Suffixes in descending order, so formatting picks the largest exact unit.
const SUFFIXES: [(&str, MemoryUnit); 5] = [
    ("TB", TERABYTE),
    ("GB", GIGABYTE),
    ("MB", MEGABYTE),
    ("KB", KILOBYTE),
    ("B", BYTE),
];

impl MemoryUnit {
    pub const ZERO: MemoryUnit = MemoryUnit(0);

    pub const fn from_bytes(bytes: i64) -> Self {
        MemoryUnit(bytes)
    }

    pub const fn kilobytes(n: i64) -> Self {
        MemoryUnit(n * KILOBYTE.0)
    }

    pub const fn megabytes(n: i64) -> Self {
        MemoryUnit(n * MEGABYTE.0)
    }

    pub const fn gigabytes(n: i64) -> Self {
        MemoryUnit(n * GIGABYTE.0)
    }

    pub const fn as_bytes(self) -> i64 {
        self.0
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl Mul<i64> for MemoryUnit {
    type Output = MemoryUnit;

    fn mul(self, rhs: i64) -> MemoryUnit {
        MemoryUnit(self.0 * rhs)
    }
}

impl Mul<MemoryUnit> for i64 {
    type Output = MemoryUnit;

    fn mul(self, rhs: MemoryUnit) -> MemoryUnit {
        MemoryUnit(self * rhs.0)
    }
}

impl Add for MemoryUnit {
    type Output = MemoryUnit;

    fn add(self, rhs: MemoryUnit) -> MemoryUnit {
        MemoryUnit(self.0 + rhs.0)
    }
}

impl Sub for MemoryUnit {
    type Output = MemoryUnit;

    fn sub(self, rhs: MemoryUnit) -> MemoryUnit {
        MemoryUnit(self.0 - rhs.0)
    }
}

impl fmt::Display for MemoryUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0 {
            return write!(f, "0B");
        }
        for (suffix, unit) in SUFFIXES {
            if self.0 % unit.0 == 0 {
                return write!(f, "{}{}", self.0 / unit.0, suffix);
            }
        }
        write!(f, "{}B", self.0)
    }
}

/// Errors produced when parsing a size string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseUnitError {
    Empty,
    InvalidNumber(String),
    UnknownSuffix(String),
    Overflow,
}

impl fmt::Display for ParseUnitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseUnitError::Empty => write!(f, "empty memory size"),
            ParseUnitError::InvalidNumber(s) => write!(f, "invalid number in memory size: {s:?}"),
            ParseUnitError::UnknownSuffix(s) => {
                write!(f, "unknown memory unit {s:?} (expected B, KB, MB, GB or TB)")
            }
            ParseUnitError::Overflow => write!(f, "memory size overflows a 64-bit byte count"),
        }
    }
}

impl std::error::Error for ParseUnitError {}

impl FromStr for MemoryUnit {
    type Err = ParseUnitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ParseUnitError::Empty);
        }

        let split = s
            .find(|c: char| !(c.is_ascii_digit() || c == '-'))
            .unwrap_or(s.len());
        let (number, suffix) = s.split_at(split);
        let number: i64 = number
            .parse()
            .map_err(|_| ParseUnitError::InvalidNumber(number.to_string()))?;

        let suffix = suffix.trim();
        if suffix.is_empty() {
            return Ok(MemoryUnit(number));
        }
        let unit = SUFFIXES
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(suffix))
            .map(|(_, unit)| *unit)
            .ok_or_else(|| ParseUnitError::UnknownSuffix(suffix.to_string()))?;

        number
            .checked_mul(unit.0)
            .map(MemoryUnit)
            .ok_or(ParseUnitError::Overflow)
    }
}

impl<'de> Deserialize<'de> for MemoryUnit {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Bytes(i64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Bytes(n) => Ok(MemoryUnit(n)),
            Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}
