use std::fmt;
use std::str::FromStr;

use serde::de::{self, Deserializer, Visitor};
use serde::Deserialize;
use thiserror::Error;

/// Units accepted in human-readable sizes.
///
/// Decimal units are powers of 1,000, binary (IEC) units powers of 1,024, and
/// bit units are divided by 8 to get bytes.
///
/// # Examples
/// ```
/// use axum_size_guard::size_limit::SizeUnit;
///
/// assert_eq!("MB".parse::<SizeUnit>(), Ok(SizeUnit::Megabytes));
/// assert_eq!("mebibytes".parse::<SizeUnit>(), Ok(SizeUnit::Mebibytes));
/// assert_eq!("Mbit".parse::<SizeUnit>(), Ok(SizeUnit::Megabits));
/// assert!("TB".parse::<SizeUnit>().is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeUnit {
    Bytes,
    Kilobytes,
    Megabytes,
    Gigabytes,
    Kibibytes,
    Mebibytes,
    Gibibytes,
    Kilobits,
    Megabits,
    Gigabits,
}

impl SizeUnit {
    /// Number of bytes in one of this unit.
    pub fn bytes_per_unit(&self) -> f64 {
        match self {
            SizeUnit::Bytes => 1.0,

            SizeUnit::Kilobytes => 1_000.0,
            SizeUnit::Megabytes => 1_000_000.0,
            SizeUnit::Gigabytes => 1_000_000_000.0,

            SizeUnit::Kibibytes => 1_024.0,
            SizeUnit::Mebibytes => 1_048_576.0,
            SizeUnit::Gibibytes => 1_073_741_824.0,

            // 1 byte = 8 bits
            SizeUnit::Kilobits => 125.0,
            SizeUnit::Megabits => 125_000.0,
            SizeUnit::Gigabits => 125_000_000.0,
        }
    }

    /// Converts a value in this unit to whole bytes, truncating any fraction.
    pub fn to_bytes(&self, value: f64) -> u64 {
        (value * self.bytes_per_unit()) as u64
    }
}

impl FromStr for SizeUnit {
    type Err = SizeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "b" | "byte" | "bytes" => Ok(SizeUnit::Bytes),

            "kb" | "kilobyte" | "kilobytes" => Ok(SizeUnit::Kilobytes),
            "mb" | "megabyte" | "megabytes" => Ok(SizeUnit::Megabytes),
            "gb" | "gigabyte" | "gigabytes" => Ok(SizeUnit::Gigabytes),

            "kib" | "kibibyte" | "kibibytes" => Ok(SizeUnit::Kibibytes),
            "mib" | "mebibyte" | "mebibytes" => Ok(SizeUnit::Mebibytes),
            "gib" | "gibibyte" | "gibibytes" => Ok(SizeUnit::Gibibytes),

            "kbit" | "kilobit" | "kilobits" => Ok(SizeUnit::Kilobits),
            "mbit" | "megabit" | "megabits" => Ok(SizeUnit::Megabits),
            "gbit" | "gigabit" | "gigabits" => Ok(SizeUnit::Gigabits),

            _ => Err(SizeParseError::UnknownUnit(s.to_string())),
        }
    }
}

/// Failure to parse a human-readable size.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SizeParseError {
    #[error("empty size string")]
    Empty,
    #[error("no number found in size string '{0}'")]
    NoNumber(String),
    #[error("invalid number '{0}'")]
    InvalidNumber(String),
    #[error("unknown unit '{0}'")]
    UnknownUnit(String),
}

/// Parses a human-readable size string into bytes.
///
/// Accepts an optional space between number and unit, any letter case, and
/// either `.` or `,` as the decimal separator. A bare number is bytes.
///
/// # Examples
/// ```
/// use axum_size_guard::size_limit::parse_human_size;
///
/// assert_eq!(parse_human_size("8KiB").unwrap(), 8_192);
/// assert_eq!(parse_human_size("2.5 MB").unwrap(), 2_500_000);
/// assert_eq!(parse_human_size("1,5MB").unwrap(), 1_500_000);
/// assert_eq!(parse_human_size("4096").unwrap(), 4_096);
/// assert!(parse_human_size("1XB").is_err());
/// ```
pub fn parse_human_size(size_str: &str) -> Result<u64, SizeParseError> {
    let size_str = size_str.trim();
    if size_str.is_empty() {
        return Err(SizeParseError::Empty);
    }

    let num_end = size_str
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == ','))
        .unwrap_or(size_str.len());
    if num_end == 0 {
        return Err(SizeParseError::NoNumber(size_str.to_string()));
    }

    let num_part = &size_str[..num_end];
    let num = num_part
        .replace(',', ".")
        .parse::<f64>()
        .map_err(|_| SizeParseError::InvalidNumber(num_part.to_string()))?;

    let unit_part = size_str[num_end..].trim();
    let unit = if unit_part.is_empty() {
        SizeUnit::Bytes
    } else {
        unit_part.parse()?
    };

    Ok(unit.to_bytes(num))
}

/// A byte count as written in configuration.
///
/// Deserializes from either an integer (`8192`) or a human-readable string
/// (`"8KiB"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ByteSize(pub u64);

impl ByteSize {
    pub const fn bytes(bytes: u64) -> Self {
        ByteSize(bytes)
    }

    pub const fn kib(kib: u64) -> Self {
        ByteSize(kib.saturating_mul(1024))
    }

    pub const fn mib(mib: u64) -> Self {
        ByteSize(mib.saturating_mul(1024 * 1024))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl From<u64> for ByteSize {
    fn from(bytes: u64) -> Self {
        ByteSize(bytes)
    }
}

impl From<ByteSize> for u64 {
    fn from(size: ByteSize) -> Self {
        size.0
    }
}

impl FromStr for ByteSize {
    type Err = SizeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_human_size(s).map(ByteSize)
    }
}

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} bytes", self.0)
    }
}

impl<'de> Deserialize<'de> for ByteSize {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ByteSizeVisitor;

        impl Visitor<'_> for ByteSizeVisitor {
            type Value = ByteSize;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a byte count or a size string such as \"8KiB\"")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<ByteSize, E> {
                Ok(ByteSize(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<ByteSize, E> {
                u64::try_from(v)
                    .map(ByteSize)
                    .map_err(|_| E::invalid_value(de::Unexpected::Signed(v), &self))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<ByteSize, E> {
                v.parse().map_err(E::custom)
            }
        }

        deserializer.deserialize_any(ByteSizeVisitor)
    }
}
