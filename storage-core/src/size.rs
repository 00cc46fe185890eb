use std::fmt;
use std::ops::{Add, AddAssign, Sub, SubAssign};
use std::str::FromStr;

use crate::StorageError;

/// Display magnitude for a byte count (1024 based)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SizeUnit {
    Bytes,
    Kilo,
    Mega,
    Giga,
    Tera,
    Peta,
}

impl SizeUnit {
    pub const ALL: [SizeUnit; 6] = [
        SizeUnit::Bytes,
        SizeUnit::Kilo,
        SizeUnit::Mega,
        SizeUnit::Giga,
        SizeUnit::Tera,
        SizeUnit::Peta,
    ];

    /// Number of bytes in one unit
    pub fn factor(self) -> f64 {
        1024f64.powi(self as i32)
    }

    pub fn label(self) -> &'static str {
        match self {
            SizeUnit::Bytes => "b",
            SizeUnit::Kilo => "kb",
            SizeUnit::Mega => "mb",
            SizeUnit::Giga => "gb",
            SizeUnit::Tera => "tb",
            SizeUnit::Peta => "pb",
        }
    }

    /// Largest unit whose factor does not exceed the magnitude of `bytes`
    pub fn for_bytes(bytes: f64) -> SizeUnit {
        let magnitude = bytes.abs();
        SizeUnit::ALL
            .iter()
            .rev()
            .copied()
            .find(|unit| magnitude >= unit.factor())
            .unwrap_or(SizeUnit::Bytes)
    }

    /// Scale a possibly fractional byte amount (e.g. bytes per second)
    pub fn scale(bytes: f64) -> (f64, SizeUnit) {
        let unit = SizeUnit::for_bytes(bytes);
        (bytes / unit.factor(), unit)
    }
}

impl fmt::Display for SizeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.label())
    }
}

impl FromStr for SizeUnit {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "b" | "bytes" => Ok(SizeUnit::Bytes),
            "kb" | "k" => Ok(SizeUnit::Kilo),
            "mb" | "m" => Ok(SizeUnit::Mega),
            "gb" | "g" => Ok(SizeUnit::Giga),
            "tb" | "t" => Ok(SizeUnit::Tera),
            "pb" | "p" => Ok(SizeUnit::Peta),
            other => Err(StorageError::configuration(format!("Unknown size unit '{other}'"))),
        }
    }
}

/// A raw byte count with human-scaled formatting.
///
/// Arithmetic always happens on the raw count; scaling is only applied when
/// the value is rendered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SizeScale {
    bytes: i64,
}

impl SizeScale {
    pub const fn new(bytes: i64) -> Self {
        Self { bytes }
    }

    pub fn from_u64(bytes: u64) -> Self {
        Self::new(i64::try_from(bytes).unwrap_or(i64::MAX))
    }

    pub fn bytes(self) -> i64 {
        self.bytes
    }

    pub fn unit(self) -> SizeUnit {
        SizeUnit::for_bytes(self.bytes as f64)
    }

    /// Value and unit picked automatically
    pub fn scaled(self) -> (f64, SizeUnit) {
        SizeUnit::scale(self.bytes as f64)
    }

    pub fn in_unit(self, unit: SizeUnit) -> f64 {
        self.bytes as f64 / unit.factor()
    }

    /// `"<value:.2> <unit>"`, auto-scaled when `unit` is `None`
    pub fn render(self, unit: Option<SizeUnit>) -> String {
        let unit = unit.unwrap_or_else(|| self.unit());
        format!("{:.2} {}", self.in_unit(unit), unit)
    }
}

impl fmt::Display for SizeScale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(None))
    }
}

impl From<i64> for SizeScale {
    fn from(bytes: i64) -> Self {
        Self::new(bytes)
    }
}

impl From<u64> for SizeScale {
    fn from(bytes: u64) -> Self {
        Self::from_u64(bytes)
    }
}

impl Add for SizeScale {
    type Output = SizeScale;

    fn add(self, rhs: SizeScale) -> SizeScale {
        SizeScale::new(self.bytes.saturating_add(rhs.bytes))
    }
}

impl Add<i64> for SizeScale {
    type Output = SizeScale;

    fn add(self, rhs: i64) -> SizeScale {
        SizeScale::new(self.bytes.saturating_add(rhs))
    }
}

impl Sub for SizeScale {
    type Output = SizeScale;

    fn sub(self, rhs: SizeScale) -> SizeScale {
        SizeScale::new(self.bytes.saturating_sub(rhs.bytes))
    }
}

impl Sub<i64> for SizeScale {
    type Output = SizeScale;

    fn sub(self, rhs: i64) -> SizeScale {
        SizeScale::new(self.bytes.saturating_sub(rhs))
    }
}

impl AddAssign<i64> for SizeScale {
    fn add_assign(&mut self, rhs: i64) {
        *self = *self + rhs;
    }
}

impl AddAssign for SizeScale {
    fn add_assign(&mut self, rhs: SizeScale) {
        *self = *self + rhs;
    }
}

impl SubAssign<i64> for SizeScale {
    fn sub_assign(&mut self, rhs: i64) {
        *self = *self - rhs;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parts(bytes: i64) -> (String, &'static str) {
        let (value, unit) = SizeScale::new(bytes).scaled();
        (format!("{value:.2}"), unit.label())
    }

    #[test]
    fn scales_to_largest_fitting_unit() {
        assert_eq!(parts(999), ("999.00".to_string(), "b"));
        assert_eq!(parts(1024), ("1.00".to_string(), "kb"));
        assert_eq!(parts(1_048_576), ("1.00".to_string(), "mb"));
        assert_eq!(parts(1_073_741_824 * 3 / 2), ("1.50".to_string(), "gb"));
        assert_eq!(parts(1i64 << 50), ("1.00".to_string(), "pb"));
    }

    #[test]
    fn zero_and_negative_sizes_format() {
        assert_eq!(SizeScale::new(0).to_string(), "0.00 b");
        assert_eq!(SizeScale::new(-1).to_string(), "-1.00 b");
        assert_eq!(SizeScale::new(-2048).to_string(), "-2.00 kb");
    }

    #[test]
    fn arithmetic_works_on_raw_bytes() {
        let mut size = SizeScale::new(1000);
        size += 24;
        assert_eq!(size.bytes(), 1024);
        assert_eq!(size.unit(), SizeUnit::Kilo);

        let total = size + SizeScale::new(1024) - 48;
        assert_eq!(total.bytes(), 2000);
        assert_eq!(SizeScale::new(i64::MAX) + 1, SizeScale::new(i64::MAX));
    }

    #[test]
    fn renders_in_fixed_unit() {
        assert_eq!(SizeScale::new(1_048_576).render(Some(SizeUnit::Kilo)), "1024.00 kb");
        assert_eq!(SizeScale::new(512).render(Some(SizeUnit::Kilo)), "0.50 kb");
    }

    #[test]
    fn parses_unit_names() {
        assert_eq!("MB".parse::<SizeUnit>().unwrap(), SizeUnit::Mega);
        assert_eq!("b".parse::<SizeUnit>().unwrap(), SizeUnit::Bytes);
        assert!("xb".parse::<SizeUnit>().is_err());
    }

    #[test]
    fn unit_label_pads_for_alignment() {
        assert_eq!(format!("{:>2}", SizeUnit::Bytes), " b");
        assert_eq!(format!("{:>2}", SizeUnit::Mega), "mb");
    }
}
