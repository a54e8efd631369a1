use std::fmt;
use std::str::FromStr;

use crate::contracts::ValidationError;

/// A formatted registration number, displayed as `NNN/YYYY`.
///
/// The counter is zero-padded to three digits and simply widens past 999.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentNumber {
    counter: u64,
    year: i32,
}

impl DocumentNumber {
    pub fn new(counter: u64, year: i32) -> Result<Self, ValidationError> {
        if counter == 0 {
            return Err(ValidationError::NonPositiveCounter);
        }
        if !(1..=9999).contains(&year) {
            return Err(ValidationError::InvalidYear(year));
        }
        Ok(Self { counter, year })
    }

    pub fn counter(&self) -> u64 {
        self.counter
    }

    pub fn year(&self) -> i32 {
        self.year
    }
}

impl fmt::Display for DocumentNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03}/{}", self.counter, self.year)
    }
}

impl FromStr for DocumentNumber {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || ValidationError::MalformedNumber(s.to_string());
        let (counter, year) = s.split_once('/').ok_or_else(malformed)?;
        if counter.len() < 3 || !counter.bytes().all(|b| b.is_ascii_digit()) {
            return Err(malformed());
        }
        if year.len() != 4 || !year.bytes().all(|b| b.is_ascii_digit()) {
            return Err(malformed());
        }
        let counter = counter.parse::<u64>().map_err(|_| malformed())?;
        let year = year.parse::<i32>().map_err(|_| malformed())?;
        Self::new(counter, year)
    }
}

/// Formats a raw counter value for the given year.
pub fn format(raw: u64, year: i32) -> Result<String, ValidationError> {
    DocumentNumber::new(raw, year).map(|n| n.to_string())
}
