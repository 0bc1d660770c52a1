// src/model/period.rs

use std::fmt;
use std::str::FromStr;

use crate::error::EngineError;

/// First (`A`, days 1-15) or second (`B`, day 16 to month end) half of a month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HalfMonth {
    A,
    B,
}

/// Analysis period label such as `202507A`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeriodLabel {
    year: u16,
    month: u8,
    half: HalfMonth,
}

impl PeriodLabel {
    pub fn new(year: u16, month: u8, half: HalfMonth) -> Result<Self, EngineError> {
        if !(1..=12).contains(&month) {
            return Err(EngineError::InvalidPeriod(format!("{year:04}{month:02}")));
        }
        Ok(Self { year, month, half })
    }

    pub fn year(&self) -> u16 {
        self.year
    }

    pub fn month(&self) -> u8 {
        self.month
    }

    pub fn half(&self) -> HalfMonth {
        self.half
    }

    /// Number of calendar days the period covers.
    pub fn days(&self) -> u32 {
        match self.half {
            HalfMonth::A => 15,
            HalfMonth::B => days_in_month(self.year, self.month) - 15,
        }
    }
}

fn days_in_month(year: u16, month: u8) -> u32 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        _ => {
            let leap = (year % 4 == 0 && year % 100 != 0) || year % 400 == 0;
            if leap {
                29
            } else {
                28
            }
        }
    }
}

impl FromStr for PeriodLabel {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let invalid = || EngineError::InvalidPeriod(s.to_string());
        if trimmed.len() != 7 || !trimmed.is_ascii() {
            return Err(invalid());
        }
        let (digits, half) = trimmed.split_at(6);
        if !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let year: u16 = digits[..4].parse().map_err(|_| invalid())?;
        let month: u8 = digits[4..].parse().map_err(|_| invalid())?;
        let half = match half {
            "A" | "a" => HalfMonth::A,
            "B" | "b" => HalfMonth::B,
            _ => return Err(invalid()),
        };
        Self::new(year, month, half).map_err(|_| invalid())
    }
}

impl fmt::Display for PeriodLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let half = match self.half {
            HalfMonth::A => 'A',
            HalfMonth::B => 'B',
        };
        write!(f, "{:04}{:02}{}", self.year, self.month, half)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_formats() {
        let period: PeriodLabel = "202507A".parse().unwrap();
        assert_eq!(period.year(), 2025);
        assert_eq!(period.month(), 7);
        assert_eq!(period.half(), HalfMonth::A);
        assert_eq!(period.to_string(), "202507A");
    }

    #[test]
    fn second_half_length_follows_calendar() {
        let july: PeriodLabel = "202507B".parse().unwrap();
        assert_eq!(july.days(), 16);
        let leap_feb: PeriodLabel = "202402B".parse().unwrap();
        assert_eq!(leap_feb.days(), 14);
        let feb: PeriodLabel = "202502B".parse().unwrap();
        assert_eq!(feb.days(), 13);
    }

    #[test]
    fn rejects_malformed_labels() {
        for bad in ["202507", "202513A", "202507C", "20250AA", "2025-07A", "+02507A", "2025+7A"] {
            assert!(bad.parse::<PeriodLabel>().is_err(), "{bad} should be rejected");
        }
    }
}
