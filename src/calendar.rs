//! Calendar derivation for simulation time steps.
//!
//! The simulation engine runs on a 365-day model year with no leap day.
//! Step `0` and every multiple of 365 is attributed to day 365 (31 Dec) of
//! the year `start_year + step / 365`, so each model year holds days
//! 1..=365 exactly once.

use chrono::{Datelike, Month, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Days in one model year.
pub const DAYS_PER_YEAR: u32 = 365;

const MONTH_LENGTHS: [u32; 12] = [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];

/// Calendar attributes derived for one time step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepDate {
    /// Day of the model year, always in `1..=365`.
    pub day: u32,
    pub year: i32,
    pub date: NaiveDate,
}

/// Day of year for a step; multiples of 365 map to day 365.
pub fn day_of_year(step: u32) -> u32 {
    match step % DAYS_PER_YEAR {
        0 => DAYS_PER_YEAR,
        day => day,
    }
}

/// Model year for a step. `None` on `i32` overflow.
pub fn year_of(step: u32, start_year: i32) -> Option<i32> {
    start_year.checked_add((step / DAYS_PER_YEAR) as i32)
}

/// Month and day of month for a day of the model year.
///
/// Day `0` is treated as day 365, matching the step convention above.
pub fn month_day(day_of_year: u32) -> (u32, u32) {
    let mut remaining = match day_of_year {
        0 => DAYS_PER_YEAR,
        d => d.min(DAYS_PER_YEAR),
    };

    for (index, length) in MONTH_LENGTHS.iter().enumerate() {
        if remaining <= *length {
            return (index as u32 + 1, remaining);
        }
        remaining -= length;
    }

    (12, 31)
}

/// Derive day, year and date for a step. `None` if the year is outside
/// the range chrono can represent.
pub fn derive(step: u32, start_year: i32) -> Option<StepDate> {
    let day = day_of_year(step);
    let year = year_of(step, start_year)?;
    let (month, day_of_month) = month_day(day);
    let date = NaiveDate::from_ymd_opt(year, month, day_of_month)?;

    Some(StepDate { day, year, date })
}

/// Month-grain time bucket used as the aggregation key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct YearMonth {
    pub year: i32,
    pub month: u32,
}

impl YearMonth {
    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }
}

impl fmt::Display for YearMonth {
    /// Renders as `%b-%Y`, e.g. `Jan-2022`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = u8::try_from(self.month)
            .ok()
            .and_then(|m| Month::try_from(m).ok())
            .map(|m| &m.name()[..3])
            .unwrap_or("???");
        write!(f, "{}-{}", name, self.year)
    }
}
