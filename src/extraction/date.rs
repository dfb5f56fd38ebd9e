use std::fmt;
use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::CaptureError;

fn date_regex() -> &'static Regex {
    static DATE: OnceLock<Regex> = OnceLock::new();
    DATE.get_or_init(|| {
        Regex::new(r"(\d{1,2})[/\-.](\d{1,2})[/\-.](\d{4}|\d{2})").expect("date pattern is valid")
    })
}

/// A `YYYY-MM-DD` string.
///
/// Dates read off packaging are normalized but not checked against the
/// calendar, so `2025-02-31` can exist here; [`IsoDate::calendar_date`] tells
/// the two apart. Dates typed by the operator go through [`IsoDate::parse`],
/// which does check.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IsoDate(String);

impl IsoDate {
    /// Zero-pads day and month; two-digit years land in the 2000s.
    pub fn from_parts(day: &str, month: &str, year: &str) -> Self {
        let year = if year.len() == 2 {
            format!("20{year}")
        } else {
            year.to_string()
        };
        IsoDate(format!("{year}-{month:0>2}-{day:0>2}"))
    }

    /// Strict `YYYY-MM-DD` parse for operator-entered dates.
    pub fn parse(input: &str) -> Result<Self, CaptureError> {
        let trimmed = input.trim();
        NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
            .map(Self::from)
            .map_err(|_| CaptureError::InvalidDate(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The real calendar date, or `None` for values like `2024-13-40`.
    pub fn calendar_date(&self) -> Option<NaiveDate> {
        NaiveDate::parse_from_str(&self.0, "%Y-%m-%d").ok()
    }

    pub fn is_calendar_valid(&self) -> bool {
        self.calendar_date().is_some()
    }
}

impl From<NaiveDate> for IsoDate {
    fn from(date: NaiveDate) -> Self {
        IsoDate(date.format("%Y-%m-%d").to_string())
    }
}

impl fmt::Display for IsoDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// First `D[D]/M[M]/YY[YY]` date in `text`; `/`, `-` and `.` all separate.
pub fn find_date(text: &str) -> Option<IsoDate> {
    let caps = date_regex().captures(text)?;
    Some(IsoDate::from_parts(&caps[1], &caps[2], &caps[3]))
}
