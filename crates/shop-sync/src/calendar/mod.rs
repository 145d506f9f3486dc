//! Calendar dimension builder.
//!
//! [`build_calendar`] produces one [`CalendarDay`] per date in an inclusive
//! range. Every attribute is derived from the date alone, so the output for a
//! given range never changes and can be loaded insert-only.
//!
//! Two week numberings are carried side by side:
//!
//! - `TheWeek`: weeks start on Sunday and the week holding 1 January is
//!   week 1, so the first and last weeks of a year are usually partial and a
//!   year spans 53 or 54 of them.
//! - `TheISOWeek`: ISO-8601 weeks start on Monday and week 1 holds the
//!   year's first Thursday; days near a year boundary can belong to the
//!   neighbouring `TheISOYear`.

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use serde::Serialize;
use tracing::debug;

use crate::core::{NormalizedRow, SqlValue};
use crate::error::{Result, SyncError};

/// Thirty years of days.
pub const DEFAULT_HORIZON_DAYS: u32 = 30 * 365;

/// One row of the date dimension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CalendarDay {
    pub the_date: NaiveDate,
    pub the_day: i32,
    pub the_day_suffix: &'static str,
    pub the_day_name: String,
    /// Sunday = 1 through Saturday = 7.
    pub the_day_of_week: i32,
    /// Occurrence of this weekday within the month (the 2nd Tuesday is 2).
    pub the_day_of_week_in_month: i32,
    pub the_day_of_year: i32,
    pub is_weekend: bool,
    pub the_week: i32,
    #[serde(rename = "TheISOWeek")]
    pub the_iso_week: i32,
    pub the_first_of_week: NaiveDate,
    pub the_last_of_week: NaiveDate,
    pub the_week_of_month: i32,
    pub the_month: i32,
    pub the_month_name: String,
    pub the_first_of_month: NaiveDate,
    pub the_last_of_month: NaiveDate,
    pub the_first_of_next_month: NaiveDate,
    pub the_last_of_next_month: NaiveDate,
    pub the_quarter: i32,
    pub the_first_of_quarter: NaiveDate,
    pub the_last_of_quarter: NaiveDate,
    pub the_year: i32,
    #[serde(rename = "TheISOYear")]
    pub the_iso_year: i32,
    pub the_first_of_year: NaiveDate,
    pub the_last_of_year: NaiveDate,
    pub is_leap_year: bool,
    #[serde(rename = "Has53Weeks")]
    pub has_53_weeks: bool,
    #[serde(rename = "Has53ISOWeeks")]
    pub has_53_iso_weeks: bool,
    #[serde(rename = "MMYYYY")]
    pub mmyyyy: String,
    /// `MM/DD/YYYY`
    pub style101: String,
    /// `DD/MM/YYYY`
    pub style103: String,
    /// `YYYYMMDD`
    pub style112: String,
    /// `YYYY-MM-DD`
    pub style120: String,
}

impl CalendarDay {
    /// Derive every attribute of `date`.
    pub fn from_date(date: NaiveDate) -> Result<Self> {
        let year = date.year();
        let month = date.month();
        let day = date.day();

        let first_of_month = ymd(year, month, 1)?;
        let (next_year, next_mon) = next_month(year, month);
        let first_of_next_month = ymd(next_year, next_mon, 1)?;
        let (after_year, after_month) = next_month(next_year, next_mon);
        let first_of_month_after = ymd(after_year, after_month, 1)?;

        let quarter = (month - 1) / 3 + 1;
        let first_of_quarter = ymd(year, quarter * 3 - 2, 1)?;
        let (qy, qm) = next_month(year, quarter * 3);
        let first_after_quarter = ymd(qy, qm, 1)?;

        let first_of_year = ymd(year, 1, 1)?;
        let last_of_year = ymd(year, 12, 31)?;

        let from_sunday = date.weekday().num_days_from_sunday();
        let first_of_week = date - Duration::days(i64::from(from_sunday));
        let iso = date.iso_week();

        Ok(Self {
            the_date: date,
            the_day: day as i32,
            the_day_suffix: day_suffix(day),
            the_day_name: date.format("%A").to_string(),
            the_day_of_week: from_sunday as i32 + 1,
            the_day_of_week_in_month: ((day - 1) / 7 + 1) as i32,
            the_day_of_year: date.ordinal() as i32,
            is_weekend: matches!(date.weekday(), Weekday::Sat | Weekday::Sun),
            the_week: sunday_week(date) as i32,
            the_iso_week: iso.week() as i32,
            the_first_of_week: first_of_week,
            the_last_of_week: first_of_week + Duration::days(6),
            the_week_of_month: ((day - 1 + first_of_month.weekday().num_days_from_sunday()) / 7
                + 1) as i32,
            the_month: month as i32,
            the_month_name: date.format("%B").to_string(),
            the_first_of_month: first_of_month,
            the_last_of_month: day_before(first_of_next_month)?,
            the_first_of_next_month: first_of_next_month,
            the_last_of_next_month: day_before(first_of_month_after)?,
            the_quarter: quarter as i32,
            the_first_of_quarter: first_of_quarter,
            the_last_of_quarter: day_before(first_after_quarter)?,
            the_year: year,
            the_iso_year: iso.year(),
            the_first_of_year: first_of_year,
            the_last_of_year: last_of_year,
            is_leap_year: is_leap_year(year),
            has_53_weeks: sunday_week(last_of_year) == 53,
            has_53_iso_weeks: ymd(year, 12, 28)?.iso_week().week() == 53,
            mmyyyy: date.format("%m%Y").to_string(),
            style101: date.format("%m/%d/%Y").to_string(),
            style103: date.format("%d/%m/%Y").to_string(),
            style112: date.format("%Y%m%d").to_string(),
            style120: date.format("%Y-%m-%d").to_string(),
        })
    }

    /// Values in `date_dimension` column order.
    pub fn into_values(self) -> Vec<SqlValue<'static>> {
        vec![
            SqlValue::Date(self.the_date),
            SqlValue::I32(self.the_day),
            SqlValue::text_owned(self.the_day_suffix.to_string()),
            SqlValue::text_owned(self.the_day_name),
            SqlValue::I32(self.the_day_of_week),
            SqlValue::I32(self.the_day_of_week_in_month),
            SqlValue::I32(self.the_day_of_year),
            SqlValue::I32(i32::from(self.is_weekend)),
            SqlValue::I32(self.the_week),
            SqlValue::I32(self.the_iso_week),
            SqlValue::Date(self.the_first_of_week),
            SqlValue::Date(self.the_last_of_week),
            SqlValue::I32(self.the_week_of_month),
            SqlValue::I32(self.the_month),
            SqlValue::text_owned(self.the_month_name),
            SqlValue::Date(self.the_first_of_month),
            SqlValue::Date(self.the_last_of_month),
            SqlValue::Date(self.the_first_of_next_month),
            SqlValue::Date(self.the_last_of_next_month),
            SqlValue::I32(self.the_quarter),
            SqlValue::Date(self.the_first_of_quarter),
            SqlValue::Date(self.the_last_of_quarter),
            SqlValue::I32(self.the_year),
            SqlValue::I32(self.the_iso_year),
            SqlValue::Date(self.the_first_of_year),
            SqlValue::Date(self.the_last_of_year),
            SqlValue::Bool(self.is_leap_year),
            SqlValue::I32(i32::from(self.has_53_weeks)),
            SqlValue::I32(i32::from(self.has_53_iso_weeks)),
            SqlValue::text_owned(self.mmyyyy),
            SqlValue::text_owned(self.style101),
            SqlValue::text_owned(self.style103),
            SqlValue::text_owned(self.style112),
            SqlValue::text_owned(self.style120),
        ]
    }
}

/// One day per date in `[start, start + horizon_days]`, in order.
pub fn build_calendar(start: NaiveDate, horizon_days: u32) -> Result<Vec<CalendarDay>> {
    let end = start
        .checked_add_signed(Duration::days(i64::from(horizon_days)))
        .ok_or_else(|| {
            SyncError::Config(format!(
                "calendar horizon of {} days from {} is out of range",
                horizon_days, start
            ))
        })?;

    let days = start
        .iter_days()
        .take_while(|d| *d <= end)
        .map(CalendarDay::from_date)
        .collect::<Result<Vec<_>>>()?;

    debug!("Built {} calendar days from {} to {}", days.len(), start, end);
    Ok(days)
}

/// [`build_calendar`] as rows for the `date_dimension` table.
pub fn build_calendar_rows(
    start: NaiveDate,
    horizon_days: u32,
) -> Result<Vec<NormalizedRow<'static>>> {
    Ok(build_calendar(start, horizon_days)?
        .into_iter()
        .map(|day| NormalizedRow::from_values(day.into_values()))
        .collect())
}

/// Gregorian leap year: divisible by 4, except centuries not divisible by 400.
pub fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

/// English ordinal suffix for a day of the month.
pub fn day_suffix(day: u32) -> &'static str {
    if (11..=13).contains(&(day % 100)) {
        return "th";
    }
    match day % 10 {
        1 => "st",
        2 => "nd",
        3 => "rd",
        _ => "th",
    }
}

/// Sunday-start week number; the week holding 1 January is week 1.
fn sunday_week(date: NaiveDate) -> u32 {
    let jan1_offset = date
        .with_ordinal(1)
        .map(|d| d.weekday().num_days_from_sunday())
        .unwrap_or(0);
    (date.ordinal0() + jan1_offset) / 7 + 1
}

fn next_month(year: i32, month: u32) -> (i32, u32) {
    if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    }
}

fn ymd(year: i32, month: u32, day: u32) -> Result<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, day).ok_or_else(|| {
        SyncError::Config(format!(
            "calendar date {:04}-{:02}-{:02} is out of range",
            year, month, day
        ))
    })
}

fn day_before(date: NaiveDate) -> Result<NaiveDate> {
    date.pred_opt()
        .ok_or_else(|| SyncError::Config(format!("no day before {}", date)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tables;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn day(y: i32, m: u32, d: u32) -> CalendarDay {
        CalendarDay::from_date(date(y, m, d)).unwrap()
    }

    #[test]
    fn test_range_is_inclusive() {
        let days = build_calendar(date(2020, 1, 1), 365).unwrap();
        assert_eq!(days.len(), 366);
        assert_eq!(days[0].the_date, date(2020, 1, 1));
        assert_eq!(days[365].the_date, date(2020, 12, 31));
        assert!(build_calendar(date(2020, 1, 1), 0).unwrap().len() == 1);
    }

    #[test]
    fn test_leap_day() {
        let days = build_calendar(date(2020, 1, 1), 365).unwrap();
        let leap = days.iter().find(|d| d.the_date == date(2020, 2, 29)).unwrap();
        assert!(leap.is_leap_year);
        assert_eq!(leap.the_last_of_month, date(2020, 2, 29));
        assert_eq!(leap.the_day_of_year, 60);
    }

    #[test]
    fn test_leap_year_rule() {
        assert!(is_leap_year(2000));
        assert!(!is_leap_year(1900));
        assert!(!is_leap_year(2100));
        assert!(is_leap_year(2024));
        assert!(!is_leap_year(2023));
    }

    #[test]
    fn test_iso_year_boundary() {
        let d = day(2019, 12, 31);
        assert_eq!(d.the_year, 2019);
        assert_eq!(d.the_iso_year, 2020);
        assert_eq!(d.the_iso_week, 1);

        let d = day(2020, 1, 1);
        assert_eq!(d.the_iso_week, 1);
        assert_eq!(d.the_iso_year, 2020);

        // Friday 1 January 2021 still belongs to ISO week 53 of 2020.
        let d = day(2021, 1, 1);
        assert_eq!(d.the_iso_year, 2020);
        assert_eq!(d.the_iso_week, 53);
    }

    #[test]
    fn test_sunday_weeks() {
        // 2020-01-01 is a Wednesday; the following Sunday opens week 2.
        assert_eq!(day(2020, 1, 1).the_week, 1);
        assert_eq!(day(2020, 1, 4).the_week, 1);
        assert_eq!(day(2020, 1, 5).the_week, 2);
        assert_eq!(day(2020, 1, 5).the_day_of_week, 1);
        assert_eq!(day(2020, 1, 4).the_day_of_week, 7);
    }

    #[test]
    fn test_has_53_weeks_per_numbering() {
        assert!(day(2020, 6, 1).has_53_weeks);
        assert!(day(2020, 6, 1).has_53_iso_weeks);
        assert!(day(2021, 6, 1).has_53_weeks);
        assert!(!day(2021, 6, 1).has_53_iso_weeks);
        // Leap year starting on Saturday spans 54 Sunday-start weeks.
        assert_eq!(day(2000, 12, 31).the_week, 54);
        assert!(!day(2000, 6, 1).has_53_weeks);
        assert!(!day(2000, 6, 1).has_53_iso_weeks);
    }

    #[test]
    fn test_day_suffix() {
        let cases = [
            (1, "st"),
            (2, "nd"),
            (3, "rd"),
            (4, "th"),
            (11, "th"),
            (12, "th"),
            (13, "th"),
            (21, "st"),
            (22, "nd"),
            (23, "rd"),
            (30, "th"),
            (31, "st"),
        ];
        for (d, suffix) in cases {
            assert_eq!(day_suffix(d), suffix, "day {}", d);
        }
    }

    #[test]
    fn test_boundaries() {
        let d = day(2021, 11, 17);
        assert_eq!(d.the_first_of_week, date(2021, 11, 14));
        assert_eq!(d.the_last_of_week, date(2021, 11, 20));
        assert_eq!(d.the_first_of_month, date(2021, 11, 1));
        assert_eq!(d.the_last_of_month, date(2021, 11, 30));
        assert_eq!(d.the_first_of_next_month, date(2021, 12, 1));
        assert_eq!(d.the_last_of_next_month, date(2021, 12, 31));
        assert_eq!(d.the_quarter, 4);
        assert_eq!(d.the_first_of_quarter, date(2021, 10, 1));
        assert_eq!(d.the_last_of_quarter, date(2021, 12, 31));
        assert_eq!(d.the_day_of_week_in_month, 3);
        assert_eq!(d.the_week_of_month, 3);

        let d = day(2021, 12, 15);
        assert_eq!(d.the_first_of_next_month, date(2022, 1, 1));
        assert_eq!(d.the_last_of_next_month, date(2022, 1, 31));
    }

    #[test]
    fn test_names_and_formats() {
        let d = day(2021, 3, 7);
        assert_eq!(d.the_day_name, "Sunday");
        assert_eq!(d.the_month_name, "March");
        assert!(d.is_weekend);
        assert_eq!(d.mmyyyy, "032021");
        assert_eq!(d.style101, "03/07/2021");
        assert_eq!(d.style103, "07/03/2021");
        assert_eq!(d.style112, "20210307");
        assert_eq!(d.style120, "2021-03-07");
        assert!(!day(2021, 3, 8).is_weekend);
    }

    #[test]
    fn test_rows_match_table_schema() {
        let schema = tables::date_dimension();
        let rows = build_calendar_rows(date(2020, 2, 29), 0).unwrap();
        let row = &rows[0];
        assert_eq!(row.len(), schema.columns.len());

        let get = |name: &str| row.get(schema.column_index(name).unwrap()).unwrap().clone();
        assert_eq!(get("TheDate"), SqlValue::Date(date(2020, 2, 29)));
        assert_eq!(get("TheDaySuffix"), SqlValue::text_owned("th".into()));
        assert_eq!(get("IsWeekend"), SqlValue::I32(1));
        assert_eq!(get("IsLeapYear"), SqlValue::Bool(true));
        assert_eq!(get("TheLastOfYear"), SqlValue::Date(date(2020, 12, 31)));
        assert_eq!(get("Style120"), SqlValue::text_owned("2020-02-29".into()));
    }

    #[test]
    fn test_deterministic() {
        let a = build_calendar(date(1999, 12, 25), 20).unwrap();
        let b = build_calendar(date(1999, 12, 25), 20).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_out_of_range_horizon() {
        assert!(build_calendar(NaiveDate::MAX, 1).is_err());
    }
}
