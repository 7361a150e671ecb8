//! Period and calendar utilities.
//!
//! Reporting periods arrive as free-text tokens of mixed granularity: bare
//! years ("2016"), year-months ("2016-10"), ISO quarters ("2016Q4",
//! "2016-Q4"), month names ("October 2016", "Oct 2016") and month ranges
//! ("Oct to Dec 2016"). [`parse_period`] normalizes each into a
//! [`PeriodSpan`] — the ISO decomposition into year/quarter/month strings,
//! with coarser fields always derivable and finer fields absent.

use std::{fmt, str::FromStr, sync::LazyLock};

use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

// ─── Granularity ─────────────────────────────────────────────────────────────

/// The reporting granularity of a period or data element.
///
/// The numeric code orders granularities finest-first (1 = month,
/// 4 = quarter, 12 = year); the smallest code observed among an element's
/// facts is its native granularity.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
  Month,
  Quarter,
  Year,
}

/// A period column of the fact table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodField {
  Year,
  Quarter,
  Month,
}

impl PeriodField {
  pub fn column_name(self) -> &'static str {
    match self {
      Self::Year => "year",
      Self::Quarter => "quarter",
      Self::Month => "month",
    }
  }
}

impl Granularity {
  /// The granularity code stored alongside element metadata.
  pub fn code(self) -> u32 {
    match self {
      Self::Month => 1,
      Self::Quarter => 4,
      Self::Year => 12,
    }
  }

  pub fn from_code(code: u32) -> Option<Self> {
    match code {
      1 => Some(Self::Month),
      4 => Some(Self::Quarter),
      12 => Some(Self::Year),
      _ => None,
    }
  }

  /// The fact-table period columns needed to select or group at this
  /// granularity, coarsest first.
  pub fn fields(self) -> &'static [PeriodField] {
    match self {
      Self::Year => &[PeriodField::Year],
      Self::Quarter => &[PeriodField::Year, PeriodField::Quarter],
      Self::Month => {
        &[PeriodField::Year, PeriodField::Quarter, PeriodField::Month]
      }
    }
  }

  /// How many periods of this granularity fit in one year.
  pub fn periods_per_year(self) -> u32 {
    match self {
      Self::Month => 12,
      Self::Quarter => 4,
      Self::Year => 1,
    }
  }

  pub fn is_coarser_than(self, other: Granularity) -> bool {
    self.code() > other.code()
  }

  /// How many `finer` periods one period of this granularity contains
  /// (a year holds 4 quarters or 12 months; a quarter holds 3 months).
  /// `None` when `finer` is not strictly finer.
  pub fn subdivisions(self, finer: Granularity) -> Option<u32> {
    if self.is_coarser_than(finer) {
      Some(finer.periods_per_year() / self.periods_per_year())
    } else {
      None
    }
  }
}

// ─── Quarter ─────────────────────────────────────────────────────────────────

/// A calendar quarter, parsed from `YYYYQN` or `YYYY-QN`.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Quarter {
  pub year:   i32,
  pub number: u8,
}

static QUARTER_RE: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"^(\d{4})-?Q([1-4])$").expect("valid regex"));

impl FromStr for Quarter {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    let caps = QUARTER_RE
      .captures(s.trim())
      .ok_or_else(|| Error::QuarterFormat(s.to_owned()))?;
    // Capture groups are constrained by the pattern; parsing cannot fail.
    let year = caps[1].parse().map_err(|_| Error::QuarterFormat(s.into()))?;
    let number = caps[2].parse().map_err(|_| Error::QuarterFormat(s.into()))?;
    Ok(Self { year, number })
  }
}

impl fmt::Display for Quarter {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}-Q{}", self.year, self.number)
  }
}

impl Quarter {
  /// The quarter following this one; Q4 of year Y rolls over to Q1 of Y+1.
  pub fn next(self) -> Quarter {
    Quarter {
      year:   self.year + i32::from(self.number) / 4,
      number: self.number % 4 + 1,
    }
  }

  pub fn start_date(self) -> NaiveDate {
    // number is always 1..=4, so the month is a valid 1, 4, 7 or 10.
    NaiveDate::from_ymd_opt(
      self.year,
      (u32::from(self.number) - 1) * 3 + 1,
      1,
    )
    .expect("valid quarter start")
  }

  pub fn end_date(self) -> NaiveDate {
    self.next().start_date().pred_opt().expect("valid quarter end")
  }

  /// Ascending inclusive enumeration from `self` through `end`.
  pub fn iter_until(self, end: Quarter) -> impl Iterator<Item = Quarter> {
    std::iter::successors(Some(self), |q| Some(q.next()))
      .take_while(move |q| *q <= end)
  }
}

/// Enumerate the quarters between two ISO quarter strings, inclusive.
///
/// When `start` is not strictly before `end`, returns just the two boundary
/// tokens unchanged — range pickers feed this unvalidated input and expect
/// a usable (if degenerate) result rather than an error.
pub fn quarter_range(start: &str, end: &str) -> Result<Vec<String>> {
  let s: Quarter = start.parse()?;
  let e: Quarter = end.parse()?;

  if s < e {
    Ok(s.iter_until(e).map(|q| q.to_string()).collect())
  } else {
    Ok(vec![start.to_owned(), end.to_owned()])
  }
}

// ─── PeriodSpan ──────────────────────────────────────────────────────────────

/// The ISO decomposition of a period token.
///
/// `year` is always present; `quarter` and `month` are populated down to
/// the token's native granularity ("2016-10" yields all three, "2016-Q4"
/// yields year and quarter, "2016" yields the year alone).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodSpan {
  pub year:    String,
  pub quarter: Option<String>,
  pub month:   Option<String>,
}

impl PeriodSpan {
  fn from_ym(year: i32, month: u32, granularity: Granularity) -> Self {
    let quarter = (month - 1) / 3 + 1;
    Self {
      year:    format!("{year}"),
      quarter: (granularity <= Granularity::Quarter)
        .then(|| format!("{year}-Q{quarter}")),
      month:   (granularity == Granularity::Month)
        .then(|| format!("{year}-{month:02}")),
    }
  }

  pub fn granularity(&self) -> Granularity {
    if self.month.is_some() {
      Granularity::Month
    } else if self.quarter.is_some() {
      Granularity::Quarter
    } else {
      Granularity::Year
    }
  }

  /// The ISO string for one period column, if this span carries it.
  pub fn value_for(&self, field: PeriodField) -> Option<&str> {
    match field {
      PeriodField::Year => Some(&self.year),
      PeriodField::Quarter => self.quarter.as_deref(),
      PeriodField::Month => self.month.as_deref(),
    }
  }

  /// The populated (field, value) pairs, coarsest first.
  pub fn values(&self) -> Vec<(PeriodField, &str)> {
    self
      .granularity()
      .fields()
      .iter()
      .filter_map(|f| self.value_for(*f).map(|v| (*f, v)))
      .collect()
  }
}

// ─── Parsing ─────────────────────────────────────────────────────────────────

pub const MONTH_NAMES: [&str; 12] = [
  "January",
  "February",
  "March",
  "April",
  "May",
  "June",
  "July",
  "August",
  "September",
  "October",
  "November",
  "December",
];

pub const MONTH_ABBRS: [&str; 12] = [
  "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct",
  "Nov", "Dec",
];

fn month_number(name: &str) -> Option<u32> {
  MONTH_NAMES
    .iter()
    .position(|m| m.eq_ignore_ascii_case(name))
    .or_else(|| {
      MONTH_ABBRS.iter().position(|m| m.eq_ignore_ascii_case(name))
    })
    .map(|i| i as u32 + 1)
}

fn month_alternation() -> String {
  // Full names first so "June" is not consumed as "Jun" + trailing "e".
  let mut parts: Vec<&str> = MONTH_NAMES.to_vec();
  parts.extend(MONTH_ABBRS);
  parts.join("|")
}

static MONTH_RANGE_RE: LazyLock<Regex> = LazyLock::new(|| {
  let months = month_alternation();
  Regex::new(&format!(r"(?i)^({months})\s+to\s+({months})\s*(\d{{4}})$"))
    .expect("valid regex")
});

static MONTH_YEAR_RE: LazyLock<Regex> = LazyLock::new(|| {
  let months = month_alternation();
  Regex::new(&format!(r"(?i)^({months})\s*(\d{{4}})$")).expect("valid regex")
});

static YEAR_MONTH_RE: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r"^(\d{4})(?:-(\d{2}))?$").expect("valid regex")
});

/// Parse a free-text period token into its ISO decomposition.
///
/// Malformed tokens fail with [`Error::PeriodFormat`] naming the input;
/// nothing is silently coerced.
pub fn parse_period(token: &str) -> Result<PeriodSpan> {
  let token = token.trim();
  let fail = || Error::PeriodFormat(token.to_owned());

  // "Oct to Dec 2016" — a month range covering one quarter; the start
  // month fixes the quarter and the span carries no month field.
  if let Some(caps) = MONTH_RANGE_RE.captures(token) {
    let month = month_number(&caps[1]).ok_or_else(fail)?;
    let year: i32 = caps[3].parse().map_err(|_| fail())?;
    return Ok(PeriodSpan::from_ym(year, month, Granularity::Quarter));
  }

  // "October 2016" / "Oct 2016"
  if let Some(caps) = MONTH_YEAR_RE.captures(token) {
    let month = month_number(&caps[1]).ok_or_else(fail)?;
    let year: i32 = caps[2].parse().map_err(|_| fail())?;
    return Ok(PeriodSpan::from_ym(year, month, Granularity::Month));
  }

  // "2016Q4" / "2016-Q4"
  if let Ok(q) = token.parse::<Quarter>() {
    let month = (u32::from(q.number) - 1) * 3 + 1;
    return Ok(PeriodSpan::from_ym(q.year, month, Granularity::Quarter));
  }

  // "2016" / "2016-10"
  if let Some(caps) = YEAR_MONTH_RE.captures(token) {
    let year: i32 = caps[1].parse().map_err(|_| fail())?;
    return match caps.get(2) {
      Some(m) => {
        let month: u32 = m.as_str().parse().map_err(|_| fail())?;
        if !(1..=12).contains(&month) {
          return Err(fail());
        }
        Ok(PeriodSpan::from_ym(year, month, Granularity::Month))
      }
      None => Ok(PeriodSpan::from_ym(year, 1, Granularity::Year)),
    };
  }

  Err(fail())
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn quarter_parse_both_iso_forms() {
    let a: Quarter = "2016Q3".parse().unwrap();
    let b: Quarter = "2016-Q3".parse().unwrap();
    assert_eq!(a, b);
    assert_eq!(a, Quarter { year: 2016, number: 3 });
  }

  #[test]
  fn quarter_parse_rejects_bad_tokens() {
    for bad in ["2016Q0", "2016Q5", "Q3", "2016", "2016-q3x"] {
      let err = bad.parse::<Quarter>().unwrap_err();
      assert!(
        matches!(err, Error::QuarterFormat(ref s) if s == bad),
        "expected QuarterFormat for {bad:?}"
      );
    }
  }

  #[test]
  fn quarter_roundtrip() {
    let q: Quarter = "2014Q2".parse().unwrap();
    assert_eq!(q.to_string(), "2014-Q2");
    assert_eq!(q.to_string().parse::<Quarter>().unwrap(), q);
  }

  #[test]
  fn quarter_next_rolls_over_year() {
    let q4 = Quarter { year: 2015, number: 4 };
    assert_eq!(q4.next(), Quarter { year: 2016, number: 1 });
    for n in 1..=3 {
      let q = Quarter { year: 2015, number: n };
      assert_eq!(q.next(), Quarter { year: 2015, number: n + 1 });
    }
  }

  #[test]
  fn quarter_dates() {
    let q: Quarter = "2015Q4".parse().unwrap();
    assert_eq!(q.start_date(), NaiveDate::from_ymd_opt(2015, 10, 1).unwrap());
    assert_eq!(q.end_date(), NaiveDate::from_ymd_opt(2015, 12, 31).unwrap());
  }

  #[test]
  fn quarter_range_ascending() {
    let qs = quarter_range("2015Q1", "2016Q1").unwrap();
    assert_eq!(
      qs,
      vec!["2015-Q1", "2015-Q2", "2015-Q3", "2015-Q4", "2016-Q1"]
    );
  }

  #[test]
  fn quarter_range_degenerate_keeps_boundaries() {
    let qs = quarter_range("2016Q1", "2015Q1").unwrap();
    assert_eq!(qs, vec!["2016Q1", "2015Q1"]);

    let same = quarter_range("2016Q1", "2016Q1").unwrap();
    assert_eq!(same, vec!["2016Q1", "2016Q1"]);
  }

  #[test]
  fn parse_bare_year() {
    let span = parse_period("2016").unwrap();
    assert_eq!(span.year, "2016");
    assert_eq!(span.quarter, None);
    assert_eq!(span.month, None);
    assert_eq!(span.granularity(), Granularity::Year);
  }

  #[test]
  fn parse_year_month() {
    let span = parse_period("2016-10").unwrap();
    assert_eq!(span.year, "2016");
    assert_eq!(span.quarter.as_deref(), Some("2016-Q4"));
    assert_eq!(span.month.as_deref(), Some("2016-10"));
    assert_eq!(span.granularity(), Granularity::Month);
  }

  #[test]
  fn parse_iso_quarter() {
    for token in ["2016Q4", "2016-Q4"] {
      let span = parse_period(token).unwrap();
      assert_eq!(span.year, "2016");
      assert_eq!(span.quarter.as_deref(), Some("2016-Q4"));
      assert_eq!(span.month, None);
    }
  }

  #[test]
  fn parse_month_names() {
    for token in ["October 2016", "Oct 2016", "oct 2016"] {
      let span = parse_period(token).unwrap();
      assert_eq!(span.month.as_deref(), Some("2016-10"), "token {token:?}");
      assert_eq!(span.quarter.as_deref(), Some("2016-Q4"));
    }
  }

  #[test]
  fn parse_month_range_is_quarter_granularity() {
    let span = parse_period("Oct to Dec 2016").unwrap();
    assert_eq!(span.year, "2016");
    assert_eq!(span.quarter.as_deref(), Some("2016-Q4"));
    assert_eq!(span.month, None);
  }

  #[test]
  fn parse_rejects_garbage() {
    for bad in ["", "16", "2016-13", "Octember 2016", "2016-10-01 extra"] {
      assert!(
        matches!(parse_period(bad), Err(Error::PeriodFormat(_))),
        "expected PeriodFormat for {bad:?}"
      );
    }
  }

  #[test]
  fn granularity_fields_and_codes() {
    assert_eq!(Granularity::Year.fields().len(), 1);
    assert_eq!(Granularity::Quarter.fields().len(), 2);
    assert_eq!(Granularity::Month.fields().len(), 3);
    assert_eq!(Granularity::from_code(4), Some(Granularity::Quarter));
    assert_eq!(Granularity::from_code(3), None);
  }

  #[test]
  fn subdivisions_for_rescaling() {
    assert_eq!(Granularity::Year.subdivisions(Granularity::Quarter), Some(4));
    assert_eq!(Granularity::Year.subdivisions(Granularity::Month), Some(12));
    assert_eq!(Granularity::Quarter.subdivisions(Granularity::Month), Some(3));
    assert_eq!(Granularity::Quarter.subdivisions(Granularity::Quarter), None);
    assert_eq!(Granularity::Month.subdivisions(Granularity::Year), None);
  }
}
