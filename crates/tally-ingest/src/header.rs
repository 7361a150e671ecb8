//! Column-header parsing for data sheets.
//!
//! A header cell names one data element, optionally prefixed with the
//! reporting month ("January 2016 ...") and optionally suffixed with
//! disaggregation categories ("... Male, <15"). The category vocabulary is
//! fixed and matched case-sensitively against a trailing run of tokens;
//! category-like words in the middle of a name never split it.

use std::sync::LazyLock;

use regex::Regex;

use tally_core::period::MONTH_NAMES;

/// The known disaggregation categories, in matching priority order:
/// earlier entries win where one is a prefix of another ("Lost  to
/// Followup" before "Lost").
pub const CATEGORIES: [&str; 35] = [
  "Male",
  "Female",
  "18 Mths-<5 Years",
  "5-<10 Years",
  "10-<15 Years",
  "15-<19 Years",
  "19-<49 Years",
  ">49 Years",
  "10-19 Years",
  "20-24 Years",
  ">=25 Years",
  "<2 Years",
  "2 - < 5 Years (HIV Care)",
  "5 - 14 Years",
  "< 15 Years",
  "15 Years and above",
  // ART quarterly cohort analysis
  "Alive on ART in Cohort",
  "Died",
  "Lost  to Followup",
  "Lost",
  "Started on ART-Cohort",
  "Stopped",
  "Transfered In",
  "Transferred Out",
  // OPD age bands
  "0-28 Days",
  "29 Days-4 Years",
  "5-59 Years",
  "60andAbove Years",
  // VMMC age bands
  "2<5 Years",
  "5-<15 Years",
  "15-49 Years",
  // Laboratory age bands
  "Under 5 years",
  "5 years and above",
  "<15",
  "15+",
];

/// Element names that legitimately contain "Male" and must not lose it to
/// the sex categories.
const SEX_AMBIGUOUS: [&str; 2] = ["Number of Male", "Male partners"];

fn category_pattern(categories: &[&str]) -> Regex {
  let alternation = categories
    .iter()
    .map(|c| regex::escape(c))
    .collect::<Vec<_>>()
    .join("|");
  Regex::new(&format!(r"(?:[\s,]+)?({alternation})")).expect("valid regex")
}

static CATEGORY_RE: LazyLock<Regex> =
  LazyLock::new(|| category_pattern(&CATEGORIES));

static SEXLESS_CATEGORY_RE: LazyLock<Regex> =
  LazyLock::new(|| category_pattern(&CATEGORIES[2..]));

static MONTH_PREFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
  let months = MONTH_NAMES.join("|");
  Regex::new(&format!(r"^\s*(?:{months}) (?:[0-9]{{4}})?\s*"))
    .expect("valid regex")
});

static TRAILING_YEAR_RE: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"\s+[0-9]{4}\s*$").expect("valid regex"));

fn is_sex_ambiguous(header: &str) -> bool {
  let upper = header.to_uppercase();
  SEX_AMBIGUOUS.iter().any(|s| upper.contains(&s.to_uppercase()))
}

fn strip_trailing_year(name: &str) -> String {
  let stripped = TRAILING_YEAR_RE.replace(name, "");
  if stripped.is_empty() {
    name.to_owned()
  } else {
    stripped.into_owned()
  }
}

/// A header cell split into its element name and category suffix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedHeader {
  pub name:       String,
  pub categories: Vec<String>,
}

/// Parse a raw header cell.
///
/// The month (and optional year) prefix is discarded; a trailing run of
/// known category tokens becomes the category list; a trailing bare year
/// on the remaining name is dropped.
pub fn parse_header(raw: &str) -> ParsedHeader {
  let cleaned = MONTH_PREFIX_RE.replace(raw, "");
  let text = cleaned.trim();

  let pattern = if is_sex_ambiguous(text) {
    &*SEXLESS_CATEGORY_RE
  } else {
    &*CATEGORY_RE
  };

  let mut found: Vec<(usize, usize, String)> = Vec::new();
  for caps in pattern.captures_iter(text) {
    let whole = caps.get(0).expect("match");
    let category = caps.get(1).expect("category group");
    found.push((whole.start(), whole.end(), category.as_str().to_owned()));
  }

  // Categories count only as an unbroken run ending the header, with a
  // non-empty name in front. Anything else is a name that happens to
  // contain category-like words.
  let trailing_run = !found.is_empty()
    && found[0].0 > 0
    && found.last().map(|(_, end, _)| *end) == Some(text.len())
    && found.windows(2).all(|w| w[0].1 == w[1].0);

  if trailing_run {
    let name = strip_trailing_year(text[..found[0].0].trim());
    let categories = found.into_iter().map(|(_, _, c)| c).collect();
    ParsedHeader { name, categories }
  } else {
    ParsedHeader { name: strip_trailing_year(text), categories: vec![] }
  }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
  use super::*;

  fn parsed(name: &str, categories: &[&str]) -> ParsedHeader {
    ParsedHeader {
      name:       name.to_owned(),
      categories: categories.iter().map(|c| (*c).to_owned()).collect(),
    }
  }

  #[test]
  fn plain_name_passes_through() {
    assert_eq!(parse_header("Tested"), parsed("Tested", &[]));
  }

  #[test]
  fn month_prefix_is_discarded() {
    assert_eq!(parse_header("January 2016 Tested"), parsed("Tested", &[]));
    assert_eq!(parse_header("October Tested"), parsed("Tested", &[]));
  }

  #[test]
  fn trailing_year_is_discarded() {
    assert_eq!(parse_header("Tested 2016"), parsed("Tested", &[]));
  }

  #[test]
  fn trailing_categories_are_extracted() {
    assert_eq!(parse_header("Tested Male"), parsed("Tested", &["Male"]));
    assert_eq!(
      parse_header("Tested, Male, <15"),
      parsed("Tested", &["Male", "<15"])
    );
  }

  #[test]
  fn longer_category_wins_over_its_prefix() {
    assert_eq!(
      parse_header("Cohort Lost  to Followup"),
      parsed("Cohort", &["Lost  to Followup"])
    );
  }

  #[test]
  fn category_words_inside_a_name_do_not_split_it() {
    // "Died" appears mid-name, so the header is one element name.
    assert_eq!(
      parse_header("Died in hospital this year"),
      parsed("Died in hospital this year", &[])
    );
  }

  #[test]
  fn sex_ambiguous_names_keep_their_male_token() {
    assert_eq!(
      parse_header("Male partners received HIV test results"),
      parsed("Male partners received HIV test results", &[])
    );
    // Sexless matching still extracts the other categories.
    assert_eq!(
      parse_header("Number of Male partners tested <15"),
      parsed("Number of Male partners tested", &["<15"])
    );
  }

  #[test]
  fn bare_category_header_is_a_name() {
    assert_eq!(parse_header("Male"), parsed("Male", &[]));
  }
}
