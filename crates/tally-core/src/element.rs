//! Data elements, disaggregation categories and fact values.
//!
//! A data element is one named indicator (e.g. an HIV-testing count). A
//! category combo is an order-independent set of disaggregation values
//! ("Male", "<15 Years") identified by a canonical name built from the
//! sorted category names. A [`NewDataValue`] is one fact: element × combo
//! × org unit × reporting period.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::period::{Granularity, PeriodSpan};

// ─── Value types ─────────────────────────────────────────────────────────────

/// The value domain of a data element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
  Number,
  Integer,
  PositiveInteger,
}

impl ValueType {
  /// The discriminant string stored in the `value_type` column.
  pub fn discriminant(self) -> &'static str {
    match self {
      Self::Number => "number",
      Self::Integer => "integer",
      Self::PositiveInteger => "positive_integer",
    }
  }

  pub fn from_discriminant(s: &str) -> Option<Self> {
    match s {
      "number" => Some(Self::Number),
      "integer" => Some(Self::Integer),
      "positive_integer" => Some(Self::PositiveInteger),
      _ => None,
    }
  }
}

/// How fact values aggregate across category combos and periods.
/// Only summation is supported; averages would need a companion
/// population element to weight by.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum AggregationMethod {
  #[default]
  Sum,
}

impl AggregationMethod {
  pub fn discriminant(self) -> &'static str {
    match self {
      Self::Sum => "sum",
    }
  }

  pub fn from_discriminant(s: &str) -> Option<Self> {
    match s {
      "sum" => Some(Self::Sum),
      _ => None,
    }
  }
}

// ─── Data elements ───────────────────────────────────────────────────────────

/// A named indicator.
///
/// `name` and `alias` occupy one shared case-insensitive namespace: no
/// element's name may equal another's alias and vice versa. The store
/// enforces this at save time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataElement {
  pub id:                 i64,
  pub name:               String,
  pub alias:              Option<String>,
  pub value_type:         ValueType,
  pub value_min:          Option<f64>,
  pub value_max:          Option<f64>,
  pub aggregation_method: AggregationMethod,
}

/// Input to [`crate::store::IndicatorStore::create_element`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDataElement {
  pub name:               String,
  pub alias:              Option<String>,
  pub value_type:         ValueType,
  pub value_min:          Option<f64>,
  pub value_max:          Option<f64>,
  pub aggregation_method: AggregationMethod,
}

impl NewDataElement {
  /// Convenience constructor matching what spreadsheet ingestion creates:
  /// an unbounded summed number.
  pub fn named(name: impl Into<String>) -> Self {
    Self {
      name:               name.into(),
      alias:              None,
      value_type:         ValueType::Number,
      value_min:          None,
      value_max:          None,
      aggregation_method: AggregationMethod::Sum,
    }
  }
}

// ─── Categories ──────────────────────────────────────────────────────────────

/// An atomic disaggregation dimension value, e.g. "Male" or "<15 Years".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
  pub id:   i64,
  pub name: String,
}

/// An immutable, order-independent set of categories, identified by the
/// canonical name produced by [`combo_name`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryCombo {
  pub id:   i64,
  pub name: String,
}

/// Canonical name of the combo holding no categories at all.
pub const DEFAULT_COMBO_NAME: &str = "(default)";

/// Canonical combo name: the sorted category names, comma-joined and
/// parenthesised, so `["Male", "15+"]` and `["15+", "Male"]` produce the
/// same combo.
pub fn combo_name(category_names: &[String]) -> String {
  if category_names.is_empty() {
    return DEFAULT_COMBO_NAME.to_owned();
  }
  let mut sorted: Vec<&str> =
    category_names.iter().map(String::as_str).collect();
  sorted.sort_unstable();
  format!("({})", sorted.join(", "))
}

// ─── Source documents ────────────────────────────────────────────────────────

/// Provenance record for one ingested spreadsheet; every fact row points
/// at the document it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDocument {
  pub doc_id:        Uuid,
  pub orig_filename: String,
  pub uploaded_at:   DateTime<Utc>,
}

// ─── Fact values ─────────────────────────────────────────────────────────────

/// One fact row awaiting insertion. At most one fact may exist per exact
/// (element, combo, org unit, year, quarter, month) coordinate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDataValue {
  pub element_id:    i64,
  pub combo_id:      i64,
  pub org_unit_id:   i64,
  pub period:        PeriodSpan,
  pub numeric_value: f64,
  pub doc_id:        Uuid,
}

// ─── Derived metadata ────────────────────────────────────────────────────────

/// Read-only projection of a data element used during query synthesis:
/// the coarsest org level and the finest period granularity at which it
/// has been recorded. Elements with no facts have no metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementMeta {
  pub id:          i64,
  pub name:        String,
  pub alias:       Option<String>,
  pub ou_level:    u32,
  pub granularity: Granularity,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn combo_name_is_order_independent() {
    let a = combo_name(&["Male".into(), "15+".into()]);
    let b = combo_name(&["15+".into(), "Male".into()]);
    assert_eq!(a, b);
    assert_eq!(a, "(15+, Male)");
  }

  #[test]
  fn empty_combo_is_default() {
    assert_eq!(combo_name(&[]), DEFAULT_COMBO_NAME);
  }

  #[test]
  fn value_type_discriminant_roundtrip() {
    for vt in
      [ValueType::Number, ValueType::Integer, ValueType::PositiveInteger]
    {
      assert_eq!(ValueType::from_discriminant(vt.discriminant()), Some(vt));
    }
    assert_eq!(ValueType::from_discriminant("percent"), None);
  }
}
