//! Validation rules and element-name extraction.
//!
//! A rule compares two arithmetic expressions over data-element names,
//! e.g. `"Tested HIV+" <= "Tested"`. The names are free text inside the
//! expression, so linking a rule to the elements it references is a
//! matching problem: the vocabulary of every element name and alias is
//! tried longest-first (case-insensitively) so a short name can never
//! match inside a longer one. The same matcher rewrites names to pivot
//! column identifiers before the expression reaches the SQL renderer.

use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{Error, Result, sql::element_column};

// ─── Operators ───────────────────────────────────────────────────────────────

/// The comparison operator between a rule's two expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
  Eq,
  Ne,
  Lt,
  Le,
  Gt,
  Ge,
}

impl Operator {
  pub fn as_sql(self) -> &'static str {
    match self {
      Self::Eq => "=",
      Self::Ne => "!=",
      Self::Lt => "<",
      Self::Le => "<=",
      Self::Gt => ">",
      Self::Ge => ">=",
    }
  }

  /// Parse the operator cell of a validations sheet. `==` and `<>` are
  /// accepted spellings.
  pub fn parse(s: &str) -> Result<Self> {
    match s.trim() {
      "=" | "==" => Ok(Self::Eq),
      "!=" | "<>" => Ok(Self::Ne),
      "<" => Ok(Self::Lt),
      "<=" => Ok(Self::Le),
      ">" => Ok(Self::Gt),
      ">=" => Ok(Self::Ge),
      other => Err(Error::Operator(other.to_owned())),
    }
  }
}

impl fmt::Display for Operator {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_sql())
  }
}

// ─── Rules ───────────────────────────────────────────────────────────────────

/// A persisted cross-indicator validation rule. `element_ids` is derived
/// from the expression text on every save and kept in exact sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationRule {
  pub id:          i64,
  pub name:        String,
  pub left_expr:   String,
  pub right_expr:  String,
  pub operator:    Operator,
  pub element_ids: Vec<i64>,
}

/// Input to [`crate::store::IndicatorStore::save_rule`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewValidationRule {
  pub name:       String,
  pub left_expr:  String,
  pub right_expr: String,
  pub operator:   Operator,
}

impl NewValidationRule {
  /// The rule as one comparison expression.
  pub fn expression(&self) -> String {
    format!("({}) {} ({})", self.left_expr, self.operator, self.right_expr)
  }
}

/// The database view that materializes a rule's computation. Derived
/// deterministically from the rule's id, so saving is idempotent.
pub fn view_name(rule_id: i64) -> String {
  format!("vw_validation_{rule_id}")
}

// ─── Vocabulary matching ─────────────────────────────────────────────────────

/// The set of known element names and aliases, compiled for
/// longest-first case-insensitive matching inside expression text.
pub struct ElementVocabulary {
  pattern: Option<Regex>,
  entries: Vec<(String, i64)>,
}

impl ElementVocabulary {
  /// Build from `(name_or_alias, element_id)` pairs. Longer entries sort
  /// first so the alternation prefers the longest match at any position.
  pub fn new(mut entries: Vec<(String, i64)>) -> Self {
    entries.sort_by(|(a, _), (b, _)| {
      b.len().cmp(&a.len()).then_with(|| a.cmp(b))
    });

    let pattern = if entries.is_empty() {
      None
    } else {
      let alternation = entries
        .iter()
        .map(|(name, _)| regex::escape(name))
        .collect::<Vec<_>>()
        .join("|");
      // The vocabulary is escaped, so compilation cannot fail.
      Some(
        Regex::new(&format!("(?i){alternation}")).expect("escaped pattern"),
      )
    };

    Self { pattern, entries }
  }

  fn lookup(&self, matched: &str) -> Option<i64> {
    self
      .entries
      .iter()
      .find(|(name, _)| name.eq_ignore_ascii_case(matched))
      .map(|(_, id)| *id)
  }

  /// The element ids referenced by `expr`, in match order, deduplicated.
  pub fn referenced_ids(&self, expr: &str) -> Vec<i64> {
    let Some(pattern) = &self.pattern else {
      return Vec::new();
    };
    let mut ids = Vec::new();
    for m in pattern.find_iter(expr) {
      if let Some(id) = self.lookup(m.as_str())
        && !ids.contains(&id)
      {
        ids.push(id);
      }
    }
    ids
  }

  /// Rewrite every matched name/alias in `expr` to its element's pivot
  /// column identifier. Fails with [`Error::UnparseableRule`] when no
  /// element matches at all.
  pub fn substitute(&self, expr: &str) -> Result<String> {
    let Some(pattern) = &self.pattern else {
      return Err(Error::UnparseableRule(expr.to_owned()));
    };
    if !pattern.is_match(expr) {
      return Err(Error::UnparseableRule(expr.to_owned()));
    }
    let substituted = pattern.replace_all(expr, |caps: &regex::Captures| {
      match self.lookup(&caps[0]) {
        Some(id) => element_column(id),
        // Unreachable for a well-formed vocabulary; leave the text so
        // the expression validator rejects it downstream.
        None => caps[0].to_owned(),
      }
    });
    Ok(substituted.into_owned())
  }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
  use super::*;

  fn vocab() -> ElementVocabulary {
    ElementVocabulary::new(vec![
      ("Tested".into(), 1),
      ("Tested HIV+".into(), 2),
      ("Linked".into(), 3),
    ])
  }

  #[test]
  fn operator_parsing() {
    assert_eq!(Operator::parse(" <= ").unwrap(), Operator::Le);
    assert_eq!(Operator::parse("<>").unwrap(), Operator::Ne);
    assert_eq!(Operator::parse("==").unwrap(), Operator::Eq);
    assert!(matches!(Operator::parse("~"), Err(Error::Operator(_))));
  }

  #[test]
  fn longest_name_wins() {
    // "Tested HIV+" must not decompose into "Tested" + leftovers.
    let ids = vocab().referenced_ids("Tested HIV+ * 100 / Tested");
    assert_eq!(ids, vec![2, 1]);
  }

  #[test]
  fn matching_is_case_insensitive() {
    let ids = vocab().referenced_ids("tested hiv+ <= TESTED");
    assert_eq!(ids, vec![2, 1]);
  }

  #[test]
  fn substitution_rewrites_to_columns() {
    let out = vocab().substitute("Tested HIV+ * 100 / Tested").unwrap();
    assert_eq!(out, "de_2 * 100 / de_1");
  }

  #[test]
  fn unmatched_expression_is_unparseable() {
    let err = vocab().substitute("Unknown Thing + 1").unwrap_err();
    assert!(matches!(err, Error::UnparseableRule(_)));

    let empty = ElementVocabulary::new(vec![]);
    assert!(empty.referenced_ids("Tested").is_empty());
    assert!(empty.substitute("Tested").is_err());
  }

  #[test]
  fn view_names_derive_from_rule_id() {
    assert_eq!(view_name(7), "vw_validation_7");
  }
}
