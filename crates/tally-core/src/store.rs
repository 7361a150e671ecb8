//! The `IndicatorStore` trait and supporting query types.
//!
//! The trait is implemented by storage backends (e.g.
//! `tally-store-sqlite`). Higher layers (`tally-api`, `tally-ingest`)
//! depend on this abstraction, not on any concrete backend.

use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::{
  element::{
    CategoryCombo, DataElement, ElementMeta, NewDataElement, NewDataValue,
    SourceDocument,
  },
  org::OrgUnit,
  period::{Granularity, PeriodSpan},
  rules::{NewValidationRule, ValidationRule},
};

// ─── Query types ─────────────────────────────────────────────────────────────

/// Parameters for [`IndicatorStore::pivot`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PivotRequest {
  /// Element names or aliases (matched case-insensitively).
  pub elements:    Vec<String>,
  /// Output org level; defaults to the coarsest level among the elements.
  pub org_level:   Option<u32>,
  /// Period tokens; consulted when elements need period fan-out and for
  /// the calculation-stage filter.
  pub periods:     Vec<String>,
  /// Output granularity; defaults to the finest among the elements.
  pub granularity: Option<Granularity>,
}

/// One derived column for [`IndicatorStore::calculation`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalculationSpec {
  /// Arithmetic over pivot column identifiers (`de_{id}`).
  pub expr:   String,
  /// Columns that must be nonzero for the expression to evaluate;
  /// otherwise the result is NULL.
  #[serde(default)]
  pub guards: Vec<String>,
}

/// Parameters for [`IndicatorStore::calculation`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalculationRequest {
  pub expressions: Vec<CalculationSpec>,
  pub elements:    Vec<String>,
  pub periods:     Vec<String>,
}

// ─── Result types ────────────────────────────────────────────────────────────

/// One cell of a dynamically-shaped result set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
  Null,
  Number(f64),
  Text(String),
}

/// A dynamically-shaped query result: pivot and calculation queries
/// produce a different column set per request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultSet {
  pub columns: Vec<String>,
  pub rows:    Vec<Vec<CellValue>>,
}

/// One fact row refused during bulk insertion, with the reason.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectedValue {
  pub element_id:  i64,
  pub org_unit_id: i64,
  pub period:      PeriodSpan,
  pub reason:      String,
}

/// Outcome of one bulk insertion: how many rows landed, and which were
/// rejected (duplicate coordinates are reported here, never silently
/// overwritten and never aborting the batch).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestOutcome {
  pub inserted: usize,
  pub rejected: Vec<RejectedValue>,
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over a Tally storage backend.
///
/// All methods return `Send` futures so the trait can be used in
/// multi-threaded async runtimes (tokio with `axum`).
pub trait IndicatorStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Elements ──────────────────────────────────────────────────────────

  /// Create a data element, enforcing the shared name/alias namespace.
  fn create_element(
    &self,
    input: NewDataElement,
  ) -> impl Future<Output = Result<DataElement, Self::Error>> + Send + '_;

  fn list_elements(
    &self,
  ) -> impl Future<Output = Result<Vec<DataElement>, Self::Error>> + Send + '_;

  /// Look up an element by name or alias, case-insensitively.
  fn find_element(
    &self,
    name: String,
  ) -> impl Future<Output = Result<Option<DataElement>, Self::Error>> + Send + '_;

  /// Get-or-create by name — what spreadsheet ingestion uses for each
  /// column header's element.
  fn ensure_element(
    &self,
    name: String,
  ) -> impl Future<Output = Result<DataElement, Self::Error>> + Send + '_;

  // ── Categories ────────────────────────────────────────────────────────

  /// Get-or-create the combo for a set of category names (empty set
  /// yields the fixed default combo). Order-independent.
  fn ensure_category_combo(
    &self,
    categories: Vec<String>,
  ) -> impl Future<Output = Result<CategoryCombo, Self::Error>> + Send + '_;

  // ── Org units ─────────────────────────────────────────────────────────

  /// Walk/create the hierarchy root-to-leaf, short-circuiting at the
  /// first blank segment. Returns the deepest node, or `None` for an
  /// empty path. Idempotent.
  fn resolve_org_path(
    &self,
    parts: Vec<String>,
  ) -> impl Future<Output = Result<Option<OrgUnit>, Self::Error>> + Send + '_;

  // ── Facts ─────────────────────────────────────────────────────────────

  fn create_source_document(
    &self,
    orig_filename: String,
  ) -> impl Future<Output = Result<SourceDocument, Self::Error>> + Send + '_;

  /// All ingested documents, newest first.
  fn list_source_documents(
    &self,
  ) -> impl Future<Output = Result<Vec<SourceDocument>, Self::Error>> + Send + '_;

  /// Bulk-insert fact rows in one transaction; duplicate coordinates are
  /// rejected per row and reported in the outcome.
  fn insert_values(
    &self,
    values: Vec<NewDataValue>,
  ) -> impl Future<Output = Result<IngestOutcome, Self::Error>> + Send + '_;

  // ── Reporting ─────────────────────────────────────────────────────────

  /// Resolve element names/aliases to metadata (org level + granularity
  /// over stored facts). Elements with no facts are omitted; ordering is
  /// ascending by name then id.
  fn element_meta(
    &self,
    names: Vec<String>,
  ) -> impl Future<Output = Result<Vec<ElementMeta>, Self::Error>> + Send + '_;

  fn pivot(
    &self,
    request: PivotRequest,
  ) -> impl Future<Output = Result<ResultSet, Self::Error>> + Send + '_;

  fn calculation(
    &self,
    request: CalculationRequest,
  ) -> impl Future<Output = Result<ResultSet, Self::Error>> + Send + '_;

  // ── Validation rules ──────────────────────────────────────────────────

  /// Upsert a rule by name, relink its referenced elements, and
  /// regenerate its backing view — all in one transaction.
  fn save_rule(
    &self,
    input: NewValidationRule,
  ) -> impl Future<Output = Result<ValidationRule, Self::Error>> + Send + '_;

  fn list_rules(
    &self,
  ) -> impl Future<Output = Result<Vec<ValidationRule>, Self::Error>> + Send + '_;

  fn get_rule(
    &self,
    id: i64,
  ) -> impl Future<Output = Result<Option<ValidationRule>, Self::Error>> + Send + '_;

  /// Query a rule's backing view: one row per hierarchy + period
  /// combination, with the element columns and the comparison result.
  fn rule_results(
    &self,
    id: i64,
  ) -> impl Future<Output = Result<ResultSet, Self::Error>> + Send + '_;
}
