//! Spreadsheet ingestion for the Tally indicator store.
//!
//! A workbook's data sheets carry one header row (period, three location
//! columns, then one column per data element) and one row per reporting
//! site and period. A sheet named "Validations" instead carries rule
//! definitions: name, left expression, operator, right expression.
//!
//! Ingestion is resilient row by row: rows with missing or unparseable
//! periods or locations are skipped and counted, duplicate facts are
//! rejected by the store and reported, and a malformed validation rule
//! never blocks its neighbours.

pub mod error;
pub mod header;

use std::{collections::HashMap, path::Path};

use calamine::{Data, Reader as _, open_workbook_auto};
use tracing::{debug, warn};

use tally_core::{
  element::{DataElement, NewDataValue, SourceDocument},
  period::parse_period,
  rules::{NewValidationRule, Operator},
  store::{IndicatorStore, RejectedValue},
};

pub use error::{Error, Result};
pub use header::{ParsedHeader, parse_header};

#[cfg(test)]
mod tests;

/// 0-based index of the first data-element column; the preceding columns
/// are the period and the district / subcounty / facility path.
const VALUE_COLUMN_START: usize = 4;

/// Sheet name reserved for validation-rule definitions.
const VALIDATIONS_SHEET: &str = "Validations";

// ─── Options and reports ─────────────────────────────────────────────────────

pub struct IngestOptions {
  /// Root org unit prepended to every row's location path, unless the row
  /// already starts with it.
  pub root_unit:  Option<String>,
  /// Read at most this many sheets from the workbook.
  pub max_sheets: usize,
}

impl Default for IngestOptions {
  fn default() -> Self {
    Self { root_unit: None, max_sheets: 4 }
  }
}

/// What happened to one workbook's data sheets.
#[derive(Debug, Default)]
pub struct IngestReport {
  pub sheets:       usize,
  pub data_rows:    usize,
  pub inserted:     usize,
  pub rejected:     Vec<RejectedValue>,
  pub skipped_rows: usize,
  pub bad_cells:    usize,
}

/// What happened to one workbook's Validations sheet.
#[derive(Debug, Default)]
pub struct ValidationReport {
  pub saved:   usize,
  pub skipped: usize,
}

// ─── Workbook reading ────────────────────────────────────────────────────────

struct SheetData {
  name: String,
  rows: Vec<Vec<Data>>,
}

fn read_workbook(path: &Path) -> Result<Vec<SheetData>> {
  let mut workbook = open_workbook_auto(path)?;
  let names = workbook.sheet_names().to_vec();

  let mut sheets = Vec::with_capacity(names.len());
  for name in names {
    let range = workbook.worksheet_range(&name)?;
    sheets.push(SheetData {
      name,
      rows: range.rows().map(<[Data]>::to_vec).collect(),
    });
  }
  Ok(sheets)
}

fn cell_text(cell: &Data) -> Option<String> {
  match cell {
    Data::String(s) => {
      let trimmed = s.trim();
      (!trimmed.is_empty()).then(|| trimmed.to_owned())
    }
    Data::Int(i) => Some(i.to_string()),
    // Years and other whole numbers arrive as floats from xlsx.
    Data::Float(f) if f.fract() == 0.0 => Some(format!("{}", *f as i64)),
    Data::Float(f) => Some(f.to_string()),
    _ => None,
  }
}

fn cell_number(cell: &Data) -> Option<f64> {
  match cell {
    Data::Int(i) => Some(*i as f64),
    Data::Float(f) => Some(*f),
    Data::String(s) => s.trim().parse().ok(),
    _ => None,
  }
}

fn cell_is_empty(cell: &Data) -> bool {
  match cell {
    Data::Empty => true,
    Data::String(s) => s.trim().is_empty(),
    _ => false,
  }
}

// ─── Data ingestion ──────────────────────────────────────────────────────────

/// Ingest a workbook's data sheets: every fact value lands in one batch
/// (and one store transaction) attributed to a fresh source document.
pub async fn ingest_workbook<S: IndicatorStore>(
  store: &S,
  path: &Path,
  options: &IngestOptions,
) -> Result<IngestReport> {
  let sheets = read_workbook(path)?;
  let filename = path
    .file_name()
    .map(|f| f.to_string_lossy().into_owned())
    .unwrap_or_else(|| path.display().to_string());
  let doc = store
    .create_source_document(filename)
    .await
    .map_err(Error::store)?;

  ingest_sheets(store, &doc, sheets, options).await
}

async fn ingest_sheets<S: IndicatorStore>(
  store: &S,
  doc: &SourceDocument,
  sheets: Vec<SheetData>,
  options: &IngestOptions,
) -> Result<IngestReport> {
  let mut report = IngestReport::default();
  let mut batch: Vec<NewDataValue> = Vec::new();

  // Lookup caches are scoped to this run; nothing is shared across
  // ingestions.
  let mut elements: HashMap<String, DataElement> = HashMap::new();
  let mut combos: HashMap<Vec<String>, i64> = HashMap::new();
  let mut org_units: HashMap<Vec<String>, i64> = HashMap::new();

  for sheet in sheets.into_iter().take(options.max_sheets) {
    if sheet.name == VALIDATIONS_SHEET {
      continue;
    }
    let mut rows = sheet.rows.into_iter();
    let Some(header_row) = rows.next() else {
      continue;
    };
    report.sheets += 1;
    debug!(sheet = %sheet.name, "reading data sheet");

    // Resolve each header to its element and category combo up front;
    // empty header cells mark columns to ignore.
    let mut columns: Vec<Option<(i64, i64)>> = Vec::new();
    for cell in header_row.iter().skip(VALUE_COLUMN_START) {
      let Some(text) = cell_text(cell) else {
        columns.push(None);
        continue;
      };
      let parsed = parse_header(&text);

      let element_id = match elements.get(&parsed.name) {
        Some(element) => element.id,
        None => {
          let element = store
            .ensure_element(parsed.name.clone())
            .await
            .map_err(Error::store)?;
          let id = element.id;
          elements.insert(parsed.name.clone(), element);
          id
        }
      };
      let combo_id = match combos.get(&parsed.categories) {
        Some(id) => *id,
        None => {
          let combo = store
            .ensure_category_combo(parsed.categories.clone())
            .await
            .map_err(Error::store)?;
          combos.insert(parsed.categories, combo.id);
          combo.id
        }
      };
      columns.push(Some((element_id, combo_id)));
    }

    for row in rows {
      let period_text = row.first().and_then(cell_text);
      let location: Vec<String> = row
        .iter()
        .take(VALUE_COLUMN_START)
        .skip(1)
        .filter_map(cell_text)
        .collect();

      let Some(period_text) = period_text else {
        report.skipped_rows += 1;
        continue;
      };
      if location.is_empty() {
        report.skipped_rows += 1;
        continue;
      }

      let period = match parse_period(&period_text) {
        Ok(period) => period,
        Err(err) => {
          warn!(%err, period = %period_text, "skipping row with unparseable period");
          report.skipped_rows += 1;
          continue;
        }
      };

      let mut path = location;
      if let Some(root) = &options.root_unit
        && path.first() != Some(root)
      {
        path.insert(0, root.clone());
      }

      let org_unit_id = match org_units.get(&path) {
        Some(id) => *id,
        None => {
          let Some(unit) = store
            .resolve_org_path(path.clone())
            .await
            .map_err(Error::store)?
          else {
            report.skipped_rows += 1;
            continue;
          };
          org_units.insert(path, unit.org_unit_id);
          unit.org_unit_id
        }
      };

      report.data_rows += 1;

      for (column, cell) in
        columns.iter().zip(row.iter().skip(VALUE_COLUMN_START))
      {
        let Some((element_id, combo_id)) = column else {
          continue;
        };
        if cell_is_empty(cell) {
          continue;
        }
        let Some(numeric_value) = cell_number(cell) else {
          warn!(cell = ?cell, "skipping non-numeric value cell");
          report.bad_cells += 1;
          continue;
        };

        batch.push(NewDataValue {
          element_id: *element_id,
          combo_id: *combo_id,
          org_unit_id,
          period: period.clone(),
          numeric_value,
          doc_id: doc.doc_id,
        });
      }
    }
  }

  let outcome = store.insert_values(batch).await.map_err(Error::store)?;
  report.inserted = outcome.inserted;
  report.rejected = outcome.rejected;

  debug!(
    sheets = report.sheets,
    rows = report.data_rows,
    inserted = report.inserted,
    rejected = report.rejected.len(),
    "workbook ingested"
  );
  Ok(report)
}

// ─── Validation-rule import ──────────────────────────────────────────────────

/// Import the workbook's Validations sheet, if it has one. Each row is a
/// rule: name, left expression, operator, right expression. Rows that are
/// incomplete or fail to save are skipped, never fatal.
pub async fn import_validations<S: IndicatorStore>(
  store: &S,
  path: &Path,
) -> Result<ValidationReport> {
  let sheets = read_workbook(path)?;
  import_validation_sheets(store, sheets).await
}

async fn import_validation_sheets<S: IndicatorStore>(
  store: &S,
  sheets: Vec<SheetData>,
) -> Result<ValidationReport> {
  let mut report = ValidationReport::default();

  for sheet in sheets.into_iter().filter(|s| s.name == VALIDATIONS_SHEET) {
    for row in sheet.rows.into_iter().skip(1) {
      let mut cells = row.iter().map(cell_text);
      let name = cells.next().flatten();
      let left = cells.next().flatten();
      let op = cells.next().flatten();
      let right = cells.next().flatten();

      let (Some(name), Some(left), Some(op), Some(right)) =
        (name, left, op, right)
      else {
        report.skipped += 1;
        continue;
      };

      let operator = match Operator::parse(&op) {
        Ok(operator) => operator,
        Err(err) => {
          warn!(%err, rule = %name, "skipping rule with unknown operator");
          report.skipped += 1;
          continue;
        }
      };

      let input = NewValidationRule {
        name: name.clone(),
        left_expr: left,
        right_expr: right,
        operator,
      };
      match store.save_rule(input).await {
        Ok(rule) => {
          debug!(rule = %rule.name, id = rule.id, "validation rule saved");
          report.saved += 1;
        }
        Err(err) => {
          warn!(%err, rule = %name, "skipping rule that failed to save");
          report.skipped += 1;
        }
      }
    }
  }

  Ok(report)
}
