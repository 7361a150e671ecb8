//! Ingestion tests against an in-memory SQLite store.

use calamine::Data;
use tally_core::{
  period::Granularity,
  store::{CellValue, IndicatorStore, PivotRequest},
};
use tally_store_sqlite::SqliteStore;

use crate::{
  IngestOptions, SheetData, import_validation_sheets, ingest_sheets,
};

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory().await.expect("in-memory store")
}

fn s(text: &str) -> Data {
  Data::String(text.to_owned())
}

fn n(value: f64) -> Data {
  Data::Float(value)
}

fn sheet(name: &str, rows: Vec<Vec<Data>>) -> SheetData {
  SheetData { name: name.to_owned(), rows }
}

fn options() -> IngestOptions {
  IngestOptions { root_unit: Some("Uganda".to_owned()), max_sheets: 4 }
}

async fn ingest(
  store: &SqliteStore,
  sheets: Vec<SheetData>,
  options: &IngestOptions,
) -> crate::IngestReport {
  let doc = store
    .create_source_document("test.xlsx".into())
    .await
    .unwrap();
  ingest_sheets(store, &doc, sheets, options).await.unwrap()
}

fn number(cell: &CellValue) -> f64 {
  match cell {
    CellValue::Number(n) => *n,
    other => panic!("expected numeric cell, got {other:?}"),
  }
}

#[tokio::test]
async fn data_sheet_lands_in_the_store() {
  let s_ = store().await;

  let sheets = vec![sheet(
    "Step1",
    vec![
      vec![
        s("Period"),
        s("District"),
        s("Subcounty"),
        s("Facility"),
        s("Tested 2016"),
        s("Tested Male"),
      ],
      vec![
        s("Oct to Dec 2016"),
        s("Kampala"),
        s("Nakawa"),
        s("Clinic A"),
        n(40.0),
        n(15.0),
      ],
      // No period: skipped.
      vec![s(""), s("Kampala"), s("Nakawa"), s("Clinic A"), n(1.0), n(2.0)],
    ],
  )];

  let report = ingest(&s_, sheets, &options()).await;
  assert_eq!(report.sheets, 1);
  assert_eq!(report.data_rows, 1);
  assert_eq!(report.inserted, 2);
  assert_eq!(report.skipped_rows, 1);
  assert!(report.rejected.is_empty());

  // Both header variants resolve to one element; the category combos
  // collapse in the pivot.
  let result = s_
    .pivot(PivotRequest {
      elements: vec!["Tested".into()],
      ..Default::default()
    })
    .await
    .unwrap();
  assert_eq!(
    result.columns[..6],
    ["year", "quarter", "country", "district", "subcounty", "facility"]
  );
  assert_eq!(result.rows.len(), 1);
  assert_eq!(number(result.rows[0].last().unwrap()), 55.0);
}

#[tokio::test]
async fn root_unit_is_not_prepended_twice() {
  let s_ = store().await;

  let sheets = vec![sheet(
    "Targets",
    vec![
      vec![s("Period"), s("District"), s(""), s(""), s("National Target")],
      // A national row already naming the root.
      vec![s("2016"), s("Uganda"), s(""), s(""), n(1000.0)],
    ],
  )];

  let report = ingest(&s_, sheets, &options()).await;
  assert_eq!(report.inserted, 1);

  let metas = s_.element_meta(vec!["National Target".into()]).await.unwrap();
  assert_eq!(metas[0].ou_level, 0);
  assert_eq!(metas[0].granularity, Granularity::Year);
}

#[tokio::test]
async fn unparseable_periods_skip_the_row() {
  let s_ = store().await;

  let sheets = vec![sheet(
    "Step1",
    vec![
      vec![s("Period"), s("District"), s(""), s(""), s("Tested")],
      vec![s("sometime"), s("Kampala"), s(""), s(""), n(5.0)],
      vec![s("2016Q1"), s("Kampala"), s(""), s(""), n(7.0)],
    ],
  )];

  let report = ingest(&s_, sheets, &options()).await;
  assert_eq!(report.skipped_rows, 1);
  assert_eq!(report.data_rows, 1);
  assert_eq!(report.inserted, 1);
}

#[tokio::test]
async fn non_numeric_cells_are_counted_not_fatal() {
  let s_ = store().await;

  let sheets = vec![sheet(
    "Step1",
    vec![
      vec![s("Period"), s("District"), s(""), s(""), s("Tested"), s("Linked")],
      vec![s("2016Q1"), s("Kampala"), s(""), s(""), s("n/a"), n(7.0)],
    ],
  )];

  let report = ingest(&s_, sheets, &options()).await;
  assert_eq!(report.bad_cells, 1);
  assert_eq!(report.inserted, 1);
}

#[tokio::test]
async fn sheets_beyond_the_limit_are_ignored() {
  let s_ = store().await;

  let header =
    vec![s("Period"), s("District"), s(""), s(""), s("Tested")];
  let row = |v: f64| vec![s("2016Q1"), s("Kampala"), s(""), s(""), n(v)];

  let sheets = vec![
    sheet("One", vec![header.clone(), row(1.0)]),
    sheet("Two", vec![header.clone(), row(2.0)]),
  ];

  let limited = IngestOptions {
    root_unit:  Some("Uganda".to_owned()),
    max_sheets: 1,
  };
  let report = ingest(&s_, sheets, &limited).await;
  assert_eq!(report.sheets, 1);
  assert_eq!(report.inserted, 1);
}

#[tokio::test]
async fn validations_sheet_saves_well_formed_rules() {
  let s_ = store().await;

  // Facts first, so rule views have metadata to build on.
  let data = vec![sheet(
    "Step1",
    vec![
      vec![
        s("Period"),
        s("District"),
        s(""),
        s(""),
        s("Tested"),
        s("Tested HIV+"),
      ],
      vec![s("2016Q1"), s("Kampala"), s(""), s(""), n(10.0), n(4.0)],
    ],
  )];
  ingest(&s_, data, &options()).await;

  let validations = vec![sheet(
    "Validations",
    vec![
      vec![s("name"), s("left"), s("op"), s("right")],
      vec![s("positives within tested"), s("Tested HIV+"), s("<="), s("Tested")],
      // Missing right side: skipped.
      vec![s("halfway"), s("Tested"), s("<="), s("")],
      // Unknown operator: skipped.
      vec![s("odd"), s("Tested"), s("~"), s("Tested HIV+")],
      // No known elements: skipped.
      vec![s("mystery"), s("Foo"), s("<="), s("Bar")],
    ],
  )];

  let report = import_validation_sheets(&s_, validations).await.unwrap();
  assert_eq!(report.saved, 1);
  assert_eq!(report.skipped, 3);

  let rules = s_.list_rules().await.unwrap();
  assert_eq!(rules.len(), 1);

  let results = s_.rule_results(rules[0].id).await.unwrap();
  assert_eq!(results.rows.len(), 1);
  // 4 <= 10 holds.
  assert_eq!(number(results.rows[0].last().unwrap()), 1.0);
}
