//! [`SqliteStore`] — the SQLite implementation of [`IndicatorStore`].

use std::{
  collections::HashMap,
  path::Path,
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
  time::Duration,
};

use chrono::Utc;
use rusqlite::OptionalExtension as _;
use uuid::Uuid;

use tally_core::{
  element::{
    CategoryCombo, DataElement, ElementMeta, NewDataElement, NewDataValue,
    SourceDocument, combo_name,
  },
  org::{ORG_FIELDS, OrgUnit},
  period::{Granularity, PeriodSpan, parse_period},
  plan::{
    Calculation, calculation_plan, coarsest_granularity, coarsest_level,
    finest_granularity, pivot_plan,
  },
  rules::{ElementVocabulary, NewValidationRule, ValidationRule, view_name},
  sql::{Statement, element_column, render_calculation, render_pivot},
  store::{
    CalculationRequest, IndicatorStore, IngestOutcome, PivotRequest,
    RejectedValue, ResultSet,
  },
};

use crate::{
  Error, Result,
  encode::{
    RawElement, RawMeta, RawRule, bind_value, decode_dt, decode_uuid,
    encode_dt, encode_uuid, read_cell,
  },
  schema::SCHEMA,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A Tally indicator store backed by a single SQLite file.
///
/// Cloning is cheap — the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn:          tokio_rusqlite::Connection,
  query_timeout: Option<Duration>,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn, query_timeout: None };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store — useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn, query_timeout: None };
    store.init_schema().await?;
    Ok(store)
  }

  /// Interrupt reporting queries that run longer than `limit`. Synthesized
  /// pivots over many scans can be expensive; this bounds a single request
  /// rather than letting it occupy the connection thread indefinitely.
  pub fn with_query_timeout(mut self, limit: Duration) -> Self {
    self.query_timeout = Some(limit);
    self
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Execute a rendered reporting statement, honouring the query timeout.
  ///
  /// The timer and the completion path race to swap the armed flag; only
  /// the winner acts, so a timer firing after the query finished cannot
  /// interrupt a later statement queued on the shared connection.
  pub(crate) async fn execute_statement(
    &self,
    statement: Statement,
  ) -> Result<ResultSet> {
    let interrupt = match self.query_timeout {
      Some(limit) => {
        let handle =
          self.conn.call(|conn| Ok(conn.get_interrupt_handle())).await?;
        let armed = Arc::new(AtomicBool::new(true));
        let timer_armed = Arc::clone(&armed);
        let task = tokio::spawn(async move {
          tokio::time::sleep(limit).await;
          if timer_armed.swap(false, Ordering::SeqCst) {
            handle.interrupt();
          }
        });
        Some((task, armed))
      }
      None => None,
    };

    let result = self
      .conn
      .call(move |conn| {
        let mut prepared = conn.prepare(&statement.sql)?;
        let columns: Vec<String> =
          prepared.column_names().iter().map(|c| (*c).to_owned()).collect();
        let width = columns.len();

        let params =
          rusqlite::params_from_iter(statement.params.iter().map(bind_value));
        let rows = prepared
          .query_map(params, |row| {
            let mut cells = Vec::with_capacity(width);
            for i in 0..width {
              cells.push(read_cell(row.get_ref(i)?));
            }
            Ok(cells)
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(ResultSet { columns, rows })
      })
      .await;

    if let Some((task, armed)) = interrupt {
      armed.swap(false, Ordering::SeqCst);
      task.abort();
    }

    match result {
      Err(err) if interrupted(&err) => Err(Error::QueryTimeout),
      other => Ok(other?),
    }
  }
}

// ─── Connection-thread helpers ───────────────────────────────────────────────

/// Smuggle a domain error out of a connection-thread closure; the `From`
/// impl on [`Error`] unwraps it on the other side.
fn store_err(err: Error) -> tokio_rusqlite::Error {
  tokio_rusqlite::Error::Other(Box::new(err))
}

fn interrupted(err: &tokio_rusqlite::Error) -> bool {
  matches!(
    err,
    tokio_rusqlite::Error::Rusqlite(rusqlite::Error::SqliteFailure(f, _))
      if f.code == rusqlite::ErrorCode::OperationInterrupted
  )
}

const META_SELECT: &str = "SELECT de.data_element_id, de.name, de.alias, \
   MIN(ou.level) AS ou_level, \
   MIN(CASE WHEN dv.month IS NOT NULL THEN 1 \
            WHEN dv.quarter IS NOT NULL THEN 4 \
            ELSE 12 END) AS granularity_code \
 FROM data_elements de \
 JOIN data_values dv ON dv.data_element_id = de.data_element_id \
 JOIN org_units ou ON ou.org_unit_id = dv.org_unit_id";

const META_GROUP: &str = "GROUP BY de.data_element_id, de.name, de.alias \
 ORDER BY de.name, de.data_element_id";

fn meta_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawMeta> {
  Ok(RawMeta {
    id:               row.get(0)?,
    name:             row.get(1)?,
    alias:            row.get(2)?,
    ou_level:         row.get(3)?,
    granularity_code: row.get(4)?,
  })
}

/// Metadata for elements matched by name or alias. The inner joins omit
/// elements with no recorded facts.
fn metas_by_names(
  conn: &rusqlite::Connection,
  names: &[String],
) -> rusqlite::Result<Vec<RawMeta>> {
  let placeholders =
    names.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
  let sql = format!(
    "{META_SELECT} WHERE de.name IN ({placeholders}) OR de.alias IN \
     ({placeholders}) {META_GROUP}"
  );
  let mut stmt = conn.prepare(&sql)?;
  stmt
    .query_map(
      rusqlite::params_from_iter(names.iter().chain(names.iter())),
      meta_row,
    )?
    .collect()
}

fn metas_by_ids(
  conn: &rusqlite::Connection,
  ids: &[i64],
) -> rusqlite::Result<Vec<RawMeta>> {
  let id_list =
    ids.iter().map(i64::to_string).collect::<Vec<_>>().join(", ");
  let sql = format!(
    "{META_SELECT} WHERE de.data_element_id IN ({id_list}) {META_GROUP}"
  );
  let mut stmt = conn.prepare(&sql)?;
  stmt.query_map([], meta_row)?.collect()
}

fn element_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawElement> {
  Ok(RawElement {
    id:                 row.get(0)?,
    name:               row.get(1)?,
    alias:              row.get(2)?,
    value_type:         row.get(3)?,
    value_min:          row.get(4)?,
    value_max:          row.get(5)?,
    aggregation_method: row.get(6)?,
  })
}

const ELEMENT_COLUMNS: &str = "data_element_id, name, alias, value_type, \
 value_min, value_max, aggregation_method";

fn rule_element_ids(
  conn: &rusqlite::Connection,
  rule_id: i64,
) -> rusqlite::Result<Vec<i64>> {
  let mut stmt = conn.prepare(
    "SELECT data_element_id FROM validation_rule_elements
     WHERE rule_id = ?1 ORDER BY data_element_id",
  )?;
  stmt.query_map(rusqlite::params![rule_id], |r| r.get(0))?.collect()
}

fn parse_periods(tokens: &[String]) -> Result<Vec<PeriodSpan>> {
  tokens.iter().map(|t| Ok(parse_period(t)?)).collect()
}

// ─── IndicatorStore impl ─────────────────────────────────────────────────────

impl IndicatorStore for SqliteStore {
  type Error = Error;

  // ── Elements ──────────────────────────────────────────────────────────────

  async fn create_element(&self, input: NewDataElement) -> Result<DataElement> {
    let element = self
      .conn
      .call(move |conn| {
        // The name/alias columns collate NOCASE, so plain equality here is
        // the case-insensitive namespace check.
        let taken: Option<String> = conn
          .query_row(
            "SELECT name FROM data_elements
             WHERE name = ?1 OR alias = ?1
                OR (?2 IS NOT NULL AND (name = ?2 OR alias = ?2))
             LIMIT 1",
            rusqlite::params![input.name, input.alias.as_deref()],
            |r| r.get(0),
          )
          .optional()?;
        if taken.is_some() {
          return Err(store_err(Error::ElementNameTaken(input.name)));
        }

        conn.execute(
          "INSERT INTO data_elements
             (name, alias, value_type, value_min, value_max, aggregation_method)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
          rusqlite::params![
            input.name,
            input.alias.as_deref(),
            input.value_type.discriminant(),
            input.value_min,
            input.value_max,
            input.aggregation_method.discriminant(),
          ],
        )?;

        Ok(DataElement {
          id:                 conn.last_insert_rowid(),
          name:               input.name,
          alias:              input.alias,
          value_type:         input.value_type,
          value_min:          input.value_min,
          value_max:          input.value_max,
          aggregation_method: input.aggregation_method,
        })
      })
      .await?;
    Ok(element)
  }

  async fn list_elements(&self) -> Result<Vec<DataElement>> {
    let raws: Vec<RawElement> = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {ELEMENT_COLUMNS} FROM data_elements ORDER BY name"
        ))?;
        Ok(stmt.query_map([], element_row)?.collect::<rusqlite::Result<_>>()?)
      })
      .await?;

    raws.into_iter().map(RawElement::into_element).collect()
  }

  async fn find_element(&self, name: String) -> Result<Option<DataElement>> {
    let raw: Option<RawElement> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {ELEMENT_COLUMNS} FROM data_elements
                 WHERE name = ?1 OR alias = ?1"
              ),
              rusqlite::params![name],
              element_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawElement::into_element).transpose()
  }

  async fn ensure_element(&self, name: String) -> Result<DataElement> {
    if let Some(found) = self.find_element(name.clone()).await? {
      return Ok(found);
    }
    self.create_element(NewDataElement::named(name)).await
  }

  // ── Categories ────────────────────────────────────────────────────────────

  async fn ensure_category_combo(
    &self,
    categories: Vec<String>,
  ) -> Result<CategoryCombo> {
    let name = combo_name(&categories);

    let combo = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;

        let existing: Option<i64> = tx
          .query_row(
            "SELECT combo_id FROM category_combos WHERE name = ?1",
            rusqlite::params![name],
            |r| r.get(0),
          )
          .optional()?;

        let id = match existing {
          Some(id) => id,
          None => {
            tx.execute(
              "INSERT INTO category_combos (name) VALUES (?1)",
              rusqlite::params![name],
            )?;
            let combo_id = tx.last_insert_rowid();

            for category in &categories {
              tx.execute(
                "INSERT OR IGNORE INTO categories (name) VALUES (?1)",
                rusqlite::params![category],
              )?;
              let category_id: i64 = tx.query_row(
                "SELECT category_id FROM categories WHERE name = ?1",
                rusqlite::params![category],
                |r| r.get(0),
              )?;
              tx.execute(
                "INSERT OR IGNORE INTO category_combo_members
                   (combo_id, category_id)
                 VALUES (?1, ?2)",
                rusqlite::params![combo_id, category_id],
              )?;
            }
            combo_id
          }
        };

        tx.commit()?;
        Ok(CategoryCombo { id, name })
      })
      .await?;
    Ok(combo)
  }

  // ── Org units ─────────────────────────────────────────────────────────────

  async fn resolve_org_path(
    &self,
    parts: Vec<String>,
  ) -> Result<Option<OrgUnit>> {
    let resolved = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;

        let mut parent: Option<i64> = None;
        let mut resolved: Option<OrgUnit> = None;

        for (depth, raw) in parts.iter().take(ORG_FIELDS.len()).enumerate() {
          let name = raw.trim();
          if name.is_empty() {
            break;
          }
          let level = depth as u32;

          // `IS` matches the NULL parent of root nodes where `=` would not.
          let existing: Option<i64> = tx
            .query_row(
              "SELECT org_unit_id FROM org_units
               WHERE name = ?1 AND parent_id IS ?2",
              rusqlite::params![name, parent],
              |r| r.get(0),
            )
            .optional()?;

          let org_unit_id = match existing {
            Some(id) => id,
            None => {
              tx.execute(
                "INSERT INTO org_units (name, parent_id, level)
                 VALUES (?1, ?2, ?3)",
                rusqlite::params![name, parent, level],
              )?;
              tx.last_insert_rowid()
            }
          };

          resolved = Some(OrgUnit {
            org_unit_id,
            name: name.to_owned(),
            parent_id: parent,
            level,
          });
          parent = Some(org_unit_id);
        }

        tx.commit()?;
        Ok(resolved)
      })
      .await?;
    Ok(resolved)
  }

  // ── Facts ─────────────────────────────────────────────────────────────────

  async fn create_source_document(
    &self,
    orig_filename: String,
  ) -> Result<SourceDocument> {
    let doc = SourceDocument {
      doc_id: Uuid::new_v4(),
      orig_filename,
      uploaded_at: Utc::now(),
    };

    let id_str = encode_uuid(doc.doc_id);
    let filename = doc.orig_filename.clone();
    let at_str = encode_dt(doc.uploaded_at);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO source_docs (doc_id, orig_filename, uploaded_at)
           VALUES (?1, ?2, ?3)",
          rusqlite::params![id_str, filename, at_str],
        )?;
        Ok(())
      })
      .await?;

    Ok(doc)
  }

  async fn list_source_documents(&self) -> Result<Vec<SourceDocument>> {
    let raws: Vec<(String, String, String)> = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare(
          "SELECT doc_id, orig_filename, uploaded_at FROM source_docs
           ORDER BY uploaded_at DESC",
        )?;
        Ok(
          stmt
            .query_map([], |row| {
              Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?
            .collect::<rusqlite::Result<_>>()?,
        )
      })
      .await?;

    raws
      .into_iter()
      .map(|(id, orig_filename, at)| {
        Ok(SourceDocument {
          doc_id: decode_uuid(&id)?,
          orig_filename,
          uploaded_at: decode_dt(&at)?,
        })
      })
      .collect()
  }

  async fn insert_values(
    &self,
    values: Vec<NewDataValue>,
  ) -> Result<IngestOutcome> {
    let outcome = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;

        let bounds: HashMap<i64, (Option<f64>, Option<f64>)> = {
          let mut stmt = tx.prepare(
            "SELECT data_element_id, value_min, value_max FROM data_elements",
          )?;
          stmt
            .query_map([], |row| {
              Ok((row.get(0)?, (row.get(1)?, row.get(2)?)))
            })?
            .collect::<rusqlite::Result<_>>()?
        };

        let mut outcome = IngestOutcome::default();
        {
          let mut insert = tx.prepare(
            "INSERT OR IGNORE INTO data_values
               (data_element_id, combo_id, org_unit_id,
                year, quarter, month, numeric_value, doc_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
          )?;

          for value in &values {
            let reject = |reason: &str| RejectedValue {
              element_id:  value.element_id,
              org_unit_id: value.org_unit_id,
              period:      value.period.clone(),
              reason:      reason.to_owned(),
            };

            let Some((min, max)) = bounds.get(&value.element_id) else {
              outcome.rejected.push(reject("unknown data element"));
              continue;
            };
            let below = min.is_some_and(|m| value.numeric_value < m);
            let above = max.is_some_and(|m| value.numeric_value > m);
            if below || above {
              outcome
                .rejected
                .push(reject("value outside the element's allowed range"));
              continue;
            }

            let changed = insert.execute(rusqlite::params![
              value.element_id,
              value.combo_id,
              value.org_unit_id,
              value.period.year,
              value.period.quarter.as_deref(),
              value.period.month.as_deref(),
              value.numeric_value,
              encode_uuid(value.doc_id),
            ])?;

            if changed == 0 {
              outcome.rejected.push(reject(
                "duplicate fact for this element, combo, org unit and period",
              ));
            } else {
              outcome.inserted += 1;
            }
          }
        }

        tx.commit()?;
        Ok(outcome)
      })
      .await?;
    Ok(outcome)
  }

  // ── Reporting ─────────────────────────────────────────────────────────────

  async fn element_meta(&self, names: Vec<String>) -> Result<Vec<ElementMeta>> {
    if names.is_empty() {
      return Ok(Vec::new());
    }

    let raws: Vec<RawMeta> = self
      .conn
      .call(move |conn| Ok(metas_by_names(conn, &names)?))
      .await?;

    raws.into_iter().map(RawMeta::into_meta).collect()
  }

  async fn pivot(&self, request: PivotRequest) -> Result<ResultSet> {
    let metas = self.element_meta(request.elements).await?;
    if metas.is_empty() {
      return Err(Error::Core(tally_core::Error::NoElements));
    }

    let periods = parse_periods(&request.periods)?;
    let org_level = request
      .org_level
      .or_else(|| coarsest_level(&metas))
      .unwrap_or(0);
    let granularity = request
      .granularity
      .or_else(|| finest_granularity(&metas))
      .unwrap_or(Granularity::Year);

    let plan = pivot_plan(&metas, org_level, granularity, &periods)?;
    let stmt = render_pivot(&plan)?;
    self.execute_statement(stmt).await
  }

  async fn calculation(&self, request: CalculationRequest) -> Result<ResultSet> {
    let metas = self.element_meta(request.elements).await?;
    if metas.is_empty() {
      return Err(Error::Core(tally_core::Error::NoElements));
    }

    let periods = parse_periods(&request.periods)?;
    let org_level = coarsest_level(&metas).unwrap_or(0);
    let granularity = finest_granularity(&metas).unwrap_or(Granularity::Year);

    let calculations = request
      .expressions
      .into_iter()
      .map(|spec| Calculation { expr: spec.expr, guards: spec.guards })
      .collect();

    let plan =
      calculation_plan(&metas, calculations, org_level, granularity, periods)?;
    let stmt = render_calculation(&plan)?;
    self.execute_statement(stmt).await
  }

  // ── Validation rules ──────────────────────────────────────────────────────

  async fn save_rule(&self, input: NewValidationRule) -> Result<ValidationRule> {
    let rule = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;

        let existing: Option<i64> = tx
          .query_row(
            "SELECT rule_id FROM validation_rules WHERE name = ?1",
            rusqlite::params![input.name],
            |r| r.get(0),
          )
          .optional()?;

        let rule_id = match existing {
          Some(id) => {
            tx.execute(
              "UPDATE validation_rules
               SET left_expr = ?1, right_expr = ?2, operator = ?3
               WHERE rule_id = ?4",
              rusqlite::params![
                input.left_expr,
                input.right_expr,
                input.operator.as_sql(),
                id
              ],
            )?;
            id
          }
          None => {
            tx.execute(
              "INSERT INTO validation_rules
                 (name, left_expr, right_expr, operator)
               VALUES (?1, ?2, ?3, ?4)",
              rusqlite::params![
                input.name,
                input.left_expr,
                input.right_expr,
                input.operator.as_sql()
              ],
            )?;
            tx.last_insert_rowid()
          }
        };

        // The matching vocabulary is every element name and alias.
        let entries: Vec<(String, i64)> = {
          let mut stmt = tx
            .prepare("SELECT data_element_id, name, alias FROM data_elements")?;
          let rows = stmt.query_map([], |row| {
            Ok((
              row.get::<_, i64>(0)?,
              row.get::<_, String>(1)?,
              row.get::<_, Option<String>>(2)?,
            ))
          })?;

          let mut entries = Vec::new();
          for row in rows {
            let (id, name, alias) = row?;
            entries.push((name, id));
            if let Some(alias) = alias {
              entries.push((alias, id));
            }
          }
          entries
        };
        let vocabulary = ElementVocabulary::new(entries);

        let expression = input.expression();
        let element_ids = vocabulary.referenced_ids(&expression);
        if element_ids.is_empty() {
          return Err(store_err(
            tally_core::Error::UnparseableRule(expression).into(),
          ));
        }

        tx.execute(
          "DELETE FROM validation_rule_elements WHERE rule_id = ?1",
          rusqlite::params![rule_id],
        )?;
        for element_id in &element_ids {
          tx.execute(
            "INSERT INTO validation_rule_elements (rule_id, data_element_id)
             VALUES (?1, ?2)",
            rusqlite::params![rule_id, element_id],
          )?;
        }

        let metas = metas_by_ids(&tx, &element_ids)?
          .into_iter()
          .map(RawMeta::into_meta)
          .collect::<Result<Vec<_>>>()
          .map_err(store_err)?;
        if metas.is_empty() {
          return Err(store_err(tally_core::Error::NoElements.into()));
        }

        let left = vocabulary
          .substitute(&input.left_expr)
          .map_err(|e| store_err(e.into()))?;
        let right = vocabulary
          .substitute(&input.right_expr)
          .map_err(|e| store_err(e.into()))?;
        let comparison =
          format!("({left}) {op} ({right})", op = input.operator.as_sql());

        // The coarsest frame keeps every scan at its native granularity,
        // so the rendered SQL carries no bound parameters and can back a
        // view.
        let org_level = coarsest_level(&metas).unwrap_or(0);
        let granularity =
          coarsest_granularity(&metas).unwrap_or(Granularity::Year);
        let calculations = vec![
          Calculation { expr: format!("({left})"), guards: vec![] },
          Calculation { expr: format!("({right})"), guards: vec![] },
          Calculation { expr: comparison, guards: vec![] },
        ];

        let plan = calculation_plan(
          &metas,
          calculations,
          org_level,
          granularity,
          vec![],
        )
        .map_err(|e| store_err(e.into()))?;
        let stmt =
          render_calculation(&plan).map_err(|e| store_err(e.into()))?;
        stmt.require_no_params().map_err(|e| store_err(e.into()))?;

        let mut view_columns: Vec<String> = plan
          .pivot
          .frame
          .label_columns()
          .iter()
          .map(|s| (*s).to_owned())
          .collect();
        view_columns
          .extend(plan.pivot.columns.iter().map(|c| element_column(c.element_id)));
        view_columns.extend(
          ["left_value", "right_value", "satisfied"].map(str::to_owned),
        );

        let view = view_name(rule_id);
        tx.execute_batch(&format!(
          "DROP VIEW IF EXISTS {view};\nCREATE VIEW {view} ({cols}) AS\n{sql};",
          cols = view_columns.join(", "),
          sql = stmt.sql,
        ))?;

        tx.commit()?;

        Ok(ValidationRule {
          id: rule_id,
          name: input.name,
          left_expr: input.left_expr,
          right_expr: input.right_expr,
          operator: input.operator,
          element_ids,
        })
      })
      .await?;
    Ok(rule)
  }

  async fn list_rules(&self) -> Result<Vec<ValidationRule>> {
    let raws: Vec<(RawRule, Vec<i64>)> = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare(
          "SELECT rule_id, name, left_expr, right_expr, operator
           FROM validation_rules ORDER BY rule_id",
        )?;
        let rules = stmt
          .query_map([], |row| {
            Ok(RawRule {
              id:         row.get(0)?,
              name:       row.get(1)?,
              left_expr:  row.get(2)?,
              right_expr: row.get(3)?,
              operator:   row.get(4)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut out = Vec::with_capacity(rules.len());
        for rule in rules {
          let ids = rule_element_ids(conn, rule.id)?;
          out.push((rule, ids));
        }
        Ok(out)
      })
      .await?;

    raws.into_iter().map(|(raw, ids)| raw.into_rule(ids)).collect()
  }

  async fn get_rule(&self, id: i64) -> Result<Option<ValidationRule>> {
    let raw: Option<(RawRule, Vec<i64>)> = self
      .conn
      .call(move |conn| {
        let rule = conn
          .query_row(
            "SELECT rule_id, name, left_expr, right_expr, operator
             FROM validation_rules WHERE rule_id = ?1",
            rusqlite::params![id],
            |row| {
              Ok(RawRule {
                id:         row.get(0)?,
                name:       row.get(1)?,
                left_expr:  row.get(2)?,
                right_expr: row.get(3)?,
                operator:   row.get(4)?,
              })
            },
          )
          .optional()?;

        match rule {
          Some(rule) => {
            let ids = rule_element_ids(conn, rule.id)?;
            Ok(Some((rule, ids)))
          }
          None => Ok(None),
        }
      })
      .await?;

    raw.map(|(rule, ids)| rule.into_rule(ids)).transpose()
  }

  async fn rule_results(&self, id: i64) -> Result<ResultSet> {
    if self.get_rule(id).await?.is_none() {
      return Err(Error::RuleNotFound(id));
    }

    let statement = Statement {
      sql:    format!("SELECT * FROM {}", view_name(id)),
      params: vec![],
    };
    self.execute_statement(statement).await
  }
}
