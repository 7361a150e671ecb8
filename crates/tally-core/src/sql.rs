//! Renders query plans to parameterized SQL.
//!
//! One renderer compiles every stage of the funnel, so the backend never
//! assembles query text itself. Two rules keep the generated SQL safe:
//! every literal value (period tokens) is bound with a `?` placeholder,
//! and every identifier (`de_{id}`, `de_calc_{i}`, `ou{n}`) is built from
//! an internally-controlled integer — user-supplied text never reaches
//! the SQL string.

use std::collections::HashSet;

use crate::{
  Error, Result,
  org::org_fields,
  plan::{CalculationPlan, Frame, PivotPlan, ScanGroup},
};

// ─── Statement ───────────────────────────────────────────────────────────────

/// A typed bind parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
  Null,
  Integer(i64),
  Real(f64),
  Text(String),
}

/// Rendered SQL plus its bind parameters, in placeholder order.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
  pub sql:    String,
  pub params: Vec<SqlValue>,
}

impl Statement {
  /// Views cannot carry bound parameters; refuse rather than inline.
  pub fn require_no_params(&self) -> Result<()> {
    if self.params.is_empty() {
      Ok(())
    } else {
      Err(Error::ViewParams)
    }
  }
}

// ─── Identifiers ─────────────────────────────────────────────────────────────

/// The pivoted column for a data element.
pub fn element_column(element_id: i64) -> String {
  format!("de_{element_id}")
}

/// The derived column for the `index`-th calculation (1-based).
pub fn calc_column(index: usize) -> String {
  format!("de_calc_{index}")
}

fn org_alias(level: u32) -> String {
  format!("ou{level}")
}

// ─── Row scans ───────────────────────────────────────────────────────────────

/// Render one row-level scan, normalized to the frame's column shape.
fn render_scan(
  scan: &ScanGroup,
  frame: &Frame,
  params: &mut Vec<SqlValue>,
) -> String {
  let native = scan.granularity.fields();

  let mut select: Vec<String> = Vec::new();
  for field in frame.granularity.fields() {
    let col = field.column_name();
    if native.contains(field) {
      select.push(format!("dv.{col} AS {col}"));
    } else {
      // A finer label than this scan's rows can supply: bind the value
      // from the requested period token (NULL when even the token lacks
      // that much detail).
      let value = scan
        .fixed_period
        .as_ref()
        .and_then(|p| p.value_for(*field))
        .map(|v| SqlValue::Text(v.to_owned()))
        .unwrap_or(SqlValue::Null);
      params.push(value);
      select.push(format!("? AS {col}"));
    }
  }

  for (level, field) in org_fields(frame.org_level).iter().enumerate() {
    select.push(format!("{}.name AS {field}", org_alias(level as u32)));
  }
  select.push("dv.data_element_id AS de_id".to_owned());
  select.push("dv.numeric_value AS numeric_value".to_owned());

  // Thread the self-join chain from the fact's org unit up to a
  // NULL-parent root, pinning the fact at exactly the scan's depth.
  let mut joins = vec![format!(
    "JOIN org_units {alias} ON {alias}.org_unit_id = dv.org_unit_id",
    alias = org_alias(scan.org_level)
  )];
  for level in (0..scan.org_level).rev() {
    joins.push(format!(
      "JOIN org_units {alias} ON {alias}.org_unit_id = {child}.parent_id",
      alias = org_alias(level),
      child = org_alias(level + 1),
    ));
  }

  let id_list = scan
    .element_ids
    .iter()
    .map(i64::to_string)
    .collect::<Vec<_>>()
    .join(", ");

  format!(
    "SELECT {select}\nFROM data_values dv\n{joins}\nWHERE ou0.parent_id IS \
     NULL\n  AND dv.data_element_id IN ({id_list})",
    select = select.join(", "),
    joins = joins.join("\n"),
  )
}

// ─── Pivot ───────────────────────────────────────────────────────────────────

/// Render the full union → aggregate → pivot funnel.
pub fn render_pivot(plan: &PivotPlan) -> Result<Statement> {
  if plan.scans.is_empty() {
    return Err(Error::EmptyPlan);
  }

  let mut params = Vec::new();
  let union = plan
    .scans
    .iter()
    .map(|scan| render_scan(scan, &plan.frame, &mut params))
    .collect::<Vec<_>>()
    .join("\nUNION ALL\n");

  let labels = plan.frame.label_columns().join(", ");

  let aggregate = format!(
    "SELECT {labels}, de_id, SUM(numeric_value) AS numeric_sum, \
     COUNT(numeric_value) AS numeric_count\nFROM (\n{union}\n) AS \
     q_union\nGROUP BY {labels}, de_id\nORDER BY {labels}, de_id",
  );

  let arms = plan
    .columns
    .iter()
    .map(|col| {
      let name = element_column(col.element_id);
      match col.divisor {
        Some(d) => format!(
          "SUM(CASE WHEN de_id = {id} THEN numeric_sum / {d}.0 ELSE 0 END) \
           AS {name}",
          id = col.element_id,
        ),
        None => format!(
          "SUM(CASE WHEN de_id = {id} THEN numeric_sum ELSE 0 END) AS \
           {name}",
          id = col.element_id,
        ),
      }
    })
    .collect::<Vec<_>>()
    .join(",\n  ");

  let sql = format!(
    "SELECT {labels},\n  {arms}\nFROM (\n{aggregate}\n) AS \
     q_aggregate\nGROUP BY {labels}",
  );

  Ok(Statement { sql, params })
}

// ─── Calculations ────────────────────────────────────────────────────────────

/// Tokens permitted in calculation expressions: column identifiers from
/// `allowed`, numeric literals, arithmetic/comparison operators and
/// parentheses. Anything else is rejected before it can reach the SQL.
fn validate_expression(expr: &str, allowed: &HashSet<String>) -> Result<()> {
  let mut chars = expr.char_indices().peekable();
  while let Some((start, c)) = chars.next() {
    if c.is_whitespace()
      || matches!(c, '(' | ')' | '+' | '-' | '*' | '/' | '<' | '>' | '=' | '!')
    {
      continue;
    }

    if c.is_ascii_digit() || c == '.' {
      while chars
        .peek()
        .is_some_and(|(_, n)| n.is_ascii_digit() || *n == '.')
      {
        chars.next();
      }
      continue;
    }

    if c.is_ascii_alphabetic() || c == '_' {
      let mut end = start + c.len_utf8();
      while let Some((i, n)) = chars.peek().copied() {
        if n.is_ascii_alphanumeric() || n == '_' {
          end = i + n.len_utf8();
          chars.next();
        } else {
          break;
        }
      }
      let ident = &expr[start..end];
      if !allowed.contains(ident) {
        return Err(Error::UnknownColumn(ident.to_owned()));
      }
      continue;
    }

    return Err(Error::Expression {
      expr:  expr.to_owned(),
      token: c.to_string(),
    });
  }
  Ok(())
}

/// Render the calculation stage wrapping a pivot: element columns carried
/// through, one derived column per calculation, and a period filter built
/// as OR-within-field / AND-across-fields equality over bound values.
pub fn render_calculation(plan: &CalculationPlan) -> Result<Statement> {
  let pivot = render_pivot(&plan.pivot)?;
  let mut params = pivot.params;

  let allowed: HashSet<String> = plan
    .pivot
    .columns
    .iter()
    .map(|c| element_column(c.element_id))
    .collect();

  let mut select: Vec<String> = plan.pivot.frame.label_columns()
    .iter()
    .map(|s| (*s).to_owned())
    .collect();
  select.extend(
    plan.pivot.columns.iter().map(|c| element_column(c.element_id)),
  );

  for (i, calc) in plan.calculations.iter().enumerate() {
    validate_expression(&calc.expr, &allowed)?;
    for guard in &calc.guards {
      if !allowed.contains(guard) {
        return Err(Error::UnknownColumn(guard.clone()));
      }
    }

    let name = calc_column(i + 1);
    if calc.guards.is_empty() {
      select.push(format!("{expr} AS {name}", expr = calc.expr));
    } else {
      let guards = calc
        .guards
        .iter()
        .map(|g| format!("({g} != 0)"))
        .collect::<Vec<_>>()
        .join(" AND ");
      select.push(format!(
        "CASE WHEN {guards} THEN {expr} ELSE NULL END AS {name}",
        expr = calc.expr,
      ));
    }
  }

  // Period filter: each frame field collects the distinct requested
  // values it can match; fields AND together, values within a field OR.
  let fields = plan.pivot.frame.granularity.fields();
  let mut field_values: Vec<Vec<String>> = vec![Vec::new(); fields.len()];
  for span in &plan.periods {
    for (field, values) in fields.iter().zip(field_values.iter_mut()) {
      if let Some(value) = span.value_for(*field)
        && !values.iter().any(|v| v == value)
      {
        values.push(value.to_owned());
      }
    }
  }

  let mut where_parts = Vec::new();
  for (field, values) in fields.iter().zip(&field_values) {
    if values.is_empty() {
      continue;
    }
    let column = field.column_name();
    let ors = values
      .iter()
      .map(|v| {
        params.push(SqlValue::Text(v.clone()));
        format!("{column} = ?")
      })
      .collect::<Vec<_>>()
      .join(" OR ");
    where_parts.push(format!("({ors})"));
  }

  let where_clause = if where_parts.is_empty() {
    String::new()
  } else {
    format!("\nWHERE ({})", where_parts.join(" AND "))
  };

  let sql = format!(
    "SELECT {select}\nFROM (\n{pivot}\n) AS q_calculate{where_clause}",
    select = select.join(", "),
    pivot = pivot.sql,
  );

  Ok(Statement { sql, params })
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    element::ElementMeta,
    period::{Granularity, parse_period},
    plan::{Calculation, calculation_plan, pivot_plan},
  };

  fn meta(
    id: i64,
    name: &str,
    ou_level: u32,
    granularity: Granularity,
  ) -> ElementMeta {
    ElementMeta {
      id,
      name: name.to_owned(),
      alias: None,
      ou_level,
      granularity,
    }
  }

  #[test]
  fn pivot_sql_shape() {
    let metas = vec![
      meta(3, "A", 1, Granularity::Quarter),
      meta(7, "B", 1, Granularity::Quarter),
    ];
    let plan = pivot_plan(&metas, 1, Granularity::Quarter, &[]).unwrap();
    let stmt = render_pivot(&plan).unwrap();

    assert!(!stmt.sql.contains("UNION ALL"), "single group, no union");
    assert!(stmt.sql.contains("dv.data_element_id IN (3, 7)"));
    assert!(stmt.sql.contains("GROUP BY year, quarter, country, district"));
    assert!(stmt.sql.contains(
      "SUM(CASE WHEN de_id = 3 THEN numeric_sum ELSE 0 END) AS de_3"
    ));
    assert!(stmt.sql.contains("ou0.parent_id IS NULL"));
    assert!(stmt.sql.contains("ou1.parent_id"));
    assert!(stmt.params.is_empty());
  }

  #[test]
  fn coarser_element_is_rescaled_at_pivot_only() {
    let metas = vec![meta(5, "Annual", 0, Granularity::Year)];
    let periods = vec![parse_period("2016Q1").unwrap()];
    let plan =
      pivot_plan(&metas, 0, Granularity::Quarter, &periods).unwrap();
    let stmt = render_pivot(&plan).unwrap();

    assert!(stmt.sql.contains("numeric_sum / 4.0"));
    // The quarter label is a bound constant, not pasted text.
    assert!(!stmt.sql.contains("2016-Q1"));
    assert_eq!(stmt.params, vec![SqlValue::Text("2016-Q1".into())]);
  }

  #[test]
  fn element_names_never_reach_the_sql() {
    let hostile = "x'; DROP TABLE data_values; --";
    let metas = vec![meta(9, hostile, 0, Granularity::Year)];
    let plan = pivot_plan(&metas, 0, Granularity::Year, &[]).unwrap();
    let stmt = render_pivot(&plan).unwrap();
    assert!(!stmt.sql.contains("DROP TABLE"));
    assert!(stmt.sql.contains("IN (9)"));
  }

  #[test]
  fn calculation_with_zero_guard() {
    let metas = vec![
      meta(1, "A", 0, Granularity::Year),
      meta(2, "B", 0, Granularity::Year),
    ];
    let plan = calculation_plan(
      &metas,
      vec![Calculation {
        expr:   "de_1 * 100 / de_2".into(),
        guards: vec!["de_2".into()],
      }],
      0,
      Granularity::Year,
      vec![],
    )
    .unwrap();
    let stmt = render_calculation(&plan).unwrap();

    assert!(stmt.sql.contains(
      "CASE WHEN (de_2 != 0) THEN de_1 * 100 / de_2 ELSE NULL END AS \
       de_calc_1"
    ));
    assert!(!stmt.sql.contains("WHERE ("), "no period filter requested");
  }

  #[test]
  fn period_filter_ors_within_field_ands_across() {
    let metas = vec![meta(1, "A", 0, Granularity::Quarter)];
    let periods =
      vec![parse_period("2016Q1").unwrap(), parse_period("2016Q2").unwrap()];
    let plan = calculation_plan(
      &metas,
      vec![],
      0,
      Granularity::Quarter,
      periods,
    )
    .unwrap();
    let stmt = render_calculation(&plan).unwrap();

    assert!(
      stmt.sql.contains("WHERE ((year = ?) AND (quarter = ? OR quarter = ?))")
    );
    assert_eq!(
      stmt.params,
      vec![
        SqlValue::Text("2016".into()),
        SqlValue::Text("2016-Q1".into()),
        SqlValue::Text("2016-Q2".into()),
      ]
    );
  }

  #[test]
  fn unknown_columns_are_rejected() {
    let metas = vec![meta(1, "A", 0, Granularity::Year)];
    let plan = calculation_plan(
      &metas,
      vec![Calculation { expr: "de_99 + 1".into(), guards: vec![] }],
      0,
      Granularity::Year,
      vec![],
    )
    .unwrap();
    assert!(matches!(
      render_calculation(&plan),
      Err(Error::UnknownColumn(c)) if c == "de_99"
    ));
  }

  #[test]
  fn hostile_expressions_are_rejected() {
    let metas = vec![meta(1, "A", 0, Granularity::Year)];
    let plan = calculation_plan(
      &metas,
      vec![Calculation {
        expr:   "de_1; DROP TABLE data_values".into(),
        guards: vec![],
      }],
      0,
      Granularity::Year,
      vec![],
    )
    .unwrap();
    assert!(matches!(
      render_calculation(&plan),
      Err(Error::Expression { token, .. }) if token == ";"
    ));
  }

  #[test]
  fn view_statements_must_be_parameter_free() {
    let stmt = Statement {
      sql:    "SELECT 1".into(),
      params: vec![SqlValue::Text("x".into())],
    };
    assert!(matches!(stmt.require_no_params(), Err(Error::ViewParams)));
    let clean = Statement { sql: "SELECT 1".into(), params: vec![] };
    assert!(clean.require_no_params().is_ok());
  }
}
