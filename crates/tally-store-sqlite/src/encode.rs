//! Row codecs between SQLite storage and core types.

use chrono::{DateTime, Utc};
use rusqlite::types::{Value, ValueRef};
use uuid::Uuid;

use tally_core::{
  element::{AggregationMethod, DataElement, ElementMeta, ValueType},
  period::Granularity,
  rules::{Operator, ValidationRule},
  sql::SqlValue,
  store::CellValue,
};

use crate::{Error, Result};

pub fn encode_uuid(id: Uuid) -> String {
  id.to_string()
}

pub fn decode_uuid(s: &str) -> Result<Uuid> {
  Uuid::parse_str(s).map_err(|_| Error::Decode("uuid", s.to_owned()))
}

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339()
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(format!("{s}: {e}")))
}

/// A rendered statement's bind parameter as a rusqlite value.
pub fn bind_value(value: &SqlValue) -> Value {
  match value {
    SqlValue::Null => Value::Null,
    SqlValue::Integer(v) => Value::Integer(*v),
    SqlValue::Real(v) => Value::Real(*v),
    SqlValue::Text(v) => Value::Text(v.clone()),
  }
}

/// One cell of a dynamically-shaped query result.
pub fn read_cell(value: ValueRef<'_>) -> CellValue {
  match value {
    ValueRef::Null | ValueRef::Blob(_) => CellValue::Null,
    ValueRef::Integer(v) => CellValue::Number(v as f64),
    ValueRef::Real(v) => CellValue::Number(v),
    ValueRef::Text(t) => CellValue::Text(String::from_utf8_lossy(t).into_owned()),
  }
}

// ─── Raw rows ────────────────────────────────────────────────────────────────

/// A `data_elements` row before discriminant decoding.
pub struct RawElement {
  pub id:                 i64,
  pub name:               String,
  pub alias:              Option<String>,
  pub value_type:         String,
  pub value_min:          Option<f64>,
  pub value_max:          Option<f64>,
  pub aggregation_method: String,
}

impl RawElement {
  pub fn into_element(self) -> Result<DataElement> {
    let value_type = ValueType::from_discriminant(&self.value_type)
      .ok_or_else(|| Error::Decode("value_type", self.value_type.clone()))?;
    let aggregation_method =
      AggregationMethod::from_discriminant(&self.aggregation_method)
        .ok_or_else(|| {
          Error::Decode("aggregation_method", self.aggregation_method.clone())
        })?;

    Ok(DataElement {
      id: self.id,
      name: self.name,
      alias: self.alias,
      value_type,
      value_min: self.value_min,
      value_max: self.value_max,
      aggregation_method,
    })
  }
}

/// An element-metadata aggregation row before granularity decoding.
pub struct RawMeta {
  pub id:               i64,
  pub name:             String,
  pub alias:            Option<String>,
  pub ou_level:         u32,
  pub granularity_code: u32,
}

impl RawMeta {
  pub fn into_meta(self) -> Result<ElementMeta> {
    let granularity = Granularity::from_code(self.granularity_code)
      .ok_or_else(|| {
        Error::Decode("granularity", self.granularity_code.to_string())
      })?;

    Ok(ElementMeta {
      id: self.id,
      name: self.name,
      alias: self.alias,
      ou_level: self.ou_level,
      granularity,
    })
  }
}

/// A `validation_rules` row before operator decoding.
pub struct RawRule {
  pub id:         i64,
  pub name:       String,
  pub left_expr:  String,
  pub right_expr: String,
  pub operator:   String,
}

impl RawRule {
  pub fn into_rule(self, element_ids: Vec<i64>) -> Result<ValidationRule> {
    let operator = Operator::parse(&self.operator).map_err(Error::Core)?;
    Ok(ValidationRule {
      id: self.id,
      name: self.name,
      left_expr: self.left_expr,
      right_expr: self.right_expr,
      operator,
      element_ids,
    })
  }
}
