//! Error types for `tally-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("quarter not in ISO 8601 format (YYYYQN or YYYY-QN): {0}")]
  QuarterFormat(String),

  #[error("unrecognised period token: {0}")]
  PeriodFormat(String),

  #[error("no data elements matched the request")]
  NoElements,

  #[error(
    "element '{element}' was collected at org level {collected}, cannot \
     report at level {requested}"
  )]
  OrgLevelTooDeep {
    element:   String,
    collected: u32,
    requested: u32,
  },

  #[error(
    "element '{element}' was recorded at a coarser granularity than the \
     requested output; list the periods to spread it across"
  )]
  PeriodsRequired { element: String },

  #[error("query plan produced no source scans")]
  EmptyPlan,

  #[error("unknown column in expression: {0}")]
  UnknownColumn(String),

  #[error("invalid token {token:?} in expression: {expr}")]
  Expression { expr: String, token: String },

  #[error("unsupported comparison operator: {0}")]
  Operator(String),

  #[error("expression references no data elements: {0}")]
  UnparseableRule(String),

  #[error("generated view SQL must not carry bound parameters")]
  ViewParams,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
