//! Typed query plans for pivot and calculation queries.
//!
//! The planner takes resolved element metadata plus a requested output
//! frame (org level × period granularity) and produces a data-structure
//! description of the three-stage funnel the backend executes:
//!
//!   1. one row-level scan per (org level, granularity) group, padded to
//!      the frame's common column shape;
//!   2. a UNION ALL of the scans, re-aggregated by hierarchy + period +
//!      element (collapsing category disaggregations into totals);
//!   3. a pivot grouping by hierarchy + period alone, one conditional-sum
//!      column per element, rescaled where the element's native
//!      granularity is coarser than the frame's.
//!
//! SQL cannot union rows of heterogeneous native granularity or org depth
//! without first projecting them onto a common shape, and cannot apply
//! per-element arithmetic until each element occupies its own column —
//! hence the three stages. Rendering to SQL text lives in [`crate::sql`].

use serde::{Deserialize, Serialize};

use crate::{
  Error, Result,
  element::ElementMeta,
  org::org_fields,
  period::{Granularity, PeriodSpan},
};

// ─── Frame ───────────────────────────────────────────────────────────────────

/// The common output shape every scan is normalized into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
  pub org_level:   u32,
  pub granularity: Granularity,
}

impl Frame {
  /// The label columns of the output: period fields (coarsest first),
  /// then hierarchy fields down to the frame's org level.
  pub fn label_columns(&self) -> Vec<&'static str> {
    let mut cols: Vec<&'static str> = self
      .granularity
      .fields()
      .iter()
      .map(|f| f.column_name())
      .collect();
    cols.extend(org_fields(self.org_level));
    cols
  }
}

// ─── Plan nodes ──────────────────────────────────────────────────────────────

/// One row-level scan over the fact table, for a set of elements sharing
/// an org level and a native granularity.
///
/// When the scan's granularity is coarser than the frame's, the planner
/// emits one scan per requested period token and `fixed_period` supplies
/// the finer period labels as bound constants; the scan's own rows cannot
/// provide them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanGroup {
  pub org_level:    u32,
  pub granularity:  Granularity,
  pub element_ids:  Vec<i64>,
  pub fixed_period: Option<PeriodSpan>,
}

/// One pivoted output column. `divisor` is set when the element's native
/// granularity is coarser than the frame's: the conditional sum is divided
/// by the subdivision count (annual → quarterly divides by 4). This is a
/// linear apportionment approximation — an annual figure is spread evenly
/// across its quarters, not redistributed by when the events occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PivotColumn {
  pub element_id: i64,
  pub divisor:    Option<u32>,
}

/// The full pivot query: scans unioned into a frame, aggregated, pivoted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PivotPlan {
  pub frame:   Frame,
  pub scans:   Vec<ScanGroup>,
  pub columns: Vec<PivotColumn>,
}

/// A derived column over the pivoted element columns.
///
/// `expr` references pivot column identifiers (`de_{id}`) only; `guards`
/// lists columns that must be nonzero for the expression to evaluate —
/// when any guard is zero the result degrades to NULL instead of raising
/// a division error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Calculation {
  pub expr:   String,
  pub guards: Vec<String>,
}

/// A pivot wrapped with derived calculation columns and a period filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalculationPlan {
  pub pivot:        PivotPlan,
  pub calculations: Vec<Calculation>,
  pub periods:      Vec<PeriodSpan>,
}

// ─── Frame defaults ──────────────────────────────────────────────────────────

/// The coarsest (minimum) org level among the given elements.
pub fn coarsest_level(metas: &[ElementMeta]) -> Option<u32> {
  metas.iter().map(|m| m.ou_level).min()
}

/// The finest granularity among the given elements — the default for
/// pivot requests, so no element's detail is aggregated away.
pub fn finest_granularity(metas: &[ElementMeta]) -> Option<Granularity> {
  metas.iter().map(|m| m.granularity).min()
}

/// The coarsest granularity among the given elements — used for rule
/// views, where it guarantees no scan needs rescaling or period fan-out.
pub fn coarsest_granularity(metas: &[ElementMeta]) -> Option<Granularity> {
  metas.iter().map(|m| m.granularity).max()
}

// ─── Planners ────────────────────────────────────────────────────────────────

/// Group metadata by (org level, granularity), preserving first-seen
/// order and merging non-adjacent repeats of the same key.
fn group_metas(
  metas: &[ElementMeta],
) -> Vec<((u32, Granularity), Vec<i64>)> {
  let mut groups: Vec<((u32, Granularity), Vec<i64>)> = Vec::new();
  for meta in metas {
    let key = (meta.ou_level, meta.granularity);
    match groups.iter_mut().find(|(k, _)| *k == key) {
      Some((_, ids)) => ids.push(meta.id),
      None => groups.push((key, vec![meta.id])),
    }
  }
  groups
}

/// Build the pivot plan for `metas` at the requested frame.
///
/// `periods` is consulted only for elements whose native granularity is
/// coarser than `granularity`: each requested token fans out into one
/// scan carrying that token's finer labels as constants.
pub fn pivot_plan(
  metas: &[ElementMeta],
  org_level: u32,
  granularity: Granularity,
  periods: &[PeriodSpan],
) -> Result<PivotPlan> {
  if metas.is_empty() {
    return Err(Error::NoElements);
  }

  // Facts sit at each element's native depth; a frame deeper than that
  // has no hierarchy labels to select.
  for meta in metas {
    if org_level > meta.ou_level {
      return Err(Error::OrgLevelTooDeep {
        element:   meta.name.clone(),
        collected: meta.ou_level,
        requested: org_level,
      });
    }
  }

  // A coarser element fans out into one scan per requested period; with
  // no periods it would contribute nothing at all.
  if periods.is_empty()
    && let Some(meta) =
      metas.iter().find(|m| m.granularity.is_coarser_than(granularity))
  {
    return Err(Error::PeriodsRequired { element: meta.name.clone() });
  }

  let frame = Frame { org_level, granularity };

  let mut scans = Vec::new();
  for ((g_level, g_gran), element_ids) in group_metas(metas) {
    if g_gran.is_coarser_than(granularity) {
      for period in periods {
        scans.push(ScanGroup {
          org_level:    g_level,
          granularity:  g_gran,
          element_ids:  element_ids.clone(),
          fixed_period: Some(period.clone()),
        });
      }
    } else {
      scans.push(ScanGroup {
        org_level:    g_level,
        granularity:  g_gran,
        element_ids,
        fixed_period: None,
      });
    }
  }

  let columns = metas
    .iter()
    .map(|m| PivotColumn {
      element_id: m.id,
      divisor:    m.granularity.subdivisions(granularity),
    })
    .collect();

  Ok(PivotPlan { frame, scans, columns })
}

/// Build a calculation plan: a pivot wrapped with derived columns and a
/// period filter.
pub fn calculation_plan(
  metas: &[ElementMeta],
  calculations: Vec<Calculation>,
  org_level: u32,
  granularity: Granularity,
  periods: Vec<PeriodSpan>,
) -> Result<CalculationPlan> {
  let pivot = pivot_plan(metas, org_level, granularity, &periods)?;
  Ok(CalculationPlan { pivot, calculations, periods })
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
  use super::*;
  use crate::period::parse_period;

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
  fn frame_label_columns_order_period_then_hierarchy() {
    let frame = Frame { org_level: 1, granularity: Granularity::Quarter };
    assert_eq!(
      frame.label_columns(),
      vec!["year", "quarter", "country", "district"]
    );
  }

  #[test]
  fn groups_merge_matching_keys() {
    let metas = vec![
      meta(1, "A", 0, Granularity::Year),
      meta(2, "B", 0, Granularity::Quarter),
      meta(3, "C", 0, Granularity::Year),
    ];
    let plan =
      pivot_plan(&metas, 0, Granularity::Year, &[]).unwrap();
    assert_eq!(plan.scans.len(), 2);
    assert_eq!(plan.scans[0].element_ids, vec![1, 3]);
    assert_eq!(plan.scans[1].element_ids, vec![2]);
  }

  #[test]
  fn coarser_group_fans_out_per_period() {
    let metas = vec![meta(1, "A", 0, Granularity::Year)];
    let periods =
      vec![parse_period("2016Q1").unwrap(), parse_period("2016Q2").unwrap()];
    let plan =
      pivot_plan(&metas, 0, Granularity::Quarter, &periods).unwrap();
    assert_eq!(plan.scans.len(), 2);
    assert!(plan.scans.iter().all(|s| s.fixed_period.is_some()));
    assert_eq!(plan.columns[0].divisor, Some(4));
  }

  #[test]
  fn matching_granularity_needs_no_rescale() {
    let metas = vec![meta(1, "A", 0, Granularity::Quarter)];
    let plan =
      pivot_plan(&metas, 0, Granularity::Quarter, &[]).unwrap();
    assert_eq!(plan.scans.len(), 1);
    assert_eq!(plan.scans[0].fixed_period, None);
    assert_eq!(plan.columns[0].divisor, None);
  }

  #[test]
  fn finer_than_frame_aggregates_without_divisor() {
    // Monthly data in an annual frame sums up; no division involved.
    let metas = vec![meta(1, "A", 0, Granularity::Month)];
    let plan = pivot_plan(&metas, 0, Granularity::Year, &[]).unwrap();
    assert_eq!(plan.columns[0].divisor, None);
  }

  #[test]
  fn coarser_group_without_periods_is_rejected() {
    let metas = vec![meta(1, "A", 0, Granularity::Year)];
    let err = pivot_plan(&metas, 0, Granularity::Quarter, &[]).unwrap_err();
    assert!(matches!(
      err,
      Error::PeriodsRequired { ref element } if element == "A"
    ));
  }

  #[test]
  fn frame_deeper_than_collection_is_an_error() {
    let metas = vec![meta(1, "A", 0, Granularity::Year)];
    let err = pivot_plan(&metas, 2, Granularity::Year, &[]).unwrap_err();
    assert!(matches!(
      err,
      Error::OrgLevelTooDeep { collected: 0, requested: 2, .. }
    ));
  }

  #[test]
  fn empty_metas_is_an_error() {
    assert!(matches!(
      pivot_plan(&[], 0, Granularity::Year, &[]),
      Err(Error::NoElements)
    ));
  }

  #[test]
  fn default_frame_selection() {
    let metas = vec![
      meta(1, "A", 0, Granularity::Year),
      meta(2, "B", 2, Granularity::Month),
    ];
    assert_eq!(coarsest_level(&metas), Some(0));
    assert_eq!(finest_granularity(&metas), Some(Granularity::Month));
    assert_eq!(coarsest_granularity(&metas), Some(Granularity::Year));
  }
}
