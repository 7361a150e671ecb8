//! Organisation-unit hierarchy types.
//!
//! The hierarchy is a single rooted tree (country at level 0, then
//! district, subcounty, facility). Nodes are created on first reference
//! during ingestion and never deleted; the tree itself lives in the store,
//! which resolves paths root-to-leaf.

use serde::{Deserialize, Serialize};

/// Column labels for the named levels of the hierarchy, coarsest first.
pub const ORG_FIELDS: [&str; 4] = ["country", "district", "subcounty", "facility"];

/// The deepest supported level (facility).
pub const MAX_ORG_LEVEL: u32 = ORG_FIELDS.len() as u32 - 1;

/// The hierarchy field list needed to select or group at `level`:
/// the prefix of (country, district, subcounty, facility) of length
/// `level + 1`, capped at the deepest supported level.
pub fn org_fields(level: u32) -> &'static [&'static str] {
  let len = (level as usize + 1).min(ORG_FIELDS.len());
  &ORG_FIELDS[..len]
}

/// A node in the organisation-unit tree.
///
/// `(name, parent)` is unique among siblings; `level` is the depth from
/// the root (root = 0) and is fixed once descendants exist below it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrgUnit {
  pub org_unit_id: i64,
  pub name:        String,
  pub parent_id:   Option<i64>,
  pub level:       u32,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn org_fields_are_level_prefixes() {
    assert_eq!(org_fields(0), &["country"]);
    assert_eq!(org_fields(2), &["country", "district", "subcounty"]);
    assert_eq!(org_fields(3), &ORG_FIELDS);
    // Deeper requests are capped rather than panicking.
    assert_eq!(org_fields(9), &ORG_FIELDS);
  }
}
