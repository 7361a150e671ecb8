//! SQL schema for the Tally SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! the `user_version` pragma.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

-- The organisation hierarchy: country at level 0, then district,
-- subcounty, facility. Nodes are created on first reference and never
-- deleted.
CREATE TABLE IF NOT EXISTS org_units (
    org_unit_id INTEGER PRIMARY KEY,
    name        TEXT NOT NULL,
    parent_id   INTEGER REFERENCES org_units(org_unit_id),
    level       INTEGER NOT NULL,
    UNIQUE (name, parent_id)
);

-- NULL parents compare distinct under UNIQUE; pin root names separately.
CREATE UNIQUE INDEX IF NOT EXISTS org_units_root_idx
    ON org_units(name) WHERE parent_id IS NULL;

-- Names and aliases form one shared case-insensitive namespace; the
-- cross-column half of that check lives in the store.
CREATE TABLE IF NOT EXISTS data_elements (
    data_element_id    INTEGER PRIMARY KEY,
    name               TEXT NOT NULL COLLATE NOCASE UNIQUE,
    alias              TEXT COLLATE NOCASE UNIQUE,
    value_type         TEXT NOT NULL DEFAULT 'number',
    value_min          REAL,
    value_max          REAL,
    aggregation_method TEXT NOT NULL DEFAULT 'sum'
);

CREATE TABLE IF NOT EXISTS categories (
    category_id INTEGER PRIMARY KEY,
    name        TEXT NOT NULL UNIQUE
);

-- A combo's name is canonical (sorted member names), so the name alone
-- identifies the set.
CREATE TABLE IF NOT EXISTS category_combos (
    combo_id INTEGER PRIMARY KEY,
    name     TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS category_combo_members (
    combo_id    INTEGER NOT NULL REFERENCES category_combos(combo_id),
    category_id INTEGER NOT NULL REFERENCES categories(category_id),
    PRIMARY KEY (combo_id, category_id)
);

INSERT OR IGNORE INTO category_combos (combo_id, name) VALUES (1, '(default)');

CREATE TABLE IF NOT EXISTS source_docs (
    doc_id        TEXT PRIMARY KEY,
    orig_filename TEXT NOT NULL,
    uploaded_at   TEXT NOT NULL
);

-- One fact per (element, combo, org unit, period) coordinate. quarter and
-- month are NULL above the fact's native granularity, and NULLs compare
-- distinct under UNIQUE, so the coordinate index coalesces them.
CREATE TABLE IF NOT EXISTS data_values (
    value_id        INTEGER PRIMARY KEY,
    data_element_id INTEGER NOT NULL REFERENCES data_elements(data_element_id),
    combo_id        INTEGER NOT NULL REFERENCES category_combos(combo_id),
    org_unit_id     INTEGER NOT NULL REFERENCES org_units(org_unit_id),
    year            TEXT NOT NULL,
    quarter         TEXT,
    month           TEXT,
    numeric_value   REAL NOT NULL,
    doc_id          TEXT REFERENCES source_docs(doc_id)
);

CREATE UNIQUE INDEX IF NOT EXISTS data_values_coord_idx
    ON data_values(data_element_id, combo_id, org_unit_id, year,
                   COALESCE(quarter, ''), COALESCE(month, ''));

CREATE INDEX IF NOT EXISTS data_values_element_idx
    ON data_values(data_element_id);
CREATE INDEX IF NOT EXISTS data_values_org_idx
    ON data_values(org_unit_id);

CREATE TABLE IF NOT EXISTS validation_rules (
    rule_id    INTEGER PRIMARY KEY,
    name       TEXT NOT NULL UNIQUE,
    left_expr  TEXT NOT NULL,
    right_expr TEXT NOT NULL,
    operator   TEXT NOT NULL
);

-- Derived from the rule's expression text on every save; kept in exact
-- sync with what the expression references.
CREATE TABLE IF NOT EXISTS validation_rule_elements (
    rule_id         INTEGER NOT NULL REFERENCES validation_rules(rule_id),
    data_element_id INTEGER NOT NULL REFERENCES data_elements(data_element_id),
    PRIMARY KEY (rule_id, data_element_id)
);

PRAGMA user_version = 1;
";
