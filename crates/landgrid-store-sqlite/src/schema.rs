//! SQL schema for the Landgrid SQLite store.
//!
//! Executed once at connection startup. Grid value tables are not listed
//! here; they are created on demand by `create_grid_dataset`, one table per
//! `grid_pointers.table_name`, with `h3index INTEGER PRIMARY KEY`.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS materials (
    material_id TEXT PRIMARY KEY,
    name        TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS indicators (
    indicator_id   TEXT PRIMARY KEY,
    name           TEXT NOT NULL,
    name_code      TEXT NOT NULL,
    unit_id        TEXT,
    material_basis TEXT NOT NULL DEFAULT 'harvest'   -- 'producer' | 'harvest'
);

CREATE TABLE IF NOT EXISTS unit_conversions (
    unit_id TEXT PRIMARY KEY,
    symbol  TEXT NOT NULL,
    factor  REAL
);

CREATE TABLE IF NOT EXISTS grid_pointers (
    grid_pointer_id TEXT PRIMARY KEY,
    table_name      TEXT NOT NULL,
    column_name     TEXT NOT NULL,
    resolution      INTEGER NOT NULL,
    year            INTEGER,
    kind            TEXT NOT NULL,   -- 'producer' | 'harvest' | 'indicator'
    UNIQUE (table_name, column_name)
);

-- Append-only. A newer binding for the same (owner, kind, year) wins.
CREATE TABLE IF NOT EXISTS dataset_bindings (
    binding_id      TEXT PRIMARY KEY,
    owner_kind      TEXT NOT NULL,   -- 'material' | 'indicator'
    owner_id        TEXT NOT NULL,
    kind            TEXT NOT NULL,
    year            INTEGER NOT NULL,
    grid_pointer_id TEXT NOT NULL REFERENCES grid_pointers(grid_pointer_id),
    created_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS regions (
    region_id       TEXT PRIMARY KEY,
    name            TEXT,
    cells           TEXT NOT NULL,   -- JSON array of compacted hex cell ids
    created_by_user INTEGER NOT NULL DEFAULT 0,
    created_at      TEXT NOT NULL
);

-- Baseline rows are never updated. Scenario rows point at their baseline
-- row through forked_from.
CREATE TABLE IF NOT EXISTS sourcing_locations (
    sourcing_location_id   TEXT PRIMARY KEY,
    material_id            TEXT NOT NULL,
    t1_supplier_id         TEXT,
    producer_id            TEXT,
    business_unit_id       TEXT,
    region_id              TEXT NOT NULL,
    admin_region_id        TEXT NOT NULL,
    location_type          TEXT NOT NULL DEFAULT 'unknown',
    intervention_type      TEXT NOT NULL DEFAULT 'ORIGINAL',
    scenario_id            TEXT,
    forked_from            TEXT REFERENCES sourcing_locations(sourcing_location_id),
    -- Inclusive year window of a scenario row; NULL is unbounded.
    active_from            INTEGER,
    active_until           INTEGER,
    -- JSON object of indicator id to impact scale.
    indicator_coefficients TEXT NOT NULL DEFAULT '{}',
    created_at             TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS sourcing_records (
    sourcing_record_id   TEXT PRIMARY KEY,
    sourcing_location_id TEXT NOT NULL REFERENCES sourcing_locations(sourcing_location_id),
    year                 INTEGER NOT NULL,
    volume               REAL NOT NULL
);

CREATE TABLE IF NOT EXISTS indicator_records (
    indicator_record_id TEXT PRIMARY KEY,
    sourcing_record_id  TEXT NOT NULL REFERENCES sourcing_records(sourcing_record_id),
    indicator_id        TEXT NOT NULL,
    value               REAL NOT NULL
);

-- Rebuilt wholesale; see replace_aggregate.
CREATE TABLE IF NOT EXISTS derived_aggregate (
    region_id  TEXT NOT NULL,
    dataset_id TEXT NOT NULL,
    h3index    INTEGER NOT NULL,
    value      REAL NOT NULL,
    PRIMARY KEY (region_id, dataset_id, h3index)
);

CREATE TABLE IF NOT EXISTS cache_entries (
    hashed_key TEXT NOT NULL,
    kind       TEXT NOT NULL,
    payload    TEXT NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (hashed_key, kind)
);

CREATE INDEX IF NOT EXISTS bindings_owner_idx   ON dataset_bindings(owner_kind, owner_id, kind);
CREATE INDEX IF NOT EXISTS locations_scenario_idx ON sourcing_locations(scenario_id);
CREATE INDEX IF NOT EXISTS locations_forked_idx ON sourcing_locations(forked_from);
CREATE INDEX IF NOT EXISTS records_location_idx ON sourcing_records(sourcing_location_id, year);
CREATE INDEX IF NOT EXISTS indicator_records_idx ON indicator_records(sourcing_record_id);

PRAGMA user_version = 1;
";
