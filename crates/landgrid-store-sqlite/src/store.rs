//! [`SqliteStore`]: the SQLite implementation of [`ImpactStore`].

use std::{
  collections::{BTreeSet, HashMap},
  path::Path,
};

use chrono::Utc;
use landgrid_core::{
  cache::{CacheEntry, CacheKind},
  cell::CellId,
  derived::AggregateRow,
  grid::{
    DatasetBinding, DatasetOwner, GridData, GridKind, GridPointer, GridValues,
    NewGridDataset, is_plain_identifier,
  },
  reference::{Indicator, Material, UnitConversion},
  region::{NewRegion, Region},
  sourcing::{
    ActiveYears, IndicatorRecord, NewIndicatorRecord, NewSourcingLocation,
    NewSourcingRecord, SourcingLocation, SourcingRecord,
  },
  store::{ImpactStore, LocationFilter},
};
use rusqlite::OptionalExtension as _;
use uuid::Uuid;

use crate::{
  Error, Result,
  encode::{
    LOCATION_COLUMNS, RawBinding, RawCacheEntry, RawGridPointer, RawIndicator,
    RawIndicatorRecord, RawLocation, RawRecord, RawRegion, decode_cell, decode_uuid,
    encode_cell, encode_cells, encode_coefficients, encode_dt, encode_material_basis,
    encode_uuid,
  },
  schema::SCHEMA,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A Landgrid impact store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted. Every call
/// runs on the connection's own thread, one at a time, so a multi-statement
/// call is never interleaved with another.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, for tests.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
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
}

fn check_identifier(name: &str) -> Result<()> {
  if is_plain_identifier(name) {
    Ok(())
  } else {
    Err(Error::InvalidIdentifier(name.to_owned()))
  }
}

/// Append `column IN (?, ?, …)` to `clauses` unless `values` is empty.
fn push_in(
  clauses: &mut Vec<String>,
  params: &mut Vec<String>,
  column: &str,
  values: impl IntoIterator<Item = String>,
) {
  let values: Vec<String> = values.into_iter().collect();
  if values.is_empty() {
    return;
  }
  let marks = vec!["?"; values.len()].join(", ");
  clauses.push(format!("{column} IN ({marks})"));
  params.extend(values);
}

fn placeholders(n: usize) -> String { vec!["?"; n].join(", ") }

/// Ids bound per statement by the id-list reads, well under SQLite's
/// variable limit.
const ID_CHUNK: usize = 500;

const POINTER_COLUMNS: &str =
  "grid_pointer_id, table_name, column_name, resolution, year, kind";

// ─── ImpactStore impl ────────────────────────────────────────────────────────

impl ImpactStore for SqliteStore {
  type Error = Error;

  // ── Reference data ────────────────────────────────────────────────────────

  async fn put_material(&self, material: Material) -> Result<()> {
    let id_str = encode_uuid(material.id);
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO materials (material_id, name) VALUES (?1, ?2)
           ON CONFLICT (material_id) DO UPDATE SET name = excluded.name",
          rusqlite::params![id_str, material.name],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn get_material(&self, id: Uuid) -> Result<Option<Material>> {
    let id_str = encode_uuid(id);
    let name: Option<String> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT name FROM materials WHERE material_id = ?1",
              rusqlite::params![id_str],
              |row| row.get(0),
            )
            .optional()?,
        )
      })
      .await?;
    Ok(name.map(|name| Material { id, name }))
  }

  async fn put_indicator(&self, indicator: Indicator) -> Result<()> {
    let id_str = encode_uuid(indicator.id);
    let unit_str = indicator.unit_id.map(encode_uuid);
    let basis = encode_material_basis(indicator.material_basis);
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO indicators (indicator_id, name, name_code, unit_id, material_basis)
           VALUES (?1, ?2, ?3, ?4, ?5)
           ON CONFLICT (indicator_id) DO UPDATE SET
             name = excluded.name,
             name_code = excluded.name_code,
             unit_id = excluded.unit_id,
             material_basis = excluded.material_basis",
          rusqlite::params![id_str, indicator.name, indicator.name_code, unit_str, basis],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn get_indicator(&self, id: Uuid) -> Result<Option<Indicator>> {
    let id_str = encode_uuid(id);
    let raw: Option<RawIndicator> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT indicator_id, name, name_code, unit_id, material_basis
               FROM indicators WHERE indicator_id = ?1",
              rusqlite::params![id_str],
              |row| {
                Ok(RawIndicator {
                  indicator_id:   row.get(0)?,
                  name:           row.get(1)?,
                  name_code:      row.get(2)?,
                  unit_id:        row.get(3)?,
                  material_basis: row.get(4)?,
                })
              },
            )
            .optional()?,
        )
      })
      .await?;
    raw.map(RawIndicator::into_indicator).transpose()
  }

  async fn put_unit_conversion(&self, conversion: UnitConversion) -> Result<()> {
    let id_str = encode_uuid(conversion.unit_id);
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO unit_conversions (unit_id, symbol, factor) VALUES (?1, ?2, ?3)
           ON CONFLICT (unit_id) DO UPDATE SET
             symbol = excluded.symbol,
             factor = excluded.factor",
          rusqlite::params![id_str, conversion.symbol, conversion.factor],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn get_unit_conversion(&self, unit_id: Uuid) -> Result<Option<UnitConversion>> {
    let id_str = encode_uuid(unit_id);
    let row: Option<(String, Option<f64>)> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT symbol, factor FROM unit_conversions WHERE unit_id = ?1",
              rusqlite::params![id_str],
              |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?,
        )
      })
      .await?;
    Ok(row.map(|(symbol, factor)| UnitConversion { unit_id, symbol, factor }))
  }

  // ── Grid data ─────────────────────────────────────────────────────────────

  async fn create_grid_dataset(&self, dataset: NewGridDataset) -> Result<GridPointer> {
    check_identifier(&dataset.table_name)?;
    check_identifier(&dataset.column_name)?;
    dataset.validate()?;

    let pointer = GridPointer {
      id:          Uuid::new_v4(),
      table_name:  dataset.table_name,
      column_name: dataset.column_name,
      resolution:  dataset.resolution,
      year:        dataset.year,
      kind:        dataset.kind,
    };

    let id_str = encode_uuid(pointer.id);
    let table = pointer.table_name.clone();
    let column = pointer.column_name.clone();
    let resolution = pointer.resolution;
    let year = pointer.year;
    let kind_str = pointer.kind.as_str();
    let values: Vec<(i64, f64)> = dataset
      .values
      .into_iter()
      .map(|(cell, v)| (encode_cell(cell), v))
      .collect();

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        tx.execute_batch(&format!(
          "CREATE TABLE IF NOT EXISTS \"{table}\" (h3index INTEGER PRIMARY KEY)"
        ))?;

        let has_column = {
          let mut stmt = tx.prepare(&format!("PRAGMA table_info(\"{table}\")"))?;
          let names = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
          names.iter().any(|n| n == &column)
        };
        if !has_column {
          tx.execute_batch(&format!(
            "ALTER TABLE \"{table}\" ADD COLUMN \"{column}\" REAL"
          ))?;
        }

        {
          let mut stmt = tx.prepare(&format!(
            "INSERT INTO \"{table}\" (h3index, \"{column}\") VALUES (?1, ?2)
             ON CONFLICT (h3index) DO UPDATE SET \"{column}\" = excluded.\"{column}\""
          ))?;
          for (cell, value) in &values {
            stmt.execute(rusqlite::params![cell, value])?;
          }
        }

        tx.execute(
          &format!("INSERT INTO grid_pointers ({POINTER_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)"),
          rusqlite::params![id_str, table, column, resolution, year, kind_str],
        )?;
        tx.commit()?;
        Ok(())
      })
      .await?;

    tracing::debug!(dataset = %pointer, "grid dataset created");
    Ok(pointer)
  }

  async fn get_grid_pointer(&self, id: Uuid) -> Result<Option<GridPointer>> {
    let id_str = encode_uuid(id);
    let raw: Option<RawGridPointer> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!("SELECT {POINTER_COLUMNS} FROM grid_pointers WHERE grid_pointer_id = ?1"),
              rusqlite::params![id_str],
              |row| RawGridPointer::from_row(row, 0),
            )
            .optional()?,
        )
      })
      .await?;
    raw.map(RawGridPointer::into_pointer).transpose()
  }

  async fn grid_values<'a>(
    &'a self,
    pointer: &'a GridPointer,
    cells: Option<&'a BTreeSet<CellId>>,
  ) -> Result<GridData> {
    check_identifier(&pointer.table_name)?;
    check_identifier(&pointer.column_name)?;

    let table = pointer.table_name.clone();
    let column = pointer.column_name.clone();
    let wanted: Option<Vec<i64>> =
      cells.map(|set| set.iter().copied().map(encode_cell).collect());

    let rows: Vec<(i64, f64)> = self
      .conn
      .call(move |conn| {
        let rows = match wanted {
          None => {
            let mut stmt = conn.prepare(&format!(
              "SELECT h3index, \"{column}\" FROM \"{table}\" WHERE \"{column}\" IS NOT NULL"
            ))?;
            stmt
              .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
              .collect::<rusqlite::Result<Vec<_>>>()?
          }
          Some(wanted) => {
            let mut stmt = conn.prepare(&format!(
              "SELECT \"{column}\" FROM \"{table}\" WHERE h3index = ?1 AND \"{column}\" IS NOT NULL"
            ))?;
            let mut rows = Vec::new();
            for cell in wanted {
              if let Some(v) = stmt
                .query_row(rusqlite::params![cell], |row| row.get::<_, f64>(0))
                .optional()?
              {
                rows.push((cell, v));
              }
            }
            rows
          }
        };
        Ok(rows)
      })
      .await?;

    let values = rows
      .into_iter()
      .map(|(cell, v)| Ok((decode_cell(cell)?, v)))
      .collect::<Result<GridValues>>()?;
    Ok(GridData { pointer: pointer.clone(), values })
  }

  async fn bind_dataset(
    &self,
    owner: DatasetOwner,
    kind: GridKind,
    year: i32,
    grid_pointer_id: Uuid,
  ) -> Result<DatasetBinding> {
    if self.get_grid_pointer(grid_pointer_id).await?.is_none() {
      return Err(Error::GridPointerNotFound(grid_pointer_id));
    }

    let binding = DatasetBinding {
      id: Uuid::new_v4(),
      owner,
      kind,
      year,
      grid_pointer_id,
      created_at: Utc::now(),
    };

    let id_str = encode_uuid(binding.id);
    let owner_kind = owner.kind_str();
    let owner_str = encode_uuid(owner.id());
    let kind_str = kind.as_str();
    let pointer_str = encode_uuid(grid_pointer_id);
    let at_str = encode_dt(binding.created_at);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO dataset_bindings
             (binding_id, owner_kind, owner_id, kind, year, grid_pointer_id, created_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
          rusqlite::params![id_str, owner_kind, owner_str, kind_str, year, pointer_str, at_str],
        )?;
        Ok(())
      })
      .await?;

    Ok(binding)
  }

  async fn bindings_for(
    &self,
    owner: DatasetOwner,
    kind: GridKind,
  ) -> Result<Vec<(DatasetBinding, GridPointer)>> {
    let owner_kind = owner.kind_str();
    let owner_str = encode_uuid(owner.id());
    let kind_str = kind.as_str();

    let raws: Vec<(RawBinding, RawGridPointer)> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT
             b.binding_id, b.owner_kind, b.owner_id, b.kind, b.year,
             b.grid_pointer_id, b.created_at,
             p.grid_pointer_id, p.table_name, p.column_name, p.resolution,
             p.year, p.kind
           FROM dataset_bindings b
           JOIN grid_pointers p ON p.grid_pointer_id = b.grid_pointer_id
           WHERE b.owner_kind = ?1 AND b.owner_id = ?2 AND b.kind = ?3
           ORDER BY b.created_at",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![owner_kind, owner_str, kind_str], |row| {
            Ok((
              RawBinding {
                binding_id:      row.get(0)?,
                owner_kind:      row.get(1)?,
                owner_id:        row.get(2)?,
                kind:            row.get(3)?,
                year:            row.get(4)?,
                grid_pointer_id: row.get(5)?,
                created_at:      row.get(6)?,
              },
              RawGridPointer::from_row(row, 7)?,
            ))
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws
      .into_iter()
      .map(|(b, p)| Ok((b.into_binding()?, p.into_pointer()?)))
      .collect()
  }

  // ── Regions ───────────────────────────────────────────────────────────────

  async fn add_region(&self, input: NewRegion) -> Result<Region> {
    let region = Region {
      id:              Uuid::new_v4(),
      name:            input.name,
      cells:           input.cells,
      created_by_user: input.created_by_user,
      created_at:      Utc::now(),
    };

    let id_str = encode_uuid(region.id);
    let name = region.name.clone();
    let cells_str = encode_cells(&region.cells)?;
    let by_user = region.created_by_user;
    let at_str = encode_dt(region.created_at);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO regions (region_id, name, cells, created_by_user, created_at)
           VALUES (?1, ?2, ?3, ?4, ?5)",
          rusqlite::params![id_str, name, cells_str, by_user, at_str],
        )?;
        Ok(())
      })
      .await?;

    Ok(region)
  }

  async fn get_region(&self, id: Uuid) -> Result<Option<Region>> {
    let id_str = encode_uuid(id);
    let raw: Option<RawRegion> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT region_id, name, cells, created_by_user, created_at
               FROM regions WHERE region_id = ?1",
              rusqlite::params![id_str],
              |row| {
                Ok(RawRegion {
                  region_id:       row.get(0)?,
                  name:            row.get(1)?,
                  cells:           row.get(2)?,
                  created_by_user: row.get(3)?,
                  created_at:      row.get(4)?,
                })
              },
            )
            .optional()?,
        )
      })
      .await?;
    raw.map(RawRegion::into_region).transpose()
  }

  async fn delete_user_regions(&self) -> Result<usize> {
    let removed = self
      .conn
      .call(|conn| Ok(conn.execute("DELETE FROM regions WHERE created_by_user = 1", [])?))
      .await?;
    Ok(removed)
  }

  // ── Sourcing ──────────────────────────────────────────────────────────────

  async fn add_sourcing_locations(
    &self,
    inputs: Vec<NewSourcingLocation>,
  ) -> Result<Vec<SourcingLocation>> {
    let now = Utc::now();
    let locations: Vec<SourcingLocation> = inputs
      .into_iter()
      .map(|input| SourcingLocation {
        id:                     Uuid::new_v4(),
        material_id:            input.material_id,
        t1_supplier_id:         input.t1_supplier_id,
        producer_id:            input.producer_id,
        business_unit_id:       input.business_unit_id,
        region_id:              input.region_id,
        admin_region_id:        input.admin_region_id,
        location_type:          input.location_type,
        intervention_type:      input.intervention_type,
        scenario_id:            input.scenario_id,
        forked_from:            input.forked_from,
        active_years:           input.active_years,
        indicator_coefficients: input.indicator_coefficients,
        created_at:             now,
      })
      .collect();

    type Encoded = (
      String,
      String,
      Option<String>,
      Option<String>,
      Option<String>,
      String,
      String,
      &'static str,
      &'static str,
      Option<String>,
      Option<String>,
      Option<i32>,
      Option<i32>,
      String,
      String,
    );
    let encoded: Vec<Encoded> = locations
      .iter()
      .map(|l| {
        Ok((
          encode_uuid(l.id),
          encode_uuid(l.material_id),
          l.t1_supplier_id.map(encode_uuid),
          l.producer_id.map(encode_uuid),
          l.business_unit_id.map(encode_uuid),
          encode_uuid(l.region_id),
          encode_uuid(l.admin_region_id),
          l.location_type.as_str(),
          l.intervention_type.as_str(),
          l.scenario_id.map(encode_uuid),
          l.forked_from.map(encode_uuid),
          l.active_years.from,
          l.active_years.until,
          encode_coefficients(&l.indicator_coefficients)?,
          encode_dt(l.created_at),
        ))
      })
      .collect::<Result<_>>()?;

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        {
          let mut stmt = tx.prepare(&format!(
            "INSERT INTO sourcing_locations ({LOCATION_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)"
          ))?;
          for row in &encoded {
            stmt.execute(rusqlite::params![
              row.0, row.1, row.2, row.3, row.4, row.5, row.6, row.7, row.8, row.9,
              row.10, row.11, row.12, row.13, row.14,
            ])?;
          }
        }
        tx.commit()?;
        Ok(())
      })
      .await?;

    Ok(locations)
  }

  async fn get_sourcing_location(&self, id: Uuid) -> Result<Option<SourcingLocation>> {
    let id_str = encode_uuid(id);
    let raw: Option<RawLocation> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {LOCATION_COLUMNS} FROM sourcing_locations
                 WHERE sourcing_location_id = ?1"
              ),
              rusqlite::params![id_str],
              RawLocation::from_row,
            )
            .optional()?,
        )
      })
      .await?;
    raw.map(RawLocation::into_location).transpose()
  }

  async fn find_sourcing_locations<'a>(
    &'a self,
    filter: &'a LocationFilter,
  ) -> Result<Vec<SourcingLocation>> {
    let mut clauses = Vec::new();
    let mut params = Vec::new();
    let ids = |v: &Vec<Uuid>| v.iter().copied().map(encode_uuid).collect::<Vec<_>>();

    push_in(&mut clauses, &mut params, "material_id", ids(&filter.material_ids));
    push_in(&mut clauses, &mut params, "t1_supplier_id", ids(&filter.t1_supplier_ids));
    push_in(&mut clauses, &mut params, "producer_id", ids(&filter.producer_ids));
    push_in(&mut clauses, &mut params, "business_unit_id", ids(&filter.business_unit_ids));
    push_in(&mut clauses, &mut params, "admin_region_id", ids(&filter.origin_ids));
    push_in(
      &mut clauses,
      &mut params,
      "location_type",
      filter.location_types.iter().map(|t| t.as_str().to_owned()),
    );
    match filter.scenario_id {
      None => clauses.push("scenario_id IS NULL".into()),
      Some(s) => {
        clauses.push("(scenario_id IS NULL OR scenario_id = ?)".into());
        params.push(encode_uuid(s));
      }
    }

    let sql = format!(
      "SELECT {LOCATION_COLUMNS} FROM sourcing_locations WHERE {}
       ORDER BY created_at, sourcing_location_id",
      clauses.join(" AND ")
    );

    let raws: Vec<RawLocation> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params_from_iter(params.iter()), RawLocation::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawLocation::into_location).collect()
  }

  async fn forked_locations(&self, scenario_id: Uuid) -> Result<HashMap<Uuid, ActiveYears>> {
    let id_str = encode_uuid(scenario_id);
    let raws: Vec<(String, Option<i32>, Option<i32>)> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT forked_from, active_from, active_until FROM sourcing_locations
           WHERE scenario_id = ?1 AND forked_from IS NOT NULL",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![id_str], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    raws
      .into_iter()
      .map(|(id, from, until)| Ok((decode_uuid(&id)?, ActiveYears { from, until })))
      .collect()
  }

  async fn delete_scenario_locations(&self, scenario_id: Uuid) -> Result<usize> {
    let id_str = encode_uuid(scenario_id);
    let removed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "DELETE FROM sourcing_locations WHERE scenario_id = ?1",
          rusqlite::params![id_str],
        )?)
      })
      .await?;
    Ok(removed)
  }

  async fn add_sourcing_record(&self, input: NewSourcingRecord) -> Result<SourcingRecord> {
    let record = SourcingRecord {
      id:                   Uuid::new_v4(),
      sourcing_location_id: input.sourcing_location_id,
      year:                 input.year,
      volume:               input.volume,
    };

    let id_str = encode_uuid(record.id);
    let location_str = encode_uuid(record.sourcing_location_id);
    let (year, volume) = (record.year, record.volume);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO sourcing_records (sourcing_record_id, sourcing_location_id, year, volume)
           VALUES (?1, ?2, ?3, ?4)",
          rusqlite::params![id_str, location_str, year, volume],
        )?;
        Ok(())
      })
      .await?;

    Ok(record)
  }

  async fn sourcing_records_for<'a>(
    &'a self,
    location_ids: &'a [Uuid],
    start_year: i32,
    end_year: i32,
  ) -> Result<Vec<SourcingRecord>> {
    if location_ids.is_empty() {
      return Ok(Vec::new());
    }
    let chunks: Vec<Vec<String>> = location_ids
      .chunks(ID_CHUNK)
      .map(|chunk| chunk.iter().copied().map(encode_uuid).collect())
      .collect();

    let mut raws: Vec<RawRecord> = self
      .conn
      .call(move |conn| {
        let mut rows = Vec::new();
        for chunk in &chunks {
          let sql = format!(
            "SELECT sourcing_record_id, sourcing_location_id, year, volume
             FROM sourcing_records
             WHERE sourcing_location_id IN ({}) AND year >= ? AND year <= ?",
            placeholders(chunk.len())
          );
          let mut params: Vec<rusqlite::types::Value> = chunk
            .iter()
            .cloned()
            .map(rusqlite::types::Value::Text)
            .collect();
          params.push(rusqlite::types::Value::Integer(start_year.into()));
          params.push(rusqlite::types::Value::Integer(end_year.into()));

          let mut stmt = conn.prepare(&sql)?;
          let found = stmt.query_map(rusqlite::params_from_iter(params), |row| {
            Ok(RawRecord {
              sourcing_record_id:   row.get(0)?,
              sourcing_location_id: row.get(1)?,
              year:                 row.get(2)?,
              volume:               row.get(3)?,
            })
          })?;
          for raw in found {
            rows.push(raw?);
          }
        }
        Ok(rows)
      })
      .await?;

    raws.sort_by(|a, b| {
      (a.year, &a.sourcing_record_id).cmp(&(b.year, &b.sourcing_record_id))
    });
    raws.into_iter().map(RawRecord::into_record).collect()
  }

  async fn add_indicator_record(&self, input: NewIndicatorRecord) -> Result<IndicatorRecord> {
    let record = IndicatorRecord {
      id:                 Uuid::new_v4(),
      sourcing_record_id: input.sourcing_record_id,
      indicator_id:       input.indicator_id,
      value:              input.value,
    };

    let id_str = encode_uuid(record.id);
    let sourcing_str = encode_uuid(record.sourcing_record_id);
    let indicator_str = encode_uuid(record.indicator_id);
    let value = record.value;

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO indicator_records
             (indicator_record_id, sourcing_record_id, indicator_id, value)
           VALUES (?1, ?2, ?3, ?4)",
          rusqlite::params![id_str, sourcing_str, indicator_str, value],
        )?;
        Ok(())
      })
      .await?;

    Ok(record)
  }

  async fn indicator_records_for<'a>(
    &'a self,
    sourcing_record_ids: &'a [Uuid],
    indicator_ids: &'a [Uuid],
  ) -> Result<Vec<IndicatorRecord>> {
    if sourcing_record_ids.is_empty() || indicator_ids.is_empty() {
      return Ok(Vec::new());
    }
    let indicators: Vec<String> = indicator_ids.iter().copied().map(encode_uuid).collect();
    let chunks: Vec<Vec<String>> = sourcing_record_ids
      .chunks(ID_CHUNK)
      .map(|chunk| chunk.iter().copied().map(encode_uuid).collect())
      .collect();

    let raws: Vec<RawIndicatorRecord> = self
      .conn
      .call(move |conn| {
        let mut rows = Vec::new();
        for chunk in &chunks {
          let sql = format!(
            "SELECT indicator_record_id, sourcing_record_id, indicator_id, value
             FROM indicator_records
             WHERE sourcing_record_id IN ({}) AND indicator_id IN ({})",
            placeholders(chunk.len()),
            placeholders(indicators.len())
          );
          let mut stmt = conn.prepare(&sql)?;
          let found = stmt.query_map(
            rusqlite::params_from_iter(chunk.iter().chain(&indicators)),
            |row| {
              Ok(RawIndicatorRecord {
                indicator_record_id: row.get(0)?,
                sourcing_record_id:  row.get(1)?,
                indicator_id:        row.get(2)?,
                value:               row.get(3)?,
              })
            },
          )?;
          for raw in found {
            rows.push(raw?);
          }
        }
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawIndicatorRecord::into_record).collect()
  }

  // ── Derived aggregate ─────────────────────────────────────────────────────

  async fn aggregate_sources(&self) -> Result<Vec<(Uuid, Uuid)>> {
    let raws: Vec<(String, String)> = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare(
          "SELECT DISTINCT region_id, material_id FROM sourcing_locations
           WHERE intervention_type != 'CANCELLED'
           ORDER BY region_id, material_id",
        )?;
        let rows = stmt
          .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    raws
      .iter()
      .map(|(r, m)| Ok((decode_uuid(r)?, decode_uuid(m)?)))
      .collect()
  }

  async fn aggregate_row_count(&self) -> Result<u64> {
    let count: i64 = self
      .conn
      .call(|conn| {
        Ok(conn.query_row("SELECT COUNT(*) FROM derived_aggregate", [], |row| row.get(0))?)
      })
      .await?;
    Ok(u64::try_from(count).unwrap_or_default())
  }

  async fn replace_aggregate(&self, rows: Vec<AggregateRow>) -> Result<()> {
    let encoded: Vec<(String, String, i64, f64)> = rows
      .iter()
      .map(|r| {
        (
          encode_uuid(r.region_id),
          encode_uuid(r.dataset_id),
          encode_cell(r.cell),
          r.value,
        )
      })
      .collect();

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM derived_aggregate", [])?;
        {
          let mut stmt = tx.prepare(
            "INSERT OR REPLACE INTO derived_aggregate (region_id, dataset_id, h3index, value)
             VALUES (?1, ?2, ?3, ?4)",
          )?;
          for (region, dataset, cell, value) in &encoded {
            stmt.execute(rusqlite::params![region, dataset, cell, value])?;
          }
        }
        tx.commit()?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn aggregate_rows<'a>(&'a self, keys: &'a [(Uuid, Uuid)]) -> Result<Vec<AggregateRow>> {
    let encoded: Vec<(String, String)> = keys
      .iter()
      .map(|(r, d)| (encode_uuid(*r), encode_uuid(*d)))
      .collect();

    let rows: Vec<(usize, i64, f64)> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT h3index, value FROM derived_aggregate
           WHERE region_id = ?1 AND dataset_id = ?2
           ORDER BY h3index",
        )?;
        let mut out = Vec::new();
        for (index, (region, dataset)) in encoded.iter().enumerate() {
          let rows = stmt
            .query_map(rusqlite::params![region, dataset], |row| {
              Ok((index, row.get(0)?, row.get(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
          out.extend(rows);
        }
        Ok(out)
      })
      .await?;

    rows
      .into_iter()
      .map(|(index, cell, value)| {
        let (region_id, dataset_id) = keys[index];
        Ok(AggregateRow { region_id, dataset_id, cell: decode_cell(cell)?, value })
      })
      .collect()
  }

  // ── Cache ─────────────────────────────────────────────────────────────────

  async fn cache_get<'a>(
    &'a self,
    hashed_key: &'a str,
    kind: CacheKind,
  ) -> Result<Option<CacheEntry>> {
    let key = hashed_key.to_owned();
    let kind_str = kind.as_str();
    let raw: Option<RawCacheEntry> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT hashed_key, kind, payload, created_at FROM cache_entries
               WHERE hashed_key = ?1 AND kind = ?2",
              rusqlite::params![key, kind_str],
              |row| {
                Ok(RawCacheEntry {
                  hashed_key: row.get(0)?,
                  kind:       row.get(1)?,
                  payload:    row.get(2)?,
                  created_at: row.get(3)?,
                })
              },
            )
            .optional()?,
        )
      })
      .await?;
    raw.map(RawCacheEntry::into_entry).transpose()
  }

  async fn cache_put(&self, entry: CacheEntry) -> Result<()> {
    let kind_str = entry.kind.as_str();
    let payload = entry.payload.to_string();
    let at_str = encode_dt(entry.created_at);
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO cache_entries (hashed_key, kind, payload, created_at)
           VALUES (?1, ?2, ?3, ?4)
           ON CONFLICT (hashed_key, kind) DO UPDATE SET
             payload = excluded.payload,
             created_at = excluded.created_at",
          rusqlite::params![entry.hashed_key, kind_str, payload, at_str],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn cache_clear(&self) -> Result<usize> {
    let removed = self
      .conn
      .call(|conn| Ok(conn.execute("DELETE FROM cache_entries", [])?))
      .await?;
    Ok(removed)
  }
}
