//! Encoding and decoding helpers between Rust domain types and the plain
//! representations stored in SQLite columns.
//!
//! Timestamps are RFC 3339 strings and UUIDs hyphenated lowercase strings.
//! Cell ids are stored as the signed reinterpretation of their 64-bit index
//! (bit 63 is always clear, so the value is non-negative). Compacted region
//! cell sets are JSON arrays of hex ids.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use landgrid_core::{
  cache::{CacheEntry, CacheKind},
  cell::CellId,
  grid::{DatasetBinding, DatasetOwner, GridKind, GridPointer},
  reference::{Indicator, MaterialBasis},
  region::Region,
  sourcing::{
    ActiveYears, IndicatorRecord, InterventionType, LocationType, SourcingLocation,
    SourcingRecord,
  },
};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Scalars ─────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

pub fn decode_opt_uuid(s: Option<&str>) -> Result<Option<Uuid>> {
  s.map(decode_uuid).transpose()
}

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

pub fn encode_cell(cell: CellId) -> i64 { cell.raw() as i64 }

pub fn decode_cell(raw: i64) -> Result<CellId> {
  CellId::new(raw as u64).map_err(|e| Error::Decode(e.to_string()))
}

pub fn encode_cells(cells: &BTreeSet<CellId>) -> Result<String> {
  Ok(serde_json::to_string(cells)?)
}

pub fn decode_cells(s: &str) -> Result<BTreeSet<CellId>> {
  Ok(serde_json::from_str(s)?)
}

pub fn encode_coefficients(coefficients: &BTreeMap<Uuid, f64>) -> Result<String> {
  Ok(serde_json::to_string(coefficients)?)
}

pub fn decode_coefficients(s: &str) -> Result<BTreeMap<Uuid, f64>> {
  Ok(serde_json::from_str(s)?)
}

// ─── Enums ───────────────────────────────────────────────────────────────────

pub fn decode_grid_kind(s: &str) -> Result<GridKind> {
  match s {
    "producer" => Ok(GridKind::Producer),
    "harvest" => Ok(GridKind::Harvest),
    "indicator" => Ok(GridKind::Indicator),
    other => Err(Error::Decode(format!("unknown grid kind: {other:?}"))),
  }
}

pub fn encode_material_basis(b: MaterialBasis) -> &'static str {
  match b {
    MaterialBasis::Producer => "producer",
    MaterialBasis::Harvest => "harvest",
  }
}

pub fn decode_material_basis(s: &str) -> Result<MaterialBasis> {
  match s {
    "producer" => Ok(MaterialBasis::Producer),
    "harvest" => Ok(MaterialBasis::Harvest),
    other => Err(Error::Decode(format!("unknown material basis: {other:?}"))),
  }
}

pub fn decode_owner(kind: &str, id: &str) -> Result<DatasetOwner> {
  let id = decode_uuid(id)?;
  match kind {
    "material" => Ok(DatasetOwner::Material(id)),
    "indicator" => Ok(DatasetOwner::Indicator(id)),
    other => Err(Error::Decode(format!("unknown dataset owner: {other:?}"))),
  }
}

pub fn decode_location_type(s: &str) -> Result<LocationType> {
  match s {
    "unknown" => Ok(LocationType::Unknown),
    "point-of-production" => Ok(LocationType::PointOfProduction),
    "production-aggregation-point" => Ok(LocationType::ProductionAggregationPoint),
    "country-of-production" => Ok(LocationType::CountryOfProduction),
    "administrative-region-of-production" => {
      Ok(LocationType::AdministrativeRegionOfProduction)
    }
    other => Err(Error::Decode(format!("unknown location type: {other:?}"))),
  }
}

pub fn decode_intervention_type(s: &str) -> Result<InterventionType> {
  match s {
    "ORIGINAL" => Ok(InterventionType::Original),
    "REPLACING" => Ok(InterventionType::Replacing),
    "CANCELLED" => Ok(InterventionType::Cancelled),
    other => Err(Error::Decode(format!("unknown intervention type: {other:?}"))),
  }
}

// ─── Row types ───────────────────────────────────────────────────────────────

pub struct RawIndicator {
  pub indicator_id:   String,
  pub name:           String,
  pub name_code:      String,
  pub unit_id:        Option<String>,
  pub material_basis: String,
}

impl RawIndicator {
  pub fn into_indicator(self) -> Result<Indicator> {
    Ok(Indicator {
      id:             decode_uuid(&self.indicator_id)?,
      name:           self.name,
      name_code:      self.name_code,
      unit_id:        decode_opt_uuid(self.unit_id.as_deref())?,
      material_basis: decode_material_basis(&self.material_basis)?,
    })
  }
}

pub struct RawGridPointer {
  pub grid_pointer_id: String,
  pub table_name:      String,
  pub column_name:     String,
  pub resolution:      u8,
  pub year:            Option<i32>,
  pub kind:            String,
}

impl RawGridPointer {
  pub fn from_row(row: &rusqlite::Row<'_>, offset: usize) -> rusqlite::Result<Self> {
    Ok(Self {
      grid_pointer_id: row.get(offset)?,
      table_name:      row.get(offset + 1)?,
      column_name:     row.get(offset + 2)?,
      resolution:      row.get(offset + 3)?,
      year:            row.get(offset + 4)?,
      kind:            row.get(offset + 5)?,
    })
  }

  pub fn into_pointer(self) -> Result<GridPointer> {
    Ok(GridPointer {
      id:          decode_uuid(&self.grid_pointer_id)?,
      table_name:  self.table_name,
      column_name: self.column_name,
      resolution:  self.resolution,
      year:        self.year,
      kind:        decode_grid_kind(&self.kind)?,
    })
  }
}

pub struct RawBinding {
  pub binding_id:      String,
  pub owner_kind:      String,
  pub owner_id:        String,
  pub kind:            String,
  pub year:            i32,
  pub grid_pointer_id: String,
  pub created_at:      String,
}

impl RawBinding {
  pub fn into_binding(self) -> Result<DatasetBinding> {
    Ok(DatasetBinding {
      id:              decode_uuid(&self.binding_id)?,
      owner:           decode_owner(&self.owner_kind, &self.owner_id)?,
      kind:            decode_grid_kind(&self.kind)?,
      year:            self.year,
      grid_pointer_id: decode_uuid(&self.grid_pointer_id)?,
      created_at:      decode_dt(&self.created_at)?,
    })
  }
}

pub struct RawRegion {
  pub region_id:       String,
  pub name:            Option<String>,
  pub cells:           String,
  pub created_by_user: bool,
  pub created_at:      String,
}

impl RawRegion {
  pub fn into_region(self) -> Result<Region> {
    Ok(Region {
      id:              decode_uuid(&self.region_id)?,
      name:            self.name,
      cells:           decode_cells(&self.cells)?,
      created_by_user: self.created_by_user,
      created_at:      decode_dt(&self.created_at)?,
    })
  }
}

/// Column list matching [`RawLocation::from_row`].
pub const LOCATION_COLUMNS: &str = "sourcing_location_id, material_id, t1_supplier_id, \
   producer_id, business_unit_id, region_id, admin_region_id, location_type, \
   intervention_type, scenario_id, forked_from, active_from, active_until, \
   indicator_coefficients, created_at";

pub struct RawLocation {
  pub sourcing_location_id:   String,
  pub material_id:            String,
  pub t1_supplier_id:         Option<String>,
  pub producer_id:            Option<String>,
  pub business_unit_id:       Option<String>,
  pub region_id:              String,
  pub admin_region_id:        String,
  pub location_type:          String,
  pub intervention_type:      String,
  pub scenario_id:            Option<String>,
  pub forked_from:            Option<String>,
  pub active_from:            Option<i32>,
  pub active_until:           Option<i32>,
  pub indicator_coefficients: String,
  pub created_at:             String,
}

impl RawLocation {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      sourcing_location_id:   row.get(0)?,
      material_id:            row.get(1)?,
      t1_supplier_id:         row.get(2)?,
      producer_id:            row.get(3)?,
      business_unit_id:       row.get(4)?,
      region_id:              row.get(5)?,
      admin_region_id:        row.get(6)?,
      location_type:          row.get(7)?,
      intervention_type:      row.get(8)?,
      scenario_id:            row.get(9)?,
      forked_from:            row.get(10)?,
      active_from:            row.get(11)?,
      active_until:           row.get(12)?,
      indicator_coefficients: row.get(13)?,
      created_at:             row.get(14)?,
    })
  }

  pub fn into_location(self) -> Result<SourcingLocation> {
    Ok(SourcingLocation {
      id:                     decode_uuid(&self.sourcing_location_id)?,
      material_id:            decode_uuid(&self.material_id)?,
      t1_supplier_id:         decode_opt_uuid(self.t1_supplier_id.as_deref())?,
      producer_id:            decode_opt_uuid(self.producer_id.as_deref())?,
      business_unit_id:       decode_opt_uuid(self.business_unit_id.as_deref())?,
      region_id:              decode_uuid(&self.region_id)?,
      admin_region_id:        decode_uuid(&self.admin_region_id)?,
      location_type:          decode_location_type(&self.location_type)?,
      intervention_type:      decode_intervention_type(&self.intervention_type)?,
      scenario_id:            decode_opt_uuid(self.scenario_id.as_deref())?,
      forked_from:            decode_opt_uuid(self.forked_from.as_deref())?,
      active_years:           ActiveYears { from: self.active_from, until: self.active_until },
      indicator_coefficients: decode_coefficients(&self.indicator_coefficients)?,
      created_at:             decode_dt(&self.created_at)?,
    })
  }
}

pub struct RawRecord {
  pub sourcing_record_id:   String,
  pub sourcing_location_id: String,
  pub year:                 i32,
  pub volume:               f64,
}

impl RawRecord {
  pub fn into_record(self) -> Result<SourcingRecord> {
    Ok(SourcingRecord {
      id:                   decode_uuid(&self.sourcing_record_id)?,
      sourcing_location_id: decode_uuid(&self.sourcing_location_id)?,
      year:                 self.year,
      volume:               self.volume,
    })
  }
}

pub struct RawIndicatorRecord {
  pub indicator_record_id: String,
  pub sourcing_record_id:  String,
  pub indicator_id:        String,
  pub value:               f64,
}

impl RawIndicatorRecord {
  pub fn into_record(self) -> Result<IndicatorRecord> {
    Ok(IndicatorRecord {
      id:                 decode_uuid(&self.indicator_record_id)?,
      sourcing_record_id: decode_uuid(&self.sourcing_record_id)?,
      indicator_id:       decode_uuid(&self.indicator_id)?,
      value:              self.value,
    })
  }
}

pub struct RawCacheEntry {
  pub hashed_key: String,
  pub kind:       String,
  pub payload:    String,
  pub created_at: String,
}

impl RawCacheEntry {
  pub fn into_entry(self) -> Result<CacheEntry> {
    Ok(CacheEntry {
      hashed_key: self.hashed_key,
      kind:       self
        .kind
        .parse::<CacheKind>()
        .map_err(|e| Error::Decode(e.to_string()))?,
      payload:    serde_json::from_str(&self.payload)?,
      created_at: decode_dt(&self.created_at)?,
    })
  }
}
