//! Sourcing locations, their purchase records, and per-purchase indicator
//! values.
//!
//! Baseline locations are never mutated by the engine. Scenario locations are
//! extra rows that point back at the baseline row they were forked from and
//! share its sourcing records through that link.

use std::{collections::BTreeMap, fmt};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InterventionType {
  #[default]
  Original,
  Replacing,
  Cancelled,
}

impl InterventionType {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Original => "ORIGINAL",
      Self::Replacing => "REPLACING",
      Self::Cancelled => "CANCELLED",
    }
  }
}

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum LocationType {
  #[default]
  Unknown,
  PointOfProduction,
  ProductionAggregationPoint,
  CountryOfProduction,
  AdministrativeRegionOfProduction,
}

impl LocationType {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Unknown => "unknown",
      Self::PointOfProduction => "point-of-production",
      Self::ProductionAggregationPoint => "production-aggregation-point",
      Self::CountryOfProduction => "country-of-production",
      Self::AdministrativeRegionOfProduction => {
        "administrative-region-of-production"
      }
    }
  }

  /// Point-like locations are geocoded from either an address or a pair of
  /// coordinates.
  pub fn is_point(self) -> bool {
    matches!(self, Self::PointOfProduction | Self::ProductionAggregationPoint)
  }
}

impl fmt::Display for LocationType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

// ─── SourcingLocation ────────────────────────────────────────────────────────

/// The years a scenario row applies in. Open ends are unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ActiveYears {
  pub from:  Option<i32>,
  pub until: Option<i32>,
}

impl ActiveYears {
  pub const ALWAYS: Self = Self { from: None, until: None };

  pub fn contains(self, year: i32) -> bool {
    self.from.is_none_or(|from| year >= from) && self.until.is_none_or(|until| year <= until)
  }
}

/// One attribution point of the supply chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourcingLocation {
  pub id:                     Uuid,
  pub material_id:            Uuid,
  pub t1_supplier_id:         Option<Uuid>,
  pub producer_id:            Option<Uuid>,
  pub business_unit_id:       Option<Uuid>,
  /// The geo region whose cells the location's impact is attributed to.
  pub region_id:              Uuid,
  pub admin_region_id:        Uuid,
  pub location_type:          LocationType,
  pub intervention_type:      InterventionType,
  pub scenario_id:            Option<Uuid>,
  /// For scenario rows: the baseline row this one was derived from.
  pub forked_from:            Option<Uuid>,
  /// Baseline rows are always active.
  pub active_years:           ActiveYears,
  /// Per-indicator scale on the impact per tonne. Missing indicators are
  /// unscaled.
  pub indicator_coefficients: BTreeMap<Uuid, f64>,
  pub created_at:             DateTime<Utc>,
}

impl SourcingLocation {
  pub fn is_baseline(&self) -> bool {
    self.scenario_id.is_none()
      && self.intervention_type == InterventionType::Original
      && self.forked_from.is_none()
  }

  /// The location whose sourcing records this one reads.
  pub fn records_owner(&self) -> Uuid { self.forked_from.unwrap_or(self.id) }

  pub fn coefficient(&self, indicator_id: Uuid) -> f64 {
    self.indicator_coefficients.get(&indicator_id).copied().unwrap_or(1.0)
  }
}

/// Input to [`crate::store::ImpactStore::add_sourcing_locations`].
#[derive(Debug, Clone, PartialEq)]
pub struct NewSourcingLocation {
  pub material_id:            Uuid,
  pub t1_supplier_id:         Option<Uuid>,
  pub producer_id:            Option<Uuid>,
  pub business_unit_id:       Option<Uuid>,
  pub region_id:              Uuid,
  pub admin_region_id:        Uuid,
  pub location_type:          LocationType,
  pub intervention_type:      InterventionType,
  pub scenario_id:            Option<Uuid>,
  pub forked_from:            Option<Uuid>,
  pub active_years:           ActiveYears,
  pub indicator_coefficients: BTreeMap<Uuid, f64>,
}

impl NewSourcingLocation {
  /// A baseline location with every optional attribute unset.
  pub fn baseline(material_id: Uuid, region_id: Uuid, admin_region_id: Uuid) -> Self {
    Self {
      material_id,
      t1_supplier_id: None,
      producer_id: None,
      business_unit_id: None,
      region_id,
      admin_region_id,
      location_type: LocationType::default(),
      intervention_type: InterventionType::Original,
      scenario_id: None,
      forked_from: None,
      active_years: ActiveYears::ALWAYS,
      indicator_coefficients: BTreeMap::new(),
    }
  }
}

// ─── Records ─────────────────────────────────────────────────────────────────

/// A purchased volume for one location and year.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourcingRecord {
  pub id:                   Uuid,
  pub sourcing_location_id: Uuid,
  pub year:                 i32,
  pub volume:               f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewSourcingRecord {
  pub sourcing_location_id: Uuid,
  pub year:                 i32,
  pub volume:               f64,
}

/// The impact of one purchase on one indicator, produced by the external
/// calculation step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorRecord {
  pub id:                 Uuid,
  pub sourcing_record_id: Uuid,
  pub indicator_id:       Uuid,
  pub value:              f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewIndicatorRecord {
  pub sourcing_record_id: Uuid,
  pub indicator_id:       Uuid,
  pub value:              f64,
}
