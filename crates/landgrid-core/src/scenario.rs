//! Interventions and the pure half of scenario forking.
//!
//! [`fork`] turns a set of baseline locations into the rows a scenario adds
//! on top of them. It validates everything first and reports every problem
//! at once; nothing is produced unless all checks pass. Persisting the rows
//! is the job of [`crate::engine::ImpactEngine::fork_scenario`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  Error, Result,
  sourcing::{
    ActiveYears, InterventionType, LocationType, NewSourcingLocation, SourcingLocation,
  },
  store::LocationFilter,
};

/// Which baseline locations an intervention applies to. Empty lists do not
/// filter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InterventionFilter {
  #[serde(default)]
  pub material_ids:      Vec<Uuid>,
  #[serde(default)]
  pub t1_supplier_ids:   Vec<Uuid>,
  #[serde(default)]
  pub producer_ids:      Vec<Uuid>,
  #[serde(default)]
  pub business_unit_ids: Vec<Uuid>,
  #[serde(default)]
  pub admin_region_ids:  Vec<Uuid>,
}

impl InterventionFilter {
  /// The equivalent baseline-only store query.
  pub fn to_location_filter(&self) -> LocationFilter {
    LocationFilter {
      material_ids: self.material_ids.clone(),
      t1_supplier_ids: self.t1_supplier_ids.clone(),
      producer_ids: self.producer_ids.clone(),
      business_unit_ids: self.business_unit_ids.clone(),
      origin_ids: self.admin_region_ids.clone(),
      location_types: Vec::new(),
      scenario_id: None,
    }
  }
}

/// Where the replacement supply comes from. The region ids are supplied by
/// the geocoding collaborator; the raw inputs are kept for validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewLocation {
  pub location_type:      LocationType,
  pub country:            String,
  pub admin_region_input: Option<String>,
  pub address:            Option<String>,
  pub latitude:           Option<f64>,
  pub longitude:          Option<f64>,
  pub region_id:          Uuid,
  pub admin_region_id:    Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum InterventionAction {
  /// Move the selected sourcing to another supplier and location.
  NewSupplier {
    t1_supplier_id: Option<Uuid>,
    producer_id:    Option<Uuid>,
    location:       NewLocation,
  },
  /// Keep the sourcing but scale its impact per tonne, per indicator.
  ChangeEfficiency { coefficients: BTreeMap<Uuid, f64> },
  /// Stop sourcing the selection altogether.
  Cancel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterventionSpec {
  pub title:      String,
  pub start_year: i32,
  pub end_year:   Option<i32>,
  #[serde(default)]
  pub filter:     InterventionFilter,
  pub action:     InterventionAction,
}

impl InterventionSpec {
  /// The years the forked rows replace their baseline in.
  pub fn active_years(&self) -> ActiveYears {
    ActiveYears { from: Some(self.start_year), until: self.end_year }
  }
}

// ─── Validation ──────────────────────────────────────────────────────────────

fn location_problems(location: &NewLocation, out: &mut Vec<String>) {
  let kind = location.location_type;

  if location.country.trim().is_empty() {
    out.push("country is required".into());
  }

  let has_address = location
    .address
    .as_deref()
    .is_some_and(|a| !a.trim().is_empty());
  let has_coordinates = match (location.latitude, location.longitude) {
    (Some(_), Some(_)) => true,
    (None, None) => false,
    _ => {
      out.push("latitude and longitude must be given together".into());
      true
    }
  };

  if let Some(lat) = location.latitude
    && !(-90.0..=90.0).contains(&lat)
  {
    out.push(format!("latitude {lat} is outside [-90, 90]"));
  }
  if let Some(lon) = location.longitude
    && !(-180.0..=180.0).contains(&lon)
  {
    out.push(format!("longitude {lon} is outside [-180, 180]"));
  }

  match kind {
    LocationType::PointOfProduction | LocationType::ProductionAggregationPoint => {
      match (has_address, has_coordinates) {
        (false, false) => {
          out.push(format!("{kind} requires an address or coordinates"));
        }
        (true, true) => {
          out.push(format!("{kind} takes an address or coordinates, not both"));
        }
        _ => {}
      }
    }
    LocationType::Unknown | LocationType::CountryOfProduction => {
      if has_address || has_coordinates {
        out.push(format!("{kind} takes neither an address nor coordinates"));
      }
    }
    LocationType::AdministrativeRegionOfProduction => {
      if location
        .admin_region_input
        .as_deref()
        .is_none_or(|a| a.trim().is_empty())
      {
        out.push(format!("{kind} requires an admin region"));
      }
      if has_address || has_coordinates {
        out.push(format!("{kind} takes neither an address nor coordinates"));
      }
    }
  }
}

/// Every problem with applying `spec` to `selected`, in a stable order.
pub fn validate(spec: &InterventionSpec, selected: &[SourcingLocation]) -> Vec<String> {
  let mut problems = Vec::new();

  if let Some(end) = spec.end_year
    && spec.start_year > end
  {
    problems.push(format!(
      "start year {} is after end year {end}",
      spec.start_year
    ));
  }

  match &spec.action {
    InterventionAction::NewSupplier { location, .. } => {
      location_problems(location, &mut problems);
    }
    InterventionAction::ChangeEfficiency { coefficients } => {
      if coefficients.is_empty() {
        problems.push("an efficiency change needs at least one coefficient".into());
      }
      for (indicator_id, c) in coefficients {
        if !c.is_finite() || *c < 0.0 {
          problems.push(format!(
            "coefficient {c} for indicator {indicator_id} must be a non-negative number"
          ));
        }
      }
    }
    InterventionAction::Cancel => {}
  }

  if selected.is_empty() {
    problems.push("no sourcing locations match the intervention filter".into());
  }
  for loc in selected.iter().filter(|l| !l.is_baseline()) {
    problems.push(format!("sourcing location {} is not a baseline location", loc.id));
  }

  problems
}

// ─── Fork ────────────────────────────────────────────────────────────────────

/// Build one scenario row per selected baseline location.
///
/// Fails with [`Error::ValidationAggregate`] listing every problem. The
/// inputs are only read.
pub fn fork(
  scenario_id: Uuid,
  spec: &InterventionSpec,
  selected: &[SourcingLocation],
) -> Result<Vec<NewSourcingLocation>> {
  let problems = validate(spec, selected);
  if !problems.is_empty() {
    return Err(Error::ValidationAggregate(problems));
  }

  let active_years = spec.active_years();
  Ok(
    selected
      .iter()
      .map(|base| {
        let mut row = NewSourcingLocation {
          material_id: base.material_id,
          t1_supplier_id: base.t1_supplier_id,
          producer_id: base.producer_id,
          business_unit_id: base.business_unit_id,
          region_id: base.region_id,
          admin_region_id: base.admin_region_id,
          location_type: base.location_type,
          intervention_type: InterventionType::Replacing,
          scenario_id: Some(scenario_id),
          forked_from: Some(base.id),
          active_years,
          indicator_coefficients: BTreeMap::new(),
        };
        match &spec.action {
          InterventionAction::NewSupplier { t1_supplier_id, producer_id, location } => {
            row.t1_supplier_id = t1_supplier_id.or(base.t1_supplier_id);
            row.producer_id = producer_id.or(base.producer_id);
            row.region_id = location.region_id;
            row.admin_region_id = location.admin_region_id;
            row.location_type = location.location_type;
          }
          InterventionAction::ChangeEfficiency { coefficients } => {
            row.indicator_coefficients = coefficients.clone();
          }
          InterventionAction::Cancel => {
            row.intervention_type = InterventionType::Cancelled;
          }
        }
        row
      })
      .collect(),
  )
}
