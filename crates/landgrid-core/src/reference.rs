//! Reference entities owned by the CRUD layer and consumed read-only here.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::grid::GridKind;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Material {
  pub id:   Uuid,
  pub name: String,
}

/// Which material grid an indicator's risk map is crossed with.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum MaterialBasis {
  Producer,
  #[default]
  Harvest,
}

impl MaterialBasis {
  pub fn grid_kind(self) -> GridKind {
    match self {
      Self::Producer => GridKind::Producer,
      Self::Harvest => GridKind::Harvest,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Indicator {
  pub id:             Uuid,
  pub name:           String,
  /// Short stable code, e.g. `"DF_LUC_T"`.
  pub name_code:      String,
  pub unit_id:        Option<Uuid>,
  #[serde(default)]
  pub material_basis: MaterialBasis,
}

/// A linear unit conversion: `converted = value * factor`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitConversion {
  pub unit_id: Uuid,
  pub symbol:  String,
  pub factor:  Option<f64>,
}
