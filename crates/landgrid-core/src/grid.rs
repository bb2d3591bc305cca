//! Grid pointers and dataset bindings.
//!
//! A grid pointer identifies one physical column of hex-indexed values. A
//! dataset binding attaches a logical owner (a material or an indicator) to a
//! grid pointer for one year. Bindings are append-only: ingesting a new
//! year's data adds a binding, it never rewrites an old one.

use std::{collections::BTreeMap, fmt};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result, cell::CellId};

/// Per-cell values of one grid column.
pub type GridValues = BTreeMap<CellId, f64>;

/// What a grid column measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GridKind {
  /// Material production volume per cell.
  Producer,
  /// Material harvested area per cell.
  Harvest,
  /// Scientific indicator value per cell.
  Indicator,
}

impl GridKind {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Producer => "producer",
      Self::Harvest => "harvest",
      Self::Indicator => "indicator",
    }
  }
}

impl fmt::Display for GridKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// The identity of a physical grid dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridPointer {
  pub id:          Uuid,
  pub table_name:  String,
  pub column_name: String,
  pub resolution:  u8,
  pub year:        Option<i32>,
  pub kind:        GridKind,
}

impl fmt::Display for GridPointer {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}.{}", self.table_name, self.column_name)
  }
}

/// Input to [`crate::store::ImpactStore::create_grid_dataset`].
#[derive(Debug, Clone)]
pub struct NewGridDataset {
  pub table_name:  String,
  pub column_name: String,
  pub resolution:  u8,
  pub year:        Option<i32>,
  pub kind:        GridKind,
  pub values:      GridValues,
}

impl NewGridDataset {
  /// Check identifiers and that every value sits at the declared resolution.
  pub fn validate(&self) -> Result<()> {
    for name in [&self.table_name, &self.column_name] {
      if !is_plain_identifier(name) {
        return Err(Error::InvalidArgument(format!(
          "{name:?} is not a plain identifier"
        )));
      }
    }
    if let Some(cell) =
      self.values.keys().find(|c| c.resolution() != self.resolution)
    {
      return Err(Error::InvalidArgument(format!(
        "cell {cell} is not at dataset resolution {}",
        self.resolution
      )));
    }
    Ok(())
  }
}

/// `[A-Za-z_][A-Za-z0-9_]*`. Grid tables and columns are interpolated into
/// SQL, so nothing else is accepted.
pub fn is_plain_identifier(name: &str) -> bool {
  let mut chars = name.chars();
  matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
    && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// A grid pointer together with the values it holds (possibly restricted
/// to a cell subset).
#[derive(Debug, Clone)]
pub struct GridData {
  pub pointer: GridPointer,
  pub values:  GridValues,
}

// ─── Bindings ────────────────────────────────────────────────────────────────

/// The logical owner of a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum DatasetOwner {
  Material(Uuid),
  Indicator(Uuid),
}

impl DatasetOwner {
  pub fn id(self) -> Uuid {
    match self {
      Self::Material(id) | Self::Indicator(id) => id,
    }
  }

  pub fn kind_str(self) -> &'static str {
    match self {
      Self::Material(_) => "material",
      Self::Indicator(_) => "indicator",
    }
  }
}

impl fmt::Display for DatasetOwner {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} {}", self.kind_str(), self.id())
  }
}

/// Links an owner to exactly one grid pointer for a given year.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetBinding {
  pub id:              Uuid,
  pub owner:           DatasetOwner,
  pub kind:            GridKind,
  pub year:            i32,
  pub grid_pointer_id: Uuid,
  pub created_at:      DateTime<Utc>,
}
