//! H3 cell index arithmetic.
//!
//! Only the hierarchy operations the engine needs are implemented here:
//! reading a cell's resolution, moving to an ancestor, and enumerating
//! descendants ("uncompaction"). There is no geometry.
//!
//! Index layout (64 bits, most significant first):
//!
//! | bits  | field                                   |
//! |-------|-----------------------------------------|
//! | 63    | reserved, always 0                      |
//! | 59–62 | mode, 1 for a cell                      |
//! | 56–58 | reserved                                |
//! | 52–55 | resolution (0–15)                       |
//! | 45–51 | base cell (0–121)                       |
//! | 0–44  | fifteen 3-bit digits, unused ones are 7 |

use std::{collections::BTreeSet, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

pub const MAX_RESOLUTION: u8 = 15;

const MODE_CELL: u64 = 1;
const MODE_OFFSET: u32 = 59;
const MODE_MASK: u64 = 0b1111;
const RES_OFFSET: u32 = 52;
const RES_MASK: u64 = 0b1111;
const BASE_CELL_OFFSET: u32 = 45;
const BASE_CELL_MASK: u64 = 0b111_1111;
const DIGIT_BITS: u32 = 3;
const DIGIT_MASK: u64 = 0b111;
const UNUSED_DIGIT: u64 = 7;
const HIGH_BIT: u64 = 1 << 63;

const NUM_BASE_CELLS: u8 = 122;
const PENTAGON_BASE_CELLS: [u8; 12] =
  [4, 14, 24, 38, 49, 58, 63, 72, 83, 97, 107, 117];

/// The deleted subsequence of a pentagon: the K axis has no cell.
const K_AXES_DIGIT: u64 = 1;

fn digit_offset(res: u8) -> u32 {
  u32::from(MAX_RESOLUTION - res) * DIGIT_BITS
}

/// A validated H3 cell index.
///
/// Serialised as its canonical lowercase hexadecimal string, the same form
/// the grid importers use.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(try_from = "String", into = "String")]
pub struct CellId(u64);

impl CellId {
  /// Validate a raw 64-bit index.
  pub fn new(raw: u64) -> Result<Self> {
    let invalid =
      |why: &str| Error::InvalidArgument(format!("invalid cell index {raw:x}: {why}"));

    if raw & HIGH_BIT != 0 {
      return Err(invalid("reserved bit set"));
    }
    if (raw >> MODE_OFFSET) & MODE_MASK != MODE_CELL {
      return Err(invalid("not a cell index"));
    }

    let cell = Self(raw);
    if cell.base_cell() >= NUM_BASE_CELLS {
      return Err(invalid("base cell out of range"));
    }

    let res = cell.resolution();
    for r in 1..=MAX_RESOLUTION {
      let digit = cell.digit(r);
      if r <= res && digit == UNUSED_DIGIT {
        return Err(invalid("missing digit"));
      }
      if r > res && digit != UNUSED_DIGIT {
        return Err(invalid("digit beyond resolution"));
      }
    }

    if cell.on_pentagon_base()
      && let Some(first) = (1..=res).map(|r| cell.digit(r)).find(|d| *d != 0)
      && first == K_AXES_DIGIT
    {
      return Err(invalid("deleted pentagon subsequence"));
    }

    Ok(cell)
  }

  /// The resolution-0 cell for `base_cell`.
  pub fn base(base_cell: u8) -> Result<Self> {
    let digits = (1u64 << (u32::from(MAX_RESOLUTION) * DIGIT_BITS)) - 1;
    Self::new(
      (MODE_CELL << MODE_OFFSET)
        | (u64::from(base_cell) << BASE_CELL_OFFSET)
        | digits,
    )
  }

  pub const fn raw(self) -> u64 { self.0 }

  pub fn resolution(self) -> u8 { ((self.0 >> RES_OFFSET) & RES_MASK) as u8 }

  pub fn base_cell(self) -> u8 {
    ((self.0 >> BASE_CELL_OFFSET) & BASE_CELL_MASK) as u8
  }

  fn digit(self, res: u8) -> u64 { (self.0 >> digit_offset(res)) & DIGIT_MASK }

  fn with_digit(self, res: u8, digit: u64) -> Self {
    let offset = digit_offset(res);
    Self((self.0 & !(DIGIT_MASK << offset)) | (digit << offset))
  }

  fn with_resolution(self, res: u8) -> Self {
    Self((self.0 & !(RES_MASK << RES_OFFSET)) | (u64::from(res) << RES_OFFSET))
  }

  fn on_pentagon_base(self) -> bool {
    PENTAGON_BASE_CELLS.contains(&self.base_cell())
  }

  /// A pentagon is the centre child lineage of a pentagonal base cell.
  pub fn is_pentagon(self) -> bool {
    self.on_pentagon_base() && (1..=self.resolution()).all(|r| self.digit(r) == 0)
  }

  /// The ancestor of this cell at `res`. A cell is its own parent at its
  /// own resolution.
  pub fn parent(self, res: u8) -> Result<Self> {
    let own = self.resolution();
    if res > own {
      return Err(Error::InvalidArgument(format!(
        "cannot take resolution-{res} parent of resolution-{own} cell {self}"
      )));
    }
    let mut parent = self.with_resolution(res);
    for r in (res + 1)..=own {
      parent = parent.with_digit(r, UNUSED_DIGIT);
    }
    Ok(parent)
  }

  /// The direct children of this cell, one resolution finer.
  fn direct_children(self) -> impl Iterator<Item = Self> {
    let res = self.resolution() + 1;
    let skip_k = self.is_pentagon();
    let base = self.with_resolution(res);
    (0..UNUSED_DIGIT)
      .filter(move |d| !(skip_k && *d == K_AXES_DIGIT))
      .map(move |d| base.with_digit(res, d))
  }

  /// Every descendant of this cell at `res`.
  pub fn children(self, res: u8) -> Result<Vec<Self>> {
    let own = self.resolution();
    if res < own || res > MAX_RESOLUTION {
      return Err(Error::InvalidArgument(format!(
        "cannot expand resolution-{own} cell {self} to resolution {res}"
      )));
    }
    let mut level = vec![self];
    for _ in own..res {
      level = level.into_iter().flat_map(Self::direct_children).collect();
    }
    Ok(level)
  }
}

impl fmt::Display for CellId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{:x}", self.0)
  }
}

impl FromStr for CellId {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    let raw = u64::from_str_radix(s.trim(), 16).map_err(|e| {
      Error::InvalidArgument(format!("invalid cell index {s:?}: {e}"))
    })?;
    Self::new(raw)
  }
}

impl TryFrom<String> for CellId {
  type Error = Error;

  fn try_from(s: String) -> Result<Self> { s.parse() }
}

impl From<CellId> for String {
  fn from(cell: CellId) -> Self { cell.to_string() }
}

/// Expand a (possibly mixed-resolution) compacted cell set to the complete
/// set of cells at `res`.
///
/// Cells coarser than `res` are replaced by their descendants, cells already
/// at `res` are kept. A cell finer than `res` is a resolution mismatch and is
/// reported rather than dropped.
pub fn uncompact_cells<I>(cells: I, res: u8) -> Result<BTreeSet<CellId>>
where
  I: IntoIterator<Item = CellId>,
{
  let mut out = BTreeSet::new();
  for cell in cells {
    if cell.resolution() > res {
      return Err(Error::InvalidArgument(format!(
        "cell {cell} has resolution {}, finer than requested resolution {res}",
        cell.resolution()
      )));
    }
    out.extend(cell.children(res)?);
  }
  Ok(out)
}
