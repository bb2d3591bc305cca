//! Sums, weighted sums and cell-wise products over cell sets.
//!
//! Every operation is a pure function of its inputs. A cell missing from a
//! grid contributes zero; it is never an error. The only failure is a
//! cell-wise product over an empty dataset.

use std::{
  collections::{BTreeMap, BTreeSet},
  sync::atomic::{AtomicU64, Ordering},
};

use crate::{
  Error, Result,
  cell::CellId,
  grid::{GridData, GridValues},
};

/// Percentile positions of the map legend breakpoints, after the leading 0.
const QUANTILE_POSITIONS: [f64; 6] = [0.1667, 0.3337, 0.50, 0.6667, 0.8337, 1.0];

/// The aggregation kernel. Keeps a running count of invocations so callers
/// can tell computed results from cached ones.
#[derive(Debug, Default)]
pub struct Aggregator {
  invocations: AtomicU64,
}

impl Aggregator {
  pub fn new() -> Self { Self::default() }

  /// Total number of aggregation calls made through this instance.
  pub fn invocations(&self) -> u64 { self.invocations.load(Ordering::Relaxed) }

  fn count(&self) { self.invocations.fetch_add(1, Ordering::Relaxed); }

  /// `Σ value(c)` over `cells ∩ domain(grid)`.
  pub fn sum(&self, cells: &BTreeSet<CellId>, grid: &GridValues) -> f64 {
    self.count();
    if cells.len() <= grid.len() {
      cells.iter().filter_map(|c| grid.get(c)).sum()
    } else {
      grid
        .iter()
        .filter(|(c, _)| cells.contains(c))
        .map(|(_, v)| v)
        .sum()
    }
  }

  /// `Σ value(c) * weight(c)` over cells present in both grids.
  pub fn weighted_sum(
    &self,
    cells: &BTreeSet<CellId>,
    grid: &GridValues,
    weights: &GridValues,
  ) -> f64 {
    self.count();
    cells
      .iter()
      .filter_map(|c| Some(grid.get(c)? * weights.get(c)?))
      .sum()
  }

  /// `indicator(c) * material(c) * scale` for every cell in both grids.
  pub fn cellwise_product(
    &self,
    indicator: &GridData,
    material: &GridData,
    scale: f64,
  ) -> Result<BTreeMap<CellId, f64>> {
    self.count();
    for data in [indicator, material] {
      if data.values.is_empty() {
        return Err(Error::NotFound(format!(
          "grid dataset {} has no cells",
          data.pointer
        )));
      }
    }

    let (small, large, small_is_indicator) =
      if indicator.values.len() <= material.values.len() {
        (&indicator.values, &material.values, true)
      } else {
        (&material.values, &indicator.values, false)
      };

    Ok(
      small
        .iter()
        .filter_map(|(cell, a)| {
          let b = large.get(cell)?;
          let (i, m) = if small_is_indicator { (a, b) } else { (b, a) };
          Some((*cell, i * m * scale))
        })
        .collect(),
    )
  }
}

/// Map legend breakpoints over the strictly positive values:
/// `[0, p16.67, p33.37, p50, p66.67, p83.37, max]`, with linear
/// interpolation between ranks. All zeros when nothing is positive.
pub fn quantiles<I>(values: I) -> [f64; 7]
where
  I: IntoIterator<Item = f64>,
{
  let mut positive: Vec<f64> = values.into_iter().filter(|v| *v > 0.0).collect();
  let mut out = [0.0; 7];
  if positive.is_empty() {
    return out;
  }
  positive.sort_by(f64::total_cmp);

  let last = (positive.len() - 1) as f64;
  for (slot, p) in out[1..].iter_mut().zip(QUANTILE_POSITIONS) {
    let rank = p * last;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    *slot = positive[lo] + (positive[hi] - positive[lo]) * frac;
  }
  out
}
