//! The impact table: indicator impact per group and year.

use std::{
  collections::{BTreeMap, HashMap},
  sync::Arc,
};

use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use uuid::Uuid;

use super::{ImpactEngine, RequestContext, Visible, distinct};
use crate::{
  Error, Result,
  cache::CacheKind,
  grid::{DatasetOwner, GridKind},
  sourcing::{SourcingLocation, SourcingRecord},
  store::{ImpactStore, LocationFilter},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GroupBy {
  Material,
  BusinessUnit,
  Region,
  T1Supplier,
  Producer,
  LocationType,
}

impl GroupBy {
  fn key_of(self, loc: &SourcingLocation) -> String {
    let id = match self {
      Self::Material => Some(loc.material_id),
      Self::BusinessUnit => loc.business_unit_id,
      Self::Region => Some(loc.admin_region_id),
      Self::T1Supplier => loc.t1_supplier_id,
      Self::Producer => loc.producer_id,
      Self::LocationType => return loc.location_type.as_str().to_owned(),
    };
    id.map_or_else(|| "unassigned".to_owned(), |id| id.to_string())
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactTableRequest {
  pub indicator_ids: Vec<Uuid>,
  pub start_year:    i32,
  pub end_year:      i32,
  pub group_by:      GroupBy,
  /// Location selection; its `scenario_id` picks the scenario view.
  #[serde(flatten)]
  pub filter:        LocationFilter,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct YearValue {
  pub year:         i32,
  pub value:        f64,
  pub is_projected: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct YearSum {
  pub year:  i32,
  pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactTableRow {
  pub group_key: String,
  pub values:    Vec<YearValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorTable {
  pub indicator_id:   Uuid,
  pub indicator_name: String,
  pub unit:           Option<String>,
  pub group_by:       GroupBy,
  /// Ordered by group key.
  pub rows:           Vec<ImpactTableRow>,
  pub year_sum:       Vec<YearSum>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactTable {
  pub indicators:       Vec<IndicatorTable>,
  /// Total purchased volume of the selected locations per year.
  pub purchased_volume: Vec<YearValue>,
}

/// Selected locations and the records they read, shared by the per-indicator
/// tasks.
struct Selection {
  locations: Vec<Visible>,
  records:   HashMap<Uuid, Vec<SourcingRecord>>,
}

impl Selection {
  /// Every record that counts, paired with the location it counts for.
  fn counted(&self) -> impl Iterator<Item = (&SourcingLocation, &SourcingRecord)> {
    self.locations.iter().flat_map(move |visible| {
      self
        .records
        .get(&visible.location.records_owner())
        .into_iter()
        .flatten()
        .filter(move |r| visible.counts_in(r.year))
        .map(move |r| (&visible.location, r))
    })
  }
}

impl<S: ImpactStore> ImpactEngine<S> {
  /// Impact per group and year for each requested indicator.
  ///
  /// Results are cached under the full request. Indicators are computed
  /// concurrently; any failure fails the whole request.
  #[tracing::instrument(
    skip_all,
    fields(request_id = %ctx.request_id, user_id = ?ctx.user_id)
  )]
  pub async fn get_impact_table(
    &self,
    ctx: &RequestContext,
    request: &ImpactTableRequest,
  ) -> Result<ImpactTable> {
    if request.indicator_ids.is_empty() {
      return Err(Error::InvalidArgument("at least one indicator is required".into()));
    }
    if request.start_year > request.end_year {
      return Err(Error::InvalidArgument(format!(
        "start year {} is after end year {}",
        request.start_year, request.end_year
      )));
    }
    self
      .check_bindings(&request.indicator_ids, &request.filter.material_ids)
      .await?;

    if let Some(table) = self.cache.get(request, CacheKind::ImpactTable).await? {
      return Ok(table);
    }

    let locations = self.select_locations(&request.filter).await?;
    let owners = distinct(locations.iter().map(|v| v.location.records_owner()));
    let mut records: HashMap<Uuid, Vec<SourcingRecord>> = HashMap::new();
    for record in self
      .store
      .sourcing_records_for(&owners, request.start_year, request.end_year)
      .await
      .map_err(Error::store)?
    {
      records
        .entry(record.sourcing_location_id)
        .or_default()
        .push(record);
    }
    tracing::info!(
      locations = locations.len(),
      records = records.values().map(Vec::len).sum::<usize>(),
      "computing impact table"
    );

    let selection = Arc::new(Selection { locations, records });
    let last_year = selection.counted().map(|(_, r)| r.year).max();

    let mut tasks = JoinSet::new();
    for (index, indicator_id) in request.indicator_ids.iter().copied().enumerate() {
      let engine = self.clone();
      let selection = selection.clone();
      let request = request.clone();
      tasks.spawn(async move {
        let table = engine
          .indicator_table(indicator_id, &request, &selection, last_year)
          .await?;
        Ok::<_, Error>((index, table))
      });
    }

    let mut indicators = Vec::with_capacity(request.indicator_ids.len());
    while let Some(joined) = tasks.join_next().await {
      let (index, table) = joined.map_err(|e| Error::Task(e.to_string()))??;
      indicators.push((index, table));
    }
    indicators.sort_by_key(|(index, _)| *index);

    let mut volumes: BTreeMap<i32, f64> = BTreeMap::new();
    for (_, r) in selection.counted() {
      *volumes.entry(r.year).or_default() += r.volume;
    }

    let table = ImpactTable {
      indicators:       indicators.into_iter().map(|(_, t)| t).collect(),
      purchased_volume: project(
        &volumes,
        request.start_year,
        request.end_year,
        last_year,
        self.settings.growth_rate,
      ),
    };

    self.cache.put(request, CacheKind::ImpactTable, &table).await?;
    Ok(table)
  }

  async fn indicator_table(
    &self,
    indicator_id: Uuid,
    request: &ImpactTableRequest,
    selection: &Selection,
    last_year: Option<i32>,
  ) -> Result<IndicatorTable> {
    let indicator = self.indicator(indicator_id).await?;
    let unit = self.unit_symbol(&indicator).await?;

    // Per-tonne impact by (region, material, year); many locations share
    // the same triple.
    let mut per_tonne: HashMap<(Uuid, Uuid, i32), f64> = HashMap::new();
    let mut groups: BTreeMap<String, BTreeMap<i32, f64>> = BTreeMap::new();

    for visible in &selection.locations {
      if (request.start_year..=request.end_year).any(|y| visible.counts_in(y)) {
        groups.entry(request.group_by.key_of(&visible.location)).or_default();
      }
    }
    for (loc, record) in selection.counted() {
      let key = (loc.region_id, loc.material_id, record.year);
      let factor = match per_tonne.get(&key) {
        Some(f) => *f,
        None => {
          let f = self
            .impact_per_tonne(indicator_id, loc.material_id, loc.region_id, record.year)
            .await?;
          per_tonne.insert(key, f);
          f
        }
      };
      let impact = record.volume * factor * loc.coefficient(indicator_id);
      *groups
        .entry(request.group_by.key_of(loc))
        .or_default()
        .entry(record.year)
        .or_default() += impact;
    }

    let rows: Vec<ImpactTableRow> = groups
      .into_iter()
      .map(|(group_key, by_year)| ImpactTableRow {
        group_key,
        values: project(
          &by_year,
          request.start_year,
          request.end_year,
          last_year,
          self.settings.growth_rate,
        ),
      })
      .collect();

    let year_sum = (request.start_year..=request.end_year)
      .enumerate()
      .map(|(i, year)| YearSum {
        year,
        value: rows.iter().map(|r| r.values[i].value).sum(),
      })
      .collect();

    Ok(IndicatorTable {
      indicator_id,
      indicator_name: indicator.name,
      unit,
      group_by: request.group_by,
      rows,
      year_sum,
    })
  }

  /// `weighted_sum(cells, indicator, production) / sum(cells, production)`
  /// for one region, or zero when the region produces nothing.
  async fn impact_per_tonne(
    &self,
    indicator_id: Uuid,
    material_id: Uuid,
    region_id: Uuid,
    year: i32,
  ) -> Result<f64> {
    let producer = self
      .pointer_for_year(DatasetOwner::Material(material_id), GridKind::Producer, year)
      .await?;
    let indicator = self
      .pointer_for_year(DatasetOwner::Indicator(indicator_id), GridKind::Indicator, year)
      .await?;

    let production = self.production_sum(region_id, &producer).await?;
    if production == 0.0 {
      return Ok(0.0);
    }
    let weighted = self
      .weighted_indicator_sum(region_id, &indicator, &producer)
      .await?;
    Ok(weighted / production)
  }
}

/// One value per year in `start..=end`. A year without data grows the
/// previous year's value by `growth_rate` percent; years after `last_year`
/// are flagged as projected.
fn project(
  by_year: &BTreeMap<i32, f64>,
  start: i32,
  end: i32,
  last_year: Option<i32>,
  growth_rate: f64,
) -> Vec<YearValue> {
  let growth = 1.0 + growth_rate / 100.0;
  let mut previous = 0.0;
  (start..=end)
    .map(|year| {
      let value = by_year.get(&year).copied().unwrap_or(previous * growth);
      previous = value;
      YearValue {
        year,
        value,
        is_projected: last_year.is_some_and(|last| year > last),
      }
    })
    .collect()
}
