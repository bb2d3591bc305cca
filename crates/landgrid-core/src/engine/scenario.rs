//! Persisting scenario forks.

use uuid::Uuid;

use super::{ImpactEngine, RequestContext};
use crate::{
  Error, Result, progress,
  scenario::{self, InterventionAction, InterventionSpec},
  store::ImpactStore,
};

impl<S: ImpactStore> ImpactEngine<S> {
  /// Apply an intervention to the baseline locations its filter selects,
  /// writing the new scenario rows in one transaction. Returns their ids.
  ///
  /// Baseline rows already forked inside `scenario_id` are not forked again.
  /// Afterwards cached rollups are dropped and the derived aggregate is
  /// rebuilt. Once the rows are written neither step can fail the call; a
  /// failed rebuild is logged and left to the next refresh.
  #[tracing::instrument(
    skip_all,
    fields(request_id = %ctx.request_id, user_id = ?ctx.user_id, scenario_id = %scenario_id)
  )]
  pub async fn fork_scenario(
    &self,
    ctx: &RequestContext,
    scenario_id: Uuid,
    spec: &InterventionSpec,
  ) -> Result<Vec<Uuid>> {
    let task = format!("intervention:{scenario_id}");
    progress::notify(self.progress.as_ref(), &task, 0);

    let forked = self
      .store
      .forked_locations(scenario_id)
      .await
      .map_err(Error::store)?;
    let selected: Vec<_> = self
      .store
      .find_sourcing_locations(&spec.filter.to_location_filter())
      .await
      .map_err(Error::store)?
      .into_iter()
      .filter(|loc| {
        let again = forked.contains_key(&loc.id);
        if again {
          tracing::debug!(location_id = %loc.id, "already forked in scenario");
        }
        !again
      })
      .collect();

    if let InterventionAction::ChangeEfficiency { coefficients } = &spec.action {
      for &indicator_id in coefficients.keys() {
        self.indicator(indicator_id).await?;
      }
    }

    let rows = scenario::fork(scenario_id, spec, &selected)?;
    let created = self
      .store
      .add_sourcing_locations(rows)
      .await
      .map_err(Error::store)?;
    tracing::info!(rows = created.len(), title = %spec.title, "scenario forked");
    progress::notify(self.progress.as_ref(), &task, 50);

    // Rows are committed. Neither step below fails the call.
    if let Err(e) = self.cache.clear().await {
      tracing::warn!(error = %e, "failed to clear cache after fork");
    }
    if let Err(e) = self.maintainer.refresh().await {
      tracing::warn!(error = %e, "aggregate refresh after fork failed");
    }
    progress::notify(self.progress.as_ref(), &task, 100);

    Ok(created.into_iter().map(|loc| loc.id).collect())
  }
}
