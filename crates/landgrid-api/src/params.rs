//! Query-string helpers shared by the handlers.
//!
//! Id lists travel as comma-separated values, e.g.
//! `?indicator_ids=<uuid>,<uuid>&material_ids=<uuid>`.

use axum::http::HeaderMap;
use landgrid_core::{engine::RequestContext, sourcing::LocationType, store::LocationFilter};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::ApiError;

/// Header carrying the caller's user id. Authentication happens upstream.
pub const USER_ID_HEADER: &str = "x-user-id";

/// The request context for a call, read from [`USER_ID_HEADER`].
pub fn context(headers: &HeaderMap) -> Result<RequestContext, ApiError> {
  let user_id = match headers.get(USER_ID_HEADER) {
    None => None,
    Some(value) => {
      let raw = value
        .to_str()
        .map_err(|_| ApiError::BadRequest(format!("{USER_ID_HEADER} is not ASCII")))?;
      Some(parse_uuid(USER_ID_HEADER, raw)?)
    }
  };
  Ok(RequestContext::new(user_id))
}

fn parse_uuid(field: &str, raw: &str) -> Result<Uuid, ApiError> {
  raw
    .trim()
    .parse()
    .map_err(|_| ApiError::BadRequest(format!("{field}: {raw:?} is not a UUID")))
}

/// Split a comma-separated id list. Missing or blank means empty.
pub fn id_list(field: &str, raw: Option<&str>) -> Result<Vec<Uuid>, ApiError> {
  raw
    .into_iter()
    .flat_map(|s| s.split(','))
    .filter(|s| !s.trim().is_empty())
    .map(|s| parse_uuid(field, s))
    .collect()
}

/// Location filter fields accepted by the impact endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct FilterParams {
  pub material_ids:      Option<String>,
  pub t1_supplier_ids:   Option<String>,
  pub producer_ids:      Option<String>,
  pub business_unit_ids: Option<String>,
  pub origin_ids:        Option<String>,
  pub location_types:    Option<String>,
  pub scenario_id:       Option<Uuid>,
}

impl FilterParams {
  pub fn into_filter(self) -> Result<LocationFilter, ApiError> {
    let location_types = self
      .location_types
      .as_deref()
      .into_iter()
      .flat_map(|s| s.split(','))
      .filter(|s| !s.trim().is_empty())
      .map(|s| {
        serde_json::from_value::<LocationType>(serde_json::Value::String(
          s.trim().to_owned(),
        ))
        .map_err(|_| ApiError::BadRequest(format!("unknown location type {s:?}")))
      })
      .collect::<Result<_, _>>()?;

    Ok(LocationFilter {
      material_ids: id_list("material_ids", self.material_ids.as_deref())?,
      t1_supplier_ids: id_list("t1_supplier_ids", self.t1_supplier_ids.as_deref())?,
      producer_ids: id_list("producer_ids", self.producer_ids.as_deref())?,
      business_unit_ids: id_list(
        "business_unit_ids",
        self.business_unit_ids.as_deref(),
      )?,
      origin_ids: id_list("origin_ids", self.origin_ids.as_deref())?,
      location_types,
      scenario_id: self.scenario_id,
    })
  }
}
