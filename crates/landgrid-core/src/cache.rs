//! Content-addressable cache for computed rollups.
//!
//! Keys are arbitrary serialisable values. They are reduced to a canonical
//! JSON form and hashed, so two keys that carry the same data hit the same
//! entry regardless of field order, array order, or the Rust type that
//! produced them.

use std::{fmt, sync::Arc};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::{Error, Result, store::ImpactStore};

/// Prefix mixed into every digest. Bump it when canonicalisation changes.
pub const CANONICAL_VERSION: &str = "v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheKind {
  /// Production sum of one material over one region.
  RawMaterialValue,
  /// Production-weighted indicator sum over one region.
  RawIndicatorValue,
  ImpactTable,
  ImpactMap,
  RiskMap,
}

impl CacheKind {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::RawMaterialValue => "raw-material-value",
      Self::RawIndicatorValue => "raw-indicator-value",
      Self::ImpactTable => "impact-table",
      Self::ImpactMap => "impact-map",
      Self::RiskMap => "risk-map",
    }
  }
}

impl fmt::Display for CacheKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl std::str::FromStr for CacheKind {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "raw-material-value" => Ok(Self::RawMaterialValue),
      "raw-indicator-value" => Ok(Self::RawIndicatorValue),
      "impact-table" => Ok(Self::ImpactTable),
      "impact-map" => Ok(Self::ImpactMap),
      "risk-map" => Ok(Self::RiskMap),
      other => Err(Error::InvalidArgument(format!("unknown cache kind {other:?}"))),
    }
  }
}

/// A stored payload, unique on `(hashed_key, kind)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
  pub hashed_key: String,
  pub kind:       CacheKind,
  pub payload:    Value,
  pub created_at: DateTime<Utc>,
}

// ─── Canonical form ──────────────────────────────────────────────────────────

/// Reduce a JSON value to its canonical form: `null` object members are
/// dropped, object keys are ordered and array elements are sorted by their
/// own canonical encoding.
pub fn canonicalize(value: Value) -> Value {
  match value {
    Value::Object(map) => Value::Object(
      map
        .into_iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| (k, canonicalize(v)))
        .collect(),
    ),
    Value::Array(items) => {
      let mut items: Vec<Value> = items.into_iter().map(canonicalize).collect();
      items.sort_by_cached_key(Value::to_string);
      Value::Array(items)
    }
    other => other,
  }
}

/// Hex SHA-256 of the canonical form of `key`.
pub fn hash_key<K>(key: &K) -> Result<String>
where
  K: Serialize + ?Sized,
{
  let canonical = canonicalize(serde_json::to_value(key)?);
  let mut hasher = Sha256::new();
  hasher.update(CANONICAL_VERSION.as_bytes());
  hasher.update(b":");
  hasher.update(serde_json::to_string(&canonical)?.as_bytes());
  Ok(hex::encode(hasher.finalize()))
}

// ─── Cache ───────────────────────────────────────────────────────────────────

/// Typed access to the store's cache table.
pub struct ContentCache<S> {
  store: Arc<S>,
}

impl<S> Clone for ContentCache<S> {
  fn clone(&self) -> Self { Self { store: self.store.clone() } }
}

impl<S: ImpactStore> ContentCache<S> {
  pub fn new(store: Arc<S>) -> Self { Self { store } }

  /// Look up the payload stored for `key`. A payload that no longer
  /// deserialises as `T` counts as a miss.
  pub async fn get<K, T>(&self, key: &K, kind: CacheKind) -> Result<Option<T>>
  where
    K: Serialize + ?Sized,
    T: DeserializeOwned,
  {
    let hashed_key = hash_key(key)?;
    let Some(entry) = self
      .store
      .cache_get(&hashed_key, kind)
      .await
      .map_err(Error::store)?
    else {
      tracing::debug!(%kind, key = %hashed_key, "cache miss");
      return Ok(None);
    };

    match serde_json::from_value(entry.payload) {
      Ok(payload) => {
        tracing::debug!(%kind, key = %hashed_key, "cache hit");
        Ok(Some(payload))
      }
      Err(e) => {
        tracing::warn!(%kind, key = %hashed_key, error = %e, "discarding unreadable cache entry");
        Ok(None)
      }
    }
  }

  /// Store `payload` under `key`, overwriting any previous entry.
  pub async fn put<K, T>(&self, key: &K, kind: CacheKind, payload: &T) -> Result<()>
  where
    K: Serialize + ?Sized,
    T: Serialize + ?Sized,
  {
    let entry = CacheEntry {
      hashed_key: hash_key(key)?,
      kind,
      payload: serde_json::to_value(payload)?,
      created_at: Utc::now(),
    };
    self.store.cache_put(entry).await.map_err(Error::store)
  }

  /// Drop every entry. Returns how many were removed.
  pub async fn clear(&self) -> Result<usize> {
    let removed = self.store.cache_clear().await.map_err(Error::store)?;
    tracing::info!(removed, "cache cleared");
    Ok(removed)
  }
}

#[cfg(test)]
mod tests {
  use std::collections::BTreeMap;

  use serde_json::json;

  use super::*;

  #[derive(Serialize)]
  struct RegionKey {
    region_id: &'static str,
    years:     Vec<i32>,
    scenario:  Option<&'static str>,
  }

  #[derive(Serialize)]
  struct Wrapped(RegionKey);

  #[test]
  fn array_order_does_not_matter() {
    let a = json!({ "ids": ["b", "a", "c"], "years": [2020, 2019] });
    let b = json!({ "years": [2019, 2020], "ids": ["c", "b", "a"] });
    assert_eq!(hash_key(&a).unwrap(), hash_key(&b).unwrap());
  }

  #[test]
  fn nested_arrays_are_sorted_after_their_contents() {
    let a = json!([{ "x": [2, 1] }, { "x": [0] }]);
    let b = json!([{ "x": [0] }, { "x": [1, 2] }]);
    assert_eq!(hash_key(&a).unwrap(), hash_key(&b).unwrap());
  }

  #[test]
  fn struct_map_and_newtype_hash_alike() {
    let key = RegionKey {
      region_id: "r1",
      years:     vec![2021, 2020],
      scenario:  None,
    };
    let as_struct = hash_key(&key).unwrap();

    let mut map = BTreeMap::new();
    map.insert("years", json!([2020, 2021]));
    map.insert("region_id", json!("r1"));
    let as_map = hash_key(&map).unwrap();

    let as_newtype = hash_key(&Wrapped(key)).unwrap();

    assert_eq!(as_struct, as_map);
    assert_eq!(as_struct, as_newtype);
  }

  #[test]
  fn different_data_hashes_differently() {
    let a = json!({ "region_id": "r1" });
    let b = json!({ "region_id": "r2" });
    assert_ne!(hash_key(&a).unwrap(), hash_key(&b).unwrap());
    assert_eq!(hash_key(&a).unwrap().len(), 64);
  }

  #[test]
  fn cache_kind_round_trips_through_str() {
    for kind in [
      CacheKind::RawMaterialValue,
      CacheKind::RawIndicatorValue,
      CacheKind::ImpactTable,
      CacheKind::ImpactMap,
      CacheKind::RiskMap,
    ] {
      assert_eq!(kind.as_str().parse::<CacheKind>().unwrap(), kind);
    }
  }
}
