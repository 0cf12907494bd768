use super::{Key, Store};
use crate::error::Result;
use k8s_openapi::serde_json;
use serde::de::DeserializeOwned;

/// Get an object from the store as a typed resource.
///
/// # Errors
///
/// Returns the store's error for the lookup, or a json error if the object
/// does not deserialize into `K`
pub async fn get_as<K, S>(store: &S, key: &Key) -> Result<Option<K>>
where
    K: DeserializeOwned,
    S: Store + ?Sized,
{
    let Some(object) = store
        .get(key)
        .await
        .map_err(|e| e.context("get object from object store"))?
    else {
        return Ok(None);
    };

    let value = serde_json::to_value(&object)?;
    Ok(Some(serde_json::from_value(value)?))
}
