//! Envelope construction from observed changes.

use crate::error::WatchError;
use crate::source::Change;
use kube::Resource;
use relay_client::{Envelope, ResourceType};
use serde::Serialize;

/// Build the envelope for one change of `resource_type`.
///
/// The payload is the full object as observed; cluster-scoped objects get an
/// empty namespace. An object that cannot be re-encoded is treated as a
/// type mismatch.
pub fn build_envelope<K>(
    resource_type: ResourceType,
    change: &Change<K>,
) -> Result<Envelope, WatchError>
where
    K: Resource + Serialize,
{
    let namespace = change.object.meta().namespace.clone().unwrap_or_default();
    let payload = serde_json::to_value(&change.object)
        .map_err(|e| WatchError::TypeMismatch(format!("{resource_type} payload: {e}")))?;
    if !payload.is_object() {
        return Err(WatchError::TypeMismatch(format!(
            "{resource_type} payload is not an object"
        )));
    }

    Ok(Envelope::new(namespace, change.kind, resource_type, payload))
}
