//! Payload validation seam.
//!
//! Full AMWA JSON Schema enforcement belongs to an external validator;
//! this trait is the boundary it plugs into. The default implementation
//! checks the structural invariants the rest of the system relies on.
//! With `allow_invalid_resources` set, failures are logged and accepted.

use serde_json::Value;

use nmos_domain::{Error, Result};
use nmos_model::{Resource, ResourceType};

pub trait PayloadValidator: Send + Sync {
    /// Check a resource payload against the schema for its type and
    /// version.
    fn validate(&self, resource: &Resource) -> Result<()>;
}

/// Structural checks: the payload is an object, its `id` matches the
/// resource id, and the parent-reference fields for the type are
/// present.
#[derive(Default)]
pub struct BasicValidator;

impl PayloadValidator for BasicValidator {
    fn validate(&self, resource: &Resource) -> Result<()> {
        let Value::Object(data) = &resource.data else {
            return Err(Error::Validation(format!(
                "{} payload must be an object",
                resource.kind.as_str()
            )));
        };
        match data.get("id").and_then(Value::as_str) {
            Some(id) if id == resource.id.as_str() => {}
            _ => {
                return Err(Error::Validation(format!(
                    "{} payload id must equal {}",
                    resource.kind.as_str(),
                    resource.id
                )))
            }
        }
        let required: &[&str] = match resource.kind {
            ResourceType::Node => &["href", "api"],
            ResourceType::Device => &["node_id", "type"],
            ResourceType::Source => &["device_id", "format"],
            ResourceType::Flow => &["source_id", "device_id", "format"],
            ResourceType::Sender => &["flow_id", "device_id", "transport"],
            ResourceType::Receiver => &["device_id", "transport", "format"],
            ResourceType::Subscription | ResourceType::Grain => &[],
        };
        for field in required {
            if !data.contains_key(*field) {
                return Err(Error::Validation(format!(
                    "{} payload missing {field}",
                    resource.kind.as_str()
                )));
            }
        }
        Ok(())
    }
}

/// Apply the validator per the `allow_invalid_resources` policy.
pub fn check(
    validator: &dyn PayloadValidator,
    resource: &Resource,
    allow_invalid: bool,
) -> Result<()> {
    match validator.validate(resource) {
        Ok(()) => Ok(()),
        Err(err) if allow_invalid => {
            tracing::warn!(id = %resource.id, %err, "accepting invalid resource");
            Ok(())
        }
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nmos_domain::api_version::V1_3;
    use nmos_domain::Id;
    use serde_json::json;

    fn device(data: Value) -> Resource {
        Resource::new(Id::from("d1"), ResourceType::Device, V1_3, data)
    }

    #[test]
    fn valid_device_passes() {
        let r = device(json!({"id": "d1", "node_id": "n1", "type": "urn:x-nmos:device:generic"}));
        assert!(BasicValidator.validate(&r).is_ok());
    }

    #[test]
    fn id_mismatch_fails() {
        let r = device(json!({"id": "other", "node_id": "n1", "type": "t"}));
        assert!(matches!(
            BasicValidator.validate(&r),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn missing_parent_field_fails() {
        let r = device(json!({"id": "d1", "type": "t"}));
        assert!(BasicValidator.validate(&r).is_err());
    }

    #[test]
    fn allow_invalid_downgrades_to_warning() {
        let r = device(json!({"id": "d1"}));
        assert!(check(&BasicValidator, &r, true).is_ok());
        assert!(check(&BasicValidator, &r, false).is_err());
    }
}
