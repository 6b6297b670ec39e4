//! Thin HTTP client for the Registration API.
//!
//! Every call classifies the outcome per the retry policy: 409 is
//! success-shaped, other 4xx are permanent failures, 5xx and transport
//! errors are transient.

use serde_json::{json, Value};

use nmos_domain::{Error, Id, Result};
use nmos_model::ResourceType;

#[derive(Clone)]
pub struct RegistryClient {
    http: reqwest::Client,
}

impl Default for RegistryClient {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryClient {
    pub fn new() -> Self {
        RegistryClient {
            http: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(5))
                .build()
                .unwrap_or_default(),
        }
    }

    /// POST a resource to `{base}/resource`.
    pub async fn post_resource(
        &self,
        base: &str,
        kind: ResourceType,
        data: &Value,
    ) -> Result<()> {
        let body = json!({ "type": kind.as_str(), "data": data });
        let response = self
            .http
            .post(format!("{base}/resource"))
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::TransientNetwork(format!("post resource: {e}")))?;
        match Error::from_registry_status(response.status().as_u16(), "post resource") {
            None | Some(Error::Conflict(_)) => Ok(()),
            Some(err) => Err(err),
        }
    }

    /// POST an empty body to `{base}/health/nodes/{node_id}`.
    pub async fn heartbeat(&self, base: &str, node_id: &Id) -> Result<()> {
        let response = self
            .http
            .post(format!("{base}/health/nodes/{node_id}"))
            .send()
            .await
            .map_err(|e| Error::TransientNetwork(format!("heartbeat: {e}")))?;
        // 404 is the registry telling us it forgot this node; the caller
        // re-registers rather than treating it as a permanent failure.
        if response.status().as_u16() == 404 {
            return Err(Error::NotFound(node_id.to_string()));
        }
        match Error::from_registry_status(response.status().as_u16(), "heartbeat") {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }

    /// DELETE `{base}/resource/{type-plural}/{id}`.
    pub async fn delete_resource(&self, base: &str, kind: ResourceType, id: &Id) -> Result<()> {
        let response = self
            .http
            .delete(format!("{base}/resource/{}/{id}", kind.plural()))
            .send()
            .await
            .map_err(|e| Error::TransientNetwork(format!("delete resource: {e}")))?;
        match Error::from_registry_status(response.status().as_u16(), "delete resource") {
            // 404 on delete means the registry already forgot it.
            Some(Error::PermanentNetwork(msg)) if msg.starts_with("404") => Ok(()),
            None | Some(Error::Conflict(_)) => Ok(()),
            Some(err) => Err(err),
        }
    }
}
