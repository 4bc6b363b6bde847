//! # API Client
//!
//! The REST surface the engine speaks, one method per verb the pipeline
//! uses. Every request carries the bearer token, the tenant header, and
//! (for pushes) the outbox entry's `Correlation-Id`, which is the server's
//! deduplication key.
//!
//! ## Server Surface
//! ```text
//! HEAD   /<probe>                  liveness probe
//! GET    /<collection>             list for active tenant
//! POST   /<collection>             create; 201/200 echoes entity with id
//! PATCH  /<collection>/<id>        partial update; 409 carries server copy
//! DELETE /<collection>/<id>        204; 404 treated as already deleted
//! ```

use std::sync::Arc;

use reqwest::header::CONTENT_TYPE;
use reqwest::{RequestBuilder, StatusCode, Url};
use serde_json::Value;
use tracing::debug;

use crate::config::ApiSettings;
use crate::error::{SyncError, SyncResult};
use crate::session::SessionProvider;

/// Header carrying the outbox entry's correlation UUID.
pub const CORRELATION_HEADER: &str = "Correlation-Id";

/// Outcome of a push request that reached the server.
#[derive(Debug)]
pub enum PushOutcome {
    /// 2xx; the body is the server's copy of the entity.
    Applied(Value),
    /// 409; the body (when parseable) is the server's current version.
    Conflict(Option<Value>),
}

/// Typed REST client over the host-injected session capability.
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
    probe_path: String,
    tenant_header: String,
    session: Arc<dyn SessionProvider>,
}

impl ApiClient {
    pub fn new(settings: &ApiSettings, session: Arc<dyn SessionProvider>) -> SyncResult<Self> {
        // A trailing slash keeps Url::join appending instead of replacing.
        let mut base = settings.base_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url =
            Url::parse(&base).map_err(|e| SyncError::InvalidConfig(format!("base_url: {e}")))?;

        Ok(ApiClient {
            http: reqwest::Client::new(),
            base_url,
            probe_path: settings.probe_path.clone(),
            tenant_header: settings.tenant_header.clone(),
            session,
        })
    }

    /// Cheap liveness probe. 401 means the token is no longer valid; any
    /// other non-success is a connectivity failure.
    pub async fn probe(&self) -> SyncResult<()> {
        let url = self.join(&self.probe_path)?;
        let response = self
            .authed(self.http.head(url))?
            .send()
            .await
            .map_err(|e| SyncError::ConnectivityFailed(e.to_string()))?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::UNAUTHORIZED => Err(SyncError::AuthExpired),
            status => Err(SyncError::ConnectivityFailed(format!("HTTP {status}"))),
        }
    }

    /// Lists a collection for the active tenant, normalized to a flat list
    /// regardless of the envelope the server chose.
    pub async fn list(&self, collection: &str) -> SyncResult<Vec<Value>> {
        let url = self.join(collection)?;
        let response = self.authed(self.http.get(url))?.send().await?;

        match response.status() {
            status if status.is_success() => {
                let body: Value = response.json().await?;
                Ok(normalize_listing(body))
            }
            StatusCode::UNAUTHORIZED => Err(SyncError::AuthExpired),
            status => Err(SyncError::Transport(format!(
                "GET /{collection}: HTTP {status}"
            ))),
        }
    }

    /// Creates an entity. The body must already be free of temp IDs and
    /// internal fields.
    pub async fn create(
        &self,
        collection: &str,
        body: &Value,
        correlation_id: &str,
    ) -> SyncResult<PushOutcome> {
        let url = self.join(collection)?;
        debug!(collection, correlation_id, "POST create");
        let response = self
            .authed(self.http.post(url))?
            .header(CORRELATION_HEADER, correlation_id)
            .header(CONTENT_TYPE, "application/json")
            .json(body)
            .send()
            .await?;
        self.push_outcome(response, &format!("POST /{collection}")).await
    }

    /// Applies a partial update to one entity.
    pub async fn update(
        &self,
        collection: &str,
        id: &str,
        patch: &Value,
        correlation_id: &str,
    ) -> SyncResult<PushOutcome> {
        let url = self.join(&format!("{collection}/{id}"))?;
        debug!(collection, id, correlation_id, "PATCH update");
        let response = self
            .authed(self.http.patch(url))?
            .header(CORRELATION_HEADER, correlation_id)
            .header(CONTENT_TYPE, "application/json")
            .json(patch)
            .send()
            .await?;
        self.push_outcome(response, &format!("PATCH /{collection}/{id}"))
            .await
    }

    /// Deletes one entity. 404 is treated as already deleted.
    pub async fn delete(
        &self,
        collection: &str,
        id: &str,
        correlation_id: &str,
    ) -> SyncResult<()> {
        let url = self.join(&format!("{collection}/{id}"))?;
        debug!(collection, id, correlation_id, "DELETE");
        let response = self
            .authed(self.http.delete(url))?
            .header(CORRELATION_HEADER, correlation_id)
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Ok(()),
            StatusCode::UNAUTHORIZED => Err(SyncError::AuthExpired),
            status => Err(SyncError::Transport(format!(
                "DELETE /{collection}/{id}: HTTP {status}"
            ))),
        }
    }

    async fn push_outcome(
        &self,
        response: reqwest::Response,
        context: &str,
    ) -> SyncResult<PushOutcome> {
        match response.status() {
            status if status.is_success() => {
                let body: Value = response.json().await?;
                Ok(PushOutcome::Applied(extract_entity(body)))
            }
            StatusCode::CONFLICT => {
                let body = response.json::<Value>().await.ok().map(extract_entity);
                Ok(PushOutcome::Conflict(body))
            }
            StatusCode::UNAUTHORIZED => Err(SyncError::AuthExpired),
            status => Err(SyncError::Transport(format!("{context}: HTTP {status}"))),
        }
    }

    fn join(&self, path: &str) -> SyncResult<Url> {
        self.base_url
            .join(path)
            .map_err(|e| SyncError::InvalidConfig(format!("url path '{path}': {e}")))
    }

    /// Attaches the bearer token and tenant header. Missing credentials fail
    /// before any request leaves the process.
    fn authed(&self, request: RequestBuilder) -> SyncResult<RequestBuilder> {
        let token = self.session.token().ok_or(SyncError::Unauthenticated)?;
        let tenant = self
            .session
            .organization_id()
            .ok_or(SyncError::MissingTenant)?;
        Ok(request
            .bearer_auth(token)
            .header(self.tenant_header.as_str(), tenant))
    }
}

// =============================================================================
// Response Shape Normalization
// =============================================================================

/// Accepts the three listing envelopes the server is known to produce:
/// a bare array, an object with one array-valued field (`data` preferred),
/// or a single object.
pub(crate) fn normalize_listing(body: Value) -> Vec<Value> {
    match body {
        Value::Array(items) => items,
        Value::Object(map) => {
            if let Some(Value::Array(items)) = map.get("data") {
                return items.clone();
            }
            // One array-valued field (any metadata siblings ignored); an
            // object carrying its own id is a single record instead.
            let arrays: Vec<&Vec<Value>> = map.values().filter_map(Value::as_array).collect();
            if arrays.len() == 1 && !map.contains_key("id") {
                return arrays[0].clone();
            }
            vec![Value::Object(map)]
        }
        _ => Vec::new(),
    }
}

/// Unwraps a `{data: {...}}` envelope around a single entity.
pub(crate) fn extract_entity(body: Value) -> Value {
    match body {
        Value::Object(ref map) => match map.get("data") {
            Some(Value::Object(_)) => map
                .get("data")
                .cloned()
                .unwrap_or_else(|| Value::Object(map.clone())),
            _ => body,
        },
        other => other,
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn listings_normalize_all_three_shapes() {
        let bare = normalize_listing(json!([{"id": 1}, {"id": 2}]));
        assert_eq!(bare.len(), 2);

        let data_wrapped = normalize_listing(json!({"data": [{"id": 1}]}));
        assert_eq!(data_wrapped, vec![json!({"id": 1})]);

        let named_wrapped = normalize_listing(json!({"participants": [{"id": 1}, {"id": 2}]}));
        assert_eq!(named_wrapped.len(), 2);

        let with_metadata = normalize_listing(json!({"items": [{"id": 1}], "total": 1}));
        assert_eq!(with_metadata, vec![json!({"id": 1})]);

        let single = normalize_listing(json!({"id": 7, "name": "Alpha"}));
        assert_eq!(single, vec![json!({"id": 7, "name": "Alpha"})]);

        assert!(normalize_listing(json!(null)).is_empty());
    }

    #[test]
    fn entity_envelopes_unwrap() {
        assert_eq!(
            extract_entity(json!({"data": {"id": 501}})),
            json!({"id": 501})
        );
        assert_eq!(extract_entity(json!({"id": 501})), json!({"id": 501}));
        // A scalar "data" field is not an envelope.
        assert_eq!(
            extract_entity(json!({"data": 5, "id": 501})),
            json!({"data": 5, "id": 501})
        );
    }
}
