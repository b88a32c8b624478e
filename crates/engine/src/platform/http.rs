//! Production platform client over HTTP (`reqwest`).
//!
//! One [`HttpPlatform`] implements every platform trait. All requests share a
//! single connection pool and the per-request timeout from
//! `timing.http_timeout_secs`. Non-2xx answers become
//! [`PlatformError::Status`] carrying the response body.

use canary_core::config::CanaryConfig;
use canary_core::error::PlatformError;
use canary_core::types::{
    Device, DeviceType, Hub, LastValue, LastValueRequest, PermDevice, PreparedDeployment,
    ProcessInstance, Session, WorkflowDeployment,
};
use chrono::Utc;
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::debug;
use url::Url;

use super::{
    DeviceDataQuery, DeviceManager, DeviceRepository, DeviceTypeQuery, IdentityProvider,
    PermissionSearch, WorkflowEngine,
};

const AUTH: &str = "auth";
const DEVICE_MANAGER: &str = "device-manager";
const DEVICE_REPOSITORY: &str = "device-repository";
const PERMISSION_SEARCH: &str = "permission-search";
const LAST_VALUE_QUERY: &str = "last-value-query";
const PROCESS_DEPLOYMENT: &str = "process-deployment";
const PROCESS_ENGINE_WRAPPER: &str = "process-engine-wrapper";

const TOKEN_PATH: &[&str] = &["auth", "realms", "master", "protocol", "openid-connect", "token"];
const LOGOUT_PATH: &[&str] = &["auth", "realms", "master", "protocol", "openid-connect", "logout"];

#[derive(Debug, Deserialize)]
struct OpenIdToken {
    access_token: String,
    #[serde(default)]
    refresh_token: String,
}

/// Platform client for all canary-facing services.
#[derive(Debug, Clone)]
pub struct HttpPlatform {
    client: Client,
    auth_endpoint: String,
    client_id: String,
    username: String,
    password: String,
    permission_search_url: String,
    device_manager_url: String,
    device_repository_url: String,
    last_value_query_url: String,
    process_deployment_url: String,
    process_engine_wrapper_url: String,
}

impl HttpPlatform {
    /// Builds the client from configuration.
    pub fn from_config(config: &CanaryConfig) -> Result<Self, PlatformError> {
        let client = Client::builder()
            .timeout(config.timing.http_timeout())
            .build()
            .map_err(|e| PlatformError::Request {
                service: "http-client".to_owned(),
                reason: e.to_string(),
            })?;

        let e = &config.endpoints;
        Ok(Self {
            client,
            auth_endpoint: config.auth.endpoint.clone(),
            client_id: config.auth.client_id.clone(),
            username: config.auth.username.clone(),
            password: config.auth.password.clone(),
            permission_search_url: e.permission_search_url.clone(),
            device_manager_url: e.device_manager_url.clone(),
            device_repository_url: e.device_repository_url.clone(),
            last_value_query_url: e.last_value_query_url.clone(),
            process_deployment_url: e.process_deployment_url.clone(),
            process_engine_wrapper_url: e.process_engine_wrapper_url.clone(),
        })
    }

    async fn send(service: &str, request: RequestBuilder) -> Result<Response, PlatformError> {
        let response = request.send().await.map_err(|e| PlatformError::Request {
            service: service.to_owned(),
            reason: e.to_string(),
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        // the body is the only diagnostic the platform gives us
        let body = response.text().await.unwrap_or_default();
        Err(PlatformError::Status {
            service: service.to_owned(),
            status: status.as_u16(),
            body,
        })
    }

    async fn send_json<T: DeserializeOwned>(
        service: &str,
        request: RequestBuilder,
    ) -> Result<T, PlatformError> {
        let response = Self::send(service, request).await?;
        response.json::<T>().await.map_err(|e| PlatformError::Decode {
            service: service.to_owned(),
            reason: e.to_string(),
        })
    }

    /// Like [`Self::send_json`], but an empty body decodes to `T::default()`.
    async fn send_json_or_default<T: DeserializeOwned + Default>(
        service: &str,
        request: RequestBuilder,
    ) -> Result<T, PlatformError> {
        let response = Self::send(service, request).await?;
        let body = response.bytes().await.map_err(|e| PlatformError::Request {
            service: service.to_owned(),
            reason: e.to_string(),
        })?;
        decode_or_default(service, &body)
    }

    async fn send_empty(service: &str, request: RequestBuilder) -> Result<(), PlatformError> {
        Self::send(service, request).await.map(|_| ())
    }

    async fn permission_query<T: DeserializeOwned>(
        &self,
        session: &Session,
        query: serde_json::Value,
    ) -> Result<T, PlatformError> {
        let url = endpoint(PERMISSION_SEARCH, &self.permission_search_url, &["v3", "query"])?;
        let request = self
            .client
            .post(url)
            .header("Authorization", session.bearer())
            .json(&query);
        Self::send_json(PERMISSION_SEARCH, request).await
    }
}

pub(crate) fn decode_or_default<T: DeserializeOwned + Default>(
    service: &str,
    body: &[u8],
) -> Result<T, PlatformError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| PlatformError::Decode {
        service: service.to_owned(),
        reason: e.to_string(),
    })
}

/// Appends percent-encoded path segments to `base`.
pub(crate) fn endpoint(service: &str, base: &str, segments: &[&str]) -> Result<Url, PlatformError> {
    let invalid = |reason: String| PlatformError::Request {
        service: service.to_owned(),
        reason,
    };
    let mut url = Url::parse(base).map_err(|e| invalid(format!("invalid base url '{base}': {e}")))?;
    url.path_segments_mut()
        .map_err(|()| invalid(format!("base url '{base}' cannot carry a path")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

impl IdentityProvider for HttpPlatform {
    async fn acquire(&self) -> Result<Session, PlatformError> {
        let url = endpoint(AUTH, &self.auth_endpoint, TOKEN_PATH)?;
        let request = self.client.post(url).form(&[
            ("client_id", self.client_id.as_str()),
            ("username", self.username.as_str()),
            ("password", self.password.as_str()),
            ("grant_type", "password"),
        ]);
        let token: OpenIdToken = Self::send_json(AUTH, request).await?;
        debug!("session acquired");
        Ok(Session {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            issued_at: Utc::now(),
        })
    }

    async fn release(&self, session: &Session) -> Result<(), PlatformError> {
        let url = endpoint(AUTH, &self.auth_endpoint, LOGOUT_PATH)?;
        let request = self.client.post(url).form(&[
            ("client_id", self.client_id.as_str()),
            ("refresh_token", session.refresh_token.as_str()),
            ("id_token_hint", session.access_token.as_str()),
        ]);
        Self::send_empty(AUTH, request).await
    }
}

impl DeviceManager for HttpPlatform {
    async fn create_device_type(
        &self,
        session: &Session,
        device_type: &DeviceType,
    ) -> Result<DeviceType, PlatformError> {
        let url = endpoint(DEVICE_MANAGER, &self.device_manager_url, &["device-types"])?;
        let request = self
            .client
            .post(url)
            .query(&[("wait", "true")])
            .header("Authorization", session.bearer())
            .json(device_type);
        Self::send_json(DEVICE_MANAGER, request).await
    }

    async fn create_device(&self, session: &Session, device: &Device) -> Result<Device, PlatformError> {
        let url = endpoint(DEVICE_MANAGER, &self.device_manager_url, &["devices"])?;
        let request = self
            .client
            .post(url)
            .query(&[("wait", "true")])
            .header("Authorization", session.bearer())
            .json(device);
        Self::send_json(DEVICE_MANAGER, request).await
    }

    async fn update_device(&self, session: &Session, device: &Device) -> Result<Device, PlatformError> {
        let url = endpoint(DEVICE_MANAGER, &self.device_manager_url, &["devices", &device.id])?;
        let request = self
            .client
            .put(url)
            .header("Authorization", session.bearer())
            .json(device);
        Self::send_json(DEVICE_MANAGER, request).await
    }

    async fn create_hub(&self, session: &Session, hub: &Hub) -> Result<Hub, PlatformError> {
        let url = endpoint(DEVICE_MANAGER, &self.device_manager_url, &["hubs"])?;
        let request = self
            .client
            .post(url)
            .header("Authorization", session.bearer())
            .json(hub);
        Self::send_json(DEVICE_MANAGER, request).await
    }

    async fn update_hub(&self, session: &Session, hub: &Hub) -> Result<Hub, PlatformError> {
        let url = endpoint(DEVICE_MANAGER, &self.device_manager_url, &["hubs", &hub.id])?;
        let request = self
            .client
            .put(url)
            .header("Authorization", session.bearer())
            .json(hub);
        Self::send_json_or_default(DEVICE_MANAGER, request).await
    }
}

impl DeviceRepository for HttpPlatform {
    async fn list_device_types(
        &self,
        session: &Session,
        query: &DeviceTypeQuery,
    ) -> Result<Vec<DeviceType>, PlatformError> {
        let url = endpoint(DEVICE_REPOSITORY, &self.device_repository_url, &["v3", "device-types"])?;
        let request = self
            .client
            .get(url)
            .query(&[
                ("limit", query.limit.to_string()),
                ("offset", query.offset.to_string()),
                ("sort", format!("{}.asc", query.sort_by)),
                ("attr-keys", query.attribute_key.clone()),
            ])
            .header("Authorization", session.bearer());
        Self::send_json(DEVICE_REPOSITORY, request).await
    }

    async fn list_devices(
        &self,
        session: &Session,
        attribute_key: &str,
        limit: u32,
    ) -> Result<Vec<Device>, PlatformError> {
        let url = endpoint(DEVICE_REPOSITORY, &self.device_repository_url, &["v3", "devices"])?;
        let request = self
            .client
            .get(url)
            .query(&[("limit", limit.to_string()), ("attr-keys", attribute_key.to_owned())])
            .header("Authorization", session.bearer());
        Self::send_json(DEVICE_REPOSITORY, request).await
    }

    async fn read_device_type(&self, session: &Session, id: &str) -> Result<DeviceType, PlatformError> {
        let url = endpoint(DEVICE_REPOSITORY, &self.device_repository_url, &["device-types", id])?;
        let request = self.client.get(url).header("Authorization", session.bearer());
        Self::send_json(DEVICE_REPOSITORY, request).await
    }

    async fn read_device(&self, session: &Session, id: &str) -> Result<Device, PlatformError> {
        let url = endpoint(DEVICE_REPOSITORY, &self.device_repository_url, &["devices", id])?;
        let request = self.client.get(url).header("Authorization", session.bearer());
        Self::send_json(DEVICE_REPOSITORY, request).await
    }
}

impl PermissionSearch for HttpPlatform {
    async fn find_hubs_by_name(
        &self,
        session: &Session,
        name: &str,
        limit: u32,
    ) -> Result<Vec<Hub>, PlatformError> {
        let query = json!({
            "resource": "hubs",
            "find": {
                "limit": limit,
                "offset": 0,
                "rights": "w",
                "sort_by": "name",
                "filter": {
                    "condition": {
                        "feature": "features.name",
                        "operation": "==",
                        "value": name,
                    }
                }
            }
        });
        self.permission_query(session, query).await
    }

    async fn list_devices_by_ids(
        &self,
        session: &Session,
        ids: &[String],
        limit: u32,
    ) -> Result<Vec<PermDevice>, PlatformError> {
        let query = json!({
            "resource": "devices",
            "list_ids": {
                "ids": ids,
                "limit": limit,
                "offset": 0,
                "rights": "r",
            }
        });
        self.permission_query(session, query).await
    }
}

impl DeviceDataQuery for HttpPlatform {
    async fn last_values(
        &self,
        session: &Session,
        requests: &[LastValueRequest],
    ) -> Result<Vec<LastValue>, PlatformError> {
        let url = Url::parse(&self.last_value_query_url).map_err(|e| PlatformError::Request {
            service: LAST_VALUE_QUERY.to_owned(),
            reason: format!("invalid url: {e}"),
        })?;
        let request = self
            .client
            .post(url)
            .header("Authorization", session.bearer())
            .json(requests);
        Self::send_json(LAST_VALUE_QUERY, request).await
    }
}

impl WorkflowEngine for HttpPlatform {
    async fn list_deployments(
        &self,
        session: &Session,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<WorkflowDeployment>, PlatformError> {
        let url = endpoint(
            PROCESS_ENGINE_WRAPPER,
            &self.process_engine_wrapper_url,
            &["v2", "deployments"],
        )?;
        let mut query = vec![("maxResults", limit.to_string())];
        if offset > 0 {
            query.push(("firstResult", offset.to_string()));
        }
        let request = self
            .client
            .get(url)
            .query(&query)
            .header("Authorization", session.bearer());
        Self::send_json(PROCESS_ENGINE_WRAPPER, request).await
    }

    async fn delete_deployment(&self, session: &Session, id: &str) -> Result<(), PlatformError> {
        let url = endpoint(
            PROCESS_DEPLOYMENT,
            &self.process_deployment_url,
            &["v3", "deployments", id],
        )?;
        let request = self.client.delete(url).header("Authorization", session.bearer());
        Self::send_empty(PROCESS_DEPLOYMENT, request).await
    }

    async fn prepare_deployment(
        &self,
        session: &Session,
        bpmn: &str,
        svg: &str,
    ) -> Result<PreparedDeployment, PlatformError> {
        let url = endpoint(
            PROCESS_DEPLOYMENT,
            &self.process_deployment_url,
            &["v3", "prepared-deployments"],
        )?;
        let request = self
            .client
            .post(url)
            .header("Authorization", session.bearer())
            .json(&json!({ "xml": bpmn, "svg": svg }));
        Self::send_json(PROCESS_DEPLOYMENT, request).await
    }

    async fn deploy(
        &self,
        session: &Session,
        document: &serde_json::Value,
    ) -> Result<WorkflowDeployment, PlatformError> {
        let url = endpoint(
            PROCESS_DEPLOYMENT,
            &self.process_deployment_url,
            &["v3", "deployments"],
        )?;
        let request = self
            .client
            .post(url)
            .query(&[("source", "sepl")])
            .header("Authorization", session.bearer())
            .json(document);
        Self::send_json(PROCESS_DEPLOYMENT, request).await
    }

    async fn start_deployment(&self, session: &Session, id: &str) -> Result<(), PlatformError> {
        let url = endpoint(
            PROCESS_ENGINE_WRAPPER,
            &self.process_engine_wrapper_url,
            &["v2", "deployments", id, "start"],
        )?;
        let request = self.client.get(url).header("Authorization", session.bearer());
        Self::send_empty(PROCESS_ENGINE_WRAPPER, request).await
    }

    async fn process_instances(
        &self,
        session: &Session,
        max_results: u32,
    ) -> Result<Vec<ProcessInstance>, PlatformError> {
        let url = endpoint(
            PROCESS_ENGINE_WRAPPER,
            &self.process_engine_wrapper_url,
            &["v2", "history", "process-instances"],
        )?;
        let request = self
            .client
            .get(url)
            .query(&[("maxResults", max_results.to_string())])
            .header("Authorization", session.bearer());
        Self::send_json(PROCESS_ENGINE_WRAPPER, request).await
    }
}
