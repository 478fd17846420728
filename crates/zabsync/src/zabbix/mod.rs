use std::sync::atomic::{AtomicU64, Ordering};

use reqwest::Client;
use serde_json::{Value, json};
use url::Url;

use crate::error::ZabError;

pub mod types;
pub use types::{ZabbixGroup, ZabbixHost, ZabbixTag, ZabbixTemplate};

const API_PATH: &str = "api_jsonrpc.php";

/// Thin JSON-RPC 2.0 client for the Zabbix HTTP API.
///
/// Only the handful of methods the reconcilers need are exposed; every call
/// after `login` carries the auth token returned by `user.login`.
pub struct ZabbixApi {
    client: Client,
    endpoint: Url,
    auth: Option<String>,
    next_id: AtomicU64,
}

impl ZabbixApi {
    pub fn new(url: &str) -> Result<Self, ZabError> {
        let mut base = Url::parse(url)?;
        let endpoint = if base.path().ends_with(API_PATH) {
            base
        } else {
            if !base.path().ends_with('/') {
                base.set_path(&format!("{}/", base.path()));
            }
            base.join(API_PATH)?
        };
        Ok(ZabbixApi {
            client: Client::new(),
            endpoint,
            auth: None,
            next_id: AtomicU64::new(1),
        })
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, ZabError> {
        let mut envelope = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": self.next_id.fetch_add(1, Ordering::Relaxed),
        });
        if method != "user.login" {
            let auth = self.auth.as_ref().ok_or_else(|| ZabError::Api {
                method: method.to_string(),
                message: "not logged in".to_string(),
            })?;
            envelope["auth"] = json!(auth);
        }

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&envelope)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ZabError::Http(format!(
                "{} returned HTTP {}",
                method, status
            )));
        }

        let body: Value = response.json().await?;
        if let Some(error) = body.get("error") {
            let message = error
                .get("data")
                .or_else(|| error.get("message"))
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string();
            return Err(ZabError::Api {
                method: method.to_string(),
                message,
            });
        }
        body.get("result").cloned().ok_or_else(|| ZabError::Api {
            method: method.to_string(),
            message: "response without result".to_string(),
        })
    }

    /// Authenticates and stores the session token for subsequent calls.
    pub async fn login(&mut self, username: &str, password: &str) -> Result<(), ZabError> {
        let result = self
            .request(
                "user.login",
                json!({ "username": username, "password": password }),
            )
            .await?;
        let token = result.as_str().ok_or_else(|| ZabError::Api {
            method: "user.login".to_string(),
            message: "token missing from login response".to_string(),
        })?;
        self.auth = Some(token.to_string());
        Ok(())
    }

    pub async fn host_get(&self, params: Value) -> Result<Vec<ZabbixHost>, ZabError> {
        let result = self.request("host.get", params).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Creates a host and returns its new hostid.
    pub async fn host_create(&self, params: Value) -> Result<String, ZabError> {
        let result = self.request("host.create", params).await?;
        let hostid = result
            .get("hostids")
            .and_then(Value::as_array)
            .and_then(|ids| ids.first())
            .and_then(Value::as_str)
            .ok_or_else(|| ZabError::Api {
                method: "host.create".to_string(),
                message: "no hostids in response".to_string(),
            })?;
        Ok(hostid.to_string())
    }

    pub async fn host_update(&self, params: Value) -> Result<(), ZabError> {
        self.request("host.update", params).await?;
        Ok(())
    }

    pub async fn hostgroup_get(&self) -> Result<Vec<ZabbixGroup>, ZabError> {
        let result = self
            .request("hostgroup.get", json!({ "output": ["groupid", "name"] }))
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    pub async fn hostgroup_get_by_name(&self, name: &str) -> Result<Vec<ZabbixGroup>, ZabError> {
        let result = self
            .request(
                "hostgroup.get",
                json!({ "output": ["groupid", "name"], "filter": { "name": name } }),
            )
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Creates a host group and returns its new groupid.
    pub async fn hostgroup_create(&self, name: &str) -> Result<String, ZabError> {
        let result = self
            .request("hostgroup.create", json!({ "name": name }))
            .await?;
        let groupid = result
            .get("groupids")
            .and_then(Value::as_array)
            .and_then(|ids| ids.first())
            .and_then(Value::as_str)
            .ok_or_else(|| ZabError::Api {
                method: "hostgroup.create".to_string(),
                message: "no groupids in response".to_string(),
            })?;
        Ok(groupid.to_string())
    }

    pub async fn template_get(&self) -> Result<Vec<ZabbixTemplate>, ZabError> {
        let result = self
            .request("template.get", json!({ "output": ["templateid", "host"] }))
            .await?;
        Ok(serde_json::from_value(result)?)
    }
}
