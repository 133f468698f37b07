//! HTTP implementation of the orchestrator client.
//!
//! Talks to the orchestrator's JSON gateway. Each trait operation maps to a
//! single request:
//!
//! - `POST {base}/supplies` and `POST {base}/instances` for state requests,
//! - `GET {base}/installations?node=…&release=…` for installation status,
//! - `GET {base}/partitions?name=…` for bound-partition snapshots,
//! - `GET {base}/instances/connection?name=…` for connection parameters,
//! - `POST {base}/takeovers` for clone promotion,
//! - `GET {monitor}/monitor-public/feed.json` for the monitoring feed.
//!
//! Transport-level failures map to [`ClientError::Transport`], non-success
//! statuses to [`ClientError::Http`] (server errors while listing partitions
//! map to [`ClientError::Enumeration`] instead), and undecodable responses
//! to [`ClientError::Api`].

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;

use super::{
    ClientError, ClientFuture, FeedEntry, OrchestratorClient, PartitionStatus, RequestedState,
    SupplyState, TakeoverRequest,
};

#[derive(Debug, Deserialize)]
struct InstallationStatusBody {
    status: String,
}

/// Orchestrator client backed by the JSON gateway.
#[derive(Clone, Debug)]
pub struct HttpOrchestratorClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpOrchestratorClient {
    /// Creates a client for the gateway rooted at `master_url`, optionally
    /// authenticating with a bearer `token`.
    #[must_use]
    pub fn new(master_url: impl Into<String>, token: Option<String>) -> Self {
        let base_url = master_url.into().trim_end_matches('/').to_owned();
        Self {
            http: reqwest::Client::new(),
            base_url,
            token,
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }

    fn map_error(err: &reqwest::Error) -> ClientError {
        if err.is_connect() || err.is_timeout() {
            ClientError::Transport(err.to_string())
        } else if err.is_decode() {
            ClientError::Api(err.to_string())
        } else {
            ClientError::Connection(err.to_string())
        }
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response, ClientError> {
        let prepared = match self.token.as_deref() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        };
        prepared.send().await.map_err(|err| Self::map_error(&err))
    }

    async fn expect_success(response: reqwest::Response) -> Result<reqwest::Response, ClientError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response
            .text()
            .await
            .unwrap_or_else(|err| err.to_string());
        Err(ClientError::Http {
            status: status.as_u16(),
            message,
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, url: String) -> Result<T, ClientError> {
        let response = self.send(self.http.get(url)).await?;
        let checked = Self::expect_success(response).await?;
        checked.json::<T>().await.map_err(|err| Self::map_error(&err))
    }

    async fn post_json(&self, url: String, body: serde_json::Value) -> Result<(), ClientError> {
        let response = self.send(self.http.post(url).json(&body)).await?;
        Self::expect_success(response).await.map(|_| ())
    }
}

impl OrchestratorClient for HttpOrchestratorClient {
    fn supply<'a>(
        &'a self,
        release_url: &'a str,
        node_id: &'a str,
        state: SupplyState,
    ) -> ClientFuture<'a, ()> {
        Box::pin(async move {
            self.post_json(
                self.endpoint("supplies"),
                json!({
                    "release_url": release_url,
                    "node_id": node_id,
                    "state": state.as_str(),
                }),
            )
            .await
        })
    }

    fn request_instance<'a>(
        &'a self,
        release_url: &'a str,
        partition_name: &'a str,
        state: RequestedState,
        parameters: Option<&'a BTreeMap<String, String>>,
    ) -> ClientFuture<'a, ()> {
        Box::pin(async move {
            self.post_json(
                self.endpoint("instances"),
                json!({
                    "release_url": release_url,
                    "partition_name": partition_name,
                    "state": state.as_str(),
                    "parameters": parameters,
                }),
            )
            .await
        })
    }

    fn installation_status<'a>(
        &'a self,
        node_id: &'a str,
        release_url: &'a str,
    ) -> ClientFuture<'a, String> {
        Box::pin(async move {
            let request = self
                .http
                .get(self.endpoint("installations"))
                .query(&[("node", node_id), ("release", release_url)]);
            let response = self.send(request).await?;
            let checked = Self::expect_success(response).await?;
            let body = checked
                .json::<InstallationStatusBody>()
                .await
                .map_err(|err| Self::map_error(&err))?;
            Ok(body.status)
        })
    }

    fn list_bound_partitions<'a>(
        &'a self,
        partition_name: &'a str,
    ) -> ClientFuture<'a, Vec<PartitionStatus>> {
        Box::pin(async move {
            let request = self
                .http
                .get(self.endpoint("partitions"))
                .query(&[("name", partition_name)]);
            let response = self.send(request).await?;
            let status = response.status();
            if status.is_server_error() {
                let message = response
                    .text()
                    .await
                    .unwrap_or_else(|err| err.to_string());
                return Err(ClientError::Enumeration(message));
            }
            let checked = Self::expect_success(response).await?;
            checked
                .json::<Vec<PartitionStatus>>()
                .await
                .map_err(|err| Self::map_error(&err))
        })
    }

    fn monitoring_feed_entry<'a>(
        &'a self,
        base_url: &'a str,
    ) -> ClientFuture<'a, Option<FeedEntry>> {
        Box::pin(async move {
            let feed_url = format!(
                "{}/monitor-public/feed.json",
                base_url.trim_end_matches('/')
            );
            let entries = self.get_json::<Vec<FeedEntry>>(feed_url).await?;
            Ok(entries.into_iter().next())
        })
    }

    fn root_connection_parameters<'a>(
        &'a self,
        partition_name: &'a str,
    ) -> ClientFuture<'a, BTreeMap<String, String>> {
        Box::pin(async move {
            let request = self
                .http
                .get(self.endpoint("instances/connection"))
                .query(&[("name", partition_name)]);
            let response = self.send(request).await?;
            let checked = Self::expect_success(response).await?;
            checked
                .json::<BTreeMap<String, String>>()
                .await
                .map_err(|err| Self::map_error(&err))
        })
    }

    fn takeover<'a>(&'a self, request: &'a TakeoverRequest) -> ClientFuture<'a, ()> {
        Box::pin(async move {
            let body = serde_json::to_value(request)
                .map_err(|err| ClientError::Api(err.to_string()))?;
            self.post_json(self.endpoint("takeovers"), body).await
        })
    }
}
