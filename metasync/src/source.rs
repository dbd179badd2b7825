//! The transport seam between a reconciler and its external metric source.

use crate::error::{MetaError, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use std::time::Duration;
use tracing::trace;

/// Delivers snapshots of type `S` from somewhere outside the process.
#[async_trait]
pub trait SnapshotSource<S>: Send + Sync {
    /// Identifies the endpoint in connectivity events and logs.
    fn endpoint(&self) -> &str;

    /// Fetches one snapshot. Any error is treated as a transport failure.
    async fn fetch(&self) -> Result<S>;
}

/// Polls a JSON endpoint over HTTP.
pub struct HttpSource<S> {
    client: reqwest::Client,
    endpoint: String,
    _snapshot: PhantomData<fn() -> S>,
}

impl<S> HttpSource<S> {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            endpoint: endpoint.into(),
            _snapshot: PhantomData,
        }
    }
}

#[async_trait]
impl<S> SnapshotSource<S> for HttpSource<S>
where
    S: DeserializeOwned + Send + 'static,
{
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn fetch(&self) -> Result<S> {
        trace!("Fetching metrics from {}", self.endpoint);
        let response = self
            .client
            .get(&self.endpoint)
            .send()
            .await
            .map_err(|err| MetaError::transport(&self.endpoint, err))?;

        let status = response.status();
        if !status.is_success() {
            return Err(MetaError::Status {
                endpoint: self.endpoint.clone(),
                status: status.as_u16(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|err| MetaError::transport(&self.endpoint, err))?;
        Ok(serde_json::from_slice(&body)?)
    }
}
