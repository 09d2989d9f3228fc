//! HTTP surface of the meter server, behind a trait so the store and the
//! coordinator can be driven by test doubles.

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use shared::{
    domain::{EvaluationId, MeterId, Settings},
    protocol::{
        DigitSample, Evaluation, EvaluationsQuery, EvaluationsResponse, HistoryEntry,
        HistoryResponse, MeterSnapshot, ReevaluateResponse, SampleResponse,
    },
};
use tracing::{debug, warn};
use url::Url;

use crate::error::ClientError;

/// Header carrying the shared secret on every request.
pub const SECRET_HEADER: &str = "secret";

#[async_trait]
pub trait MeterApi: Send + Sync {
    async fn meter(&self, id: &MeterId) -> Result<MeterSnapshot, ClientError>;
    async fn evaluations(
        &self,
        id: &MeterId,
        amount: u32,
        from_id: Option<EvaluationId>,
    ) -> Result<Vec<Evaluation>, ClientError>;
    async fn history(&self, id: &MeterId) -> Result<Vec<HistoryEntry>, ClientError>;
    async fn settings(&self, id: &MeterId) -> Result<Settings, ClientError>;
    async fn put_settings(&self, id: &MeterId, settings: &Settings) -> Result<(), ClientError>;
    /// Re-runs detection on the stored capture. `Ok(true)` when a display
    /// bounding box was found.
    async fn reevaluate(&self, id: &MeterId) -> Result<bool, ClientError>;
    /// `None` asks for a fresh random sample, `Some(offset)` for the
    /// deterministic sample at that index.
    async fn sample(&self, id: &MeterId, offset: Option<u32>) -> Result<DigitSample, ClientError>;
}

pub struct HttpMeterApi {
    http: Client,
    base_url: Url,
    secret: Option<String>,
}

impl HttpMeterApi {
    pub fn new(server_url: &str, secret: Option<String>) -> Result<Self, ClientError> {
        Self::with_client(Client::new(), server_url, secret)
    }

    pub fn with_client(
        http: Client,
        server_url: &str,
        secret: Option<String>,
    ) -> Result<Self, ClientError> {
        let base_url = Url::parse(server_url.trim())?;
        if base_url.cannot_be_a_base() {
            return Err(ClientError::InvalidUrl(server_url.to_string()));
        }
        Ok(Self {
            http,
            base_url,
            secret,
        })
    }

    fn endpoint(&self, id: &MeterId, tail: &[&str]) -> Result<Url, ClientError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ClientError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(["api", "watermeters", id.as_str()])
            .extend(tail);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.http.request(method, url);
        match &self.secret {
            Some(secret) => builder.header(SECRET_HEADER, secret),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response, ClientError> {
        let response = builder.send().await?;
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            warn!(status = status.as_u16(), url = %response.url(), "server rejected credentials");
        }
        if !status.is_success() {
            return Err(ClientError::HttpStatus {
                status: status.as_u16(),
            });
        }
        Ok(response)
    }

    async fn json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, ClientError> {
        Ok(self.send(builder).await?.json().await?)
    }
}

#[async_trait]
impl MeterApi for HttpMeterApi {
    async fn meter(&self, id: &MeterId) -> Result<MeterSnapshot, ClientError> {
        let url = self.endpoint(id, &[])?;
        self.json(self.request(Method::GET, url)).await
    }

    async fn evaluations(
        &self,
        id: &MeterId,
        amount: u32,
        from_id: Option<EvaluationId>,
    ) -> Result<Vec<Evaluation>, ClientError> {
        let url = self.endpoint(id, &["evals"])?;
        let response: EvaluationsResponse = self
            .json(self.request(Method::GET, url).query(&EvaluationsQuery {
                amount,
                from_id: from_id.map(|id| id.0),
            }))
            .await?;
        Ok(response.evals)
    }

    async fn history(&self, id: &MeterId) -> Result<Vec<HistoryEntry>, ClientError> {
        let url = self.endpoint(id, &["history"])?;
        let response: HistoryResponse = self.json(self.request(Method::GET, url)).await?;
        Ok(response.history)
    }

    async fn settings(&self, id: &MeterId) -> Result<Settings, ClientError> {
        let url = self.endpoint(id, &["settings"])?;
        self.json(self.request(Method::GET, url)).await
    }

    async fn put_settings(&self, id: &MeterId, settings: &Settings) -> Result<(), ClientError> {
        let url = self.endpoint(id, &["settings"])?;
        self.send(self.request(Method::PUT, url).json(settings))
            .await?;
        debug!(meter = %id, "settings persisted");
        Ok(())
    }

    async fn reevaluate(&self, id: &MeterId) -> Result<bool, ClientError> {
        let url = self.endpoint(id, &["evaluations", "reevaluate"])?;
        let response: ReevaluateResponse = self.json(self.request(Method::POST, url)).await?;
        let found = response.bounding_box_found();
        match response.error {
            Some(error) => Err(ClientError::Application(error)),
            None => Ok(found),
        }
    }

    async fn sample(&self, id: &MeterId, offset: Option<u32>) -> Result<DigitSample, ClientError> {
        let url = match offset {
            Some(offset) => {
                let offset = offset.to_string();
                self.endpoint(id, &["evaluations", "sample", offset.as_str()])?
            }
            None => self.endpoint(id, &["evaluations", "sample"])?,
        };
        let response: SampleResponse = self.json(self.request(Method::POST, url)).await?;
        response.into_sample().map_err(ClientError::Application)
    }
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
