//! HTTP transport for the assistants API.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::config::ThreadrunConfig;
use crate::error::RunError;
use crate::stream::EventStream;
use crate::template::RenderedRequest;

const BETA_HEADER: &str = "openai-beta";
const BETA_VERSION: &str = "assistants=v2";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Authenticated client rooted at the API base URL.
#[derive(Debug, Clone)]
pub struct AssistantsClient {
    http: reqwest::Client,
    base_url: String,
    stream_idle_timeout: Option<Duration>,
}

impl AssistantsClient {
    pub fn new(api_key: &str, base_url: impl Into<String>) -> Result<Self, RunError> {
        let http = reqwest::Client::builder()
            .default_headers(default_headers(api_key)?)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            stream_idle_timeout: None,
        })
    }

    pub fn from_config(config: &ThreadrunConfig) -> Result<Self, RunError> {
        Ok(Self::new(config.api_key()?, config.base_url.clone())?
            .with_stream_idle_timeout(config.stream_idle_timeout))
    }

    pub fn with_stream_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.stream_idle_timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn builder<B: Serialize>(&self, request: &RenderedRequest<B>) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url, request.path);
        let builder = self.http.request(request.method.clone(), url);
        match &request.body {
            Some(body) => builder.json(body),
            None => builder,
        }
    }

    /// Send a streaming request and wrap the response as an event stream.
    ///
    /// A non-success status fails with the response body attached.
    pub async fn open_stream<B: Serialize>(
        &self,
        request: &RenderedRequest<B>,
    ) -> Result<EventStream, RunError> {
        debug!(request = %request, "opening event stream");

        let resp = self
            .builder(request)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(status_to_error(&request.to_string(), status, &body));
        }

        Ok(EventStream::from_response(resp).with_idle_timeout(self.stream_idle_timeout))
    }

    /// Send a plain request and decode the JSON response.
    pub async fn fetch_json<B: Serialize>(
        &self,
        request: &RenderedRequest<B>,
    ) -> Result<Value, RunError> {
        debug!(request = %request, "sending request");

        let resp = self.builder(request).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(status_to_error(&request.to_string(), status, &body));
        }
        Ok(resp.json().await?)
    }
}

fn default_headers(api_key: &str) -> Result<HeaderMap, RunError> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(BETA_HEADER, HeaderValue::from_static(BETA_VERSION));
    let mut auth = HeaderValue::from_str(&format!("Bearer {api_key}"))
        .map_err(|_| RunError::Configuration("API key contains invalid characters".into()))?;
    auth.set_sensitive(true);
    headers.insert(AUTHORIZATION, auth);
    Ok(headers)
}

/// Build the error for a non-success response.
pub fn status_to_error(request: &str, status: reqwest::StatusCode, body: &str) -> RunError {
    RunError::api(status.as_u16(), format!("{request} error: {status}\n{body}"))
}
