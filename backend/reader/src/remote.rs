use async_trait::async_trait;
use payloads::{
    ErrorBody, START_READING_PATH, SUBMIT_READ_PATH, StartReadingRequest, StartReadingResponse,
    SubmitReadRequest, SubmitReadResponse, USER_HEADER,
};
use reqwest::Client;
use serde::{Serialize, de::DeserializeOwned};
use tracing::debug;

use crate::gatekeeper::{ApiError, ReadingApi};

/// Talks to the reading server directly. Behind the gateway the header is set upstream.
pub struct HttpReadingApi {
    client: Client,
    base_url: String,
    user_id: String,
}

impl HttpReadingApi {
    pub fn new(base_url: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            user_id: user_id.into(),
        }
    }

    async fn post<Req: Serialize, Resp: DeserializeOwned>(
        &self,
        path: &str,
        body: &Req,
    ) -> Result<Resp, ApiError> {
        let url = format!("{}{path}", self.base_url);

        let response = self
            .client
            .post(&url)
            .header(USER_HEADER, &self.user_id)
            .json(body)
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        let status = response.status();
        debug!("POST {url} -> {status}");

        if status.is_success() {
            return response
                .json::<Resp>()
                .await
                .map_err(|e| ApiError::Transport(e.to_string()));
        }

        match response.json::<ErrorBody>().await {
            Ok(body) => Err(ApiError::from(body)),
            Err(_) => Err(ApiError::Transport(format!("unexpected status {status}"))),
        }
    }
}

#[async_trait]
impl ReadingApi for HttpReadingApi {
    async fn start_reading(
        &self,
        request: StartReadingRequest,
    ) -> Result<StartReadingResponse, ApiError> {
        self.post(START_READING_PATH, &request).await
    }

    async fn submit_read(
        &self,
        request: SubmitReadRequest,
    ) -> Result<SubmitReadResponse, ApiError> {
        self.post(SUBMIT_READ_PATH, &request).await
    }
}
