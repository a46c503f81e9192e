//! Remote scorer over a small JSON API
//!
//! - `POST {endpoint}/score` with a [`ScoringInput`] body, returning
//!   `{"predictions": [ModelPrediction, ...]}`
//! - `POST {endpoint}/recalibrate` with a [`RecalibrationSignal`] body,
//!   returning `{"accepted": n}`
//! - `GET {endpoint}/health`

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::{ModelPrediction, ModelScorer, RecalibrationSignal, ScoringInput};
use crate::error::{Error, Result};

#[derive(Clone)]
pub struct HttpScorer {
    http_client: Client,
    base_url: String,
}

#[derive(Deserialize)]
struct ScoreResponse {
    #[serde(default)]
    predictions: Vec<ModelPrediction>,
}

#[derive(Deserialize)]
struct RecalibrateResponse {
    accepted: usize,
}

impl HttpScorer {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http_client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post_json<B: serde::Serialize + ?Sized, T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let response = self
            .http_client
            .post(format!("{}/{}", self.base_url, path))
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Scorer(format!(
                "Scorer API error {} on /{}: {}",
                status, path, body
            )));
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl ModelScorer for HttpScorer {
    async fn score(&self, input: &ScoringInput<'_>) -> Result<Vec<ModelPrediction>> {
        let response: ScoreResponse = self.post_json("score", input).await?;
        debug!(
            predictions = response.predictions.len(),
            "Remote scorer returned predictions"
        );
        Ok(response.predictions)
    }

    async fn recalibrate(&self, signal: &RecalibrationSignal) -> Result<usize> {
        if signal.examples.is_empty() {
            return Ok(0);
        }
        let response: RecalibrateResponse = self.post_json("recalibrate", signal).await?;
        Ok(response.accepted.min(signal.examples.len()))
    }

    async fn health_check(&self) -> bool {
        match self
            .http_client
            .get(format!("{}/health", self.base_url))
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    fn name(&self) -> &str {
        "http"
    }
}
