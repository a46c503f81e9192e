//! Mock scorer for testing
//!
//! Returns the same configured predictions for every transaction, including
//! out-of-range confidences, so engine clamping can be exercised.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use super::{ModelPrediction, ModelScorer, RecalibrationSignal, ScoringInput};
use crate::error::{Error, Result};

#[derive(Clone, Default)]
pub struct MockScorer {
    predictions: Vec<ModelPrediction>,
    /// Whether health_check should return true
    pub healthy: bool,
    /// Make every `score` call fail
    pub failing: bool,
    recalibrated: Arc<AtomicUsize>,
    /// When set, `score` and `recalibrate` each take a permit before answering
    gate: Option<Arc<Semaphore>>,
}

impl MockScorer {
    /// A healthy mock that predicts nothing
    pub fn new() -> Self {
        Self {
            healthy: true,
            ..Default::default()
        }
    }

    pub fn with_predictions(predictions: Vec<ModelPrediction>) -> Self {
        Self {
            predictions,
            healthy: true,
            ..Default::default()
        }
    }

    /// A mock whose `score` always errors
    pub fn failing() -> Self {
        Self {
            healthy: false,
            failing: true,
            ..Default::default()
        }
    }

    /// Hold every call until the test releases a permit on `gate`
    pub fn gated(self, gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..self
        }
    }

    async fn pass_gate(&self) -> Result<()> {
        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|_| Error::Scorer("mock scorer gate closed".into()))?
                .forget();
        }
        Ok(())
    }

    /// Total examples accepted through `recalibrate`
    pub fn recalibrated_examples(&self) -> usize {
        self.recalibrated.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelScorer for MockScorer {
    async fn score(&self, _input: &ScoringInput<'_>) -> Result<Vec<ModelPrediction>> {
        self.pass_gate().await?;
        if self.failing {
            return Err(Error::Scorer("mock scorer failure".into()));
        }
        Ok(self.predictions.clone())
    }

    async fn recalibrate(&self, signal: &RecalibrationSignal) -> Result<usize> {
        self.pass_gate().await?;
        let accepted = signal.examples.len();
        self.recalibrated.fetch_add(accepted, Ordering::SeqCst);
        Ok(accepted)
    }

    async fn health_check(&self) -> bool {
        self.healthy
    }

    fn name(&self) -> &str {
        "mock"
    }
}
