use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use tracing::debug;

use super::{Ensemble, EvalError};
use crate::types::{SignalThresholds, TradeSignal};

/// Probability and signal for one feature vector
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub margin: f64,
    pub probability: f64,
    pub signal: TradeSignal,
}

/// Turns ensemble output into trade signals.
/// Cheap to clone; the ensemble is shared read-only.
#[derive(Debug, Clone)]
pub struct SignalPredictor {
    ensemble: Arc<Ensemble>,
    thresholds: SignalThresholds,
}

impl SignalPredictor {
    pub fn new(ensemble: Arc<Ensemble>, thresholds: SignalThresholds) -> Self {
        Self {
            ensemble,
            thresholds,
        }
    }

    pub fn ensemble(&self) -> &Ensemble {
        &self.ensemble
    }

    pub fn thresholds(&self) -> SignalThresholds {
        self.thresholds
    }

    /// Win probability for an ordered feature buffer (NaN = missing)
    pub fn predict_win_probability(&self, features: &[f64]) -> Result<f64, EvalError> {
        self.ensemble.predict(features)
    }

    pub fn predict(&self, features: &[f64]) -> Result<Prediction, EvalError> {
        let margin = self.ensemble.predict_margin(features)?;
        let probability = self.ensemble.transform().apply(margin);
        let signal = self.thresholds.classify(probability);
        debug!(
            "Ensemble prediction: margin={:.6}, prob={:.1}%, signal={}",
            margin,
            probability * 100.0,
            signal
        );
        Ok(Prediction {
            margin,
            probability,
            signal,
        })
    }

    /// Same as [`predict`](Self::predict) for a name -> value map
    pub fn predict_named(&self, values: &HashMap<String, f64>) -> Result<Prediction> {
        let features = self.ensemble.feature_map().vectorize(values)?;
        Ok(self.predict(&features)?)
    }

    pub fn signal(&self, features: &[f64]) -> Result<TradeSignal, EvalError> {
        Ok(self.predict(features)?.signal)
    }
}
