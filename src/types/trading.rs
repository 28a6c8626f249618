use serde::{Deserialize, Serialize};
use std::fmt;

/// Discrete decision derived from the ensemble probability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TradeSignal {
    /// Favor the positive class (price up)
    Call,
    /// Favor the negative class (price down)
    Put,
    NoSignal,
}

impl TradeSignal {
    /// Integer encoding used by the generated expert advisors
    pub fn code(&self) -> i32 {
        match self {
            TradeSignal::NoSignal => 0,
            TradeSignal::Call => 1,
            TradeSignal::Put => 2,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(TradeSignal::NoSignal),
            1 => Some(TradeSignal::Call),
            2 => Some(TradeSignal::Put),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TradeSignal::Call => "CALL",
            TradeSignal::Put => "PUT",
            TradeSignal::NoSignal => "NONE",
        }
    }
}

impl fmt::Display for TradeSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Probability cut-offs: above `upper` is a CALL, below `lower` a PUT
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignalThresholds {
    pub upper: f64,
    pub lower: f64,
}

impl Default for SignalThresholds {
    fn default() -> Self {
        Self {
            upper: 0.6,
            lower: 0.4,
        }
    }
}

impl SignalThresholds {
    pub fn classify(&self, probability: f64) -> TradeSignal {
        if probability > self.upper {
            TradeSignal::Call
        } else if probability < self.lower {
            TradeSignal::Put
        } else {
            TradeSignal::NoSignal
        }
    }
}
