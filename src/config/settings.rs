use anyhow::{anyhow, Result};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::codegen::{is_identifier, EmitOptions, TargetKind};
use crate::ml::{Comparator, LoadOptions, MissingDefault, ParseOptions, Transform};
use crate::types::SignalThresholds;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub model: ModelSettings,
    pub signal: SignalSettings,
    pub codegen: CodegenSettings,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        // Model validation
        let transform = self.model.transform.parse::<Transform>();
        if let Err(e) = &transform {
            errors.push(e.to_string());
        }
        if let Some(bias) = self.model.bias {
            if !bias.is_finite() {
                errors.push("model.bias must be finite".to_string());
            }
        }
        if let (Some(base_score), Ok(transform)) = (self.model.base_score, transform) {
            if let Err(e) = transform.base_score_to_bias(base_score) {
                errors.push(e.to_string());
            }
        }

        // Signal validation
        if self.signal.lower < Decimal::ZERO || self.signal.upper > Decimal::ONE {
            errors.push("signal thresholds must lie between 0 and 1".to_string());
        }
        if self.signal.lower > self.signal.upper {
            errors.push("signal.lower must be <= signal.upper".to_string());
        }

        // Codegen validation
        if !is_identifier(&self.codegen.prefix) {
            errors.push(format!("codegen.prefix '{}' is not a valid identifier", self.codegen.prefix));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    /// `identity`, `logistic` or an XGBoost objective name
    pub transform: String,
    /// Margin-space bias; takes precedence over `base_score`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bias: Option<f64>,
    /// Probability-space base score as stored by XGBoost
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_score: Option<f64>,
    pub default_missing: MissingDefault,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comparator: Option<Comparator>,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            transform: "logistic".to_string(),
            bias: None,
            base_score: None,
            default_missing: MissingDefault::Yes,
            comparator: None,
        }
    }
}

impl ModelSettings {
    pub fn load_options(&self) -> Result<LoadOptions> {
        let transform: Transform = self.transform.parse()?;
        let bias = match (self.bias, self.base_score) {
            (Some(bias), _) => bias,
            (None, Some(base_score)) => transform.base_score_to_bias(base_score)?,
            (None, None) => 0.0,
        };

        Ok(LoadOptions {
            parse: ParseOptions {
                default_missing: self.default_missing,
                comparator: self.comparator,
            },
            bias,
            transform,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalSettings {
    /// Probability above which a CALL is signalled
    pub upper: Decimal,
    /// Probability below which a PUT is signalled
    pub lower: Decimal,
}

impl Default for SignalSettings {
    fn default() -> Self {
        Self {
            upper: dec!(0.6),
            lower: dec!(0.4),
        }
    }
}

impl SignalSettings {
    pub fn thresholds(&self) -> Result<SignalThresholds> {
        let convert = |name: &str, value: Decimal| {
            value
                .to_f64()
                .ok_or_else(|| anyhow!("signal.{} = {} has no f64 representation", name, value))
        };
        Ok(SignalThresholds {
            upper: convert("upper", self.upper)?,
            lower: convert("lower", self.lower)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodegenSettings {
    pub target: TargetKind,
    pub prefix: String,
    pub include_signal: bool,
}

impl Default for CodegenSettings {
    fn default() -> Self {
        Self {
            target: TargetKind::Mql5,
            prefix: "Xgb".to_string(),
            include_signal: true,
        }
    }
}

impl CodegenSettings {
    pub fn emit_options(&self, signal: &SignalSettings) -> Result<EmitOptions> {
        Ok(EmitOptions {
            target: self.target,
            prefix: self.prefix.clone(),
            include_signal: self.include_signal,
            thresholds: signal.thresholds()?,
            transform: None,
        })
    }
}
