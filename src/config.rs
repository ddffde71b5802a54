use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::{
    Result, StateError,
    objective::{Activation, GlmObjective},
    rule::UpdateRule,
    shape::{FactorShape, LayeredShape, Shape, VectorShape},
    variants::{GlmCg, GlmIgd, GlmNewton, LmfIgd, MlpIgd},
};

fn default_max_iterations() -> usize {
    20
}

fn default_tolerance() -> f64 {
    1e-4
}

fn default_scale_factor() -> f64 {
    0.1
}

/// The optimizer variant of a run, together with its dimensions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VariantConfig {
    GlmIgd {
        dimension: usize,
        objective: GlmObjective,
    },
    GlmCg {
        dimension: usize,
        objective: GlmObjective,
    },
    GlmNewton {
        dimension: usize,
        objective: GlmObjective,
    },
    LmfIgd {
        row_dim: usize,
        col_dim: usize,
        max_rank: usize,
        #[serde(default = "default_scale_factor")]
        scale_factor: f64,
    },
    MlpIgd {
        units: Vec<usize>,
        #[serde(default)]
        activation: Activation,
    },
}

impl VariantConfig {
    pub fn name(&self) -> &'static str {
        match self {
            VariantConfig::GlmIgd { .. } => GlmIgd::NAME,
            VariantConfig::GlmCg { .. } => GlmCg::NAME,
            VariantConfig::GlmNewton { .. } => GlmNewton::NAME,
            VariantConfig::LmfIgd { .. } => LmfIgd::NAME,
            VariantConfig::MlpIgd { .. } => MlpIgd::NAME,
        }
    }
}

/// The parameters of a whole training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub variant: VariantConfig,
    pub stepsize: f64,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
    #[serde(default)]
    pub seed: Option<u64>,
}

impl TrainingConfig {
    /// Parses and validates a configuration.
    ///
    /// # Errors
    /// `StateError::Config` if the document is not a valid configuration.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a configuration file.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| StateError::Config(format!("cannot read '{}': {e}", path.display())))?;

        Self::from_json(&content)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Checks every field against its domain.
    pub fn validate(&self) -> Result<()> {
        if !self.stepsize.is_finite() || self.stepsize < 0.0 {
            return Err(StateError::Config(format!(
                "stepsize must be finite and non-negative, got {}",
                self.stepsize
            )));
        }
        if self.max_iterations == 0 {
            return Err(StateError::Config("max_iterations must be positive".into()));
        }
        if !self.tolerance.is_finite() || self.tolerance < 0.0 {
            return Err(StateError::Config(format!(
                "tolerance must be finite and non-negative, got {}",
                self.tolerance
            )));
        }

        match &self.variant {
            VariantConfig::GlmIgd { dimension, .. } | VariantConfig::GlmCg { dimension, .. } => {
                VectorShape::new(*dimension).validate()
            }
            VariantConfig::GlmNewton {
                dimension,
                objective,
            } => {
                GlmNewton::new(*objective)?;
                VectorShape::new(*dimension).validate()
            }
            VariantConfig::LmfIgd {
                row_dim,
                col_dim,
                max_rank,
                scale_factor,
            } => {
                if !scale_factor.is_finite() || *scale_factor < 0.0 {
                    return Err(StateError::Config(format!(
                        "scale_factor must be finite and non-negative, got {scale_factor}"
                    )));
                }
                FactorShape::new(*row_dim, *col_dim, *max_rank).validate()
            }
            VariantConfig::MlpIgd { units, .. } => LayeredShape::new(units.clone()).validate(),
        }
    }
}

/// Builds an update rule and the dimensions of its state from a variant
/// configuration.
pub trait FromConfig: UpdateRule + Sized {
    /// # Errors
    /// `StateError::Config` if `variant` describes another optimizer.
    fn from_config(variant: &VariantConfig) -> Result<(Self, Self::Shape)>;
}

fn mismatch<R: UpdateRule>(variant: &VariantConfig) -> StateError {
    StateError::Config(format!(
        "expected a {} configuration, got {}",
        R::NAME,
        variant.name()
    ))
}

impl FromConfig for GlmIgd {
    fn from_config(variant: &VariantConfig) -> Result<(Self, VectorShape)> {
        match variant {
            VariantConfig::GlmIgd {
                dimension,
                objective,
            } => Ok((GlmIgd::new(*objective), VectorShape::new(*dimension))),
            _ => Err(mismatch::<Self>(variant)),
        }
    }
}

impl FromConfig for GlmCg {
    fn from_config(variant: &VariantConfig) -> Result<(Self, VectorShape)> {
        match variant {
            VariantConfig::GlmCg {
                dimension,
                objective,
            } => Ok((GlmCg::new(*objective), VectorShape::new(*dimension))),
            _ => Err(mismatch::<Self>(variant)),
        }
    }
}

impl FromConfig for GlmNewton {
    fn from_config(variant: &VariantConfig) -> Result<(Self, VectorShape)> {
        match variant {
            VariantConfig::GlmNewton {
                dimension,
                objective,
            } => Ok((GlmNewton::new(*objective)?, VectorShape::new(*dimension))),
            _ => Err(mismatch::<Self>(variant)),
        }
    }
}

impl FromConfig for LmfIgd {
    fn from_config(variant: &VariantConfig) -> Result<(Self, FactorShape)> {
        match variant {
            VariantConfig::LmfIgd {
                row_dim,
                col_dim,
                max_rank,
                scale_factor,
            } => Ok((
                LmfIgd::new(*scale_factor),
                FactorShape::new(*row_dim, *col_dim, *max_rank),
            )),
            _ => Err(mismatch::<Self>(variant)),
        }
    }
}

impl FromConfig for MlpIgd {
    fn from_config(variant: &VariantConfig) -> Result<(Self, LayeredShape)> {
        match variant {
            VariantConfig::MlpIgd { units, activation } => {
                Ok((MlpIgd::new(*activation), LayeredShape::new(units.clone())))
            }
            _ => Err(mismatch::<Self>(variant)),
        }
    }
}
