//! JSON configuration for attacks and evaluation runs.
use crate::attack::AttackOptions;
use crate::error::ConfigError;
use crate::logging::LogConfig;
use crate::loss::LossSettings;
use crate::norm::{Budget, NormType};
use crate::step::StepMode;
use crate::LmkFloat;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AttackConfig {
    pub norm_type: NormType,
    pub max_iter: usize,
    /// Fixed step size; `5 * noise / max_iter` when absent
    pub step_size: Option<LmkFloat>,
    pub rand_init: bool,
    pub rand_init_norm: Option<LmkFloat>,
    pub targeted: bool,
    pub clip_min: LmkFloat,
    pub clip_max: LmkFloat,
    pub step_mode: StepMode,
    pub loss: LossSettings,
    pub seed: u64,
}

impl Default for AttackConfig {
    fn default() -> Self {
        Self {
            norm_type: NormType::L2,
            max_iter: 100,
            step_size: None,
            rand_init: true,
            rand_init_norm: None,
            targeted: false,
            clip_min: -1.,
            clip_max: 1.,
            step_mode: StepMode::GradientAscent,
            loss: LossSettings::default(),
            seed: 10,
        }
    }
}

impl AttackConfig {
    pub fn step_size_for(&self, noise_level: LmkFloat) -> LmkFloat {
        match self.step_size {
            Some(step) => step,
            None if self.max_iter == 0 => 0.,
            None => 5. * noise_level / self.max_iter as LmkFloat,
        }
    }

    pub fn options(&self) -> AttackOptions {
        AttackOptions {
            rand_init: self.rand_init,
            rand_init_budget: self.rand_init_norm.map(Budget::Scalar),
            targeted: self.targeted,
            clip_min: self.clip_min,
            clip_max: self.clip_max,
            step_mode: self.step_mode,
            loss: self.loss,
        }
    }

    /// # Errors
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.clip_min <= self.clip_max) {
            return Err(ConfigError::Invalid {
                field: "clip_min",
                reason: format!("{} is above clip_max {}", self.clip_min, self.clip_max),
            });
        }
        if let Some(step) = self.step_size {
            if !step.is_finite() || step < 0. {
                return Err(ConfigError::Invalid {
                    field: "step_size",
                    reason: format!("{} is not a non-negative number", step),
                });
            }
        }
        if let Some(init) = self.rand_init_norm {
            Budget::Scalar(init).per_sample(1)?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct EvalConfig {
    pub attack: AttackConfig,
    /// Attack budgets to sweep; 0 evaluates the clean images
    pub noise_levels: Vec<LmkFloat>,
    /// Voting radius in pixels
    pub radius: LmkFloat,
    /// Millimetres per pixel of the original images
    pub pixel_spacing: LmkFloat,
    /// `[height, width]` of the original images; the network input size if absent
    pub original_size: Option<[usize; 2]>,
    /// Radii in millimetres at which detection rates are reported
    pub sdr_radii: Vec<LmkFloat>,
    pub log: LogConfig,
    pub report_path: Option<PathBuf>,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            attack: AttackConfig::default(),
            noise_levels: vec![0.],
            radius: 41.,
            pixel_spacing: 0.1,
            original_size: None,
            sdr_radii: vec![2., 2.5, 3., 4.],
            log: LogConfig::default(),
            report_path: None,
        }
    }
}

impl EvalConfig {
    /// # Errors
    /// Parse errors or any failed validation.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    /// IO, parse or validation errors.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::from_json_str(&fs::read_to_string(path)?)
    }

    /// # Errors
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.attack.validate()?;
        if let Some(&bad) = self
            .noise_levels
            .iter()
            .find(|n| !n.is_finite() || **n < 0.)
        {
            return Err(ConfigError::Invalid {
                field: "noise_levels",
                reason: format!("{} is not a non-negative number", bad),
            });
        }
        if !self.radius.is_finite() || self.radius < 0. {
            return Err(ConfigError::Invalid {
                field: "radius",
                reason: format!("{} is not a non-negative number", self.radius),
            });
        }
        if !(self.pixel_spacing > 0.) {
            return Err(ConfigError::Invalid {
                field: "pixel_spacing",
                reason: format!("{} is not positive", self.pixel_spacing),
            });
        }
        if self.original_size.map_or(false, |[h, w]| h == 0 || w == 0) {
            return Err(ConfigError::Invalid {
                field: "original_size",
                reason: "dimensions must be positive".to_string(),
            });
        }
        Ok(())
    }
}
