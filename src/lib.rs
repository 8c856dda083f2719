#![allow(clippy::must_use_candidate, clippy::module_name_repetitions)]
//! Projected gradient descent attacks against heatmap/offset landmark
//! detectors, and the evaluation loop that measures how far they push the
//! detected landmarks.
extern crate itertools;
extern crate log;
extern crate ndarray;
extern crate ndarray_rand;
extern crate ndarray_stats;
extern crate num;
extern crate rand;

pub mod attack;
pub mod config;
pub mod dnn;
pub mod error;
pub mod evaluate;
pub mod logging;
pub mod loss;
pub mod model;
pub mod noise;
pub mod norm;
pub mod step;
pub mod tester;
pub mod util;
pub mod viz;
pub mod voting;

#[cfg(test)]
mod test_util;

pub type LmkFloat = f64;

pub use attack::{pgd_attack, AttackOptions, PgdAttack};
pub use config::{AttackConfig, EvalConfig};
pub use error::{AttackError, ConfigError};
pub use evaluate::{EvalSummary, Evaluator};
pub use logging::{init_logging, LogConfig};
pub use model::{LandmarkModel, Prediction, Supervision};
pub use norm::{Budget, NormType};
pub use step::StepMode;
pub use tester::{Batch, EvalReport, Tester};
pub use voting::{vote, Landmark};
