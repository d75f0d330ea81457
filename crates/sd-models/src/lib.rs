//! StatDeck analysis engines
//!
//! Every engine follows the same lifecycle (see [`base::Analysis`]):
//! configuration validation, data preparation, computation and result
//! table assembly. Callers either build an [`AnalysisRequest`] and hand it
//! to [`run`], pass raw JSON to [`run_json`], or queue runs on an
//! [`AnalysisPool`].

pub mod base;
pub mod descriptives;
pub mod error;
pub mod frequencies;
pub mod glm;
pub mod kmeans;
pub(crate) mod linalg;
pub mod nonlinear;
pub mod nonparametric;
pub mod pool;
pub mod probit;
pub mod runner;
pub mod timeseries;

pub use base::{Analysis, AnalysisInput, AnalysisOutput, RunContext, Status, run_analysis};
pub use error::{ModelError, Result};
pub use pool::{AnalysisPool, PoolConfig};
pub use runner::{AnalysisRequest, AnalysisResponse, Envelope, run, run_json, run_with_context};
