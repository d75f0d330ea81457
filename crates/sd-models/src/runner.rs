//! Request dispatch
//!
//! A request names its engine in the `"method"` tag and carries the data
//! blocks, variable definitions, optional weight variable and the engine
//! configuration:
//!
//! ```json
//! { "method": "descriptives",
//!   "data": { "variables": [{ "x": 1 }, { "x": 2 }] },
//!   "variables": { "variables": [{ "name": "x", "columnIndex": 0 }] },
//!   "config": { "variables": ["x"] } }
//! ```

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info_span, warn};

use sd_core::ErrorAccumulator;

use crate::base::{Analysis, AnalysisInput, AnalysisOutput, RunContext, run_analysis};
use crate::descriptives::{Descriptives, DescriptivesConfig};
use crate::error::ModelError;
use crate::frequencies::{Frequencies, FrequenciesConfig};
use crate::glm::{GlmConfig, UnivariateGlm};
use crate::kmeans::{KMeans, KMeansConfig};
use crate::nonlinear::{Nonlinear, NonlinearConfig};
use crate::nonparametric::{KIndependentSamples, KSamplesConfig, TwoIndependentSamples, TwoSamplesConfig};
use crate::probit::{Probit, ProbitConfig};
use crate::timeseries::{
    Autocorrelation, AutocorrelationConfig, Decomposition, DecompositionConfig,
    ExponentialSmoothing, SmoothingConfig,
};

/// Response of one run; serializes as `{ status, tables }` or
/// `{ status, errors }`
pub type AnalysisResponse = AnalysisOutput;

/// Data and configuration of one run
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(bound(deserialize = "C: Deserialize<'de> + Default"))]
pub struct Envelope<C> {
    /// Block name to rows
    #[serde(default)]
    pub data: IndexMap<String, Value>,
    /// Block name to variable definitions
    #[serde(default)]
    pub variables: IndexMap<String, Value>,
    #[serde(default)]
    pub weight: Option<String>,
    #[serde(default)]
    pub config: C,
}

impl<C> Envelope<C> {
    pub fn new(config: C) -> Self {
        Self {
            data: IndexMap::new(),
            variables: IndexMap::new(),
            weight: None,
            config,
        }
    }

    pub fn with_block(mut self, name: &str, rows: Value, variables: Value) -> Self {
        self.data.insert(name.to_string(), rows);
        self.variables.insert(name.to_string(), variables);
        self
    }

    pub fn with_weight(mut self, variable: impl Into<String>) -> Self {
        self.weight = Some(variable.into());
        self
    }
}

/// One analysis request, tagged by `"method"`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method")]
pub enum AnalysisRequest {
    #[serde(rename = "frequencies")]
    Frequencies(Envelope<FrequenciesConfig>),
    #[serde(rename = "descriptives")]
    Descriptives(Envelope<DescriptivesConfig>),
    #[serde(rename = "univariate")]
    Univariate(Envelope<GlmConfig>),
    #[serde(rename = "kmeans")]
    KMeans(Envelope<KMeansConfig>),
    #[serde(rename = "autocorrelation")]
    Autocorrelation(Envelope<AutocorrelationConfig>),
    #[serde(rename = "decomposition")]
    Decomposition(Envelope<DecompositionConfig>),
    #[serde(rename = "smoothing")]
    Smoothing(Envelope<SmoothingConfig>),
    #[serde(rename = "kIndependentSamples")]
    KIndependentSamples(Envelope<KSamplesConfig>),
    #[serde(rename = "twoIndependentSamples")]
    TwoIndependentSamples(Envelope<TwoSamplesConfig>),
    #[serde(rename = "probit")]
    Probit(Envelope<ProbitConfig>),
    #[serde(rename = "nonlinear")]
    Nonlinear(Envelope<NonlinearConfig>),
}

impl AnalysisRequest {
    /// The `"method"` tag
    pub fn method(&self) -> &'static str {
        match self {
            AnalysisRequest::Frequencies(_) => Frequencies::NAME,
            AnalysisRequest::Descriptives(_) => Descriptives::NAME,
            AnalysisRequest::Univariate(_) => UnivariateGlm::NAME,
            AnalysisRequest::KMeans(_) => KMeans::NAME,
            AnalysisRequest::Autocorrelation(_) => Autocorrelation::NAME,
            AnalysisRequest::Decomposition(_) => Decomposition::NAME,
            AnalysisRequest::Smoothing(_) => ExponentialSmoothing::NAME,
            AnalysisRequest::KIndependentSamples(_) => KIndependentSamples::NAME,
            AnalysisRequest::TwoIndependentSamples(_) => TwoIndependentSamples::NAME,
            AnalysisRequest::Probit(_) => Probit::NAME,
            AnalysisRequest::Nonlinear(_) => Nonlinear::NAME,
        }
    }

    pub fn from_json(text: &str) -> Result<Self, ModelError> {
        serde_json::from_str(text).map_err(|e| ModelError::invalid(format!("Invalid request: {}", e)))
    }
}

fn execute<A: Analysis>(envelope: &Envelope<A::Config>, ctx: &RunContext) -> AnalysisOutput {
    let mut errors = ErrorAccumulator::new();
    let input = AnalysisInput::from_json(
        &envelope.data,
        &envelope.variables,
        envelope.weight.clone(),
        &mut errors,
    );
    run_analysis::<A>(&input, &envelope.config, errors, ctx)
}

/// Run a request under a caller-owned context
pub fn run_with_context(request: &AnalysisRequest, ctx: &RunContext) -> AnalysisResponse {
    let span = info_span!("run", method = request.method());
    let _guard = span.enter();
    match request {
        AnalysisRequest::Frequencies(e) => execute::<Frequencies>(e, ctx),
        AnalysisRequest::Descriptives(e) => execute::<Descriptives>(e, ctx),
        AnalysisRequest::Univariate(e) => execute::<UnivariateGlm>(e, ctx),
        AnalysisRequest::KMeans(e) => execute::<KMeans>(e, ctx),
        AnalysisRequest::Autocorrelation(e) => execute::<Autocorrelation>(e, ctx),
        AnalysisRequest::Decomposition(e) => execute::<Decomposition>(e, ctx),
        AnalysisRequest::Smoothing(e) => execute::<ExponentialSmoothing>(e, ctx),
        AnalysisRequest::KIndependentSamples(e) => execute::<KIndependentSamples>(e, ctx),
        AnalysisRequest::TwoIndependentSamples(e) => execute::<TwoIndependentSamples>(e, ctx),
        AnalysisRequest::Probit(e) => execute::<Probit>(e, ctx),
        AnalysisRequest::Nonlinear(e) => execute::<Nonlinear>(e, ctx),
    }
}

/// Run a request to completion
pub fn run(request: &AnalysisRequest) -> AnalysisResponse {
    run_with_context(request, &RunContext::new())
}

/// JSON in, JSON out. A malformed request becomes an error response.
pub fn run_json(request: &str) -> String {
    let response = match AnalysisRequest::from_json(request) {
        Ok(request) => run(&request),
        Err(err) => {
            warn!(error = %err, "rejected request");
            AnalysisOutput::from_error(&err)
        }
    };
    to_json(&response)
}

/// Serialize a response; tables hold only ordered maps, so equal responses
/// serialize to identical text
pub fn to_json(response: &AnalysisResponse) -> String {
    serde_json::to_string(response).unwrap_or_else(|e| {
        format!(
            r#"{{"status":"error","errors":[{{"stage":"computation","message":"{}"}}]}}"#,
            e.to_string().replace('"', "'")
        )
    })
}
