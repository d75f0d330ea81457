//! UNIANOVA configuration

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use sd_core::ErrorAccumulator;

/// Label used by callers for the grand mean in `emmeans.factors`
pub const OVERALL: &str = "(OVERALL)";

/// Configuration of a univariate GLM run
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GlmConfig {
    pub main: GlmMain,
    pub model: GlmModel,
    /// Factor name -> contrast applied to its estimated marginal means
    pub contrast: IndexMap<String, ContrastSpec>,
    pub options: GlmOptions,
    pub posthoc: PostHocConfig,
    pub emmeans: EmmeansConfig,
}

/// Variable roles
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GlmMain {
    pub dependent: Option<String>,
    pub fix_factor: Vec<String>,
    pub rand_factor: Vec<String>,
    pub covar: Vec<String>,
    /// Per-case WLS weight, multiplied into the case weight for fitting
    pub wls_weight: Option<String>,
}

impl GlmMain {
    /// Fixed then random factors, in model order
    pub fn factors(&self) -> impl Iterator<Item = &String> {
        self.fix_factor.iter().chain(&self.rand_factor)
    }

    pub fn is_factor(&self, name: &str) -> bool {
        self.factors().any(|f| f == name)
    }

    pub fn is_model_variable(&self, name: &str) -> bool {
        self.is_factor(name) || self.covar.iter().any(|c| c == name)
    }
}

/// Sum-of-squares decomposition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SumOfSquares {
    #[serde(rename = "I", alias = "1")]
    TypeI,
    #[serde(rename = "II", alias = "2")]
    TypeII,
    #[default]
    #[serde(rename = "III", alias = "3")]
    TypeIII,
}

impl SumOfSquares {
    pub fn label(&self) -> &'static str {
        match self {
            SumOfSquares::TypeI => "Type I Sum of Squares",
            SumOfSquares::TypeII => "Type II Sum of Squares",
            SumOfSquares::TypeIII => "Type III Sum of Squares",
        }
    }
}

/// Model terms
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GlmModel {
    /// All factor interactions plus covariate main effects
    pub full_factorial: bool,
    /// Custom terms, each a list of variable names forming one interaction
    pub custom_terms: Vec<Vec<String>>,
    pub sum_of_squares: SumOfSquares,
    pub intercept: bool,
}

impl Default for GlmModel {
    fn default() -> Self {
        Self {
            full_factorial: true,
            custom_terms: Vec::new(),
            sum_of_squares: SumOfSquares::TypeIII,
            intercept: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ContrastKind {
    #[default]
    None,
    Deviation,
    Simple,
    Difference,
    Helmert,
    Repeated,
    Polynomial,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReferenceCategory {
    #[default]
    Last,
    First,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContrastSpec {
    pub kind: ContrastKind,
    pub reference: ReferenceCategory,
}

/// Display and inference options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GlmOptions {
    pub desc_stats: bool,
    pub homogeneity: bool,
    pub param_est: bool,
    pub effect_size: bool,
    /// Confidence intervals are built at `1 - sigLevel`
    pub sig_level: f64,
}

impl Default for GlmOptions {
    fn default() -> Self {
        Self {
            desc_stats: false,
            homogeneity: false,
            param_est: false,
            effect_size: false,
            sig_level: 0.05,
        }
    }
}

impl GlmOptions {
    pub fn confidence(&self) -> f64 {
        1.0 - self.sig_level
    }
}

/// Post hoc comparisons on observed means
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PostHocConfig {
    pub factors: Vec<String>,
    pub lsd: bool,
    pub bonferroni: bool,
    pub sidak: bool,
    pub scheffe: bool,
}

impl PostHocConfig {
    pub fn methods(&self) -> Vec<PostHocMethod> {
        [
            (self.lsd, PostHocMethod::Lsd),
            (self.bonferroni, PostHocMethod::Bonferroni),
            (self.sidak, PostHocMethod::Sidak),
            (self.scheffe, PostHocMethod::Scheffe),
        ]
        .into_iter()
        .filter_map(|(on, m)| on.then_some(m))
        .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PostHocMethod {
    Lsd,
    Bonferroni,
    Sidak,
    Scheffe,
}

impl PostHocMethod {
    pub fn label(&self) -> &'static str {
        match self {
            PostHocMethod::Lsd => "LSD",
            PostHocMethod::Bonferroni => "Bonferroni",
            PostHocMethod::Sidak => "Sidak",
            PostHocMethod::Scheffe => "Scheffe",
        }
    }
}

/// Multiplicity adjustment for EMM pairwise comparisons
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Adjustment {
    #[default]
    Lsd,
    Bonferroni,
    Sidak,
}

impl Adjustment {
    pub fn label(&self) -> &'static str {
        match self {
            Adjustment::Lsd => "Least Significant Difference (equivalent to no adjustments)",
            Adjustment::Bonferroni => "Bonferroni",
            Adjustment::Sidak => "Sidak",
        }
    }

    /// Adjusted p-value for `m` comparisons
    pub fn adjust(&self, p: f64, m: f64) -> f64 {
        match self {
            Adjustment::Lsd => p,
            Adjustment::Bonferroni => (p * m).min(1.0),
            Adjustment::Sidak => (1.0 - (1.0 - p).powf(m)).min(1.0),
        }
    }

    /// Per-comparison alpha giving family-wise `alpha` over `m` comparisons
    pub fn alpha(&self, alpha: f64, m: f64) -> f64 {
        match self {
            Adjustment::Lsd => alpha,
            Adjustment::Bonferroni => alpha / m,
            Adjustment::Sidak => 1.0 - (1.0 - alpha).powf(1.0 / m),
        }
    }
}

/// Estimated marginal means
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EmmeansConfig {
    /// `(OVERALL)`, factor names or interactions such as `a*b`
    pub factors: Vec<String>,
    pub compare_main_effects: bool,
    pub adjustment: Adjustment,
}

/// Split `a * b` into its variable names
pub fn split_term(term: &str) -> Vec<String> {
    term.split('*')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

pub(super) fn validate(config: &GlmConfig, errors: &mut ErrorAccumulator) {
    let main = &config.main;
    errors.check(
        main.dependent.as_deref().is_some_and(|d| !d.trim().is_empty()),
        "A dependent variable must be selected.",
    );
    errors.check(
        !(main.fix_factor.is_empty() && main.rand_factor.is_empty() && main.covar.is_empty()),
        "At least one fixed factor, random factor, or covariate must be provided.",
    );
    let sig = config.options.sig_level;
    errors.check(
        sig > 0.0 && sig < 1.0,
        "Significance level must be between 0 and 1.",
    );

    if !config.model.full_factorial {
        errors.check(
            !config.model.custom_terms.is_empty() || config.model.intercept,
            "At least one model term must be specified.",
        );
        for term in &config.model.custom_terms {
            if term.is_empty() {
                errors.validation("Model terms must name at least one variable.");
            }
            for name in term {
                if !main.is_model_variable(name) {
                    errors.validation(format!(
                        "Model term uses variable '{}' which is not in the model.",
                        name
                    ));
                }
            }
        }
    }

    for factor in &config.posthoc.factors {
        if !main.fix_factor.contains(factor) {
            errors.validation(format!("Post hoc factor '{}' must be a fixed factor.", factor));
        }
    }
    if !config.posthoc.factors.is_empty() {
        errors.check(
            !config.posthoc.methods().is_empty(),
            "Select at least one post hoc test.",
        );
    }

    for term in &config.emmeans.factors {
        if term.trim() == OVERALL {
            continue;
        }
        let parts = split_term(term);
        if parts.is_empty() || parts.iter().any(|p| !main.is_factor(p)) {
            errors.validation(format!(
                "Estimated marginal means term '{}' is not a model factor.",
                term
            ));
        }
    }

    for factor in config.contrast.keys() {
        if !main.is_factor(factor) {
            errors.validation(format!("Contrast factor '{}' is not a model factor.", factor));
        }
    }
}
