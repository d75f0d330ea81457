//! Univariate General Linear Model (UNIANOVA)
//!
//! One scale dependent variable explained by fixed factors, random
//! factors and covariates. Hypothesis tests use an effect-coded
//! (sum-to-zero) design so every term of a full-rank model has a well
//! defined Type I, II or III sum of squares. Parameter estimates, marginal
//! means and contrasts use the over-parameterized indicator design with
//! the last level of each factor redundant.

use tracing::{debug, instrument};

use sd_core::{ErrorAccumulator, ResultTable};

use crate::base::{Analysis, AnalysisInput, Result, RunContext};

pub mod config;
mod design;
mod emmeans;
mod estimates;
mod fit;
mod posthoc;

#[cfg(test)]
mod tests;

pub use config::{
    Adjustment, ContrastKind, ContrastSpec, EmmeansConfig, GlmConfig, GlmMain, GlmModel,
    GlmOptions, PostHocConfig, PostHocMethod, ReferenceCategory, SumOfSquares,
};
pub use design::GlmData;
pub use emmeans::contrast_rows;
pub use posthoc::{Comparison, compare};

use config::{OVERALL, split_term};
use design::{build_terms, prepare_data};
use emmeans::{contrast_tables, emmeans_table, pairwise_table};
use estimates::{ParameterFit, estimates_table};
use fit::{ModelFit, descriptives_table, design_label, factors_table, levene_table, tests_table};
use posthoc::posthoc_table;

/// Univariate GLM analysis
pub struct UnivariateGlm;

impl Analysis for UnivariateGlm {
    const NAME: &'static str = "univariate";
    type Config = GlmConfig;
    type Prepared = GlmData;

    fn validate(config: &GlmConfig, errors: &mut ErrorAccumulator) {
        config::validate(config, errors);
    }

    fn prepare(
        input: &AnalysisInput,
        config: &GlmConfig,
        errors: &mut ErrorAccumulator,
    ) -> Option<GlmData> {
        prepare_data(input, config, errors)
    }

    #[instrument(name = "univariate", skip_all, fields(cases = data.ncases(), factors = data.factors.len()))]
    fn compute(data: GlmData, config: &GlmConfig, ctx: &RunContext) -> Result<Vec<ResultTable>> {
        let terms = build_terms(config, &data);
        let intercept = config.model.intercept;
        let design = design_label(&terms, &data, intercept);
        debug!(%design, "building model");

        let fit = ModelFit::fit(&data, &terms, intercept)?;
        ctx.check()?;
        let effects = fit.effects(&terms, config.model.sum_of_squares, ctx)?;

        let mut tables = Vec::new();
        tables.extend(factors_table(&data));
        if config.options.desc_stats {
            tables.push(descriptives_table(&data));
        }
        if config.options.homogeneity {
            tables.extend(levene_table(&data, &fit, &design));
        }
        tables.push(tests_table(&fit, &effects, &terms, &data, config)?);

        let needs_parameters = config.options.param_est
            || !config.contrast.is_empty()
            || !config.emmeans.factors.is_empty();
        if needs_parameters {
            ctx.check()?;
            let params = ParameterFit::fit(&data, &terms, intercept, fit.mse(), fit.df_error)?;
            if config.options.param_est {
                tables.push(estimates_table(&params, &data, config));
            }
            for (name, spec) in &config.contrast {
                if let Some(f) = data.factor_index(name) {
                    tables.extend(contrast_tables(&params, &data, f, *spec, config)?);
                }
            }
            for term in &config.emmeans.factors {
                let factors: Vec<usize> = if term.trim() == OVERALL {
                    Vec::new()
                } else {
                    split_term(term)
                        .iter()
                        .filter_map(|name| data.factor_index(name))
                        .collect()
                };
                tables.push(emmeans_table(&params, &data, &factors, config));
                if let [factor] = factors.as_slice() {
                    if config.emmeans.compare_main_effects {
                        tables.push(pairwise_table(&params, &data, *factor, config));
                    }
                }
            }
        }

        for name in &config.posthoc.factors {
            if let Some(f) = data.factor_index(name) {
                tables.extend(posthoc_table(&data, f, fit.mse(), fit.df_error, config));
            }
        }
        Ok(tables)
    }
}
