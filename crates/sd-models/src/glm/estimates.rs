//! Parameter estimates on the over-parameterized indicator design
//!
//! Indicator columns are screened left to right; a column spanned by the
//! ones before it is redundant and its parameter is fixed at zero. The
//! inverse of the kept cross-product matrix, padded with zeros, is a
//! generalized inverse of the full one and serves the marginal means and
//! contrasts as well.

use nalgebra::{DMatrix, DVector};

use sd_core::{ColumnHeader, ResultTable};

use super::config::GlmConfig;
use super::design::{Coding, Design, GlmData, Term};
use crate::base::{Coefficient, Result};
use crate::linalg::{cross_product, independent_columns, select_columns, spd_inverse, weighted_fit};

/// Relative tolerance of the estimability check
const ESTIMABLE_TOLERANCE: f64 = 1e-8;

#[derive(Debug, Clone)]
pub struct ParameterFit {
    pub design: Design,
    /// Non-redundant columns
    pub keep: Vec<bool>,
    /// Estimates, zero for redundant parameters
    pub beta: DVector<f64>,
    /// Generalized inverse of `X'WX`
    pub ginv: DMatrix<f64>,
    xtwx: DMatrix<f64>,
    pub mse: Option<f64>,
    pub df_error: f64,
}

impl ParameterFit {
    pub fn fit(
        data: &GlmData,
        terms: &[Term],
        intercept: bool,
        mse: Option<f64>,
        df_error: f64,
    ) -> Result<Self> {
        let design = Design::build(data, terms, intercept, Coding::Indicator);
        let y = data.y_vector();
        let w = data.weight_vector();

        let keep = independent_columns(&design.x, &w);
        let kept: Vec<usize> = keep
            .iter()
            .enumerate()
            .filter(|(_, k)| **k)
            .map(|(i, _)| i)
            .collect();
        let xk = select_columns(&design.x, &kept);
        let fit = weighted_fit(&xk, &y, &w)?;
        let inverse = spd_inverse(&cross_product(&xk, &w), "parameter estimates")?;

        let p = design.ncols();
        let mut beta = DVector::zeros(p);
        let mut ginv = DMatrix::zeros(p, p);
        for (a, &i) in kept.iter().enumerate() {
            beta[i] = fit.beta[a];
            for (b, &j) in kept.iter().enumerate() {
                ginv[(i, j)] = inverse[(a, b)];
            }
        }
        let xtwx = cross_product(&design.x, &w);

        Ok(Self {
            design,
            keep,
            beta,
            ginv,
            xtwx,
            mse,
            df_error,
        })
    }

    /// `L` lies in the row space of the design: `L G X'WX = L`
    pub fn is_estimable(&self, l: &DVector<f64>) -> bool {
        let projected = (&self.ginv * &self.xtwx).transpose() * l;
        let scale = l.amax().max(1.0);
        (projected - l).amax() <= ESTIMABLE_TOLERANCE * scale
    }

    pub fn estimate(&self, l: &DVector<f64>) -> f64 {
        l.dot(&self.beta)
    }

    /// `MSE · L G L'`
    pub fn variance(&self, l: &DVector<f64>) -> Option<f64> {
        self.mse.map(|mse| mse * (&self.ginv * l).dot(l))
    }

    pub fn std_error(&self, l: &DVector<f64>) -> Option<f64> {
        self.variance(l).map(|v| v.max(0.0).sqrt())
    }
}

pub fn estimates_table(fit: &ParameterFit, data: &GlmData, config: &GlmConfig) -> ResultTable {
    let confidence = config.options.confidence();
    let effect_size = config.options.effect_size;
    let mut headers = Coefficient::headers("t", confidence);
    if effect_size {
        headers.push(ColumnHeader::leaf("Partial Eta Squared", "partialEtaSquared"));
    }
    let mut table = ResultTable::new("Parameter Estimates", headers);
    let mut any_redundant = false;

    for (j, param) in fit.design.params.iter().enumerate() {
        let name = param.name(data);
        if !fit.keep[j] {
            any_redundant = true;
            table.push(Coefficient::redundant(name.clone()).to_row(vec![name]));
            continue;
        }
        let mut coefficient = Coefficient::new(name.clone(), fit.beta[j]);
        if let Some(mse) = fit.mse {
            let se = (mse * fit.ginv[(j, j)]).max(0.0).sqrt();
            coefficient = coefficient.with_inference(se, Some(fit.df_error), confidence);
        }
        let mut row = coefficient.to_row(vec![name]);
        if effect_size {
            let eta = coefficient
                .t_stat
                .map(|t| t * t / (t * t + fit.df_error));
            row = row.opt("partialEtaSquared", eta);
        }
        table.push(row);
    }

    table.footnote(format!("Dependent Variable: {}", data.dependent));
    if any_redundant {
        table.footnote("a. This parameter is set to zero because it is redundant.");
    }
    table
}
