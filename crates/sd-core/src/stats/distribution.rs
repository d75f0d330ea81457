//! Distribution helpers on top of `statrs`
//!
//! Thin wrappers returning `None` when a distribution cannot be formed
//! (non-positive degrees of freedom, non-finite statistic) so callers can
//! report a null cell instead of NaN.

use statrs::distribution::{
    ChiSquared, Continuous, ContinuousCDF, FisherSnedecor, Normal, StudentsT,
};

/// Upper tail `P(X > x)` of a χ² distribution
pub fn chi_square_sf(x: f64, df: f64) -> Option<f64> {
    if !x.is_finite() || !(df > 0.0) {
        return None;
    }
    let dist = ChiSquared::new(df).ok()?;
    Some(dist.sf(x.max(0.0)).clamp(0.0, 1.0))
}

/// Upper tail `P(F > f)` of an F distribution
pub fn f_sf(f: f64, df1: f64, df2: f64) -> Option<f64> {
    if !f.is_finite() || !(df1 > 0.0) || !(df2 > 0.0) {
        return None;
    }
    let dist = FisherSnedecor::new(df1, df2).ok()?;
    Some(dist.sf(f.max(0.0)).clamp(0.0, 1.0))
}

/// Two-tailed p-value of a t statistic
pub fn t_two_tailed(t: f64, df: f64) -> Option<f64> {
    if !t.is_finite() || !(df > 0.0) {
        return None;
    }
    let dist = StudentsT::new(0.0, 1.0, df).ok()?;
    Some((2.0 * dist.sf(t.abs())).clamp(0.0, 1.0))
}

/// Quantile of Student's t
pub fn t_quantile(p: f64, df: f64) -> Option<f64> {
    if !(0.0..=1.0).contains(&p) || !(df > 0.0) {
        return None;
    }
    let dist = StudentsT::new(0.0, 1.0, df).ok()?;
    Some(dist.inverse_cdf(p))
}

/// Quantile of the F distribution
pub fn f_quantile(p: f64, df1: f64, df2: f64) -> Option<f64> {
    if !(0.0..1.0).contains(&p) || !(df1 > 0.0) || !(df2 > 0.0) {
        return None;
    }
    let dist = FisherSnedecor::new(df1, df2).ok()?;
    Some(dist.inverse_cdf(p))
}

fn standard_normal() -> Option<Normal> {
    Normal::new(0.0, 1.0).ok()
}

/// Standard normal CDF
pub fn normal_cdf(z: f64) -> f64 {
    standard_normal().map(|n| n.cdf(z)).unwrap_or(f64::NAN)
}

/// Standard normal upper tail
pub fn normal_sf(z: f64) -> f64 {
    standard_normal().map(|n| n.sf(z)).unwrap_or(f64::NAN)
}

/// Standard normal density
pub fn normal_pdf(z: f64) -> f64 {
    standard_normal().map(|n| n.pdf(z)).unwrap_or(f64::NAN)
}

/// Standard normal quantile
pub fn normal_quantile(p: f64) -> f64 {
    standard_normal()
        .map(|n| n.inverse_cdf(p.clamp(0.0, 1.0)))
        .unwrap_or(f64::NAN)
}

/// Two-tailed p-value of a standard normal statistic
pub fn normal_two_tailed(z: f64) -> Option<f64> {
    z.is_finite().then(|| (2.0 * normal_sf(z.abs())).clamp(0.0, 1.0))
}

/// Asymptotic Kolmogorov–Smirnov tail `P(K > z) = 2 Σ (−1)^(k−1) e^(−2k²z²)`
pub fn kolmogorov_sf(z: f64) -> f64 {
    if !z.is_finite() {
        return f64::NAN;
    }
    if z < 0.27 {
        return 1.0;
    }
    if z >= 3.1 {
        return 0.0;
    }
    let mut sum = 0.0;
    for k in 1..=100 {
        let kf = k as f64;
        let term = (-2.0 * kf * kf * z * z).exp();
        sum += if k % 2 == 1 { term } else { -term };
        if term < 1e-16 {
            break;
        }
    }
    (2.0 * sum).clamp(0.0, 1.0)
}
