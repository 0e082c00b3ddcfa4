#![allow(dead_code)]

use crate::candle_aux_module::softplus;
use candle_core::{D, Result, Tensor};

/// Floor added to rate/dispersion parameters before any log or division.
const EPS: f64 = 1e-8;

/// Fast lgamma approximation for tensors (Paul Mineiro's fastlgamma).
///
/// ```text
/// lgamma(x) ≈ -2.081061466 - x + 0.0833333/(x+3) - log(x*(1+x)*(2+x)) + (2.5+x)*log(x+3)
/// ```
pub fn lgamma_approx(x: &Tensor) -> Result<Tensor> {
    // Clamp x to avoid log(0) issues
    let x_safe = x.clamp(1e-6, f64::INFINITY)?;

    // logterm = log(x * (1 + x) * (2 + x))
    let x_plus_1 = (&x_safe + 1.0)?;
    let x_plus_2 = (&x_safe + 2.0)?;
    let product = ((&x_safe * &x_plus_1)? * &x_plus_2)?;
    let logterm = product.log()?;

    // xp3 = x + 3
    let xp3 = (&x_safe + 3.0)?;
    let log_xp3 = xp3.log()?;

    let recip_term = (xp3.recip()? * 0.0833333)?;
    let mult_term = ((&x_safe + 2.5)? * &log_xp3)?;

    (((recip_term - 2.081061466)? - &x_safe)? - &logterm)? + &mult_term
}

/// Elementwise Gaussian log-density `log N(x; mean, var)`
///
/// ```text
/// log N(x; μ, σ²) = -0.5 * [(x - μ)²/σ² + log σ² + log 2π]
/// ```
///
/// `mean` and `var` broadcast against `x`, so shared per-cell parameters can
/// score a leading Monte-Carlo sample dimension.
pub fn gaussian_log_prob(x: &Tensor, mean: &Tensor, var: &Tensor) -> Result<Tensor> {
    let ln_2pi = (2.0 * std::f64::consts::PI).ln();
    let diff = x.broadcast_sub(mean)?;
    (diff.powf(2.)?.broadcast_div(var)?.broadcast_add(&var.log()?)? + ln_2pi)? * (-0.5)
}

/// Negative binomial log-likelihood of count data, summed over genes.
///
/// ```text
/// log NB(x; μ, θ) = lgamma(x + θ) - lgamma(θ) - lgamma(x + 1)
///                 + θ * log(θ/(θ + μ)) + x * log(μ/(θ + μ))
/// ```
///
/// * `x_nd` - observed counts (n x d)
/// * `mu_nd` - mean of the NB distribution (broadcasts against `x_nd`)
/// * `theta` - inverse dispersion, `(d)` or `(n, d)`
pub fn log_nb_positive(x_nd: &Tensor, mu_nd: &Tensor, theta: &Tensor) -> Result<Tensor> {
    let log_theta_eps = (theta + EPS)?.log()?;
    let log_theta_mu_eps = (mu_nd.broadcast_add(theta)? + EPS)?.log()?;
    let log_mu_eps = (mu_nd + EPS)?.log()?;

    let theta_term = log_theta_eps
        .broadcast_sub(&log_theta_mu_eps)?
        .broadcast_mul(theta)?;
    let x_term = log_mu_eps
        .broadcast_sub(&log_theta_mu_eps)?
        .broadcast_mul(x_nd)?;

    let lgamma_term = lgamma_approx(&x_nd.broadcast_add(theta)?)?
        .broadcast_sub(&lgamma_approx(theta)?)?
        .broadcast_sub(&lgamma_approx(&(x_nd + 1.)?)?)?;

    theta_term
        .broadcast_add(&x_term)?
        .broadcast_add(&lgamma_term)?
        .sum(D::Minus1)
}

/// Zero-inflated negative binomial log-likelihood, summed over genes.
///
/// Mixture of a point mass at zero (weight `σ(π)`) and an NB component
/// (weight `1 - σ(π)`), evaluated in log space with softplus so neither the
/// gate nor the NB density over/underflows:
///
/// ```text
/// x  = 0: softplus(-π + θ * log(θ/(θ + μ))) - softplus(-π)
/// x  > 0: -softplus(-π) - π + log NB(x; μ, θ)   [π cancels inside]
/// ```
///
/// * `x_nd` - observed counts (n x d)
/// * `mu_nd` - NB mean
/// * `theta` - inverse dispersion, `(d)` or `(n, d)`
/// * `pi_nd` - dropout logit (zero-inflation gate)
pub fn log_zinb_positive(
    x_nd: &Tensor,
    mu_nd: &Tensor,
    theta: &Tensor,
    pi_nd: &Tensor,
) -> Result<Tensor> {
    let softplus_neg_pi = softplus(&pi_nd.neg()?)?;
    let log_theta_eps = (theta + EPS)?.log()?;
    let log_theta_mu_eps = (mu_nd.broadcast_add(theta)? + EPS)?.log()?;
    let log_mu_eps = (mu_nd + EPS)?.log()?;

    // -π + θ * (log θ - log(θ + μ))
    let pi_theta_log = log_theta_eps
        .broadcast_sub(&log_theta_mu_eps)?
        .broadcast_mul(theta)?
        .broadcast_sub(pi_nd)?;

    let case_zero = softplus(&pi_theta_log)?.broadcast_sub(&softplus_neg_pi)?;

    let x_term = log_mu_eps
        .broadcast_sub(&log_theta_mu_eps)?
        .broadcast_mul(x_nd)?;
    let lgamma_term = lgamma_approx(&x_nd.broadcast_add(theta)?)?
        .broadcast_sub(&lgamma_approx(theta)?)?
        .broadcast_sub(&lgamma_approx(&(x_nd + 1.)?)?)?;
    let case_non_zero = pi_theta_log
        .broadcast_sub(&softplus_neg_pi)?
        .broadcast_add(&x_term)?
        .broadcast_add(&lgamma_term)?;

    x_nd.lt(EPS)?
        .where_cond(&case_zero, &case_non_zero)?
        .sum(D::Minus1)
}
