use std::f64::consts::PI;

use rand::Rng;
use rand_distr::{Distribution, Gamma as GammaDraw, StandardNormal};
use statrs::distribution::{ContinuousCDF, Gamma};
use statrs::function::gamma::ln_gamma;

use crate::error::SamplerError;
use crate::posterior::ParameterRange;

/// One-sigma tail probabilities of the standard normal; the (lower, central,
/// upper) prior descriptions are interpreted as 16%/mode/84% points.
const P_LOW: f64 = 0.158_655_253_931_457_05;
const P_HIGH: f64 = 0.841_344_746_068_542_9;

const SAMPLE_RETRIES: usize = 1000;

/// Prior density over a single parameter, evaluated in log space.
///
/// The closed set of kinds mirrors what the analysis layer can declare:
/// flat within the hard range, (asymmetric) Gaussian and Log-Gamma given by a
/// 16%/mode/84% description, and a finite discrete support.
#[derive(Debug, Clone, PartialEq)]
pub enum Prior {
    Flat,
    Gauss {
        lower: f64,
        central: f64,
        upper: f64,
    },
    LogGamma {
        nu: f64,
        lambda: f64,
        alpha: f64,
    },
    Discrete {
        values: Vec<f64>,
    },
}

impl Prior {
    pub fn flat() -> Self {
        Prior::Flat
    }

    /// Split-normal prior: `central - lower` and `upper - central` are the
    /// one-sigma widths below and above the central value.
    pub fn gauss(lower: f64, central: f64, upper: f64) -> Result<Self, SamplerError> {
        check_limits("gaussian", lower, central, upper)?;
        Ok(Prior::Gauss {
            lower,
            central,
            upper,
        })
    }

    /// Log-Gamma prior matching the same 16%/mode/84% description as
    /// [`Prior::gauss`], for parameters with skewed uncertainties.
    ///
    /// Fails for (near-)symmetric limits, where the shape parameter diverges;
    /// a gaussian prior describes that case.
    pub fn log_gamma(lower: f64, central: f64, upper: f64) -> Result<Self, SamplerError> {
        check_limits("log-gamma", lower, central, upper)?;
        let (nu, lambda, alpha) = solve_log_gamma(lower, central, upper)?;
        Ok(Prior::LogGamma { nu, lambda, alpha })
    }

    pub fn discrete(values: Vec<f64>) -> Result<Self, SamplerError> {
        if values.is_empty() {
            return Err(SamplerError::config("discrete prior with empty support"));
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(SamplerError::config(
                "discrete prior with non-finite support point",
            ));
        }
        Ok(Prior::Discrete { values })
    }

    pub fn is_discrete(&self) -> bool {
        matches!(self, Prior::Discrete { .. })
    }

    /// The finite support of a discrete prior, `None` for continuous kinds.
    pub fn support(&self) -> Option<&[f64]> {
        match self {
            Prior::Discrete { values } => Some(values),
            _ => None,
        }
    }

    /// Log density at `x`, up to kind-wise constant normalization.
    ///
    /// Discrete priors return negative infinity off their support; hard range
    /// bounds are enforced by the posterior, not here.
    pub fn log_density(&self, x: f64) -> f64 {
        match self {
            Prior::Flat => 0.0,
            Prior::Gauss {
                lower,
                central,
                upper,
            } => {
                let sigma = if x < *central {
                    central - lower
                } else {
                    upper - central
                };
                let z = (x - central) / sigma;
                let norm = (2.0 / PI).sqrt() / ((central - lower) + (upper - central));
                norm.ln() - 0.5 * z * z
            }
            Prior::LogGamma { nu, lambda, alpha } => {
                let z = (x - nu) / lambda;
                alpha * z - z.exp() - ln_gamma(*alpha) - lambda.abs().ln()
            }
            Prior::Discrete { values } => {
                if values.contains(&x) {
                    -(values.len() as f64).ln()
                } else {
                    f64::NEG_INFINITY
                }
            }
        }
    }

    /// Draw one value from the prior, restricted to the hard range.
    ///
    /// Continuous kinds reject draws outside the range a bounded number of
    /// times and fall back to the range midpoint.
    pub fn sample<R: Rng + ?Sized>(&self, range: &ParameterRange, rng: &mut R) -> f64 {
        match self {
            Prior::Flat => rng.random_range(range.min..range.max),
            Prior::Gauss {
                lower,
                central,
                upper,
            } => {
                let sigma_minus = central - lower;
                let sigma_plus = upper - central;
                for _ in 0..SAMPLE_RETRIES {
                    let z: f64 = StandardNormal.sample(rng);
                    let side: f64 = rng.random();
                    let draw = if side < sigma_minus / (sigma_minus + sigma_plus) {
                        central - z.abs() * sigma_minus
                    } else {
                        central + z.abs() * sigma_plus
                    };
                    if range.contains(draw) {
                        return draw;
                    }
                }
                range.midpoint()
            }
            Prior::LogGamma { nu, lambda, alpha } => {
                let gamma = GammaDraw::new(*alpha, 1.0).expect("shape was validated");
                for _ in 0..SAMPLE_RETRIES {
                    let g: f64 = gamma.sample(rng);
                    let draw = nu + lambda * g.ln();
                    if range.contains(draw) {
                        return draw;
                    }
                }
                range.midpoint()
            }
            Prior::Discrete { values } => values[rng.random_range(0..values.len())],
        }
    }
}

fn check_limits(kind: &str, lower: f64, central: f64, upper: f64) -> Result<(), SamplerError> {
    if !(lower.is_finite() && central.is_finite() && upper.is_finite()) {
        return Err(SamplerError::config(format!(
            "{kind} prior with non-finite limits"
        )));
    }
    if !(lower < central && central < upper) {
        return Err(SamplerError::config(format!(
            "{kind} prior limits must satisfy lower < central < upper, got ({lower}, {central}, {upper})"
        )));
    }
    Ok(())
}

/// Find (nu, lambda, alpha) such that the Log-Gamma density has its mode at
/// `central` and its 16%/84% quantiles at `lower`/`upper`.
///
/// With `x = nu + lambda ln g`, `g ~ Gamma(alpha, 1)`, the mode sits at
/// `nu + lambda ln alpha` and the cdf is the Gamma cdf of `exp((x - nu) / lambda)`.
/// For a given alpha the mode and lower-quantile conditions fix lambda and nu;
/// the upper-quantile residual is then bisected in ln alpha.
fn solve_log_gamma(lower: f64, central: f64, upper: f64) -> Result<(f64, f64, f64), SamplerError> {
    let sigma_minus = central - lower;
    let sigma_plus = upper - central;

    // lambda > 0 puts the heavier tail below the mode; mirror the problem
    // when the upper uncertainty dominates.
    if sigma_plus > sigma_minus {
        let (nu, lambda, alpha) = solve_log_gamma(-upper, -central, -lower)?;
        return Ok((-nu, -lambda, alpha));
    }

    if (sigma_minus - sigma_plus) / (sigma_minus + sigma_plus) < 1e-4 {
        return Err(SamplerError::config(
            "log-gamma prior limits are (nearly) symmetric; use a gaussian prior",
        ));
    }

    let residual = |ln_alpha: f64| -> f64 {
        let alpha = ln_alpha.exp();
        let gamma = Gamma::new(alpha, 1.0).expect("alpha is positive");
        let q_low = gamma_quantile(&gamma, P_LOW);
        let lambda = (lower - central) / (q_low.ln() - alpha.ln());
        let z_high = (upper - central) / lambda + alpha.ln();
        gamma.cdf(z_high.exp()) - P_HIGH
    };

    let mut lo = -2.0;
    let mut hi = 16.0;
    let mut f_lo = residual(lo);
    let f_hi = residual(hi);
    if f_lo.signum() == f_hi.signum() {
        return Err(SamplerError::config(format!(
            "no log-gamma distribution matches the limits ({lower}, {central}, {upper})"
        )));
    }
    for _ in 0..200 {
        let mid = 0.5 * (lo + hi);
        let f_mid = residual(mid);
        if f_mid.abs() < 1e-13 {
            lo = mid;
            hi = mid;
            break;
        }
        if f_mid.signum() == f_lo.signum() {
            lo = mid;
            f_lo = f_mid;
        } else {
            hi = mid;
        }
    }

    let alpha = (0.5 * (lo + hi)).exp();
    let gamma = Gamma::new(alpha, 1.0).expect("alpha is positive");
    let q_low = gamma_quantile(&gamma, P_LOW);
    let lambda = (lower - central) / (q_low.ln() - alpha.ln());
    let nu = central - lambda * alpha.ln();
    Ok((nu, lambda, alpha))
}

/// Quantile of a Gamma distribution by bisecting its cdf. The provided
/// `inverse_cdf` default is too coarse for the solve above.
fn gamma_quantile(gamma: &Gamma, p: f64) -> f64 {
    let mut low = 0.0;
    let mut high = 1.0;
    while gamma.cdf(high) < p && high < 1e300 {
        high *= 2.0;
    }
    for _ in 0..200 {
        let mid = 0.5 * (low + high);
        if gamma.cdf(mid) < p {
            low = mid;
        } else {
            high = mid;
        }
    }
    0.5 * (low + high)
}
