use rand::Rng;

use crate::error::SamplerError;
use crate::prior::Prior;
use crate::sampler::Partition;

/// Hard bounds of one free parameter. Any point outside is assigned zero
/// posterior probability.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParameterRange {
    pub min: f64,
    pub max: f64,
}

impl ParameterRange {
    pub fn new(min: f64, max: f64) -> Result<Self, SamplerError> {
        if !(min.is_finite() && max.is_finite() && min < max) {
            return Err(SamplerError::config(format!(
                "parameter range [{min}, {max}] is not a finite, non-empty interval"
            )));
        }
        Ok(ParameterRange { min, max })
    }

    pub fn contains(&self, x: f64) -> bool {
        x >= self.min && x <= self.max
    }

    pub fn width(&self) -> f64 {
        self.max - self.min
    }

    pub fn midpoint(&self) -> f64 {
        0.5 * (self.min + self.max)
    }

    /// Intersect with `[min, max]`. Partitions may only shrink a range,
    /// never widen it; an empty intersection is a configuration error.
    pub(crate) fn narrow(&self, min: f64, max: f64) -> Result<Self, SamplerError> {
        let narrowed_min = min.max(self.min);
        let narrowed_max = max.min(self.max);
        if !(narrowed_min < narrowed_max) {
            return Err(SamplerError::config(format!(
                "partition range [{min}, {max}] does not overlap the declared range [{}, {}]",
                self.min, self.max
            )));
        }
        ParameterRange::new(narrowed_min, narrowed_max)
    }
}

/// One free parameter of the analysis: a scan parameter of interest or a
/// nuisance parameter, with its hard range and prior.
#[derive(Debug, Clone)]
pub struct ParameterDescription {
    pub name: String,
    pub range: ParameterRange,
    pub nuisance: bool,
    pub prior: Prior,
}

impl ParameterDescription {
    pub fn scan(name: impl Into<String>, range: ParameterRange, prior: Prior) -> Self {
        ParameterDescription {
            name: name.into(),
            range,
            nuisance: false,
            prior,
        }
    }

    pub fn nuisance(name: impl Into<String>, range: ParameterRange, prior: Prior) -> Self {
        ParameterDescription {
            name: name.into(),
            range,
            nuisance: true,
            prior,
        }
    }
}

/// The physics model: an opaque log-likelihood over a parameter vector.
///
/// Implementations must be safely callable from several chains at once; the
/// sampler shares one instance read-only across the ensemble.
pub trait LogLikelihood: Send + Sync {
    fn dim(&self) -> usize;
    fn evaluate(&self, position: &[f64]) -> f64;
}

/// Log-likelihood plus the declared log-priors, evaluated in log space.
#[derive(Debug)]
pub struct Posterior<L> {
    likelihood: L,
    parameters: Vec<ParameterDescription>,
}

impl<L: LogLikelihood> Posterior<L> {
    pub fn new(likelihood: L, parameters: Vec<ParameterDescription>) -> Result<Self, SamplerError> {
        if likelihood.dim() != parameters.len() {
            return Err(SamplerError::config(format!(
                "likelihood has dimension {} but {} parameters were declared",
                likelihood.dim(),
                parameters.len()
            )));
        }
        for (i, parameter) in parameters.iter().enumerate() {
            if parameters[..i].iter().any(|p| p.name == parameter.name) {
                return Err(SamplerError::config(format!(
                    "parameter '{}' is declared twice",
                    parameter.name
                )));
            }
            if let Some(support) = parameter.prior.support() {
                if support.iter().any(|v| !parameter.range.contains(*v)) {
                    return Err(SamplerError::config(format!(
                        "discrete support of '{}' leaves its declared range",
                        parameter.name
                    )));
                }
            }
        }
        Ok(Posterior {
            likelihood,
            parameters,
        })
    }

    pub fn dim(&self) -> usize {
        self.parameters.len()
    }

    pub fn parameters(&self) -> &[ParameterDescription] {
        &self.parameters
    }

    /// Log posterior at `position`: the log-likelihood plus every log-prior
    /// term. Returns negative infinity (never NaN) outside any hard range or
    /// discrete support.
    pub fn evaluate(&self, position: &[f64]) -> f64 {
        assert_eq!(position.len(), self.parameters.len());
        let mut log_post = 0.0;
        for (&x, parameter) in position.iter().zip(&self.parameters) {
            if !parameter.range.contains(x) {
                return f64::NEG_INFINITY;
            }
            let log_prior = parameter.prior.log_density(x);
            if log_prior == f64::NEG_INFINITY {
                return f64::NEG_INFINITY;
            }
            log_post += log_prior;
        }
        let total = log_post + self.likelihood.evaluate(position);
        if total.is_nan() {
            f64::NEG_INFINITY
        } else {
            total
        }
    }

    /// Draw a starting point by sampling every parameter from its prior.
    pub fn sample_initial_point<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<f64> {
        self.parameters
            .iter()
            .map(|p| p.prior.sample(&p.range, rng))
            .collect()
    }

    /// Apply one partition, narrowing the named parameter ranges.
    pub(crate) fn restrict(&mut self, partition: &Partition) -> Result<(), SamplerError> {
        for (name, min, max) in &partition.constraints {
            let parameter = self
                .parameters
                .iter_mut()
                .find(|p| &p.name == name)
                .ok_or_else(|| {
                    SamplerError::config(format!("partition names unknown parameter '{name}'"))
                })?;
            parameter.range = parameter.range.narrow(*min, *max)?;
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_likelihoods {
    use super::LogLikelihood;

    /// Independent Gaussian likelihood with common mean and width.
    #[derive(Debug, Clone)]
    pub(crate) struct GaussLogp {
        pub dim: usize,
        pub mu: f64,
        pub sigma: f64,
    }

    impl LogLikelihood for GaussLogp {
        fn dim(&self) -> usize {
            self.dim
        }

        fn evaluate(&self, position: &[f64]) -> f64 {
            position
                .iter()
                .map(|p| {
                    let z = (p - self.mu) / self.sigma;
                    -0.5 * z * z
                })
                .sum()
        }
    }

    /// Likelihood that is flat everywhere, so the posterior is the prior.
    #[derive(Debug, Clone)]
    pub(crate) struct FlatLogp {
        pub dim: usize,
    }

    impl LogLikelihood for FlatLogp {
        fn dim(&self) -> usize {
            self.dim
        }

        fn evaluate(&self, _position: &[f64]) -> f64 {
            0.0
        }
    }
}
