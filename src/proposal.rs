use log::warn;
use nalgebra::{Cholesky, DMatrix, DVector};
use rand::Rng;
use rand_distr::{ChiSquared, Distribution, StandardNormal};

use crate::error::SamplerError;
use crate::math;
use crate::posterior::{ParameterDescription, ParameterRange};
use crate::prior::Prior;
use crate::storage::ProposalCheckpoint;

/// Acceptance-rate band the covariance scale is tuned towards, centered on
/// the 0.234 optimum for high-dimensional random walks.
const ACCEPT_LOWER_LIMIT: f64 = 0.15;
const ACCEPT_UPPER_LIMIT: f64 = 0.35;

const SCALE_LOWER_LIMIT: f64 = 1e-6;
const SCALE_UPPER_LIMIT: f64 = 1e2;

/// Which random-walk kernel drives the adaptive block of the proposal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProposalOptions {
    /// Multivariate Gaussian steps from the adapted covariance.
    Gaussian,
    /// Heavier-tailed multivariate Student-t steps.
    StudentT { degrees_of_freedom: f64 },
}

impl Default for ProposalOptions {
    fn default() -> Self {
        ProposalOptions::Gaussian
    }
}

#[derive(Debug, Clone)]
enum Component {
    /// Driven by the multivariate random walk over the adaptive block.
    Adaptive,
    /// Uniform draw from a finite support, never adapted.
    Discrete { values: Vec<f64> },
    /// Fresh prior draw each step, for parameters blocked from adaptation.
    FromPrior { prior: Prior, range: ParameterRange },
}

/// Candidate generator for one chain.
///
/// Parameters with discrete priors and parameters listed as blocked are
/// excluded from the adaptive covariance block and proposed component-wise;
/// everything else moves together via `candidate = current + L z`.
#[derive(Debug, Clone)]
pub struct Proposal {
    kind: ProposalOptions,
    components: Vec<Component>,
    /// Parameter index of each adaptive slot.
    block: Vec<usize>,
    covariance: DMatrix<f64>,
    /// Cholesky factor of `scale * covariance`.
    factor: DMatrix<f64>,
    scale: f64,
    adaptations: u64,
}

impl Proposal {
    pub fn new(
        options: ProposalOptions,
        parameters: &[ParameterDescription],
        blocked: &[String],
    ) -> Result<Self, SamplerError> {
        if let ProposalOptions::StudentT { degrees_of_freedom } = options {
            if !(degrees_of_freedom > 0.0) {
                return Err(SamplerError::config(format!(
                    "student-t proposal needs positive degrees of freedom, got {degrees_of_freedom}"
                )));
            }
        }
        for name in blocked {
            if !parameters.iter().any(|p| &p.name == name) {
                return Err(SamplerError::config(format!(
                    "blocked proposal parameter '{name}' is not declared"
                )));
            }
        }

        let mut components = Vec::with_capacity(parameters.len());
        let mut block = Vec::new();
        for (idx, parameter) in parameters.iter().enumerate() {
            if let Some(support) = parameter.prior.support() {
                components.push(Component::Discrete {
                    values: support.to_vec(),
                });
            } else if blocked.contains(&parameter.name) {
                components.push(Component::FromPrior {
                    prior: parameter.prior.clone(),
                    range: parameter.range,
                });
            } else {
                components.push(Component::Adaptive);
                block.push(idx);
            }
        }

        // Start from independent flat variances over the block, with the
        // usual 2.38^2 / d random-walk scaling.
        let d = block.len();
        let mut covariance = DMatrix::zeros(d, d);
        for (slot, &idx) in block.iter().enumerate() {
            let width = parameters[idx].range.width();
            covariance[(slot, slot)] = width * width / 12.0;
        }
        let scale = if d > 0 { 2.38 * 2.38 / d as f64 } else { 1.0 };
        let factor = factorize(&covariance, scale)
            .expect("diagonal starting covariance is positive definite");

        Ok(Proposal {
            kind: options,
            components,
            block,
            covariance,
            factor,
            scale,
            adaptations: 0,
        })
    }

    pub fn dim(&self) -> usize {
        self.components.len()
    }

    /// Generate a candidate from `current`.
    pub fn propose<R: Rng + ?Sized>(&self, current: &[f64], rng: &mut R) -> Vec<f64> {
        assert_eq!(current.len(), self.components.len());
        let mut candidate = current.to_vec();

        if !self.block.is_empty() {
            let d = self.block.len();
            let mut step =
                &self.factor * DVector::from_fn(d, |_, _| rng.sample::<f64, _>(StandardNormal));
            if let ProposalOptions::StudentT { degrees_of_freedom } = self.kind {
                let chi2: f64 = ChiSquared::new(degrees_of_freedom)
                    .expect("degrees of freedom were validated")
                    .sample(rng);
                step *= (degrees_of_freedom / chi2).sqrt();
            }
            for (slot, &idx) in self.block.iter().enumerate() {
                candidate[idx] = current[idx] + step[slot];
            }
        }

        for (idx, component) in self.components.iter().enumerate() {
            match component {
                Component::Adaptive => {}
                Component::Discrete { values } => {
                    candidate[idx] = values[rng.random_range(0..values.len())];
                }
                Component::FromPrior { prior, range } => {
                    candidate[idx] = prior.sample(range, rng);
                }
            }
        }
        candidate
    }

    /// Whether `q(candidate | current) == q(current | candidate)`. Only the
    /// prior-draw components break symmetry.
    pub fn is_symmetric(&self) -> bool {
        !self
            .components
            .iter()
            .any(|c| matches!(c, Component::FromPrior { .. }))
    }

    /// `log q(current | candidate) - log q(candidate | current)` for the
    /// acceptance ratio of asymmetric proposals. Zero for symmetric ones.
    pub fn log_density_ratio(&self, current: &[f64], candidate: &[f64]) -> f64 {
        self.components
            .iter()
            .enumerate()
            .map(|(idx, component)| match component {
                Component::FromPrior { prior, .. } => {
                    prior.log_density(current[idx]) - prior.log_density(candidate[idx])
                }
                _ => 0.0,
            })
            .sum()
    }

    /// Re-estimate the block covariance from the interval's samples and tune
    /// the scale towards the target acceptance band.
    ///
    /// A degenerate estimate keeps the previous covariance and only logs a
    /// warning; sampling continues.
    pub fn adapt(&mut self, samples: &[Vec<f64>], acceptance_rate: f64) {
        if self.block.is_empty() || samples.len() < 2 {
            return;
        }

        if acceptance_rate < ACCEPT_LOWER_LIMIT {
            self.scale = (self.scale * 0.5).max(SCALE_LOWER_LIMIT);
        } else if acceptance_rate > ACCEPT_UPPER_LIMIT {
            self.scale = (self.scale * 2.0).min(SCALE_UPPER_LIMIT);
        }

        let estimate = math::empirical_covariance(samples, &self.block);
        match factorize(&estimate, self.scale) {
            Some(factor) => {
                self.covariance = estimate;
                self.factor = factor;
            }
            None => {
                warn!(
                    "proposal covariance estimate from {} samples is not positive definite; \
                     keeping the previous covariance",
                    samples.len()
                );
                self.factor = factorize(&self.covariance, self.scale)
                    .expect("previous covariance was positive definite");
            }
        }
        self.adaptations += 1;
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn covariance(&self) -> &DMatrix<f64> {
        &self.covariance
    }

    pub fn adaptations(&self) -> u64 {
        self.adaptations
    }

    /// Covariance diagonal expanded to full parameter order, zero for
    /// non-adaptive components.
    pub(crate) fn variances(&self) -> Vec<f64> {
        let mut variances = vec![0.0; self.components.len()];
        for (slot, &idx) in self.block.iter().enumerate() {
            variances[idx] = self.covariance[(slot, slot)];
        }
        variances
    }

    pub(crate) fn checkpoint(&self) -> ProposalCheckpoint {
        ProposalCheckpoint {
            block_dim: self.block.len(),
            covariance: self.covariance.iter().copied().collect(),
            scale: self.scale,
            adaptations: self.adaptations,
        }
    }

    pub(crate) fn restore(&mut self, checkpoint: &ProposalCheckpoint) -> Result<(), SamplerError> {
        let d = self.block.len();
        if checkpoint.block_dim != d || checkpoint.covariance.len() != d * d {
            return Err(SamplerError::CheckpointMismatch {
                expected: format!("proposal block of dimension {d}"),
                found: format!("dimension {}", checkpoint.block_dim),
            });
        }
        let covariance = DMatrix::from_column_slice(d, d, &checkpoint.covariance);
        let factor = factorize(&covariance, checkpoint.scale).ok_or_else(|| {
            SamplerError::config("checkpointed proposal covariance is not positive definite")
        })?;
        self.covariance = covariance;
        self.factor = factor;
        self.scale = checkpoint.scale;
        self.adaptations = checkpoint.adaptations;
        Ok(())
    }
}

fn factorize(covariance: &DMatrix<f64>, scale: f64) -> Option<DMatrix<f64>> {
    if covariance.nrows() == 0 {
        return Some(DMatrix::zeros(0, 0));
    }
    Cholesky::new(covariance * scale).map(|chol| chol.unpack())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::posterior::{ParameterDescription, ParameterRange};
    use crate::prior::Prior;
    use approx::assert_abs_diff_eq;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn parameters() -> Vec<ParameterDescription> {
        vec![
            ParameterDescription::scan(
                "a",
                ParameterRange::new(-10.0, 10.0).unwrap(),
                Prior::flat(),
            ),
            ParameterDescription::nuisance(
                "b",
                ParameterRange::new(-10.0, 10.0).unwrap(),
                Prior::gauss(-1.0, 0.0, 1.0).unwrap(),
            ),
        ]
    }

    #[test]
    fn student_t_rejects_non_positive_degrees_of_freedom() {
        let result = Proposal::new(
            ProposalOptions::StudentT {
                degrees_of_freedom: 0.0,
            },
            &parameters(),
            &[],
        );
        assert!(matches!(
            result,
            Err(SamplerError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn unknown_blocked_parameter_is_rejected() {
        let result = Proposal::new(ProposalOptions::Gaussian, &parameters(), &["c".into()]);
        assert!(matches!(
            result,
            Err(SamplerError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn gaussian_proposal_is_symmetric() {
        let proposal = Proposal::new(ProposalOptions::Gaussian, &parameters(), &[]).unwrap();
        assert!(proposal.is_symmetric());
        assert_eq!(proposal.log_density_ratio(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn blocked_parameter_breaks_symmetry() {
        let proposal =
            Proposal::new(ProposalOptions::Gaussian, &parameters(), &["b".into()]).unwrap();
        assert!(!proposal.is_symmetric());

        // the ratio only involves the blocked component's prior
        let prior = Prior::gauss(-1.0, 0.0, 1.0).unwrap();
        let ratio = proposal.log_density_ratio(&[3.0, 0.1], &[-2.0, 0.7]);
        assert_abs_diff_eq!(
            ratio,
            prior.log_density(0.1) - prior.log_density(0.7),
            epsilon = 1e-12
        );
    }

    #[test]
    fn discrete_candidates_stay_on_support() {
        let mut params = parameters();
        params.push(ParameterDescription::nuisance(
            "k",
            ParameterRange::new(0.0, 10.0).unwrap(),
            Prior::discrete(vec![1.0, 4.0, 9.0]).unwrap(),
        ));
        let proposal = Proposal::new(ProposalOptions::Gaussian, &params, &[]).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let current = vec![0.0, 0.0, 4.0];
        for _ in 0..300 {
            let candidate = proposal.propose(&current, &mut rng);
            assert!([1.0, 4.0, 9.0].contains(&candidate[2]));
        }
    }

    #[test]
    fn degenerate_covariance_keeps_previous_estimate() {
        let mut proposal = Proposal::new(ProposalOptions::Gaussian, &parameters(), &[]).unwrap();
        let before = proposal.covariance().clone();
        // zero spread in every direction
        let samples = vec![vec![1.0, 2.0]; 50];
        proposal.adapt(&samples, 0.25);
        assert_eq!(proposal.covariance(), &before);
    }

    #[test]
    fn healthy_covariance_is_adopted() {
        let mut proposal = Proposal::new(ProposalOptions::Gaussian, &parameters(), &[]).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(17);
        let samples: Vec<Vec<f64>> = (0..200)
            .map(|_| {
                vec![
                    rng.sample::<f64, _>(StandardNormal),
                    2.0 * rng.sample::<f64, _>(StandardNormal),
                ]
            })
            .collect();
        proposal.adapt(&samples, 0.25);
        assert_eq!(proposal.adaptations(), 1);
        assert_abs_diff_eq!(proposal.covariance()[(0, 0)], 1.0, epsilon = 0.5);
        assert_abs_diff_eq!(proposal.covariance()[(1, 1)], 4.0, epsilon = 1.5);
    }

    #[test]
    fn scale_reacts_to_acceptance_rate() {
        let mut rng = ChaCha8Rng::seed_from_u64(23);
        let samples: Vec<Vec<f64>> = (0..100)
            .map(|_| {
                vec![
                    rng.sample::<f64, _>(StandardNormal),
                    rng.sample::<f64, _>(StandardNormal),
                ]
            })
            .collect();

        let mut proposal = Proposal::new(ProposalOptions::Gaussian, &parameters(), &[]).unwrap();
        let initial = proposal.scale();
        proposal.adapt(&samples, 0.01);
        assert!(proposal.scale() < initial);

        let mut proposal = Proposal::new(ProposalOptions::Gaussian, &parameters(), &[]).unwrap();
        proposal.adapt(&samples, 0.9);
        assert!(proposal.scale() > initial);

        let mut proposal = Proposal::new(ProposalOptions::Gaussian, &parameters(), &[]).unwrap();
        proposal.adapt(&samples, 0.25);
        assert_abs_diff_eq!(proposal.scale(), initial, epsilon = 1e-12);
    }

    #[test]
    fn checkpoint_round_trip_preserves_draws() {
        let mut proposal = Proposal::new(ProposalOptions::Gaussian, &parameters(), &[]).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(29);
        let samples: Vec<Vec<f64>> = (0..100)
            .map(|_| {
                vec![
                    rng.sample::<f64, _>(StandardNormal),
                    rng.sample::<f64, _>(StandardNormal),
                ]
            })
            .collect();
        proposal.adapt(&samples, 0.25);

        let snapshot = proposal.checkpoint();
        let mut restored = Proposal::new(ProposalOptions::Gaussian, &parameters(), &[]).unwrap();
        restored.restore(&snapshot).unwrap();

        let mut rng_a = ChaCha8Rng::seed_from_u64(31);
        let mut rng_b = ChaCha8Rng::seed_from_u64(31);
        let current = vec![0.5, -0.5];
        assert_eq!(
            proposal.propose(&current, &mut rng_a),
            restored.propose(&current, &mut rng_b)
        );
    }

    #[test]
    fn student_t_draws_perturb_the_block() {
        let proposal = Proposal::new(
            ProposalOptions::StudentT {
                degrees_of_freedom: 3.0,
            },
            &parameters(),
            &[],
        )
        .unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(37);
        let current = vec![0.0, 0.0];
        let candidate = proposal.propose(&current, &mut rng);
        assert_ne!(candidate, current);
    }
}
