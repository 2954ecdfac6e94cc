use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::error::SamplerError;
use crate::posterior::{LogLikelihood, Posterior};
use crate::proposal::Proposal;
use crate::storage::ChainCheckpoint;

const INIT_RETRIES: usize = 500;

/// One Markov-chain random walk over parameter space.
///
/// A chain owns its state exclusively: position, posterior value, counters,
/// proposal, and a deterministically seeded RNG (one ChaCha stream per chain
/// id). It never synchronizes with other chains within a step; coordination
/// happens only at the chunk boundaries driven by the sampler.
pub struct Chain {
    id: u64,
    rng: ChaCha8Rng,
    current: Vec<f64>,
    current_log_posterior: f64,
    accepted: u64,
    rejected: u64,
    proposal: Proposal,
    interval_samples: Vec<Vec<f64>>,
    interval_log_posteriors: Vec<f64>,
    interval_accepted: u64,
}

impl Chain {
    /// Create a chain seeded from `(seed, id)`, starting from a prior draw
    /// with finite posterior.
    pub(crate) fn new<L: LogLikelihood>(
        id: u64,
        seed: u64,
        posterior: &Posterior<L>,
        proposal: Proposal,
    ) -> Result<Self, SamplerError> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        rng.set_stream(id);

        for _ in 0..INIT_RETRIES {
            let position = posterior.sample_initial_point(&mut rng);
            let log_posterior = posterior.evaluate(&position);
            if log_posterior.is_finite() {
                return Ok(Chain {
                    id,
                    rng,
                    current: position,
                    current_log_posterior: log_posterior,
                    accepted: 0,
                    rejected: 0,
                    proposal,
                    interval_samples: Vec::new(),
                    interval_log_posteriors: Vec::new(),
                    interval_accepted: 0,
                });
            }
        }
        Err(SamplerError::config(format!(
            "chain {id} found no starting point with finite posterior after {INIT_RETRIES} prior draws"
        )))
    }

    /// Rebuild a chain from a checkpoint, restoring position, counters,
    /// proposal state, and the RNG stream position.
    pub(crate) fn restore(
        checkpoint: &ChainCheckpoint,
        seed: u64,
        mut proposal: Proposal,
    ) -> Result<Self, SamplerError> {
        if checkpoint.position.len() != proposal.dim() {
            return Err(SamplerError::CheckpointMismatch {
                expected: format!("{} parameters", proposal.dim()),
                found: format!("{} parameters", checkpoint.position.len()),
            });
        }
        proposal.restore(&checkpoint.proposal)?;

        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        rng.set_stream(checkpoint.id);
        rng.set_word_pos(checkpoint.rng_word_pos);

        Ok(Chain {
            id: checkpoint.id,
            rng,
            current: checkpoint.position.clone(),
            current_log_posterior: checkpoint.log_posterior,
            accepted: checkpoint.accepted,
            rejected: checkpoint.rejected,
            proposal,
            interval_samples: Vec::new(),
            interval_log_posteriors: Vec::new(),
            interval_accepted: 0,
        })
    }

    /// Move the chain to `position`, e.g. a mode-finder result.
    ///
    /// Fails if the posterior is not finite there.
    pub fn set_position<L: LogLikelihood>(
        &mut self,
        posterior: &Posterior<L>,
        position: &[f64],
    ) -> Result<(), SamplerError> {
        let log_posterior = posterior.evaluate(position);
        if !log_posterior.is_finite() {
            return Err(SamplerError::config(format!(
                "starting point for chain {} has non-finite posterior",
                self.id
            )));
        }
        self.current = position.to_vec();
        self.current_log_posterior = log_posterior;
        Ok(())
    }

    /// One Metropolis-Hastings transition. Returns whether the candidate was
    /// accepted.
    pub fn step<L: LogLikelihood>(&mut self, posterior: &Posterior<L>) -> bool {
        let candidate = self.proposal.propose(&self.current, &mut self.rng);
        let candidate_log_posterior = posterior.evaluate(&candidate);
        let mut delta = candidate_log_posterior - self.current_log_posterior;
        if !self.proposal.is_symmetric() {
            delta += self.proposal.log_density_ratio(&self.current, &candidate);
        }

        let uniform: f64 = self.rng.random();
        let accept = uniform.ln() < delta;
        if accept {
            self.current = candidate;
            self.current_log_posterior = candidate_log_posterior;
            self.accepted += 1;
            self.interval_accepted += 1;
        } else {
            self.rejected += 1;
        }

        self.interval_samples.push(self.current.clone());
        self.interval_log_posteriors.push(self.current_log_posterior);
        accept
    }

    /// Advance `steps` transitions without synchronization.
    pub(crate) fn run_chunk<L: LogLikelihood>(&mut self, posterior: &Posterior<L>, steps: u64) {
        for _ in 0..steps {
            self.step(posterior);
        }
    }

    /// Drop the interval history; called at every chunk boundary.
    pub(crate) fn begin_interval(&mut self) {
        self.interval_samples.clear();
        self.interval_log_posteriors.clear();
        self.interval_accepted = 0;
    }

    /// Adapt the proposal from the current interval's samples.
    pub(crate) fn adapt_proposal(&mut self) {
        let rate = self.interval_acceptance_rate();
        let samples = std::mem::take(&mut self.interval_samples);
        self.proposal.adapt(&samples, rate);
        self.interval_samples = samples;
    }

    pub(crate) fn interval_samples(&self) -> &[Vec<f64>] {
        &self.interval_samples
    }

    pub(crate) fn interval_log_posteriors(&self) -> &[f64] {
        &self.interval_log_posteriors
    }

    pub(crate) fn interval_accepted(&self) -> u64 {
        self.interval_accepted
    }

    pub(crate) fn interval_acceptance_rate(&self) -> f64 {
        if self.interval_samples.is_empty() {
            0.0
        } else {
            self.interval_accepted as f64 / self.interval_samples.len() as f64
        }
    }

    pub(crate) fn checkpoint(&self) -> ChainCheckpoint {
        ChainCheckpoint {
            id: self.id,
            position: self.current.clone(),
            log_posterior: self.current_log_posterior,
            accepted: self.accepted,
            rejected: self.rejected,
            rng_word_pos: self.rng.get_word_pos(),
            proposal: self.proposal.checkpoint(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn position(&self) -> &[f64] {
        &self.current
    }

    pub fn log_posterior(&self) -> f64 {
        self.current_log_posterior
    }

    pub fn accepted(&self) -> u64 {
        self.accepted
    }

    pub fn rejected(&self) -> u64 {
        self.rejected
    }

    pub fn total_steps(&self) -> u64 {
        self.accepted + self.rejected
    }

    pub fn acceptance_rate(&self) -> f64 {
        if self.total_steps() == 0 {
            0.0
        } else {
            self.accepted as f64 / self.total_steps() as f64
        }
    }

    pub fn proposal(&self) -> &Proposal {
        &self.proposal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::posterior::test_likelihoods::GaussLogp;
    use crate::posterior::{ParameterDescription, ParameterRange};
    use crate::prior::Prior;
    use crate::proposal::ProposalOptions;
    use proptest::prelude::*;

    fn posterior(dim: usize) -> Posterior<GaussLogp> {
        let parameters = (0..dim)
            .map(|i| {
                ParameterDescription::scan(
                    format!("p{i}"),
                    ParameterRange::new(-10.0, 10.0).unwrap(),
                    Prior::flat(),
                )
            })
            .collect();
        Posterior::new(
            GaussLogp {
                dim,
                mu: 0.0,
                sigma: 1.0,
            },
            parameters,
        )
        .unwrap()
    }

    fn chain(id: u64, seed: u64, posterior: &Posterior<GaussLogp>) -> Chain {
        let proposal =
            Proposal::new(ProposalOptions::Gaussian, posterior.parameters(), &[]).unwrap();
        Chain::new(id, seed, posterior, proposal).unwrap()
    }

    #[test]
    fn counters_balance_after_stepping() {
        let posterior = posterior(2);
        let mut chain = chain(0, 42, &posterior);
        chain.run_chunk(&posterior, 250);
        assert_eq!(chain.accepted() + chain.rejected(), 250);
        assert_eq!(chain.total_steps(), 250);
        assert!((0.0..=1.0).contains(&chain.acceptance_rate()));
    }

    #[test]
    fn same_seed_and_id_reproduce_the_trajectory() {
        let posterior = posterior(2);
        let mut a = chain(1, 7, &posterior);
        let mut b = chain(1, 7, &posterior);
        a.run_chunk(&posterior, 100);
        b.run_chunk(&posterior, 100);
        assert_eq!(a.position(), b.position());
        assert_eq!(a.accepted(), b.accepted());
    }

    #[test]
    fn different_ids_use_independent_streams() {
        let posterior = posterior(2);
        let mut a = chain(0, 7, &posterior);
        let mut b = chain(1, 7, &posterior);
        a.run_chunk(&posterior, 50);
        b.run_chunk(&posterior, 50);
        assert_ne!(a.position(), b.position());
    }

    #[test]
    fn set_position_rejects_out_of_range_points() {
        let posterior = posterior(1);
        let mut chain = chain(0, 3, &posterior);
        assert!(chain.set_position(&posterior, &[42.0]).is_err());
        assert!(chain.set_position(&posterior, &[0.5]).is_ok());
        assert_eq!(chain.position(), &[0.5]);
    }

    #[test]
    fn restored_chain_continues_the_exact_trajectory() {
        let posterior = posterior(3);
        let mut full = chain(2, 99, &posterior);
        full.run_chunk(&posterior, 120);
        let snapshot = full.checkpoint();
        full.run_chunk(&posterior, 80);

        let proposal =
            Proposal::new(ProposalOptions::Gaussian, posterior.parameters(), &[]).unwrap();
        let mut resumed = Chain::restore(&snapshot, 99, proposal).unwrap();
        resumed.run_chunk(&posterior, 80);

        assert_eq!(full.position(), resumed.position());
        assert_eq!(full.accepted(), resumed.accepted());
        assert_eq!(full.rejected(), resumed.rejected());
    }

    #[test]
    fn interval_bookkeeping_resets_at_boundaries() {
        let posterior = posterior(1);
        let mut chain = chain(0, 5, &posterior);
        chain.run_chunk(&posterior, 30);
        assert_eq!(chain.interval_samples().len(), 30);
        assert_eq!(chain.interval_log_posteriors().len(), 30);
        chain.begin_interval();
        assert!(chain.interval_samples().is_empty());
        assert_eq!(chain.interval_accepted(), 0);
        chain.run_chunk(&posterior, 10);
        assert_eq!(chain.interval_samples().len(), 10);
    }

    proptest! {
        #[test]
        fn accepted_plus_rejected_is_total(seed in 0u64..512, steps in 1u64..200) {
            let posterior = posterior(1);
            let mut chain = chain(0, seed, &posterior);
            chain.run_chunk(&posterior, steps);
            prop_assert_eq!(chain.accepted() + chain.rejected(), steps);
            let rate = chain.acceptance_rate();
            prop_assert!((0.0..=1.0).contains(&rate));
        }
    }
}
