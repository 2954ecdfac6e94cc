use itertools::Itertools;
use log::info;
use rayon::prelude::*;

use crate::chain::Chain;
use crate::error::SamplerError;
use crate::posterior::{LogLikelihood, ParameterRange, Posterior};
use crate::prerun::{self, PrerunOutcome};
use crate::proposal::{Proposal, ProposalOptions};
use crate::storage::{Checkpoint, ChunkRecord, ChunkStorage};

/// One declared sub-rectangle of parameter space: ordered
/// `(parameter name, min, max)` triples narrowing the default ranges.
#[derive(Debug, Clone, PartialEq)]
pub struct Partition {
    pub constraints: Vec<(String, f64, f64)>,
}

impl Partition {
    pub fn new(constraints: Vec<(String, f64, f64)>) -> Self {
        Partition { constraints }
    }
}

/// Immutable run options, built once before the sampler starts.
#[derive(Debug, Clone)]
pub struct Config {
    /// Number of chains in the ensemble.
    pub chain_count: usize,
    /// Steps per chain between persistence flushes in the main run.
    pub chunk_size: u64,
    /// Number of main-run chunks.
    pub chunk_count: u64,
    /// Whether burn-in runs before the main phase.
    pub need_prerun: bool,
    /// Whether the main phase runs at all; cleared for prerun-only scans.
    pub need_main_run: bool,
    pub prerun_iterations_min: u64,
    pub prerun_iterations_max: u64,
    /// Steps between proposal adaptations and convergence checks.
    pub prerun_iterations_update: u64,
    /// Scale-reduction threshold below which a parameter counts as converged.
    pub scale_reduction: f64,
    pub proposal: ProposalOptions,
    /// Parameters proposed from their prior instead of the adaptive block.
    pub blocked_proposal_parameters: Vec<String>,
    pub partitions: Vec<Partition>,
    /// Selects one declared partition; all chains are restricted to it.
    pub partition_index: Option<usize>,
    pub seed: u64,
    /// Run chains on the rayon pool instead of sequentially.
    pub parallelize: bool,
    /// Persist burn-in intervals as chunks tagged `burn_in`.
    pub store_prerun: bool,
    /// Attach proposal scale and variances to every stored chunk.
    pub store_observables_and_proposals: bool,
    /// Seed chain starting points with a mode finder before the prerun.
    pub find_modes: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            chain_count: 4,
            chunk_size: 1000,
            chunk_count: 100,
            need_prerun: true,
            need_main_run: true,
            prerun_iterations_min: 1000,
            prerun_iterations_max: 10_000,
            prerun_iterations_update: 500,
            scale_reduction: 1.1,
            proposal: ProposalOptions::Gaussian,
            blocked_proposal_parameters: Vec::new(),
            partitions: Vec::new(),
            partition_index: None,
            seed: 0,
            parallelize: true,
            store_prerun: false,
            store_observables_and_proposals: false,
            find_modes: false,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), SamplerError> {
        if self.chain_count == 0 {
            return Err(SamplerError::config("at least one chain is required"));
        }
        if self.chunk_size == 0 {
            return Err(SamplerError::config("chunk size must be positive"));
        }
        if self.need_prerun && self.prerun_iterations_update == 0 {
            return Err(SamplerError::config(
                "prerun update interval must be positive",
            ));
        }
        if self.prerun_iterations_min > self.prerun_iterations_max {
            return Err(SamplerError::config(format!(
                "prerun minimum ({}) exceeds maximum ({})",
                self.prerun_iterations_min, self.prerun_iterations_max
            )));
        }
        if !(self.scale_reduction > 1.0) {
            return Err(SamplerError::config(
                "scale-reduction threshold must exceed 1",
            ));
        }
        if let Some(index) = self.partition_index {
            if self.partitions.is_empty() {
                return Err(SamplerError::config(format!(
                    "can't select partition {index} from no partitions"
                )));
            }
            if index >= self.partitions.len() {
                return Err(SamplerError::config(format!(
                    "partition index {index} out of range, {} declared",
                    self.partitions.len()
                )));
            }
        }
        Ok(())
    }
}

/// Local-optimizer collaborator used to seed chain starting points.
/// Never part of the sampling loop itself.
pub trait ModeFinder: Send {
    fn refine(
        &mut self,
        log_posterior: &dyn Fn(&[f64]) -> f64,
        start: &[f64],
        ranges: &[ParameterRange],
    ) -> anyhow::Result<Vec<f64>>;
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub prerun: Option<PrerunOutcome>,
    pub chunks_done: u64,
    pub iterations_done: u64,
    pub acceptance_rates: Vec<f64>,
}

/// Top-level orchestrator: owns the chain ensemble, the partition selection,
/// the prerun and main phases, and the checkpoint triggers.
pub struct Sampler<L, S> {
    posterior: Posterior<L>,
    config: Config,
    chains: Vec<Chain>,
    storage: S,
    chunks_done: u64,
    iterations_done: u64,
    resumed: bool,
    mode_finder: Option<Box<dyn ModeFinder>>,
}

impl<L: LogLikelihood, S: ChunkStorage> Sampler<L, S> {
    /// Build a fresh ensemble. Chains are seeded deterministically from
    /// `(config.seed, chain id)`, so the same seed and configuration
    /// reproduce the same trajectories.
    pub fn new(posterior: Posterior<L>, config: Config, storage: S) -> Result<Self, SamplerError> {
        Self::build(posterior, config, storage, false)
    }

    /// Continue a run from the storage's last checkpoint, skipping the
    /// prerun. The checkpoint must match the current configuration.
    pub fn resume(
        posterior: Posterior<L>,
        config: Config,
        storage: S,
    ) -> Result<Self, SamplerError> {
        Self::build(posterior, config, storage, true)
    }

    fn build(
        mut posterior: Posterior<L>,
        config: Config,
        storage: S,
        resume: bool,
    ) -> Result<Self, SamplerError> {
        config.validate()?;

        if let Some(index) = config.partition_index {
            posterior.restrict(&config.partitions[index])?;
        }

        let prototype = Proposal::new(
            config.proposal,
            posterior.parameters(),
            &config.blocked_proposal_parameters,
        )?;

        let (chains, chunks_done, iterations_done) = if resume {
            let checkpoint = storage.load_checkpoint()?.ok_or_else(|| {
                SamplerError::config("resume requested but the storage holds no checkpoint")
            })?;
            if checkpoint.dim != posterior.dim() || checkpoint.chain_count != config.chain_count {
                return Err(SamplerError::CheckpointMismatch {
                    expected: format!(
                        "{} chains over {} parameters",
                        config.chain_count,
                        posterior.dim()
                    ),
                    found: format!(
                        "{} chains over {} parameters",
                        checkpoint.chain_count, checkpoint.dim
                    ),
                });
            }
            if checkpoint.seed != config.seed {
                return Err(SamplerError::CheckpointMismatch {
                    expected: format!("seed {}", config.seed),
                    found: format!("seed {}", checkpoint.seed),
                });
            }
            let chains = checkpoint
                .chains
                .iter()
                .map(|chain| Chain::restore(chain, config.seed, prototype.clone()))
                .collect::<Result<Vec<_>, _>>()?;
            info!(
                "resuming {} chains after {} completed chunks",
                chains.len(),
                checkpoint.chunks_done
            );
            (chains, checkpoint.chunks_done, checkpoint.iterations_done)
        } else {
            let chains = (0..config.chain_count)
                .map(|id| Chain::new(id as u64, config.seed, &posterior, prototype.clone()))
                .collect::<Result<Vec<_>, _>>()?;
            (chains, 0, 0)
        };

        Ok(Sampler {
            posterior,
            config,
            chains,
            storage,
            chunks_done,
            iterations_done,
            resumed: resume,
            mode_finder: None,
        })
    }

    /// Install the optional mode-finding collaborator used by the prerun.
    pub fn with_mode_finder(mut self, finder: Box<dyn ModeFinder>) -> Self {
        self.mode_finder = Some(finder);
        self
    }

    pub fn posterior(&self) -> &Posterior<L> {
        &self.posterior
    }

    pub fn chains(&self) -> &[Chain] {
        &self.chains
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn into_storage(self) -> S {
        self.storage
    }

    /// Run the prerun (unless disabled or resumed) followed by the main
    /// sampling phase, flushing one chunk per chain at every boundary.
    pub fn run(&mut self) -> Result<RunSummary, SamplerError> {
        let prerun = if self.config.need_prerun && !self.resumed {
            Some(prerun::run(
                &mut self.chains,
                &self.posterior,
                &self.config,
                &mut self.storage,
                self.mode_finder.as_deref_mut(),
            )?)
        } else {
            None
        };

        if self.config.need_main_run {
            info!(
                "main run: {} chunks of {} steps for {} chains",
                self.config.chunk_count,
                self.config.chunk_size,
                self.chains.len()
            );
            while self.chunks_done < self.config.chunk_count {
                self.run_main_chunk()?;
            }
        }

        Ok(RunSummary {
            prerun,
            chunks_done: self.chunks_done,
            iterations_done: self.iterations_done,
            acceptance_rates: self.chains.iter().map(Chain::acceptance_rate).collect_vec(),
        })
    }

    fn run_main_chunk(&mut self) -> Result<(), SamplerError> {
        for chain in self.chains.iter_mut() {
            chain.begin_interval();
        }
        advance_chains(
            &mut self.chains,
            &self.posterior,
            self.config.chunk_size,
            self.config.parallelize,
        );

        for chain in self.chains.iter() {
            self.storage.append_chunk(&ChunkRecord::from_chain(
                chain,
                self.iterations_done,
                false,
                self.config.store_observables_and_proposals,
            ))?;
        }
        self.iterations_done += self.config.chunk_size;
        self.chunks_done += 1;

        let checkpoint = self.checkpoint();
        self.storage.write_checkpoint(&checkpoint)?;
        Ok(())
    }

    fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            seed: self.config.seed,
            dim: self.posterior.dim(),
            chain_count: self.chains.len(),
            chunks_done: self.chunks_done,
            iterations_done: self.iterations_done,
            chains: self.chains.iter().map(Chain::checkpoint).collect(),
        }
    }
}

/// Advance every chain by `steps`, in parallel when requested. All chains
/// reach the boundary before this returns; diagnostics and flushes only see
/// quiesced chains.
pub(crate) fn advance_chains<L: LogLikelihood>(
    chains: &mut [Chain],
    posterior: &Posterior<L>,
    steps: u64,
    parallelize: bool,
) {
    if parallelize {
        chains
            .par_iter_mut()
            .for_each(|chain| chain.run_chunk(posterior, steps));
    } else {
        for chain in chains.iter_mut() {
            chain.run_chunk(posterior, steps);
        }
    }
}
