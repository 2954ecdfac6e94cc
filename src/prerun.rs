use log::{info, warn};

use crate::chain::Chain;
use crate::convergence::{diagnose, ConvergenceReport};
use crate::error::SamplerError;
use crate::posterior::{LogLikelihood, ParameterRange, Posterior};
use crate::sampler::{advance_chains, Config, ModeFinder};
use crate::storage::{ChunkRecord, ChunkStorage};

/// What the burn-in phase ended with. Non-convergence is not an error; the
/// main run proceeds regardless.
#[derive(Debug, Clone)]
pub struct PrerunOutcome {
    pub converged: bool,
    pub iterations: u64,
    pub report: ConvergenceReport,
}

/// Drive the burn-in: run all chains in lockstep for one update interval,
/// adapt every proposal at the barrier, diagnose convergence, repeat.
///
/// Runs at least `prerun_iterations_min` steps, stops early once converged
/// after the minimum, and stops unconditionally at `prerun_iterations_max`.
pub(crate) fn run<L, S>(
    chains: &mut [Chain],
    posterior: &Posterior<L>,
    config: &Config,
    storage: &mut S,
    mut mode_finder: Option<&mut (dyn ModeFinder + 'static)>,
) -> Result<PrerunOutcome, SamplerError>
where
    L: LogLikelihood,
    S: ChunkStorage,
{
    if config.find_modes {
        if let Some(finder) = mode_finder.as_deref_mut() {
            seed_from_modes(chains, posterior, finder);
        }
    }

    let tracked: Vec<usize> = posterior
        .parameters()
        .iter()
        .enumerate()
        .filter(|(_, p)| !p.prior.is_discrete())
        .map(|(index, _)| index)
        .collect();

    let mut iterations = 0u64;
    let mut report = diagnose(chains, &tracked, config.scale_reduction);
    let mut converged = false;

    while iterations < config.prerun_iterations_max {
        let steps = config
            .prerun_iterations_update
            .min(config.prerun_iterations_max - iterations);
        for chain in chains.iter_mut() {
            chain.begin_interval();
        }
        advance_chains(chains, posterior, steps, config.parallelize);
        iterations += steps;

        if config.store_prerun {
            for chain in chains.iter() {
                storage.append_chunk(&ChunkRecord::from_chain(
                    chain,
                    iterations - steps,
                    true,
                    config.store_observables_and_proposals,
                ))?;
            }
        }

        for chain in chains.iter_mut() {
            chain.adapt_proposal();
        }
        report = diagnose(chains, &tracked, config.scale_reduction);
        converged = report.converged;
        if converged && iterations >= config.prerun_iterations_min {
            info!("prerun converged after {iterations} iterations");
            break;
        }
    }

    if !converged {
        warn!(
            "prerun did not converge within {iterations} iterations; \
             continuing with the main run anyway"
        );
    }

    Ok(PrerunOutcome {
        converged,
        iterations,
        report,
    })
}

/// Replace each chain's prior-drawn starting point with a mode-finder result.
/// Failures keep the prior draw; mode finding never aborts the prerun.
fn seed_from_modes<L: LogLikelihood>(
    chains: &mut [Chain],
    posterior: &Posterior<L>,
    finder: &mut dyn ModeFinder,
) {
    let ranges: Vec<ParameterRange> = posterior.parameters().iter().map(|p| p.range).collect();
    let evaluate = |position: &[f64]| posterior.evaluate(position);
    for chain in chains.iter_mut() {
        let start = chain.position().to_vec();
        match finder.refine(&evaluate, &start, &ranges) {
            Ok(mode) => {
                if let Err(err) = chain.set_position(posterior, &mode) {
                    warn!(
                        "chain {}: mode finding returned an unusable point: {err}",
                        chain.id()
                    );
                }
            }
            Err(err) => warn!("chain {}: mode finding failed: {err}", chain.id()),
        }
    }
}
