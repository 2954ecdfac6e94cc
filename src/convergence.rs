use crate::chain::Chain;
use crate::math::RunningVariance;

/// Potential scale reduction of one scalar across a chain ensemble.
///
/// Uses the `n` most recent samples of every chain, where `n` is the shortest
/// series length. Returns `None` when the statistic is undefined: fewer than
/// two chains, or fewer than two samples per chain.
pub fn scale_reduction(chains: &[&[f64]]) -> Option<f64> {
    let m = chains.len();
    if m < 2 {
        return None;
    }
    let n = chains.iter().map(|series| series.len()).min()?;
    if n < 2 {
        return None;
    }

    let mut chain_means = RunningVariance::new();
    let mut within_sum = 0.0;
    for series in chains {
        let recent = &series[series.len() - n..];
        let mut acc = RunningVariance::new();
        for &value in recent {
            acc.add_sample(value);
        }
        within_sum += acc.variance();
        chain_means.add_sample(acc.mean());
    }

    let within = within_sum / m as f64;
    let between_over_n = chain_means.variance();
    if within <= 0.0 {
        // all chains frozen: identical means count as converged, separated
        // means as maximally unconverged
        return Some(if between_over_n <= 0.0 {
            1.0
        } else {
            f64::INFINITY
        });
    }

    let n = n as f64;
    Some((((n - 1.0) / n * within + between_over_n) / within).sqrt())
}

/// Scale-reduction values of every tracked parameter, plus the overall
/// verdict for the ensemble.
#[derive(Debug, Clone)]
pub struct ConvergenceReport {
    /// `(parameter index, R)` pairs; `None` where the statistic is undefined.
    pub scale_reductions: Vec<(usize, Option<f64>)>,
    pub converged: bool,
}

/// Diagnose convergence of the ensemble from the chains' current interval
/// samples. More than one chain is required to ever declare convergence.
pub(crate) fn diagnose(chains: &[Chain], tracked: &[usize], threshold: f64) -> ConvergenceReport {
    if chains.len() < 2 {
        return ConvergenceReport {
            scale_reductions: tracked.iter().map(|&p| (p, None)).collect(),
            converged: false,
        };
    }

    let mut converged = true;
    let mut scale_reductions = Vec::with_capacity(tracked.len());
    for &parameter in tracked {
        let series: Vec<Vec<f64>> = chains
            .iter()
            .map(|chain| {
                chain
                    .interval_samples()
                    .iter()
                    .map(|sample| sample[parameter])
                    .collect()
            })
            .collect();
        let slices: Vec<&[f64]> = series.iter().map(|s| s.as_slice()).collect();
        let statistic = scale_reduction(&slices);
        converged &= matches!(statistic, Some(r) if r < threshold);
        scale_reductions.push((parameter, statistic));
    }

    ConvergenceReport {
        scale_reductions,
        converged,
    }
}
