use itertools::izip;
use nalgebra::DMatrix;

/// Running estimate of mean and variance using Welford's algorithm.
#[derive(Debug, Clone, Default)]
pub(crate) struct RunningVariance {
    mean: f64,
    m2: f64,
    count: u64,
}

impl RunningVariance {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add_sample(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    pub(crate) fn mean(&self) -> f64 {
        self.mean
    }

    /// Sample variance (n - 1 denominator). Zero until two samples were seen.
    pub(crate) fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }
}

/// Empirical covariance of the listed coordinates over a set of samples,
/// with the usual n - 1 denominator.
///
/// The caller must supply at least two samples.
pub(crate) fn empirical_covariance(samples: &[Vec<f64>], coords: &[usize]) -> DMatrix<f64> {
    let n = samples.len();
    let d = coords.len();
    assert!(n >= 2);

    let mut means = vec![0.0; d];
    for sample in samples {
        for (m, &c) in izip!(means.iter_mut(), coords) {
            *m += sample[c];
        }
    }
    for m in means.iter_mut() {
        *m /= n as f64;
    }

    let mut cov = DMatrix::zeros(d, d);
    for sample in samples {
        for a in 0..d {
            let da = sample[coords[a]] - means[a];
            for b in a..d {
                let db = sample[coords[b]] - means[b];
                cov[(a, b)] += da * db;
            }
        }
    }
    let norm = (n - 1) as f64;
    for a in 0..d {
        for b in a..d {
            let value = cov[(a, b)] / norm;
            cov[(a, b)] = value;
            cov[(b, a)] = value;
        }
    }
    cov
}
