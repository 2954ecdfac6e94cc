use approx::assert_abs_diff_eq;
use rwm_rs::{
    Config, JsonFileStorage, LogLikelihood, MemoryStorage, ParameterDescription, ParameterRange,
    Posterior, Prior, Sampler,
};

struct NormalLogp {
    mu: f64,
    sigma: f64,
}

impl LogLikelihood for NormalLogp {
    fn dim(&self) -> usize {
        1
    }

    fn evaluate(&self, position: &[f64]) -> f64 {
        let z = (position[0] - self.mu) / self.sigma;
        -0.5 * z * z
    }
}

fn posterior() -> Posterior<NormalLogp> {
    Posterior::new(
        NormalLogp {
            mu: 1.0,
            sigma: 0.5,
        },
        vec![ParameterDescription::scan(
            "mu",
            ParameterRange::new(-10.0, 10.0).unwrap(),
            Prior::flat(),
        )],
    )
    .unwrap()
}

#[test]
fn recovers_the_analytic_posterior_moments() -> Result<(), rwm_rs::SamplerError> {
    let config = Config {
        chain_count: 4,
        chunk_size: 500,
        chunk_count: 10,
        need_prerun: true,
        prerun_iterations_min: 500,
        prerun_iterations_max: 4000,
        prerun_iterations_update: 250,
        scale_reduction: 1.2,
        seed: 42,
        ..Config::default()
    };
    let mut sampler = Sampler::new(posterior(), config, MemoryStorage::new())?;
    let summary = sampler.run()?;

    assert_eq!(summary.chunks_done, 10);
    let prerun = summary.prerun.expect("prerun was enabled");
    assert!(prerun.iterations >= 500);
    assert!(summary
        .acceptance_rates
        .iter()
        .all(|rate| (0.0..=1.0).contains(rate)));

    let storage = sampler.into_storage();
    let mut count = 0usize;
    let mut mean = 0.0;
    for chunk in storage.chunks() {
        for sample in &chunk.samples {
            mean += sample[0];
            count += 1;
        }
    }
    mean /= count as f64;
    let mut variance = 0.0;
    for chunk in storage.chunks() {
        for sample in &chunk.samples {
            variance += (sample[0] - mean).powi(2);
        }
    }
    variance /= (count - 1) as f64;

    assert_eq!(count, 4 * 10 * 500);
    // flat prior on a wide range: posterior is N(1.0, 0.5^2)
    assert_abs_diff_eq!(mean, 1.0, epsilon = 0.1);
    assert_abs_diff_eq!(variance, 0.25, epsilon = 0.08);
    Ok(())
}

#[test]
fn file_backed_run_resumes_from_its_checkpoint() -> Result<(), rwm_rs::SamplerError> {
    let dir = std::env::temp_dir().join(format!("rwm-rs-resume-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);

    let config = Config {
        chain_count: 2,
        chunk_size: 200,
        chunk_count: 4,
        need_prerun: false,
        parallelize: false,
        seed: 7,
        ..Config::default()
    };

    // uninterrupted reference run
    let mut reference = Sampler::new(posterior(), config.clone(), MemoryStorage::new())?;
    reference.run()?;
    let reference_chunks = reference.into_storage().chunks().to_vec();

    // interrupted run: two chunks, then resume from the checkpoint on disk
    let mut first = Sampler::new(
        posterior(),
        Config {
            chunk_count: 2,
            ..config.clone()
        },
        JsonFileStorage::new(&dir)?,
    )?;
    first.run()?;

    let mut resumed = Sampler::resume(posterior(), config, JsonFileStorage::new(&dir)?)?;
    let summary = resumed.run()?;
    assert!(summary.prerun.is_none());
    assert_eq!(summary.chunks_done, 4);

    let chunks = resumed.into_storage().read_chunks()?;
    assert_eq!(chunks, reference_chunks);

    std::fs::remove_dir_all(&dir).ok();
    Ok(())
}
