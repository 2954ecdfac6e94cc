pub(crate) mod chain;
pub(crate) mod convergence;
pub(crate) mod error;
pub(crate) mod math;
pub(crate) mod posterior;
pub(crate) mod prerun;
pub(crate) mod prior;
pub(crate) mod proposal;
pub(crate) mod sampler;
pub(crate) mod storage;

pub use chain::Chain;
pub use convergence::{scale_reduction, ConvergenceReport};
pub use error::SamplerError;
pub use posterior::{LogLikelihood, ParameterDescription, ParameterRange, Posterior};
pub use prerun::PrerunOutcome;
pub use prior::Prior;
pub use proposal::{Proposal, ProposalOptions};
pub use sampler::{Config, ModeFinder, Partition, RunSummary, Sampler};
pub use storage::{
    ChainCheckpoint, Checkpoint, ChunkRecord, ChunkStorage, JsonFileStorage, MemoryStorage,
    ProposalCheckpoint,
};
