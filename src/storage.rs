use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::chain::Chain;
use crate::error::SamplerError;

/// Samples of one chain over one chunk, flushed at a chunk boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub chain: u64,
    pub first_iteration: u64,
    pub burn_in: bool,
    pub samples: Vec<Vec<f64>>,
    pub log_posteriors: Vec<f64>,
    pub accepted: u64,
    pub rejected: u64,
    pub proposal_scale: Option<f64>,
    pub proposal_variances: Option<Vec<f64>>,
}

impl ChunkRecord {
    pub(crate) fn from_chain(
        chain: &Chain,
        first_iteration: u64,
        burn_in: bool,
        with_proposal: bool,
    ) -> Self {
        let accepted = chain.interval_accepted();
        let total = chain.interval_samples().len() as u64;
        ChunkRecord {
            chain: chain.id(),
            first_iteration,
            burn_in,
            samples: chain.interval_samples().to_vec(),
            log_posteriors: chain.interval_log_posteriors().to_vec(),
            accepted,
            rejected: total - accepted,
            proposal_scale: with_proposal.then(|| chain.proposal().scale()),
            proposal_variances: with_proposal.then(|| chain.proposal().variances()),
        }
    }
}

/// Adaptive proposal state persisted with every checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposalCheckpoint {
    pub block_dim: usize,
    /// Column-major block covariance.
    pub covariance: Vec<f64>,
    pub scale: f64,
    pub adaptations: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainCheckpoint {
    pub id: u64,
    pub position: Vec<f64>,
    pub log_posterior: f64,
    pub accepted: u64,
    pub rejected: u64,
    pub rng_word_pos: u128,
    pub proposal: ProposalCheckpoint,
}

/// Snapshot of the whole ensemble at a chunk boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub seed: u64,
    pub dim: usize,
    pub chain_count: usize,
    pub chunks_done: u64,
    pub iterations_done: u64,
    pub chains: Vec<ChainCheckpoint>,
}

/// The persistence collaborator: an append-only chunked writer plus the
/// checkpoint needed for resume. The long-term container format behind an
/// implementation is opaque to the sampler.
pub trait ChunkStorage: Send {
    fn append_chunk(&mut self, chunk: &ChunkRecord) -> Result<(), SamplerError>;
    fn write_checkpoint(&mut self, checkpoint: &Checkpoint) -> Result<(), SamplerError>;
    fn load_checkpoint(&self) -> Result<Option<Checkpoint>, SamplerError>;
}

/// In-memory storage for tests and callers that post-process directly.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    chunks: Vec<ChunkRecord>,
    checkpoint: Option<Checkpoint>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chunks(&self) -> &[ChunkRecord] {
        &self.chunks
    }

    pub fn last_checkpoint(&self) -> Option<&Checkpoint> {
        self.checkpoint.as_ref()
    }
}

impl ChunkStorage for MemoryStorage {
    fn append_chunk(&mut self, chunk: &ChunkRecord) -> Result<(), SamplerError> {
        self.chunks.push(chunk.clone());
        Ok(())
    }

    fn write_checkpoint(&mut self, checkpoint: &Checkpoint) -> Result<(), SamplerError> {
        self.checkpoint = Some(checkpoint.clone());
        Ok(())
    }

    fn load_checkpoint(&self) -> Result<Option<Checkpoint>, SamplerError> {
        Ok(self.checkpoint.clone())
    }
}

/// File-backed storage: one JSON line per chunk appended to `chunks.jsonl`,
/// the checkpoint in a sidecar replaced atomically via a temporary file, so
/// an interrupted write never corrupts completed chunks.
#[derive(Debug)]
pub struct JsonFileStorage {
    chunk_path: PathBuf,
    checkpoint_path: PathBuf,
}

impl JsonFileStorage {
    pub fn new(directory: impl AsRef<Path>) -> Result<Self, SamplerError> {
        let directory = directory.as_ref();
        std::fs::create_dir_all(directory)?;
        Ok(JsonFileStorage {
            chunk_path: directory.join("chunks.jsonl"),
            checkpoint_path: directory.join("checkpoint.json"),
        })
    }

    /// Read back every chunk appended so far.
    ///
    /// A final line torn by an interrupted write is dropped; the completed
    /// chunks before it stay intact. A malformed line anywhere else is real
    /// corruption and reported as an error.
    pub fn read_chunks(&self) -> Result<Vec<ChunkRecord>, SamplerError> {
        if !self.chunk_path.exists() {
            return Ok(Vec::new());
        }
        let reader = BufReader::new(File::open(&self.chunk_path)?);
        let lines: Vec<String> = reader.lines().collect::<Result<_, _>>()?;
        let mut chunks = Vec::new();
        let last = lines.iter().rposition(|line| !line.is_empty());
        for (index, line) in lines.iter().enumerate() {
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(chunk) => chunks.push(chunk),
                Err(err) if Some(index) == last => {
                    log::warn!("dropping torn trailing chunk record: {err}");
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(chunks)
    }
}

impl ChunkStorage for JsonFileStorage {
    fn append_chunk(&mut self, chunk: &ChunkRecord) -> Result<(), SamplerError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.chunk_path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, chunk)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }

    fn write_checkpoint(&mut self, checkpoint: &Checkpoint) -> Result<(), SamplerError> {
        let tmp_path = self.checkpoint_path.with_extension("json.tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp_path)?);
            serde_json::to_writer(&mut writer, checkpoint)?;
            writer.flush()?;
        }
        std::fs::rename(&tmp_path, &self.checkpoint_path)?;
        Ok(())
    }

    fn load_checkpoint(&self) -> Result<Option<Checkpoint>, SamplerError> {
        if !self.checkpoint_path.exists() {
            return Ok(None);
        }
        let reader = BufReader::new(File::open(&self.checkpoint_path)?);
        Ok(Some(serde_json::from_reader(reader)?))
    }
}
