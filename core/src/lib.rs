//! Structural retrieval core for LaTeX formulas.

use serde::{Deserialize, Serialize};

pub mod config;
pub mod error;
pub mod external;
pub mod filter;
pub mod fusion;
pub mod hash;
pub mod hash_index;
pub mod normalize;
pub mod path_index;
pub mod persist;
pub mod pipeline;
pub mod ranked;
pub mod snapshot;
pub mod tokenizer;

pub use config::{BuildConfig, FilterConfig, FusionConfig, PipelineConfig, RecallConfig};
pub use error::{Result, RetrievalError};
pub use hash::StructuralHash;
pub use hash_index::{HashFamily, HashIndex, Recall, RecallHit, RecallSource};
pub use normalize::{normalize, Normalized};
pub use path_index::{PathIndex, PathIndexBuilder};
pub use pipeline::{FormulaQuery, PipelineOutcome, RetrievalPipeline, Stage, StageNote};
pub use ranked::{Hit, RankedList};
pub use snapshot::IndexSnapshot;

/// Stable formula identifier assigned upstream (the visual id).
pub type FormulaId = String;

/// One deduplicated formula of the corpus.
///
/// Records are produced once at ingestion time and never mutated by the
/// query path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormulaRecord {
    pub id: FormulaId,
    pub raw_latex: String,
    pub normalized_latex: String,
    pub structural_hash: StructuralHash,
    /// Hash of an independently computed operator-tree skeleton, if one was supplied.
    pub skeleton_hash: Option<StructuralHash>,
}

impl FormulaRecord {
    /// Normalizes and hashes `raw_latex`. Returns the record together with the
    /// normalizer's `was_modified` flag for ingestion telemetry.
    pub fn from_raw(id: impl Into<FormulaId>, raw_latex: &str, skeleton: Option<&str>) -> (Self, bool) {
        let Normalized { canonical, was_modified } = normalize(raw_latex);
        let structural_hash = hash::hash_of(&canonical);
        let skeleton_hash = skeleton
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(hash::skeleton_hash_of);
        let record = Self {
            id: id.into(),
            raw_latex: raw_latex.to_string(),
            normalized_latex: canonical,
            structural_hash,
            skeleton_hash,
        };
        (record, was_modified)
    }
}
