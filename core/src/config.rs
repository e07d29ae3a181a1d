use crate::error::{Result, RetrievalError};
use serde::{Deserialize, Serialize};

/// Standard RRF constant from Cormack, Clarke and Buettcher (SIGIR 2009).
pub const RRF_K: i64 = 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Window length `L` of the bare-token N-gram paths.
    pub path_length: usize,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self { path_length: 2 }
    }
}

impl BuildConfig {
    pub fn validate(&self) -> Result<()> {
        if self.path_length == 0 {
            return Err(invalid("path_length must be at least 1"));
        }
        Ok(())
    }
}

/// Which pipeline stages run. Disabling a stage replaces its output with an
/// empty result; it never changes the order of the remaining stages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageToggles {
    pub recall: bool,
    pub structural: bool,
    pub semantic: bool,
    pub filter: bool,
}

impl Default for StageToggles {
    fn default() -> Self {
        Self { recall: true, structural: true, semantic: true, filter: false }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecallConfig {
    /// Fuzzy lookup runs when exact recall yields fewer candidates than this.
    pub floor: usize,
    pub max_candidates: usize,
    pub max_hamming_distance: u32,
    pub max_buckets_scanned: usize,
    /// Substitute a seeded sample of this many ids when recall is empty.
    /// `None` reports an explicit no-match instead.
    pub random_fallback: Option<usize>,
}

impl Default for RecallConfig {
    fn default() -> Self {
        Self {
            floor: 10,
            max_candidates: 2000,
            max_hamming_distance: 2,
            max_buckets_scanned: 10_000,
            random_fallback: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionWeights {
    pub semantic: f64,
    pub structural: f64,
    pub recall: f64,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self { semantic: 1.0, structural: 0.3, recall: 0.3 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    pub k: i64,
    pub weights: FusionWeights,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self { k: RRF_K, weights: FusionWeights::default() }
    }
}

impl FusionConfig {
    /// RRF constant as used by [`crate::fusion::fuse`]. Call after `validate`.
    pub fn rrf_k(&self) -> u32 {
        self.k.clamp(0, i64::from(u32::MAX)) as u32
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Base similarity threshold in [0, 1].
    pub threshold: f64,
    /// Raise the threshold for simple queries, see [`crate::filter::query_complexity`].
    pub adaptive: bool,
    /// When the filter would drop more than this fraction, it is bypassed.
    pub max_drop_fraction: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self { threshold: 0.65, adaptive: true, max_drop_fraction: 0.95 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub stages: StageToggles,
    pub recall: RecallConfig,
    pub structural_top_k: usize,
    pub semantic_top_k: usize,
    pub final_k: usize,
    pub fusion: FusionConfig,
    pub filter: FilterConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stages: StageToggles::default(),
            recall: RecallConfig::default(),
            structural_top_k: 1000,
            semantic_top_k: 1000,
            final_k: 1000,
            fusion: FusionConfig::default(),
            filter: FilterConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        let s = &self.stages;
        if !(s.recall || s.structural || s.semantic) {
            return Err(invalid("at least one of recall, structural or semantic must be enabled"));
        }
        for (name, v) in [
            ("structural_top_k", self.structural_top_k),
            ("semantic_top_k", self.semantic_top_k),
            ("final_k", self.final_k),
            ("recall.max_candidates", self.recall.max_candidates),
            ("recall.max_buckets_scanned", self.recall.max_buckets_scanned),
        ] {
            if v == 0 {
                return Err(invalid(format!("{name} must be greater than 0")));
            }
        }
        if self.recall.random_fallback == Some(0) {
            return Err(invalid("recall.random_fallback must be greater than 0 when set"));
        }
        if self.fusion.k < 0 {
            return Err(invalid(format!("fusion.k must be non-negative, got {}", self.fusion.k)));
        }
        let w = &self.fusion.weights;
        let enabled = [(s.semantic, "semantic", w.semantic), (s.structural, "structural", w.structural), (s.recall, "recall", w.recall)];
        for (_, name, weight) in enabled {
            if !weight.is_finite() || weight < 0.0 {
                return Err(invalid(format!("fusion weight {name} must be a finite non-negative number, got {weight}")));
            }
        }
        if enabled.iter().all(|(on, _, weight)| !*on || *weight == 0.0) {
            return Err(invalid("every enabled fusion stream has weight 0"));
        }
        let f = &self.filter;
        if !(0.0..=1.0).contains(&f.threshold) {
            return Err(invalid(format!("filter.threshold must be in [0, 1], got {}", f.threshold)));
        }
        if !(0.0..=1.0).contains(&f.max_drop_fraction) {
            return Err(invalid(format!("filter.max_drop_fraction must be in [0, 1], got {}", f.max_drop_fraction)));
        }
        Ok(())
    }
}

fn invalid(msg: impl Into<String>) -> RetrievalError {
    RetrievalError::ConfigInvalid(msg.into())
}
