use crate::config::PipelineConfig;
use crate::error::{Result, RetrievalError};
use crate::external::{ConfidenceFilter, SemanticRanker};
use crate::filter::apply_filter;
use crate::fusion::{fuse, StreamKind, WeightedStream};
use crate::hash::{hash_of, skeleton_hash_of};
use crate::hash_index::{Recall, RecallQuery, RecallSource};
use crate::normalize::{normalize, Normalized};
use crate::ranked::RankedList;
use crate::snapshot::IndexSnapshot;
use crate::tokenizer::tokenize;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FormulaQuery {
    pub latex: String,
    /// Skeleton of the query formula, hashed into the skeleton family.
    #[serde(default)]
    pub skeleton: Option<String>,
    /// A semantic ranking computed by the caller. Takes precedence over the
    /// pipeline's own [`SemanticRanker`].
    #[serde(default)]
    pub semantic: Option<RankedList>,
}

impl FormulaQuery {
    pub fn new(latex: impl Into<String>) -> Self {
        Self { latex: latex.into(), ..Self::default() }
    }

    pub fn with_skeleton(mut self, skeleton: impl Into<String>) -> Self {
        self.skeleton = Some(skeleton.into());
        self
    }

    pub fn with_semantic(mut self, ranking: RankedList) -> Self {
        self.semantic = Some(ranking);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Recall,
    StructuralScore,
    Fuse,
    Filter,
    Done,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "note", rename_all = "snake_case")]
pub enum StageNote {
    ParseDegenerate,
    IndexMiss,
    /// Exact recall was below the floor and fuzzy buckets contributed.
    FuzzyRecall { fuzzy: usize },
    /// Recall substituted a random sample; those ids are not relevance evidence.
    RandomSampleSubstituted { count: usize },
    EmptyStage { stage: Stage },
    Disabled { stage: Stage },
    /// Semantic fusion is on but neither the query nor the pipeline supplied a ranking.
    SemanticUnavailable,
    /// Fusion produced nothing; the named stream was returned as is.
    FusionFallback { stream: StreamKind },
    FilterBypassed { kept: usize, total: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineOutcome {
    pub results: RankedList,
    pub canonical: String,
    pub recall: Recall,
    pub structural: RankedList,
    pub semantic: RankedList,
    /// Stages in the order they ran, ending with [`Stage::Done`].
    pub visited: Vec<Stage>,
    pub notes: Vec<StageNote>,
}

pub struct RetrievalPipeline {
    snapshot: Arc<IndexSnapshot>,
    config: PipelineConfig,
    semantic: Option<Arc<dyn SemanticRanker>>,
    filter: Option<Arc<dyn ConfidenceFilter>>,
}

pub struct PipelineBuilder {
    snapshot: Arc<IndexSnapshot>,
    config: PipelineConfig,
    semantic: Option<Arc<dyn SemanticRanker>>,
    filter: Option<Arc<dyn ConfidenceFilter>>,
}

impl PipelineBuilder {
    pub fn semantic(mut self, ranker: Arc<dyn SemanticRanker>) -> Self {
        self.semantic = Some(ranker);
        self
    }

    pub fn filter(mut self, filter: Arc<dyn ConfidenceFilter>) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn build(self) -> Result<RetrievalPipeline> {
        self.config.validate()?;
        if self.config.stages.filter && self.filter.is_none() {
            return Err(RetrievalError::ConfigInvalid(
                "the filter stage is enabled but no confidence filter was supplied".to_string(),
            ));
        }
        Ok(RetrievalPipeline {
            snapshot: self.snapshot,
            config: self.config,
            semantic: self.semantic,
            filter: self.filter,
        })
    }
}

impl RetrievalPipeline {
    pub fn builder(snapshot: Arc<IndexSnapshot>, config: PipelineConfig) -> PipelineBuilder {
        PipelineBuilder { snapshot, config, semantic: None, filter: None }
    }

    pub fn new(snapshot: Arc<IndexSnapshot>, config: PipelineConfig) -> Result<Self> {
        Self::builder(snapshot, config).build()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn snapshot(&self) -> &Arc<IndexSnapshot> {
        &self.snapshot
    }

    pub fn search(&self, query: &FormulaQuery) -> PipelineOutcome {
        let Normalized { canonical, .. } = normalize(&query.latex);
        let mut notes = Vec::new();
        let degenerate = tokenize(&canonical).is_empty();
        if degenerate {
            debug!(latex = %query.latex, "degenerate query");
            notes.push(StageNote::ParseDegenerate);
        }

        let recall_query = RecallQuery {
            latex_hash: (!canonical.is_empty()).then(|| hash_of(&canonical)),
            skeleton_hash: query
                .skeleton
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(skeleton_hash_of),
        };

        let ((recall, structural), semantic) = rayon::join(
            || rayon::join(|| self.run_recall(&recall_query), || self.run_structural(&canonical)),
            || self.run_semantic(query),
        );

        let stages = &self.config.stages;
        let mut visited = Vec::with_capacity(5);

        let recall = match recall {
            Some(r) => {
                visited.push(Stage::Recall);
                note_recall(&r, &mut notes);
                r
            }
            None => {
                notes.push(StageNote::Disabled { stage: Stage::Recall });
                Recall::NoMatch
            }
        };
        let structural = match structural {
            Some(list) => {
                visited.push(Stage::StructuralScore);
                if list.is_empty() && !degenerate {
                    notes.push(StageNote::EmptyStage { stage: Stage::StructuralScore });
                }
                list
            }
            None => {
                notes.push(StageNote::Disabled { stage: Stage::StructuralScore });
                RankedList::new()
            }
        };
        let semantic = match semantic {
            Some(list) => list,
            None => {
                if stages.semantic {
                    notes.push(StageNote::SemanticUnavailable);
                }
                RankedList::new()
            }
        };

        let recall_list = recall.to_ranked_list();
        let weights = &self.config.fusion.weights;
        let mut streams = Vec::with_capacity(3);
        if stages.semantic {
            streams.push(WeightedStream::new(StreamKind::Semantic, &semantic, weights.semantic));
        }
        if stages.structural {
            streams.push(WeightedStream::new(StreamKind::Structural, &structural, weights.structural));
        }
        if stages.recall {
            streams.push(WeightedStream::new(StreamKind::Recall, &recall_list, weights.recall));
        }
        visited.push(Stage::Fuse);
        let mut results = fuse(&streams, self.config.fusion.rrf_k(), usize::MAX);
        debug!(
            recall = recall_list.len(),
            structural = structural.len(),
            semantic = semantic.len(),
            fused = results.len(),
            "fused streams"
        );

        if results.is_empty() {
            let fallback = [
                (StreamKind::Recall, &recall_list),
                (StreamKind::Structural, &structural),
                (StreamKind::Semantic, &semantic),
            ]
            .into_iter()
            .find(|(_, list)| !list.is_empty());
            match fallback {
                Some((stream, list)) => {
                    warn!(?stream, "fusion produced no candidates, falling back");
                    notes.push(StageNote::FusionFallback { stream });
                    results = list.clone();
                }
                None => notes.push(StageNote::EmptyStage { stage: Stage::Fuse }),
            }
        }

        match (&self.filter, stages.filter) {
            (Some(filter), true) => {
                visited.push(Stage::Filter);
                let snapshot = &self.snapshot;
                let outcome = apply_filter(&query.latex, results, filter.as_ref(), &self.config.filter, |id| {
                    snapshot.record(id).map(|r| r.raw_latex.as_str())
                });
                if outcome.bypassed {
                    notes.push(StageNote::FilterBypassed { kept: outcome.kept, total: outcome.list.len() });
                }
                results = outcome.list;
            }
            _ => notes.push(StageNote::Disabled { stage: Stage::Filter }),
        }

        results.truncate(self.config.final_k);
        visited.push(Stage::Done);
        debug!(results = results.len(), notes = notes.len(), "query done");
        PipelineOutcome { results, canonical, recall, structural, semantic, visited, notes }
    }

    fn run_recall(&self, query: &RecallQuery) -> Option<Recall> {
        if !self.config.stages.recall {
            return None;
        }
        Some(self.snapshot.hash_index().recall(query, &self.config.recall))
    }

    fn run_structural(&self, canonical: &str) -> Option<RankedList> {
        if !self.config.stages.structural {
            return None;
        }
        Some(self.snapshot.path_index().search(canonical, self.config.structural_top_k))
    }

    fn run_semantic(&self, query: &FormulaQuery) -> Option<RankedList> {
        if !self.config.stages.semantic {
            return None;
        }
        let k = self.config.semantic_top_k;
        if let Some(list) = &query.semantic {
            let mut list = list.clone();
            list.truncate(k);
            return Some(list);
        }
        self.semantic.as_ref().map(|ranker| ranker.rank(&query.latex, k))
    }
}

fn note_recall(recall: &Recall, notes: &mut Vec<StageNote>) {
    if recall.is_no_match() {
        notes.push(StageNote::IndexMiss);
        return;
    }
    if recall.is_random_sample() {
        notes.push(StageNote::RandomSampleSubstituted { count: recall.hits().len() });
        return;
    }
    let fuzzy = recall.hits().iter().filter(|h| matches!(h.source, RecallSource::Fuzzy { .. })).count();
    if fuzzy > 0 {
        notes.push(StageNote::FuzzyRecall { fuzzy });
    }
}
