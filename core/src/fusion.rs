// Weighted Reciprocal Rank Fusion (RRF)

use crate::ranked::RankedList;
use crate::FormulaId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub use crate::config::RRF_K;

/// Origin of a fused stream, used for logging and per-stream weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    Semantic,
    Structural,
    Recall,
}

/// One ranked list entering fusion together with its weight.
#[derive(Debug, Clone, Copy)]
pub struct WeightedStream<'a> {
    pub kind: StreamKind,
    pub list: &'a RankedList,
    pub weight: f64,
}

impl<'a> WeightedStream<'a> {
    pub fn new(kind: StreamKind, list: &'a RankedList, weight: f64) -> Self {
        Self { kind, list, weight }
    }
}

/// Combine ranked lists using weighted RRF
///
/// RRF Formula: score(d) = sum_{s} w_s / (k + rank_s(d))
///
/// Where:
/// - rank_s(d) is the 1-indexed position of d in stream s; raw scores are ignored
/// - w_s is the stream weight; streams with weight 0 are skipped entirely
/// - k is the smoothing constant (typically 60)
///
/// The result is sorted by fused score descending, ties by id ascending, and
/// truncated to `top_n`.
pub fn fuse(streams: &[WeightedStream<'_>], k: u32, top_n: usize) -> RankedList {
    let mut acc = FusionAccumulator::new(k);
    for stream in streams {
        acc.add(stream.list, stream.weight);
    }
    acc.finish(top_n)
}

/// Shared score map for incremental fusion.
#[derive(Debug, Clone)]
pub struct FusionAccumulator {
    k: f64,
    scores: HashMap<FormulaId, f64>,
}

impl FusionAccumulator {
    pub fn new(k: u32) -> Self {
        Self { k: f64::from(k), scores: HashMap::new() }
    }

    pub fn add(&mut self, list: &RankedList, weight: f64) {
        if weight == 0.0 {
            return;
        }
        for (rank, hit) in list.iter().enumerate() {
            let rank_position = (rank + 1) as f64; // 1-indexed
            *self.scores.entry(hit.id.clone()).or_insert(0.0) += weight / (self.k + rank_position);
        }
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    pub fn finish(self, top_n: usize) -> RankedList {
        RankedList::from_scores(self.scores, top_n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(ids: &[&str]) -> RankedList {
        RankedList::from_ordered(ids.iter().enumerate().map(|(i, id)| (id.to_string(), 1.0 / (i + 1) as f64)))
    }

    fn score(fused: &RankedList, id: &str) -> f64 {
        fused.iter().find(|h| h.id == id).map(|h| h.score).unwrap_or(0.0)
    }

    #[test]
    fn test_equal_weights_match_classical_rrf() {
        let a = list(&["1", "2", "3"]);
        let b = list(&["3", "1", "4"]);
        let streams = [
            WeightedStream::new(StreamKind::Semantic, &a, 1.0),
            WeightedStream::new(StreamKind::Structural, &b, 1.0),
        ];
        let fused = fuse(&streams, 60, 10);
        let expected = [("1", 1.0 / 61.0 + 1.0 / 62.0), ("3", 1.0 / 63.0 + 1.0 / 61.0), ("2", 1.0 / 62.0), ("4", 1.0 / 63.0)];
        assert_eq!(fused.len(), 4);
        for (id, s) in expected {
            assert!((score(&fused, id) - s).abs() < 1e-12, "id {id}");
        }
        let ids: Vec<&str> = fused.ids().collect();
        assert_eq!(ids, vec!["1", "3", "2", "4"]);
    }

    #[test]
    fn test_weights_scale_contributions() {
        let semantic = list(&["s"]);
        let structural = list(&["t"]);
        let fused = fuse(
            &[
                WeightedStream::new(StreamKind::Semantic, &semantic, 1.0),
                WeightedStream::new(StreamKind::Structural, &structural, 0.3),
            ],
            60,
            10,
        );
        assert_eq!(fused.rank_of("s"), Some(1));
        assert!((score(&fused, "t") - 0.3 / 61.0).abs() < 1e-12);
    }

    #[test]
    fn test_improving_rank_never_lowers_score() {
        let fixed = list(&["x", "d", "y"]);
        let mut previous = f64::NEG_INFINITY;
        // d moves from rank 4 up to rank 1 in the second stream
        for order in [["a", "b", "c", "d"], ["a", "b", "d", "c"], ["a", "d", "b", "c"], ["d", "a", "b", "c"]] {
            let moving = list(&order);
            let fused = fuse(
                &[
                    WeightedStream::new(StreamKind::Semantic, &fixed, 1.0),
                    WeightedStream::new(StreamKind::Structural, &moving, 0.3),
                ],
                60,
                10,
            );
            let s = score(&fused, "d");
            assert!(s >= previous);
            previous = s;
        }
    }

    #[test]
    fn test_single_stream_ids_are_ranked() {
        let a = list(&["1", "2"]);
        let b = list(&["3"]);
        let fused = fuse(
            &[WeightedStream::new(StreamKind::Semantic, &a, 1.0), WeightedStream::new(StreamKind::Recall, &b, 0.3)],
            60,
            10,
        );
        assert_eq!(fused.len(), 3);
        assert!(fused.rank_of("3").is_some());
    }

    #[test]
    fn test_empty_and_zero_weight_streams() {
        let empty = RankedList::new();
        assert!(fuse(&[], RRF_K as u32, 10).is_empty());
        assert!(fuse(&[WeightedStream::new(StreamKind::Semantic, &empty, 1.0)], 60, 10).is_empty());

        let a = list(&["1"]);
        let fused = fuse(&[WeightedStream::new(StreamKind::Structural, &a, 0.0)], 60, 10);
        assert!(fused.is_empty());
    }

    #[test]
    fn test_ties_and_truncation() {
        let a = list(&["b", "a"]);
        let b = list(&["a", "b"]);
        let fused = fuse(
            &[WeightedStream::new(StreamKind::Semantic, &a, 1.0), WeightedStream::new(StreamKind::Structural, &b, 1.0)],
            0,
            1,
        );
        assert_eq!(fused.len(), 1);
        assert_eq!(fused.hits()[0].id, "a");
        assert!((fused.hits()[0].score - 1.5).abs() < 1e-12);
    }

    #[test]
    fn test_deserialized_stream_counts_each_id_once() {
        let semantic: RankedList = serde_json::from_str(r#"[{"id":"d","score":0.9},{"id":"d","score":0.8}]"#).unwrap();
        let fused = fuse(&[WeightedStream::new(StreamKind::Semantic, &semantic, 1.0)], 60, 10);
        assert_eq!(fused.len(), 1);
        assert!((score(&fused, "d") - 1.0 / 61.0).abs() < 1e-12);
    }
}
