// Collaborators outside this crate: the semantic encoder and the confidence model.

use crate::ranked::RankedList;

/// Dense retrieval backend. Returns up to `top_k` candidates for the query,
/// best first. Implementations are shared across query threads.
pub trait SemanticRanker: Send + Sync {
    fn rank(&self, query_latex: &str, top_k: usize) -> RankedList;
}

/// A ranking computed ahead of time, e.g. loaded from a run file.
impl SemanticRanker for RankedList {
    fn rank(&self, _query_latex: &str, top_k: usize) -> RankedList {
        let mut list = self.clone();
        list.truncate(top_k);
        list
    }
}

/// A fused candidate as seen by the confidence filter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate<'a> {
    pub id: &'a str,
    /// LaTeX of the candidate as ingested, when it is in the snapshot.
    pub latex: Option<&'a str>,
    pub fused_score: f64,
}

/// Pairwise similarity model. Scores are expected in [0, 1]; values outside
/// are clamped and NaN counts as 0.
pub trait ConfidenceFilter: Send + Sync {
    fn score(&self, query_latex: &str, candidate: &Candidate<'_>) -> f64;
}

impl<F> ConfidenceFilter for F
where
    F: Fn(&str, &Candidate<'_>) -> f64 + Send + Sync,
{
    fn score(&self, query_latex: &str, candidate: &Candidate<'_>) -> f64 {
        self(query_latex, candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precomputed_ranking_truncates() {
        let list = RankedList::from_ordered(vec![("a".to_string(), 0.9), ("b".to_string(), 0.5)]);
        let ranked = list.rank("ignored", 1);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked.hits()[0].id, "a");
    }

    fn known_only(_query: &str, c: &Candidate<'_>) -> f64 {
        if c.latex.is_some() {
            1.0
        } else {
            0.0
        }
    }

    #[test]
    fn functions_are_filters() {
        let c = Candidate { id: "1", latex: Some("x"), fused_score: 0.1 };
        assert_eq!(ConfidenceFilter::score(&known_only, "q", &c), 1.0);
        let missing = Candidate { latex: None, ..c };
        assert_eq!(ConfidenceFilter::score(&known_only, "q", &missing), 0.0);
    }
}
