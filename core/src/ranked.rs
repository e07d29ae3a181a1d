use crate::FormulaId;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::io::{self, Write};

/// A single scored candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hit {
    pub id: FormulaId,
    pub score: f64,
}

/// Ordered `(id, score)` candidates. Rank is the 1-based position.
///
/// An id appears at most once. Lists built from a score map are sorted by
/// score descending with ties broken by id ascending.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<Hit>", into = "Vec<Hit>")]
pub struct RankedList {
    hits: Vec<Hit>,
}

impl RankedList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sorts an accumulated score map and keeps the best `top_k` entries.
    pub fn from_scores(scores: HashMap<FormulaId, f64>, top_k: usize) -> Self {
        let mut hits: Vec<Hit> = scores.into_iter().map(|(id, score)| Hit { id, score }).collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        hits.truncate(top_k);
        Self { hits }
    }

    /// Takes the given order as the ranking. Repeated ids keep their first position.
    pub fn from_ordered<I>(items: I) -> Self
    where
        I: IntoIterator<Item = (FormulaId, f64)>,
    {
        let mut seen = HashSet::new();
        let hits = items
            .into_iter()
            .filter(|(id, _)| seen.insert(id.clone()))
            .map(|(id, score)| Hit { id, score })
            .collect();
        Self { hits }
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn hits(&self) -> &[Hit] {
        &self.hits
    }

    pub fn iter(&self) -> impl Iterator<Item = &Hit> {
        self.hits.iter()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.hits.iter().map(|h| h.id.as_str())
    }

    /// 1-based rank of `id`, if present.
    pub fn rank_of(&self, id: &str) -> Option<usize> {
        self.hits.iter().position(|h| h.id == id).map(|p| p + 1)
    }

    pub fn truncate(&mut self, len: usize) {
        self.hits.truncate(len);
    }

    pub fn into_hits(self) -> Vec<Hit> {
        self.hits
    }

    /// Writes one TREC run line per hit: `qid Q0 id rank score run_id`.
    pub fn write_trec_run<W: Write>(&self, query_id: &str, run_id: &str, out: &mut W) -> io::Result<()> {
        for (i, hit) in self.hits.iter().enumerate() {
            writeln!(out, "{} Q0 {} {} {:.6} {}", query_id, hit.id, i + 1, hit.score, run_id)?;
        }
        Ok(())
    }
}

impl From<Vec<Hit>> for RankedList {
    fn from(hits: Vec<Hit>) -> Self {
        Self::from_ordered(hits.into_iter().map(|Hit { id, score }| (id, score)))
    }
}

impl From<RankedList> for Vec<Hit> {
    fn from(list: RankedList) -> Self {
        list.hits
    }
}

impl<'a> IntoIterator for &'a RankedList {
    type Item = &'a Hit;
    type IntoIter = std::slice::Iter<'a, Hit>;

    fn into_iter(self) -> Self::IntoIter {
        self.hits.iter()
    }
}
