//! TF-IDF weighted inverted index over structural paths.

use crate::hash::{CorpusDigest, StructuralHash};
use crate::ranked::RankedList;
use crate::tokenizer::extract_paths;
use crate::{FormulaId, FormulaRecord};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Posting {
    pub formula_id: FormulaId,
    /// Occurrences of the path in this formula.
    pub tf: u32,
}

/// Read-only path postings with precomputed IDF and per-formula path counts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PathIndex {
    path_length: usize,
    num_formulas: u32,
    postings: HashMap<String, Vec<Posting>>, // postings in ingestion order
    idf: HashMap<String, f64>,
    doc_path_count: HashMap<FormulaId, u32>,
    corpus: StructuralHash,
}

/// Single-writer accumulator; [`PathIndexBuilder::build`] freezes it.
pub struct PathIndexBuilder {
    path_length: usize,
    num_formulas: u32,
    postings_raw: HashMap<String, Vec<Posting>>,
    doc_path_count: HashMap<FormulaId, u32>,
    seen: HashSet<FormulaId>,
    corpus: CorpusDigest,
}

impl PathIndexBuilder {
    pub fn new(path_length: usize) -> Self {
        Self {
            path_length,
            num_formulas: 0,
            postings_raw: HashMap::new(),
            doc_path_count: HashMap::new(),
            seen: HashSet::new(),
            corpus: CorpusDigest::new(),
        }
    }

    /// Indexes one canonical formula. A formula without paths still counts
    /// towards `N` but gets no postings.
    pub fn add(&mut self, id: &str, canonical: &str) {
        if !self.seen.insert(id.to_string()) {
            warn!(id, "duplicate formula id skipped");
            return;
        }
        self.num_formulas += 1;
        self.corpus.update(id, canonical);
        let mut tf_counts: BTreeMap<String, u32> = BTreeMap::new();
        for path in extract_paths(canonical, self.path_length) {
            *tf_counts.entry(path).or_insert(0) += 1;
        }
        if tf_counts.is_empty() {
            return;
        }
        self.doc_path_count.insert(id.to_string(), tf_counts.len() as u32);
        for (path, tf) in tf_counts {
            self.postings_raw.entry(path).or_default().push(Posting { formula_id: id.to_string(), tf });
        }
    }

    /// Computes `idf[path] = ln(N / (1 + df(path)))` over the finished corpus.
    pub fn build(self) -> PathIndex {
        let n = f64::from(self.num_formulas);
        let idf: HashMap<String, f64> = self
            .postings_raw
            .iter()
            .map(|(path, plist)| (path.clone(), (n / (1.0 + plist.len() as f64)).ln()))
            .collect();
        info!(
            num_formulas = self.num_formulas,
            num_paths = self.postings_raw.len(),
            path_length = self.path_length,
            "built path index"
        );
        PathIndex {
            path_length: self.path_length,
            num_formulas: self.num_formulas,
            postings: self.postings_raw,
            idf,
            doc_path_count: self.doc_path_count,
            corpus: self.corpus.finish(),
        }
    }
}

impl PathIndex {
    pub fn build<'a, I>(path_length: usize, records: I) -> Self
    where
        I: IntoIterator<Item = &'a FormulaRecord>,
    {
        let mut builder = PathIndexBuilder::new(path_length);
        for record in records {
            builder.add(&record.id, &record.normalized_latex);
        }
        builder.build()
    }

    pub fn path_length(&self) -> usize {
        self.path_length
    }

    pub fn num_formulas(&self) -> u32 {
        self.num_formulas
    }

    pub fn corpus_digest(&self) -> StructuralHash {
        self.corpus
    }

    pub fn num_paths(&self) -> usize {
        self.postings.len()
    }

    pub fn idf(&self, path: &str) -> Option<f64> {
        self.idf.get(path).copied()
    }

    pub fn doc_path_count(&self, id: &str) -> Option<u32> {
        self.doc_path_count.get(id).copied()
    }

    pub fn postings(&self, path: &str) -> &[Posting] {
        self.postings.get(path).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Full-corpus structural ranking of a canonical query.
    ///
    /// `score[id] = sum(tf_query(path) * idf(path)) / sqrt(doc_path_count(id))`
    /// over the query paths present in the index. A query without paths gives
    /// an empty list.
    pub fn search(&self, canonical: &str, top_k: usize) -> RankedList {
        let mut tf_q: BTreeMap<String, u32> = BTreeMap::new();
        for path in extract_paths(canonical, self.path_length) {
            *tf_q.entry(path).or_insert(0) += 1;
        }
        if tf_q.is_empty() || top_k == 0 {
            return RankedList::new();
        }

        let mut scores: HashMap<FormulaId, f64> = HashMap::new();
        for (path, q_tf) in &tf_q {
            let (Some(plist), Some(idf)) = (self.postings.get(path), self.idf.get(path)) else {
                continue;
            };
            let weight = f64::from(*q_tf) * idf;
            for p in plist {
                *scores.entry(p.formula_id.clone()).or_insert(0.0) += weight;
            }
        }
        for (id, score) in scores.iter_mut() {
            let len = self.doc_path_count.get(id).copied().unwrap_or(1).max(1);
            *score /= f64::from(len).sqrt();
        }
        RankedList::from_scores(scores, top_k)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index(corpus: &[(&str, &str)], path_length: usize) -> PathIndex {
        let mut builder = PathIndexBuilder::new(path_length);
        for (id, latex) in corpus {
            builder.add(id, latex);
        }
        builder.build()
    }

    #[test]
    fn ranks_closer_structure_higher() {
        let idx = index(&[("id1", "a+b"), ("id2", "a+c"), ("id3", "x*y")], 2);
        let ranked = idx.search("a+b", 10);
        assert_eq!(ranked.rank_of("id1"), Some(1));
        assert_eq!(ranked.rank_of("id2"), Some(2));
        assert!(ranked.rank_of("id3").is_none());
    }

    #[test]
    fn idf_follows_document_frequency() {
        let idx = index(&[("1", "a+b"), ("2", "a+c"), ("3", "x*y")], 2);
        let n = 3.0f64;
        assert!((idx.idf("b").unwrap() - (n / 2.0).ln()).abs() < 1e-12);
        assert!((idx.idf("a").unwrap() - (n / 3.0).ln()).abs() < 1e-12);
        assert_eq!(idx.idf("q"), None);
        assert_eq!(idx.doc_path_count("1"), Some(5));
        assert_eq!(idx.postings("a").len(), 2);
    }

    #[test]
    fn length_normalization_penalizes_long_formulas() {
        let idx = index(
            &[("short", "\\alpha"), ("long", "\\alpha+\\beta+\\gamma+\\delta"), ("o1", "z"), ("o2", "w"), ("o3", "v")],
            1,
        );
        let ranked = idx.search("\\alpha", 10);
        assert_eq!(ranked.rank_of("short"), Some(1));
        assert_eq!(ranked.rank_of("long"), Some(2));
        let s = ranked.hits();
        assert!(s[0].score > s[1].score);
    }

    #[test]
    fn degenerate_and_unknown_queries() {
        let idx = index(&[("1", "a+b")], 2);
        assert!(idx.search("", 10).is_empty());
        assert!(idx.search("{}", 10).is_empty());
        assert!(idx.search("\\omega", 10).is_empty());
        assert!(idx.search("a+b", 0).is_empty());
    }

    #[test]
    fn truncates_with_deterministic_ties() {
        let idx = index(&[("b", "x+1"), ("a", "x+2"), ("c", "y"), ("d", "z")], 2);
        let ranked = idx.search("x", 1);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked.hits()[0].id, "a");
    }
}
