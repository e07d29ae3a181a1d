//! Exact and bounded-fuzzy structural hash buckets.

use crate::config::RecallConfig;
use crate::hash::{CorpusDigest, StructuralHash};
use crate::ranked::RankedList;
use crate::{FormulaId, FormulaRecord};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

/// The two fingerprint families. They are bucketed separately and never mixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashFamily {
    Latex,
    Skeleton,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Buckets {
    map: HashMap<StructuralHash, Vec<FormulaId>>,
    /// Bucket keys in first-insertion order; fixes the fuzzy scan order.
    order: Vec<StructuralHash>,
}

impl Buckets {
    fn insert(&mut self, hash: StructuralHash, id: FormulaId) {
        match self.map.entry(hash) {
            Entry::Occupied(e) => e.into_mut().push(id),
            Entry::Vacant(e) => {
                self.order.push(hash);
                e.insert(vec![id]);
            }
        }
    }

    fn get(&self, hash: &StructuralHash) -> &[FormulaId] {
        self.map.get(hash).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// `hash -> ids` buckets for both families, built once and read-only afterwards.
///
/// Every id in a bucket belongs to a record whose hash equals the bucket key.
/// Ids inside a bucket keep ingestion order, which only serves as a tie-break.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HashIndex {
    latex: Buckets,
    skeleton: Buckets,
    ids: Vec<FormulaId>,
    corpus: StructuralHash,
}

impl HashIndex {
    /// Single pass over the records. Records with an empty canonical form are
    /// kept for sampling but not bucketed; repeated ids are skipped.
    pub fn build<'a, I>(records: I) -> Self
    where
        I: IntoIterator<Item = &'a FormulaRecord>,
    {
        let mut index = Self::default();
        let mut seen: HashSet<&'a str> = HashSet::new();
        let mut corpus = CorpusDigest::new();
        for record in records {
            if !seen.insert(record.id.as_str()) {
                warn!(id = %record.id, "duplicate formula id skipped");
                continue;
            }
            corpus.update(&record.id, &record.normalized_latex);
            if record.normalized_latex.is_empty() {
                debug!(id = %record.id, "empty canonical form, not bucketed");
            } else {
                index.latex.insert(record.structural_hash, record.id.clone());
            }
            if let Some(h) = record.skeleton_hash {
                index.skeleton.insert(h, record.id.clone());
            }
            index.ids.push(record.id.clone());
        }
        index.corpus = corpus.finish();
        info!(
            num_formulas = index.ids.len(),
            latex_buckets = index.latex.order.len(),
            skeleton_buckets = index.skeleton.order.len(),
            "built hash index"
        );
        index
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Digest of the records this index was built from.
    pub fn corpus_digest(&self) -> StructuralHash {
        self.corpus
    }

    pub fn num_buckets(&self, family: HashFamily) -> usize {
        self.buckets(family).order.len()
    }

    fn buckets(&self, family: HashFamily) -> &Buckets {
        match family {
            HashFamily::Latex => &self.latex,
            HashFamily::Skeleton => &self.skeleton,
        }
    }

    pub fn exact_lookup(&self, family: HashFamily, hash: &StructuralHash) -> &[FormulaId] {
        self.buckets(family).get(hash)
    }

    /// Ids from every bucket within `max_hamming_distance` of `hash`.
    ///
    /// The exact bucket is always included; at most `max_buckets_scanned`
    /// other buckets are examined, in insertion order. The result is ordered by
    /// distance, so exact matches come first.
    pub fn fuzzy_lookup(
        &self,
        family: HashFamily,
        hash: &StructuralHash,
        max_hamming_distance: u32,
        max_buckets_scanned: usize,
    ) -> Vec<FormulaId> {
        self.fuzzy_buckets(family, hash, max_hamming_distance, max_buckets_scanned)
            .into_iter()
            .flat_map(|(_, ids)| ids.iter().cloned())
            .collect()
    }

    fn fuzzy_buckets(
        &self,
        family: HashFamily,
        hash: &StructuralHash,
        max_hamming_distance: u32,
        max_buckets_scanned: usize,
    ) -> Vec<(u32, &[FormulaId])> {
        let buckets = self.buckets(family);
        let mut found: Vec<(u32, &[FormulaId])> = Vec::new();
        let exact = buckets.get(hash);
        if !exact.is_empty() {
            found.push((0, exact));
        }
        for key in buckets.order.iter().filter(|k| *k != hash).take(max_buckets_scanned) {
            let distance = key.hamming(hash);
            if distance <= max_hamming_distance {
                found.push((distance, buckets.get(key)));
            }
        }
        found.sort_by_key(|(distance, _)| *distance);
        found
    }

    /// A seeded sample of up to `n` ids. Same seed, same sample.
    pub fn sample(&self, n: usize, seed: u64) -> Vec<FormulaId> {
        let mut rng = StdRng::seed_from_u64(seed);
        let amount = n.min(self.ids.len());
        rand::seq::index::sample(&mut rng, self.ids.len(), amount)
            .into_iter()
            .map(|i| self.ids[i].clone())
            .collect()
    }

    /// The RECALL stage: exact buckets (skeleton family first when the query
    /// carries a skeleton), then fuzzy buckets when exact recall is below the
    /// configured floor. An empty result is `NoMatch` unless a random fallback
    /// is configured.
    pub fn recall(&self, query: &RecallQuery, config: &RecallConfig) -> Recall {
        let mut collector = Collector::new(config.max_candidates);
        if let Some(h) = &query.skeleton_hash {
            collector.extend(self.exact_lookup(HashFamily::Skeleton, h), RecallSource::Exact { family: HashFamily::Skeleton });
        }
        if let Some(h) = &query.latex_hash {
            collector.extend(self.exact_lookup(HashFamily::Latex, h), RecallSource::Exact { family: HashFamily::Latex });
        }
        let exact = collector.hits.len();

        if exact < config.floor {
            let target = match (&query.skeleton_hash, &query.latex_hash) {
                (Some(h), _) => Some((HashFamily::Skeleton, h)),
                (None, Some(h)) => Some((HashFamily::Latex, h)),
                (None, None) => None,
            };
            if let Some((family, h)) = target {
                for (distance, ids) in
                    self.fuzzy_buckets(family, h, config.max_hamming_distance, config.max_buckets_scanned)
                {
                    let source = if distance == 0 {
                        RecallSource::Exact { family }
                    } else {
                        RecallSource::Fuzzy { family, distance }
                    };
                    collector.extend(ids, source);
                }
                debug!(exact, total = collector.hits.len(), ?family, "fuzzy recall");
            }
        }

        if !collector.hits.is_empty() {
            return Recall::Matches(collector.hits);
        }
        match config.random_fallback {
            Some(n) if !self.is_empty() => {
                let seed = query.latex_hash.or(query.skeleton_hash).map(|h| h.seed()).unwrap_or(0);
                warn!(sample = n, "zero recall, substituting a random sample");
                let hits = self
                    .sample(n.min(config.max_candidates), seed)
                    .into_iter()
                    .map(|id| RecallHit { id, source: RecallSource::RandomSample })
                    .collect();
                Recall::Matches(hits)
            }
            _ => Recall::NoMatch,
        }
    }
}

struct Collector {
    hits: Vec<RecallHit>,
    seen: HashSet<FormulaId>,
    cap: usize,
}

impl Collector {
    fn new(cap: usize) -> Self {
        Self { hits: Vec::new(), seen: HashSet::new(), cap }
    }

    fn extend(&mut self, ids: &[FormulaId], source: RecallSource) {
        for id in ids {
            if self.hits.len() >= self.cap {
                return;
            }
            if self.seen.insert(id.clone()) {
                self.hits.push(RecallHit { id: id.clone(), source });
            }
        }
    }
}

/// Fingerprints of a query. `latex_hash` is `None` for a degenerate query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecallQuery {
    pub latex_hash: Option<StructuralHash>,
    pub skeleton_hash: Option<StructuralHash>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecallSource {
    Exact { family: HashFamily },
    Fuzzy { family: HashFamily, distance: u32 },
    /// Filler substituted on zero recall. Not a relevance signal.
    RandomSample,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecallHit {
    pub id: FormulaId,
    pub source: RecallSource,
}

/// Outcome of the RECALL stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recall {
    Matches(Vec<RecallHit>),
    /// Neither exact nor fuzzy lookup found anything.
    NoMatch,
}

impl Recall {
    pub fn hits(&self) -> &[RecallHit] {
        match self {
            Recall::Matches(hits) => hits,
            Recall::NoMatch => &[],
        }
    }

    pub fn is_no_match(&self) -> bool {
        matches!(self, Recall::NoMatch)
    }

    pub fn exact_ids(&self) -> impl Iterator<Item = &str> {
        self.hits()
            .iter()
            .filter(|h| matches!(h.source, RecallSource::Exact { .. }))
            .map(|h| h.id.as_str())
    }

    pub fn is_random_sample(&self) -> bool {
        self.hits().iter().any(|h| h.source == RecallSource::RandomSample)
    }

    /// Recall order as a ranked stream: exact matches score 1, fuzzy matches
    /// decay with distance, sampled filler scores 0.
    pub fn to_ranked_list(&self) -> RankedList {
        RankedList::from_ordered(self.hits().iter().map(|h| {
            let score = match h.source {
                RecallSource::Exact { .. } => 1.0,
                RecallSource::Fuzzy { distance, .. } => 1.0 - f64::from(distance) / 128.0,
                RecallSource::RandomSample => 0.0,
            };
            (h.id.clone(), score)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::hash_of;

    fn record(id: &str, latex: &str) -> FormulaRecord {
        FormulaRecord::from_raw(id, latex, None).0
    }

    fn synthetic(id: &str, low_bits: u8) -> FormulaRecord {
        let mut bytes = [0u8; 16];
        bytes[15] = low_bits;
        FormulaRecord {
            id: id.to_string(),
            raw_latex: id.to_string(),
            normalized_latex: id.to_string(),
            structural_hash: StructuralHash::from_bytes(bytes),
            skeleton_hash: None,
        }
    }

    #[test]
    fn exact_lookup_returns_bucket_in_ingestion_order() {
        let records = vec![record("1", "a+b"), record("2", "$a + b$"), record("3", "x*y")];
        let index = HashIndex::build(&records);
        let h = hash_of("a+b");
        assert_eq!(index.exact_lookup(HashFamily::Latex, &h), &["1".to_string(), "2".to_string()]);
        assert!(index.exact_lookup(HashFamily::Skeleton, &h).is_empty());
        assert_eq!(index.num_buckets(HashFamily::Latex), 2);
    }

    #[test]
    fn empty_canonical_forms_are_not_bucketed() {
        let records = vec![record("1", ""), record("2", "$$")];
        let index = HashIndex::build(&records);
        assert_eq!(index.len(), 2);
        assert!(index.exact_lookup(HashFamily::Latex, &hash_of("")).is_empty());
    }

    #[test]
    fn duplicate_ids_are_skipped() {
        let records = vec![record("1", "a"), record("1", "b")];
        let index = HashIndex::build(&records);
        assert_eq!(index.len(), 1);
        assert!(index.exact_lookup(HashFamily::Latex, &hash_of("b")).is_empty());
    }

    #[test]
    fn fuzzy_accepts_within_distance_ordered_by_distance() {
        // hashes 0b000, 0b011 (d=2), 0b001 (d=1), 0b111 (d=3)
        let records = vec![synthetic("a", 0), synthetic("b", 0b011), synthetic("c", 0b001), synthetic("d", 0b111)];
        let index = HashIndex::build(&records);
        let q = StructuralHash::from_bytes([0; 16]);
        assert_eq!(index.fuzzy_lookup(HashFamily::Latex, &q, 2, 100), vec!["a", "c", "b"]);
        assert_eq!(index.fuzzy_lookup(HashFamily::Latex, &q, 0, 100), vec!["a"]);
    }

    #[test]
    fn fuzzy_scan_is_bounded() {
        let records = vec![synthetic("a", 0), synthetic("b", 0b001), synthetic("c", 0b010)];
        let index = HashIndex::build(&records);
        let q = StructuralHash::from_bytes([0; 16]);
        // One non-exact bucket examined: "b" only.
        assert_eq!(index.fuzzy_lookup(HashFamily::Latex, &q, 1, 1), vec!["a", "b"]);
    }

    #[test]
    fn fuzzy_is_superset_of_exact() {
        let records = vec![record("1", "a+b"), record("2", "a+c"), record("3", "x*y"), record("4", "a+b")];
        let index = HashIndex::build(&records);
        for latex in ["a+b", "a+c", "x*y", "q"] {
            let h = hash_of(latex);
            let exact: HashSet<_> = index.exact_lookup(HashFamily::Latex, &h).iter().cloned().collect();
            for d in 0..4 {
                for b in 1..4 {
                    let fuzzy: HashSet<_> = index.fuzzy_lookup(HashFamily::Latex, &h, d, b).into_iter().collect();
                    assert!(fuzzy.is_superset(&exact), "d={d} b={b} latex={latex}");
                }
            }
        }
    }

    #[test]
    fn recall_reports_no_match_by_default() {
        let records = vec![record("1", "a+b")];
        let index = HashIndex::build(&records);
        let q = RecallQuery { latex_hash: Some(hash_of("zzz")), skeleton_hash: None };
        assert_eq!(index.recall(&q, &RecallConfig::default()), Recall::NoMatch);
    }

    #[test]
    fn recall_random_fallback_is_flagged_and_deterministic() {
        let records: Vec<_> = (0..20).map(|i| record(&i.to_string(), &format!("x_{i}"))).collect();
        let index = HashIndex::build(&records);
        let q = RecallQuery { latex_hash: Some(hash_of("zzz")), skeleton_hash: None };
        let config = RecallConfig { random_fallback: Some(5), ..RecallConfig::default() };
        let first = index.recall(&q, &config);
        assert_eq!(first.hits().len(), 5);
        assert!(first.is_random_sample());
        assert_eq!(first, index.recall(&q, &config));
    }

    #[test]
    fn recall_prefers_skeleton_then_latex() {
        let (r1, _) = FormulaRecord::from_raw("1", "a+b", Some("plus(a,b)"));
        let (r2, _) = FormulaRecord::from_raw("2", "b+a", Some("plus(a,b)"));
        let (r3, _) = FormulaRecord::from_raw("3", "a+b", None);
        let index = HashIndex::build(&[r1.clone(), r2, r3]);
        let q = RecallQuery { latex_hash: Some(r1.structural_hash), skeleton_hash: r1.skeleton_hash };
        let recall = index.recall(&q, &RecallConfig::default());
        let ids: Vec<&str> = recall.hits().iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
        assert_eq!(recall.exact_ids().count(), 3);
    }
}
