use crate::config::BuildConfig;
use crate::error::Result;
use crate::hash::CorpusDigest;
use crate::hash_index::HashIndex;
use crate::path_index::PathIndex;
use crate::{FormulaId, FormulaRecord};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawFormula {
    #[serde(alias = "formula_id", alias = "visual_id")]
    pub id: FormulaId,
    #[serde(alias = "formula", alias = "tex")]
    pub latex: String,
    /// Operator-tree or MathML skeleton computed upstream.
    #[serde(default, alias = "opt", alias = "mathml")]
    pub skeleton: Option<String>,
}

/// Records plus both indices, read-only once built.
#[derive(Debug, Clone)]
pub struct IndexSnapshot {
    build: BuildConfig,
    records: Vec<FormulaRecord>,
    positions: HashMap<FormulaId, usize>,
    hash_index: HashIndex,
    path_index: PathIndex,
}

impl IndexSnapshot {
    /// Builds both indices over already normalized records. Later records with
    /// an id seen before are dropped.
    pub fn build(records: Vec<FormulaRecord>, config: &BuildConfig) -> Result<Self> {
        config.validate()?;
        let (records, positions) = dedup(records);
        let (hash_index, path_index) = rayon::join(
            || HashIndex::build(&records),
            || PathIndex::build(config.path_length, &records),
        );
        info!(num_formulas = records.len(), path_length = config.path_length, "built index snapshot");
        Ok(Self { build: config.clone(), records, positions, hash_index, path_index })
    }

    pub fn ingest<I>(raws: I, config: &BuildConfig) -> Result<Self>
    where
        I: IntoIterator<Item = RawFormula>,
    {
        let mut records = Vec::new();
        let mut modified = 0usize;
        for raw in raws {
            let (record, was_modified) = FormulaRecord::from_raw(raw.id, &raw.latex, raw.skeleton.as_deref());
            if was_modified {
                modified += 1;
            }
            records.push(record);
        }
        info!(num_records = records.len(), modified, "normalized corpus");
        Self::build(records, config)
    }

    /// Reassembles a persisted snapshot. Both indices must have been built from
    /// exactly these records.
    pub(crate) fn from_parts(
        build: BuildConfig,
        records: Vec<FormulaRecord>,
        hash_index: HashIndex,
        path_index: PathIndex,
    ) -> std::result::Result<Self, String> {
        build.validate().map_err(|e| e.to_string())?;
        let (records, positions) = dedup(records);
        if hash_index.len() != records.len() {
            return Err(format!("hash index holds {} formulas, records hold {}", hash_index.len(), records.len()));
        }
        if path_index.num_formulas() as usize != records.len() {
            return Err(format!(
                "path index holds {} formulas, records hold {}",
                path_index.num_formulas(),
                records.len()
            ));
        }
        if path_index.path_length() != build.path_length {
            return Err(format!(
                "path index was built with path_length {}, meta says {}",
                path_index.path_length(),
                build.path_length
            ));
        }
        let mut corpus = CorpusDigest::new();
        for record in &records {
            corpus.update(&record.id, &record.normalized_latex);
        }
        let corpus = corpus.finish();
        if hash_index.corpus_digest() != corpus {
            return Err(format!("hash index was built from other records (corpus {})", hash_index.corpus_digest()));
        }
        if path_index.corpus_digest() != corpus {
            return Err(format!("path index was built from other records (corpus {})", path_index.corpus_digest()));
        }
        Ok(Self { build, records, positions, hash_index, path_index })
    }

    pub fn build_config(&self) -> &BuildConfig {
        &self.build
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[FormulaRecord] {
        &self.records
    }

    pub fn record(&self, id: &str) -> Option<&FormulaRecord> {
        self.positions.get(id).map(|&pos| &self.records[pos])
    }

    pub fn hash_index(&self) -> &HashIndex {
        &self.hash_index
    }

    pub fn path_index(&self) -> &PathIndex {
        &self.path_index
    }
}

fn dedup(records: Vec<FormulaRecord>) -> (Vec<FormulaRecord>, HashMap<FormulaId, usize>) {
    let mut positions = HashMap::with_capacity(records.len());
    let mut kept = Vec::with_capacity(records.len());
    for record in records {
        if positions.contains_key(&record.id) {
            warn!(id = %record.id, "duplicate formula id dropped");
            continue;
        }
        positions.insert(record.id.clone(), kept.len());
        kept.push(record);
    }
    (kept, positions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RetrievalError;
    use crate::hash_index::HashFamily;

    fn raw(id: &str, latex: &str) -> RawFormula {
        RawFormula { id: id.to_string(), latex: latex.to_string(), skeleton: None }
    }

    #[test]
    fn ingest_normalizes_and_indexes() {
        let snap = IndexSnapshot::ingest(vec![raw("1", "$a + b$"), raw("2", "x*y")], &BuildConfig::default()).unwrap();
        assert_eq!(snap.len(), 2);
        let r = snap.record("1").unwrap();
        assert_eq!(r.normalized_latex, "a+b");
        assert_eq!(r.raw_latex, "$a + b$");
        assert_eq!(snap.hash_index().exact_lookup(HashFamily::Latex, &r.structural_hash), &["1".to_string()]);
        assert_eq!(snap.path_index().num_formulas(), 2);
    }

    #[test]
    fn first_record_wins_on_duplicate_ids() {
        let snap = IndexSnapshot::ingest(vec![raw("1", "a"), raw("1", "b")], &BuildConfig::default()).unwrap();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap.record("1").unwrap().normalized_latex, "a");
    }

    #[test]
    fn rejects_zero_path_length() {
        let err = IndexSnapshot::build(Vec::new(), &BuildConfig { path_length: 0 }).unwrap_err();
        assert!(matches!(err, RetrievalError::ConfigInvalid(_)));
    }

    #[test]
    fn parts_from_different_builds_do_not_assemble() {
        let cfg = BuildConfig::default();
        let a = IndexSnapshot::ingest(vec![raw("1", "a+b"), raw("2", "x*y")], &cfg).unwrap();
        let b = IndexSnapshot::ingest(vec![raw("1", "p-q"), raw("2", "r/s")], &cfg).unwrap();

        let mixed = IndexSnapshot::from_parts(cfg.clone(), b.records.clone(), b.hash_index.clone(), a.path_index.clone());
        assert!(mixed.unwrap_err().contains("path index"));
        let mixed = IndexSnapshot::from_parts(cfg.clone(), b.records.clone(), a.hash_index.clone(), b.path_index.clone());
        assert!(mixed.unwrap_err().contains("hash index"));

        let same = IndexSnapshot::from_parts(cfg, b.records.clone(), b.hash_index.clone(), b.path_index.clone()).unwrap();
        assert_eq!(same.record("1").unwrap().normalized_latex, "p-q");
    }

    #[test]
    fn raw_formula_accepts_aliases() {
        let r: RawFormula = serde_json::from_str(r#"{"visual_id": "v9", "formula": "x^2"}"#).unwrap();
        assert_eq!(r.id, "v9");
        assert_eq!(r.latex, "x^2");
        assert!(r.skeleton.is_none());
    }
}
