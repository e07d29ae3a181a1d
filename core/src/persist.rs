use crate::config::BuildConfig;
use crate::error::{Result, RetrievalError};
use crate::hash_index::HashIndex;
use crate::normalize::NORMALIZER_VERSION;
use crate::path_index::PathIndex;
use crate::snapshot::IndexSnapshot;
use crate::FormulaRecord;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::{create_dir_all, remove_file, File};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use tracing::info;

/// On-disk layout version; bumped whenever a persisted structure changes.
pub const INDEX_FORMAT_VERSION: u32 = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaFile {
    pub num_formulas: u32,
    pub path_length: usize,
    pub normalizer_version: u32,
    pub created_at: String,
    pub version: u32,
}

pub struct IndexPaths {
    pub root: PathBuf,
}

impl IndexPaths {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }
    pub fn hash_index(&self) -> PathBuf { self.root.join("hash_index.bin") }
    pub fn path_index(&self) -> PathBuf { self.root.join("path_index.bin") }
    pub fn records(&self) -> PathBuf { self.root.join("records.bin") }
    pub fn meta(&self) -> PathBuf { self.root.join("meta.json") }
}

fn write_bin<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = bincode::serialize(value).map_err(|e| RetrievalError::Encode(e.to_string()))?;
    let mut f = File::create(path)?;
    f.write_all(&bytes)?;
    f.sync_all()?;
    Ok(())
}

fn read_bytes(path: &Path) -> Result<Vec<u8>> {
    let mut f = File::open(path).map_err(|e| load_error(path, e))?;
    let mut buf = Vec::new();
    f.read_to_end(&mut buf).map_err(|e| load_error(path, e))?;
    Ok(buf)
}

fn read_bin<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let buf = read_bytes(path)?;
    bincode::deserialize(&buf).map_err(|e| load_error(path, e))
}

fn load_error(path: &Path, reason: impl ToString) -> RetrievalError {
    RetrievalError::IndexLoad { path: path.to_path_buf(), reason: reason.to_string() }
}

pub fn save_meta(paths: &IndexPaths, meta: &MetaFile) -> Result<()> {
    create_dir_all(&paths.root)?;
    let mut f = File::create(paths.meta())?;
    let json = serde_json::to_string_pretty(meta).map_err(|e| RetrievalError::Encode(e.to_string()))?;
    f.write_all(json.as_bytes())?;
    Ok(())
}

pub fn load_meta(paths: &IndexPaths) -> Result<MetaFile> {
    let path = paths.meta();
    let buf = read_bytes(&path)?;
    let meta: MetaFile = serde_json::from_slice(&buf).map_err(|e| load_error(&path, e))?;
    if meta.version != INDEX_FORMAT_VERSION {
        return Err(load_error(
            &path,
            format!("index format version {} is not supported (expected {INDEX_FORMAT_VERSION})", meta.version),
        ));
    }
    if meta.normalizer_version != NORMALIZER_VERSION {
        return Err(load_error(
            &path,
            format!(
                "index was normalized with version {}, this build uses {NORMALIZER_VERSION}; rebuild the index",
                meta.normalizer_version
            ),
        ));
    }
    Ok(meta)
}

/// Drops any previous `meta.json`, writes the three binary parts and writes
/// the new `meta.json` last. An interrupted save leaves no meta behind, so
/// the directory no longer loads.
pub fn save_snapshot(paths: &IndexPaths, snapshot: &IndexSnapshot, created_at: String) -> Result<MetaFile> {
    create_dir_all(&paths.root)?;
    match remove_file(paths.meta()) {
        Err(e) if e.kind() != ErrorKind::NotFound => return Err(e.into()),
        _ => {}
    }
    write_bin(&paths.records(), &snapshot.records())?;
    write_bin(&paths.hash_index(), snapshot.hash_index())?;
    write_bin(&paths.path_index(), snapshot.path_index())?;
    let meta = MetaFile {
        num_formulas: snapshot.len() as u32,
        path_length: snapshot.build_config().path_length,
        normalizer_version: NORMALIZER_VERSION,
        created_at,
        version: INDEX_FORMAT_VERSION,
    };
    save_meta(paths, &meta)?;
    info!(root = %paths.root.display(), num_formulas = meta.num_formulas, "saved index snapshot");
    Ok(meta)
}

/// Loads a complete snapshot or fails; a partial index is never returned.
pub fn load_snapshot(paths: &IndexPaths) -> Result<IndexSnapshot> {
    let meta = load_meta(paths)?;
    let records: Vec<FormulaRecord> = read_bin(&paths.records())?;
    if records.len() != meta.num_formulas as usize {
        return Err(load_error(
            &paths.records(),
            format!("expected {} records, found {}", meta.num_formulas, records.len()),
        ));
    }
    let hash_index: HashIndex = read_bin(&paths.hash_index())?;
    let path_index: PathIndex = read_bin(&paths.path_index())?;
    let build = BuildConfig { path_length: meta.path_length };
    let snapshot = IndexSnapshot::from_parts(build, records, hash_index, path_index)
        .map_err(|reason| load_error(&paths.root, reason))?;
    info!(root = %paths.root.display(), num_formulas = snapshot.len(), created_at = %meta.created_at, "loaded index snapshot");
    Ok(snapshot)
}
