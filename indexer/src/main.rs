use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use formula_core::config::BuildConfig;
use formula_core::persist::{load_meta, load_snapshot, save_snapshot, IndexPaths};
use formula_core::snapshot::RawFormula;
use formula_core::{FormulaQuery, HashFamily, IndexSnapshot, PipelineConfig, RankedList, RetrievalPipeline};
use tracing_subscriber::{EnvFilter, fmt};
use walkdir::WalkDir;

use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "indexer")]
#[command(about = "Build and query structural formula indices", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Stream {
    Fused,
    Recall,
    Structural,
    Semantic,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the index from input JSON/JSONL files or a directory
    Build {
        /// Input path (file or directory)
        #[arg(long)]
        input: String,
        /// Output index directory
        #[arg(long)]
        output: String,
        /// Window length of bare-token N-gram paths
        #[arg(long, default_value_t = 2)]
        path_length: usize,
    },
    /// Run one query and print TREC run lines
    Search {
        #[arg(long, default_value = "./index")]
        index: String,
        #[arg(long)]
        latex: String,
        /// Operator-tree skeleton of the query
        #[arg(long)]
        skeleton: Option<String>,
        /// JSON file with a PipelineConfig; defaults apply to missing fields
        #[arg(long)]
        config: Option<PathBuf>,
        /// JSON array of {"id", "score"} from the semantic ranker
        #[arg(long)]
        semantic: Option<PathBuf>,
        /// Overrides final_k from the config
        #[arg(long)]
        k: Option<usize>,
        #[arg(long, value_enum, default_value_t = Stream::Fused)]
        stream: Stream,
        #[arg(long, default_value = "Q1")]
        query_id: String,
        #[arg(long, default_value = "formula-core")]
        run_id: String,
    },
    /// Print index metadata and bucket statistics as JSON
    Stats {
        #[arg(long, default_value = "./index")]
        index: String,
    },
}

fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).with_writer(io::stderr).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Build { input, output, path_length } => build_index(&input, &output, path_length),
        Commands::Search { index, latex, skeleton, config, semantic, k, stream, query_id, run_id } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(k) = k {
                config.final_k = k;
            }
            let mut query = FormulaQuery::new(latex);
            query.skeleton = skeleton;
            if let Some(path) = semantic {
                query.semantic = Some(read_json(&path)?);
            }
            search(&index, config, &query, stream, &query_id, &run_id)
        }
        Commands::Stats { index } => stats(&index),
    }
}

fn build_index(input: &str, output: &str, path_length: usize) -> Result<()> {
    let input_path = Path::new(input);
    let out_paths = IndexPaths::new(output);

    let files = collect_input_files(input_path);
    if files.is_empty() {
        bail!("no .json or .jsonl input found at {input}");
    }
    let mut raws: Vec<RawFormula> = Vec::new();
    for file in &files {
        if file.extension().and_then(|s| s.to_str()) == Some("jsonl") {
            read_jsonl(file, &mut raws)?;
        } else {
            read_json_records(file, &mut raws)?;
        }
    }
    tracing::info!(files = files.len(), num_records = raws.len(), "read input records");

    let snapshot = IndexSnapshot::ingest(raws, &BuildConfig { path_length })?;
    let created_at = time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "".into());
    save_snapshot(&out_paths, &snapshot, created_at)?;

    tracing::info!(output, num_formulas = snapshot.len(), "index build complete");
    Ok(())
}

fn collect_input_files(input_path: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = Vec::new();
    if input_path.is_dir() {
        for entry in WalkDir::new(input_path).sort_by_file_name().into_iter().filter_map(|e| e.ok()) {
            let p = entry.path();
            if p.is_file() {
                if let Some(ext) = p.extension().and_then(|s| s.to_str()) {
                    if matches!(ext, "json" | "jsonl") {
                        files.push(p.to_path_buf());
                    }
                }
            }
        }
    } else if input_path.is_file() {
        files.push(input_path.to_path_buf());
    }
    files
}

fn read_jsonl(file: &Path, out: &mut Vec<RawFormula>) -> Result<()> {
    let f = File::open(file)?;
    let reader = BufReader::new(f);
    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() { continue; }
        let raw: RawFormula = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}: malformed record", file.display(), lineno + 1))?;
        out.push(raw);
    }
    Ok(())
}

fn read_json_records(file: &Path, out: &mut Vec<RawFormula>) -> Result<()> {
    let f = File::open(file)?;
    let reader = BufReader::new(f);
    let json: serde_json::Value = serde_json::from_reader(reader)?;
    match json {
        serde_json::Value::Array(arr) => {
            for v in arr {
                out.push(serde_json::from_value(v)?);
            }
        }
        serde_json::Value::Object(_) => out.push(serde_json::from_value(json)?),
        _ => tracing::warn!(file = %file.display(), "skipping JSON that is neither an object nor an array"),
    }
    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let f = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    Ok(serde_json::from_reader(BufReader::new(f))?)
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    let config = match path {
        Some(p) => read_json(p)?,
        None => PipelineConfig::default(),
    };
    Ok(config)
}

fn search(index: &str, config: PipelineConfig, query: &FormulaQuery, stream: Stream, query_id: &str, run_id: &str) -> Result<()> {
    let snapshot = Arc::new(load_snapshot(&IndexPaths::new(index))?);
    let final_k = config.final_k;
    let pipeline = RetrievalPipeline::new(snapshot, config)?;
    let outcome = pipeline.search(query);
    for note in &outcome.notes {
        tracing::info!(?note, "stage note");
    }
    let mut list: RankedList = match stream {
        Stream::Fused => outcome.results,
        Stream::Recall => outcome.recall.to_ranked_list(),
        Stream::Structural => outcome.structural,
        Stream::Semantic => outcome.semantic,
    };
    list.truncate(final_k);
    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    list.write_trec_run(query_id, run_id, &mut out)?;
    out.flush()?;
    Ok(())
}

fn stats(index: &str) -> Result<()> {
    let paths = IndexPaths::new(index);
    let meta = load_meta(&paths)?;
    let snapshot = load_snapshot(&paths)?;
    let hash_index = snapshot.hash_index();
    let report = serde_json::json!({
        "meta": meta,
        "latex_buckets": hash_index.num_buckets(HashFamily::Latex),
        "skeleton_buckets": hash_index.num_buckets(HashFamily::Skeleton),
        "distinct_paths": snapshot.path_index().num_paths(),
        "index_bytes": dir_size(&paths.root)?,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn dir_size(root: &Path) -> Result<u64> {
    let mut total = 0;
    for entry in fs::read_dir(root)? {
        let meta = entry?.metadata()?;
        if meta.is_file() {
            total += meta.len();
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn reads_jsonl_and_json_inputs() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("a.jsonl"),
            "{\"id\": \"1\", \"latex\": \"a+b\"}\n\n{\"visual_id\": \"2\", \"latex\": \"x^2\", \"skeleton\": \"sup(x,2)\"}\n",
        )
        .unwrap();
        fs::write(dir.path().join("b.json"), r#"[{"formula_id": "3", "latex": "y"}]"#).unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let files = collect_input_files(dir.path());
        assert_eq!(files.len(), 2);
        let mut raws = Vec::new();
        read_jsonl(&files[0], &mut raws).unwrap();
        read_json_records(&files[1], &mut raws).unwrap();
        let ids: Vec<&str> = raws.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
        assert_eq!(raws[1].skeleton.as_deref(), Some("sup(x,2)"));
    }

    #[test]
    fn malformed_line_names_its_location() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("bad.jsonl");
        fs::write(&file, "{\"id\": \"1\", \"latex\": \"a\"}\nnot json\n").unwrap();
        let err = read_jsonl(&file, &mut Vec::new()).unwrap_err();
        assert!(format!("{err:#}").contains("bad.jsonl:2"));
    }

    #[test]
    fn build_then_load() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("corpus.jsonl");
        fs::write(&input, "{\"id\": \"1\", \"latex\": \"a+b\"}\n{\"id\": \"2\", \"latex\": \"a+c\"}\n").unwrap();
        let out = dir.path().join("index");
        build_index(input.to_str().unwrap(), out.to_str().unwrap(), 2).unwrap();
        let snapshot = load_snapshot(&IndexPaths::new(&out)).unwrap();
        assert_eq!(snapshot.len(), 2);
        assert!(build_index(dir.path().join("missing").to_str().unwrap(), out.to_str().unwrap(), 2).is_err());
    }
}
