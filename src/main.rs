use anyhow::{Context, Result};
use clap::Parser;
use flowtrust::batch::{BatchRequest, BatchSummary, validate_batch};
use flowtrust::config::Config;
use flowtrust::db::{Db, ImportMode};
use flowtrust::resolve::Resolver;
use flowtrust::snapshot::{Snapshot, SnapshotFormat};
use flowtrust::source::Sources;
use flowtrust::validate::{ValidateOptions, Validator};
use flowtrust::{cli, rpc};
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

fn default_db_path() -> PathBuf {
    PathBuf::from(".flowtrust").join("flowtrust.sqlite")
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("FLOWTRUST_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn open_sources(source: &cli::SourceArgs) -> Result<Sources> {
    if let Some(path) = &source.snapshot {
        let snapshot = Snapshot::load(path)?;
        tracing::info!(
            snapshot = %path.display(),
            fingerprint = %snapshot.fingerprint(),
            "snapshot loaded"
        );
        let (index, flows) = snapshot.into_memory();
        return Ok(Sources::new(std::sync::Arc::new(index), std::sync::Arc::new(flows)));
    }
    let db_path = source.db.clone().unwrap_or_else(default_db_path);
    Ok(Sources::shared(Db::new(&db_path)?))
}

fn load_requests(path: &Path) -> Result<Vec<BatchRequest>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read requests {}", path.display()))?;
    let requests = match SnapshotFormat::from_path(path) {
        SnapshotFormat::Json => serde_json::from_str(&raw)?,
        SnapshotFormat::Yaml => serde_yaml_ng::from_str(&raw)?,
    };
    Ok(requests)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> Result<()> {
    init_tracing();
    let args = cli::Args::parse();
    let base = ValidateOptions::from_config(Config::get());

    match args.command {
        cli::Command::Import {
            db,
            snapshot,
            append,
        } => {
            let db_path = db.unwrap_or_else(default_db_path);
            let snapshot = Snapshot::load(&snapshot)?;
            let mode = if append {
                ImportMode::Append
            } else {
                ImportMode::Replace
            };
            let stats = Db::new(&db_path)?.import_snapshot(&snapshot, mode)?;
            print_json(&stats)
        }
        cli::Command::Overview { source } => {
            let sources = open_sources(&source)?;
            print_json(&sources.index.overview()?)
        }
        cli::Command::Validate {
            source,
            flow_key,
            target,
            options,
            strict,
        } => {
            let sources = open_sources(&source)?;
            let options = options.overrides().apply(base);
            let report = Validator::new(sources.index.as_ref(), sources.flows.as_ref(), options)?
                .validate(&flow_key, &target)?;
            print_json(&report)?;
            if strict && !report.verdict.reachable {
                std::process::exit(2);
            }
            Ok(())
        }
        cli::Command::Resolve {
            source,
            symbol,
            class_hint,
            class_prefixes,
        } => {
            let sources = open_sources(&source)?;
            let prefixes = if class_prefixes.is_empty() {
                base.class_prefixes
            } else {
                class_prefixes
            };
            let result = Resolver::standard(&prefixes).resolve(
                sources.index.as_ref(),
                &symbol,
                class_hint.as_deref(),
            )?;
            print_json(&result)
        }
        cli::Command::Batch {
            source,
            requests,
            options,
        } => {
            let sources = open_sources(&source)?;
            let requests = load_requests(&requests)?;
            let options = options.overrides().apply(base);
            let outcomes = validate_batch(
                sources.index.as_ref(),
                sources.flows.as_ref(),
                &requests,
                &options,
            )?;
            print_json(&json!({
                "summary": BatchSummary::of(&outcomes),
                "results": outcomes,
            }))
        }
        cli::Command::Request {
            source,
            method,
            params,
            params_file,
            id,
        } => {
            let sources = open_sources(&source)?;
            let params_raw = if let Some(path) = params_file {
                std::fs::read_to_string(&path)?
            } else {
                params
            };
            let response = rpc::call(&sources, method, &params_raw, &id)?;
            println!("{response}");
            Ok(())
        }
        cli::Command::Serve { source } => {
            let sources = open_sources(&source)?;
            rpc::serve(sources)
        }
        cli::Command::Schema { method } => {
            let value = match method {
                Some(method) => rpc::method_param_schema(&method),
                None => {
                    let mut all = serde_json::Map::new();
                    for name in rpc::method_names() {
                        all.insert(name.to_string(), rpc::method_param_schema(name));
                    }
                    serde_json::Value::Object(all)
                }
            };
            print_json(&value)
        }
    }
}
