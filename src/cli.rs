use crate::validate::OptionOverrides;
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "flowtrust",
    version,
    about = "Validate claimed execution flows against a static call index",
    after_help = r#"Examples:
  flowtrust import --db flows.sqlite --snapshot export.json
  flowtrust validate --db flows.sqlite EF-1 SaveRecord
  flowtrust validate --snapshot export.yaml EF-1 SaveRecord --max-hops 10
  flowtrust resolve --db flows.sqlite Form1
  flowtrust request --db flows.sqlite --method validate --params '{"flow_key":"EF-1","target":"SaveRecord"}'
  flowtrust serve --db flows.sqlite
"#
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

/// Where the static index and the flow graph are read from.
#[derive(ClapArgs, Debug, Clone)]
pub struct SourceArgs {
    /// SQLite store (default: .flowtrust/flowtrust.sqlite).
    #[arg(long, conflicts_with = "snapshot")]
    pub db: Option<PathBuf>,
    /// JSON or YAML snapshot loaded in memory instead of a store.
    #[arg(long)]
    pub snapshot: Option<PathBuf>,
}

#[derive(ClapArgs, Debug, Clone, Default)]
pub struct OverrideArgs {
    /// Implementation-class prefixes, comma separated.
    #[arg(long = "class-prefix", value_delimiter = ',')]
    pub class_prefixes: Vec<String>,
    /// Edges must exceed this confidence to be traversed.
    #[arg(long)]
    pub min_confidence: Option<f64>,
    /// Edges at or below this confidence are reported as weak evidence.
    #[arg(long)]
    pub weak_threshold: Option<f64>,
    #[arg(long)]
    pub max_hops: Option<usize>,
    #[arg(long)]
    pub max_visited: Option<usize>,
    #[arg(long)]
    pub timeout_ms: Option<u64>,
}

impl OverrideArgs {
    pub fn overrides(&self) -> OptionOverrides {
        OptionOverrides {
            class_prefixes: if self.class_prefixes.is_empty() {
                None
            } else {
                Some(self.class_prefixes.clone())
            },
            min_confidence: self.min_confidence,
            weak_threshold: self.weak_threshold,
            max_hops: self.max_hops,
            max_visited: self.max_visited,
            timeout_ms: self.timeout_ms,
        }
    }
}

#[derive(Subcommand)]
pub enum Command {
    /// Load a snapshot file into the SQLite store.
    Import {
        #[arg(long)]
        db: Option<PathBuf>,
        #[arg(long)]
        snapshot: PathBuf,
        /// Keep existing rows instead of replacing the store contents.
        #[arg(long)]
        append: bool,
    },
    /// Print counts, languages and fingerprint of the sources.
    Overview {
        #[command(flatten)]
        source: SourceArgs,
    },
    /// Validate one flow against a target function.
    Validate {
        #[command(flatten)]
        source: SourceArgs,
        flow_key: String,
        target: String,
        #[command(flatten)]
        options: OverrideArgs,
        /// Exit with status 2 unless the target is reachable.
        #[arg(long)]
        strict: bool,
    },
    /// Resolve a symbol against the static index.
    Resolve {
        #[command(flatten)]
        source: SourceArgs,
        symbol: String,
        #[arg(long)]
        class_hint: Option<String>,
        #[arg(long = "class-prefix", value_delimiter = ',')]
        class_prefixes: Vec<String>,
    },
    /// Validate every (flow_key, target) pair listed in a JSON or YAML file.
    Batch {
        #[command(flatten)]
        source: SourceArgs,
        #[arg(long, value_name = "PATH")]
        requests: PathBuf,
        #[command(flatten)]
        options: OverrideArgs,
    },
    /// Run a single JSONL request and exit.
    Request {
        #[command(flatten)]
        source: SourceArgs,
        #[arg(long)]
        method: String,
        #[arg(long, default_value = "{}")]
        params: String,
        #[arg(long, value_name = "PATH")]
        params_file: Option<PathBuf>,
        #[arg(long, default_value = "1")]
        id: String,
    },
    /// Run JSONL RPC server over stdin/stdout.
    Serve {
        #[command(flatten)]
        source: SourceArgs,
    },
    /// Print the JSON Schema of an RPC method's params (all methods if omitted).
    Schema { method: Option<String> },
}
