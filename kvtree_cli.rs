// Command-line front end for kvtree
// Export a Consul prefix to JSON, import JSON into a prefix, or copy between prefixes

use std::fs;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use kvtree::errors::{IoContext, JsonContext};
use kvtree::{migrate, ConsulConfig, ConsulStore, FileStore, Result, Store, Tree};

/// Convert between flat Consul KV prefixes and nested JSON documents
#[derive(Parser, Debug)]
#[command(name = "kvtree", version)]
struct Args {
    /// Consul agent address
    #[arg(long, global = true, default_value = "http://127.0.0.1:8500", env = "CONSUL_HTTP_ADDR")]
    consul_addr: String,

    /// ACL token sent as X-Consul-Token
    #[arg(long, global = true, env = "CONSUL_HTTP_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Datacenter to query (defaults to the agent's own)
    #[arg(long, global = true, env = "CONSUL_DATACENTER")]
    datacenter: Option<String>,

    /// Per-request timeout in seconds
    #[arg(long, global = true, default_value = "30")]
    timeout_secs: u64,

    /// Work against a local `consul kv export` snapshot instead of an agent
    #[arg(long, global = true)]
    snapshot: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the subtree under a prefix as JSON
    Export {
        #[arg(long)]
        prefix: String,

        /// Write to a file instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Single-line JSON
        #[arg(long)]
        compact: bool,
    },

    /// Write every leaf of a JSON object under a prefix
    Import {
        #[arg(long)]
        prefix: String,

        /// JSON file to read, stdin when omitted or "-"
        #[arg(long, short)]
        input: Option<PathBuf>,
    },

    /// Copy a subtree to another prefix, keeping raw value bytes
    Copy {
        #[arg(long)]
        from: String,

        #[arg(long)]
        to: String,
    },

    /// Print the subtree as key: value lines
    Show {
        #[arg(long)]
        prefix: String,
    },
}

enum Backend {
    Consul(ConsulStore),
    Snapshot(FileStore),
}

impl Backend {
    fn open(args: &Args) -> Result<Self> {
        match &args.snapshot {
            Some(path) => Ok(Backend::Snapshot(FileStore::open(path)?)),
            None => {
                let config = ConsulConfig {
                    address: args.consul_addr.clone(),
                    token: args.token.clone(),
                    datacenter: args.datacenter.clone(),
                    timeout: Duration::from_secs(args.timeout_secs),
                };
                Ok(Backend::Consul(ConsulStore::new(config)?))
            }
        }
    }

    fn store(&self) -> &dyn Store {
        match self {
            Backend::Consul(store) => store,
            Backend::Snapshot(store) => store,
        }
    }

    // snapshot writes stay in memory until flushed
    fn finish(&self) -> Result<()> {
        match self {
            Backend::Consul(_) => Ok(()),
            Backend::Snapshot(store) => store.flush(),
        }
    }
}

fn read_document(input: Option<&PathBuf>) -> Result<serde_json::Value> {
    let raw = match input {
        Some(path) if path.as_os_str() != "-" => {
            fs::read_to_string(path).io_context(format!("reading {}", path.display()))?
        }
        _ => {
            let mut buf = String::new();
            io::stdin().read_to_string(&mut buf).io_context("reading stdin")?;
            buf
        }
    };
    serde_json::from_str(&raw).json_context("parsing import document")
}

// a closed stdout (`kvtree show | head`) is an error, not a panic
fn write_show<W: Write>(tree: &Tree, out: &mut W) -> Result<()> {
    write!(out, "{}", tree).io_context("writing stdout")?;
    out.flush().io_context("writing stdout")
}

fn run(args: Args) -> Result<()> {
    let backend = Backend::open(&args)?;
    let store = backend.store();
    let start = Instant::now();

    match &args.command {
        Command::Export { prefix, output, compact } => {
            let tree = migrate::read_prefix(store, prefix)?;
            let json = tree.to_json();
            let mut rendered = if *compact {
                serde_json::to_string(&json)
            } else {
                serde_json::to_string_pretty(&json)
            }
            .json_context("rendering export")?;
            rendered.push('\n');

            match output {
                Some(path) => fs::write(path, rendered).io_context(format!("writing {}", path.display()))?,
                None => io::stdout().write_all(rendered.as_bytes()).io_context("writing stdout")?,
            }
            info!(%prefix, leaves = tree.leaf_count(), elapsed = ?start.elapsed(), "export done");
        }

        Command::Import { prefix, input } => {
            let document = read_document(input.as_ref())?;
            let written = migrate::import_json(store, &document, prefix)?;
            backend.finish()?;
            info!(%prefix, written, elapsed = ?start.elapsed(), "import done");
        }

        Command::Copy { from, to } => {
            let written = migrate::copy_prefix(store, store, from, to)?;
            backend.finish()?;
            info!(%from, %to, written, elapsed = ?start.elapsed(), "copy done");
        }

        Command::Show { prefix } => {
            let tree = migrate::read_prefix(store, prefix)?;
            write_show(&tree, &mut io::stdout().lock())?;
        }
    }

    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("kvtree=info")),
        )
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
