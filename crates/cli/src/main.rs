//! Tandem command line.
//!
//! - `tandem eval <path>` evaluates a module and prints its exports as JSON;
//! - `tandem graph <path>` prints the dependency graph reachable from it;
//! - `tandem watch <path>` re-prints the exports whenever a file under the
//!   module's directory changes, until interrupted.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tandem_fs::{CanonicalUri, LocalFileSystem};
use tandem_sandbox::{CycleEdge, DependencyState, GraphEvent, SandboxConfig, Workspace};
use tokio::sync::broadcast::error::RecvError;
use tracing::info;

const DEFAULT_CONFIG: &str = "tandem.toml";

/// Command line arguments.
#[derive(Parser, Debug)]
#[command(name = "tandem")]
#[command(about = "Resolve, evaluate and watch sandboxed modules")]
struct Args {
	/// Configuration file (defaults to ./tandem.toml when present)
	#[arg(short, long, value_name = "PATH", global = true)]
	config: Option<PathBuf>,

	/// Verbose logging
	#[arg(short, long, global = true)]
	verbose: bool,

	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Evaluate a module and print its exports.
	Eval { path: PathBuf },
	/// Print the dependency graph of a module.
	Graph { path: PathBuf },
	/// Evaluate a module and re-evaluate it on every change.
	Watch { path: PathBuf },
}

#[derive(Serialize)]
struct GraphReport {
	roots: Vec<CanonicalUri>,
	dependencies: Vec<NodeReport>,
	cycles: Vec<CycleEdge>,
}

#[derive(Serialize)]
struct NodeReport {
	uri: CanonicalUri,
	state: DependencyState,
	version: Option<u64>,
	evaluation_seq: Option<u64>,
	children: Vec<CanonicalUri>,
	#[serde(skip_serializing_if = "Option::is_none")]
	error: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	setup_tracing(args.verbose);

	let config = load_config(args.config.as_deref())?;
	match args.command {
		Command::Eval { path } => {
			let (workspace, entry) = open_workspace(&path, config)?;
			let module = workspace.open(entry.as_str()).await?;
			print_json(&module)?;
		}
		Command::Graph { path } => {
			let (workspace, entry) = open_workspace(&path, config)?;
			if let Err(error) = workspace.open(entry.as_str()).await {
				tracing::warn!(%error, "graph incomplete");
			}
			print_json(&graph_report(&workspace))?;
		}
		Command::Watch { path } => {
			let (workspace, entry) = open_workspace(&path, config)?;
			watch(&workspace, &entry).await?;
		}
	}

	Ok(())
}

fn load_config(path: Option<&Path>) -> Result<SandboxConfig, tandem_sandbox::ConfigError> {
	match path {
		Some(path) => SandboxConfig::load(path),
		None if Path::new(DEFAULT_CONFIG).is_file() => SandboxConfig::load(Path::new(DEFAULT_CONFIG)),
		None => Ok(SandboxConfig::default()),
	}
}

/// Builds a workspace over the directory holding `path`.
fn open_workspace(path: &Path, config: SandboxConfig) -> Result<(Workspace, CanonicalUri), Box<dyn std::error::Error>> {
	let path = std::fs::canonicalize(path)?;
	let entry = CanonicalUri::from_path(&path)?;
	let root = path.parent().map(Path::to_path_buf).unwrap_or_else(|| path.clone());
	let base = CanonicalUri::from_path(&root)?;
	info!(entry = %entry, "opening workspace");
	let fs = LocalFileSystem::with_root(root);
	Ok((Workspace::new(Arc::new(fs), config, base), entry))
}

async fn watch(workspace: &Workspace, entry: &CanonicalUri) -> Result<(), Box<dyn std::error::Error>> {
	match workspace.open(entry.as_str()).await {
		Ok(module) => print_json(&module)?,
		Err(error) => tracing::error!(%error, "initial evaluation failed"),
	}

	let mut events = workspace.graph().subscribe();
	workspace.watch()?;
	info!(base = %workspace.base(), "watching; press ctrl-c to stop");

	loop {
		tokio::select! {
			signal = tokio::signal::ctrl_c() => {
				signal?;
				break;
			}
			event = events.recv() => match event {
				Ok(GraphEvent::Evaluated { uri, seq }) if &uri == entry => {
					tracing::debug!(seq, "entry re-evaluated");
					print_json(&workspace.exports(entry.as_str())?)?;
				}
				Ok(GraphEvent::Removed(uris)) if uris.contains(entry) => {
					tracing::warn!(uri = %entry, "entry removed");
				}
				Ok(_) => {}
				Err(RecvError::Lagged(missed)) => tracing::debug!(missed, "graph events lagged"),
				Err(RecvError::Closed) => break,
			}
		}
	}

	workspace.dispose();
	Ok(())
}

fn graph_report(workspace: &Workspace) -> GraphReport {
	let graph = workspace.graph();
	GraphReport {
		roots: graph.roots(),
		dependencies: graph
			.dependencies()
			.iter()
			.map(|dependency| NodeReport {
				uri: dependency.uri().clone(),
				state: dependency.state(),
				version: dependency.content_version(),
				evaluation_seq: dependency.evaluation_seq(),
				children: dependency.child_uris().to_vec(),
				error: dependency.error().map(|error| error.to_string()),
			})
			.collect(),
		cycles: graph.cycles(),
	}
}

fn print_json(value: &impl Serialize) -> serde_json::Result<()> {
	println!("{}", serde_json::to_string_pretty(value)?);
	Ok(())
}

fn setup_tracing(verbose: bool) {
	use tracing_subscriber::EnvFilter;

	let filter = EnvFilter::try_from_env("TANDEM_LOG").unwrap_or_else(|_| {
		if verbose {
			EnvFilter::new("tandem_sandbox=debug,tandem_fs=debug,info")
		} else {
			EnvFilter::new("warn")
		}
	});

	tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_writer(std::io::stderr)
		.init();
}
