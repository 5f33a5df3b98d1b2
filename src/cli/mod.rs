//! CLI subcommands: init, validate, inspect, plan.

use crate::assembly::digest::digest_asset;
use crate::core::config::{self, LdkConfig, StartupMode};
use crate::core::model::function_code_path;
use crate::core::types::{AppModel, FunctionCode, GraphEdge, GraphNode};
use crate::pipeline::{self, Topology};
use clap::Subcommand;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a new ldk project
    Init {
        /// Directory to initialize (default: current)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Load the cloud assembly and check it can be started
    Validate {
        /// Path to ldk.yaml
        #[arg(short, long, default_value = config::CONFIG_FILE)]
        file: PathBuf,

        /// Assembly directory (overrides ldk.yaml)
        #[arg(short, long)]
        assembly: Option<PathBuf>,
    },

    /// Show the application model, graph and asset digests
    Inspect {
        /// Path to ldk.yaml
        #[arg(short, long, default_value = config::CONFIG_FILE)]
        file: PathBuf,

        /// Assembly directory (overrides ldk.yaml)
        #[arg(short, long)]
        assembly: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the startup order and waves
    Plan {
        /// Path to ldk.yaml
        #[arg(short, long, default_value = config::CONFIG_FILE)]
        file: PathBuf,

        /// Assembly directory (overrides ldk.yaml)
        #[arg(short, long)]
        assembly: Option<PathBuf>,

        /// Start one node at a time regardless of ldk.yaml
        #[arg(long)]
        sequential: bool,
    },
}

/// Dispatch a CLI command.
pub fn dispatch(cmd: Commands) -> Result<(), String> {
    match cmd {
        Commands::Init { path } => cmd_init(&path),
        Commands::Validate { file, assembly } => cmd_validate(&file, assembly.as_deref()),
        Commands::Inspect {
            file,
            assembly,
            json,
        } => cmd_inspect(&file, assembly.as_deref(), json),
        Commands::Plan {
            file,
            assembly,
            sequential,
        } => cmd_plan(&file, assembly.as_deref(), sequential),
    }
}

fn cmd_init(path: &Path) -> Result<(), String> {
    let config_path = path.join(config::CONFIG_FILE);
    if config_path.exists() {
        return Err(format!("{} already exists", config_path.display()));
    }
    std::fs::create_dir_all(path)
        .map_err(|e| format!("cannot create {}: {}", path.display(), e))?;
    std::fs::write(&config_path, config::default_config_yaml())
        .map_err(|e| format!("cannot write {}: {}", config_path.display(), e))?;

    println!("Initialized ldk project at {}", path.display());
    println!("  Created: {}", config_path.display());
    Ok(())
}

/// Parse and validate the project file (defaults when it is absent) and work
/// out the assembly directory. A relative assembly path in ldk.yaml is taken
/// from the file's directory.
fn load_project(file: &Path, assembly: Option<&Path>) -> Result<(LdkConfig, PathBuf), String> {
    let config = config::load_config(file)?;

    let errors = config::validate_config(&config);
    if !errors.is_empty() {
        for e in &errors {
            eprintln!("  ERROR: {}", e);
        }
        return Err(format!("{} validation error(s)", errors.len()));
    }

    let dir = match assembly {
        Some(dir) => dir.to_path_buf(),
        None => file
            .parent()
            .unwrap_or_else(|| Path::new(""))
            .join(&config.assembly),
    };
    Ok((config, dir))
}

fn load_topology(file: &Path, assembly: Option<&Path>) -> Result<(LdkConfig, Topology), String> {
    let (config, dir) = load_project(file, assembly)?;
    if !dir.is_dir() {
        return Err(format!("assembly directory {} does not exist", dir.display()));
    }
    let topology = pipeline::ingest(&dir).map_err(|e| e.to_string())?;
    Ok((config, topology))
}

fn cmd_validate(file: &Path, assembly: Option<&Path>) -> Result<(), String> {
    let (config, topology) = load_topology(file, assembly)?;
    topology
        .waves(config.orchestrator.startup)
        .map_err(|e| e.to_string())?;
    println!(
        "OK: {} resources, {} nodes, {} edges",
        topology.model.resource_count(),
        topology.graph.len(),
        topology.graph.edges().len()
    );
    Ok(())
}

#[derive(Serialize)]
struct AssetReport {
    hash: String,
    path: PathBuf,
    /// `None` when the bundle is missing on disk
    digest: Option<String>,
}

#[derive(Serialize)]
struct InspectReport<'a> {
    model: &'a AppModel,
    nodes: Vec<&'a GraphNode>,
    edges: &'a [GraphEdge],
    order: &'a [String],
    assets: Vec<AssetReport>,
}

fn asset_reports(topology: &Topology) -> Vec<AssetReport> {
    topology
        .model
        .assets
        .iter()
        .map(|(hash, path)| AssetReport {
            hash: hash.clone(),
            path: path.clone(),
            digest: match digest_asset(path) {
                Ok(d) => Some(d),
                Err(e) => {
                    warn!("{}", e);
                    None
                }
            },
        })
        .collect()
}

fn cmd_inspect(file: &Path, assembly: Option<&Path>, json: bool) -> Result<(), String> {
    let (_, topology) = load_topology(file, assembly)?;
    let assets = asset_reports(&topology);

    if json {
        let report = InspectReport {
            model: &topology.model,
            nodes: topology.graph.nodes().collect(),
            edges: topology.graph.edges(),
            order: &topology.order,
            assets,
        };
        let out = serde_json::to_string_pretty(&report)
            .map_err(|e| format!("JSON serialization error: {}", e))?;
        println!("{}", out);
        return Ok(());
    }

    print!("{}", render_inspect(&topology, &assets));
    Ok(())
}

fn render_inspect(topology: &Topology, assets: &[AssetReport]) -> String {
    let model = &topology.model;
    let mut out = String::new();
    out.push_str(&format!("Resources: {}\n", model.resource_count()));

    for t in &model.tables {
        out.push_str(&format!("  table      {} ({})\n", t.id, t.name));
    }
    for f in &model.functions {
        let code = match &f.code {
            FunctionCode::Asset { hash, .. } => match function_code_path(f) {
                Some(path) => format!("asset {} at {}", hash, path.display()),
                None => format!("asset {}", hash),
            },
            FunctionCode::Inline { .. } => "inline".to_string(),
            FunctionCode::Unknown => "unknown code".to_string(),
        };
        out.push_str(&format!(
            "  function   {} ({}, {}, {})\n",
            f.id,
            f.name,
            f.runtime.as_deref().unwrap_or("?"),
            code
        ));
    }
    for a in &model.apis {
        out.push_str(&format!("  api        {} ({} routes)\n", a.id, a.routes.len()));
        for r in &a.routes {
            out.push_str(&format!(
                "               {} {} -> {}\n",
                r.method,
                r.path,
                r.target.as_deref().unwrap_or("-")
            ));
        }
    }
    for b in &model.buses {
        out.push_str(&format!("  bus        {} ({} rules)\n", b.id, b.rules.len()));
    }
    for s in &model.state_machines {
        out.push_str(&format!("  statemachine {} ({})\n", s.id, s.name));
    }
    for q in &model.queues {
        out.push_str(&format!("  queue      {} ({})\n", q.id, q.name));
    }
    for t in &model.topics {
        out.push_str(&format!(
            "  topic      {} ({} subscriptions)\n",
            t.id,
            t.subscriptions.len()
        ));
    }

    out.push_str(&format!("\nEdges: {}\n", topology.graph.edges().len()));
    for e in topology.graph.edges() {
        out.push_str(&format!("  {} -> {} [{}]\n", e.from, e.to, e.edge_type));
    }

    if !assets.is_empty() {
        out.push_str(&format!("\nAssets: {}\n", assets.len()));
        for a in assets {
            out.push_str(&format!(
                "  {} {} {}\n",
                a.hash,
                a.digest.as_deref().unwrap_or("(missing)"),
                a.path.display()
            ));
        }
    }
    out
}

fn cmd_plan(file: &Path, assembly: Option<&Path>, sequential: bool) -> Result<(), String> {
    let (config, topology) = load_topology(file, assembly)?;
    let mode = if sequential {
        StartupMode::Sequential
    } else {
        config.orchestrator.startup
    };
    let waves = topology.waves(mode).map_err(|e| e.to_string())?;
    print!("{}", render_plan(&topology, &waves, mode));
    Ok(())
}

fn render_plan(topology: &Topology, waves: &[Vec<String>], mode: StartupMode) -> String {
    let mut out = format!(
        "Startup plan: {} nodes in {} waves ({})\n\n",
        topology.order.len(),
        waves.len(),
        mode
    );
    for (i, wave) in waves.iter().enumerate() {
        out.push_str(&format!("wave {}:\n", i + 1));
        for id in wave {
            let kind = topology
                .graph
                .node(id)
                .map(|n| n.node_type.to_string())
                .unwrap_or_default();
            let deps = topology.graph.dependencies_of(id);
            if deps.is_empty() {
                out.push_str(&format!("  + {} [{}]\n", id, kind));
            } else {
                out.push_str(&format!("  + {} [{}] after {}\n", id, kind, deps.join(", ")));
            }
        }
    }
    out
}
