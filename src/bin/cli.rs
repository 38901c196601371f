//! Taxorefine CLI - build, refine and export CPC taxonomies
//!
//! Usage: taxorefine-cli [OPTIONS] <COMMAND>
//!
//! Every command that changes a tree reads a JSON taxonomy and writes the
//! result to `--output` (or back over the input when omitted).

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use taxorefine_lib::{
    ai_client,
    convergence::{converge, ConvergenceConfig},
    cpc_import,
    decision::DecisionPort,
    rows::{hierarchy_rows, row_count, write_rows},
    settings::{self, Settings},
    taxonomy::Taxonomy,
    thresholds,
    walker::{run_pass, Pass, PassReport},
};
use std::path::{Path, PathBuf};

// ============================================================================
// Main CLI Structure
// ============================================================================

#[derive(Parser)]
#[command(name = "taxorefine-cli")]
#[command(version, about = "CPC taxonomy refinement CLI", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Settings file (default: <config dir>/taxorefine/settings.json)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Output as JSON for scripting
    #[arg(long, global = true)]
    json: bool,

    /// Only warnings and errors
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Detailed logging
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a taxonomy from CPC title files
    Import {
        /// Title file or directory of .txt title files
        titles: PathBuf,
        /// JSON map of code -> item count
        #[arg(long)]
        counts: Option<PathBuf>,
        /// Where to write the taxonomy
        #[arg(long, short)]
        output: PathBuf,
    },
    /// Recompute node thresholds
    Thresholds {
        input: PathBuf,
        #[arg(long, short)]
        output: Option<PathBuf>,
        /// Z-score for the lower cutoff (default: from settings)
        #[arg(long, allow_hyphen_values = true)]
        z: Option<f64>,
        /// Only use sibling statistics, written straight to `threshold`
        #[arg(long)]
        sibling_only: bool,
    },
    /// Drop nodes with fewer than `min_count` items
    Prune {
        input: PathBuf,
        #[arg(long, short)]
        output: Option<PathBuf>,
        #[arg(long)]
        min_count: u64,
    },
    /// Ask the decision backend whether each node belongs in the taxonomy
    Relevance {
        input: PathBuf,
        #[arg(long, short)]
        output: Option<PathBuf>,
        /// Write the removed groups here
        #[arg(long)]
        removed: Option<PathBuf>,
    },
    /// Ask the decision backend for better labels
    Relabel {
        input: PathBuf,
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Merge and collapse until the hierarchy is small enough
    Converge {
        input: PathBuf,
        #[arg(long, short)]
        output: Option<PathBuf>,
        /// Directory for per-iteration snapshots
        #[arg(long)]
        snapshots: Option<PathBuf>,
        /// Stop once the hierarchy has at most this many rows
        #[arg(long)]
        row_floor: Option<usize>,
        #[arg(long)]
        max_rounds: Option<usize>,
        #[arg(long)]
        max_iterations: Option<usize>,
        #[arg(long, allow_hyphen_values = true)]
        z: Option<f64>,
        /// Write the run report here
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Export the three-level row view
    Rows {
        input: PathBuf,
        /// Where to write the rows (default: print the count only)
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Configuration settings
    Config {
        #[command(subcommand)]
        cmd: ConfigCommands,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show all settings (API keys masked)
    List,
    /// Set a setting value
    Set { key: String, value: String },
    /// Print the settings file path
    Path,
}

// ============================================================================
// Main Entry Point
// ============================================================================

fn init_logging(verbose: bool, quiet: bool) {
    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if quiet {
        builder.filter_level(log::LevelFilter::Warn);
    } else if verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.target(env_logger::Target::Stderr).init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    if let Err(e) = run_cli(cli) {
        log::error!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run_cli(cli: Cli) -> Result<(), String> {
    if let Commands::Completions { shell } = &cli.command {
        generate(*shell, &mut Cli::command(), "taxorefine-cli", &mut std::io::stdout());
        return Ok(());
    }

    let settings_path = cli.settings.clone().unwrap_or_else(settings::default_path);
    log::debug!("Using settings: {:?}", settings_path);
    let settings = Settings::load(&settings_path);

    match cli.command {
        Commands::Import { titles, counts, output } => handle_import(&titles, counts.as_deref(), &output, cli.json),
        Commands::Thresholds { input, output, z, sibling_only } => {
            let mut tree = load_tree(&input)?;
            let z = z.unwrap_or(settings.z_threshold);
            if sibling_only {
                thresholds::update_thresholds(&mut tree, z);
            } else {
                thresholds::recompute_thresholds(&mut tree, z);
            }
            save_tree(&tree, output.as_deref().unwrap_or(&input))
        }
        Commands::Prune { input, output, min_count } => {
            let mut tree = load_tree(&input)?;
            let removed = thresholds::remove_low_count_classes(&mut tree, min_count);
            if cli.json {
                println!("{}", to_json(&removed)?);
            } else {
                println!("Removed {} nodes below {}", removed.len(), min_count);
            }
            save_tree(&tree, output.as_deref().unwrap_or(&input))
        }
        Commands::Relevance { input, output, removed } => {
            let report = handle_pass(&input, output.as_deref(), &Pass::Relevance, &settings, cli.json)?;
            if let Some(path) = removed {
                std::fs::write(&path, to_json(&report.removed)?)
                    .map_err(|e| format!("Failed to write {:?}: {}", path, e))?;
            }
            Ok(())
        }
        Commands::Relabel { input, output } => {
            handle_pass(&input, output.as_deref(), &Pass::Relabel, &settings, cli.json).map(|_| ())
        }
        Commands::Converge { input, output, snapshots, row_floor, max_rounds, max_iterations, z, report } => {
            let mut config = ConvergenceConfig::from_settings(&settings);
            config.output_dir = snapshots;
            if let Some(v) = row_floor {
                config.row_floor = v;
            }
            if let Some(v) = max_rounds {
                config.max_rounds = v;
            }
            if let Some(v) = max_iterations {
                config.max_iterations = v;
            }
            if let Some(v) = z {
                config.z_threshold = v;
            }
            handle_converge(&input, output.as_deref(), report.as_deref(), &config, &settings, cli.json)
        }
        Commands::Rows { input, output } => {
            let tree = load_tree(&input)?;
            if let Some(path) = output {
                write_rows(&hierarchy_rows(&tree), &path).map_err(|e| e.to_string())?;
            }
            if cli.json {
                println!(r#"{{"rows":{}}}"#, row_count(&tree));
            } else {
                println!("{} rows", row_count(&tree));
            }
            Ok(())
        }
        Commands::Config { cmd } => handle_config(cmd, settings, &settings_path, cli.json),
        Commands::Completions { .. } => unreachable!(),
    }
}

// ============================================================================
// Handlers
// ============================================================================

fn load_tree(path: &Path) -> Result<Taxonomy, String> {
    Taxonomy::load(path).map_err(|e| format!("Failed to load {:?}: {}", path, e))
}

fn save_tree(tree: &Taxonomy, path: &Path) -> Result<(), String> {
    tree.save(path).map_err(|e| format!("Failed to save {:?}: {}", path, e))?;
    log::info!("Saved {} nodes to {:?}", tree.node_count(), path);
    Ok(())
}

fn to_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| e.to_string())
}

fn handle_import(titles: &Path, counts: Option<&Path>, output: &Path, json: bool) -> Result<(), String> {
    let parsed = cpc_import::read_cpc_titles(titles).map_err(|e| format!("Failed to read titles: {}", e))?;
    let mut tree = cpc_import::nest_codes(&parsed);

    let mut unmatched = Vec::new();
    if let Some(path) = counts {
        let counts = cpc_import::load_counts(path).map_err(|e| format!("Failed to read counts: {}", e))?;
        unmatched = cpc_import::apply_counts(&mut tree, &counts);
        cpc_import::aggregate_counts(&mut tree);
    }

    save_tree(&tree, output)?;
    if json {
        println!(r#"{{"nodes":{},"unmatched":{}}}"#, tree.node_count(), to_json(&unmatched)?);
    } else {
        println!("Imported {} codes ({} nodes)", parsed.len(), tree.node_count());
        for code in &unmatched {
            println!("  no node for counted code {}", code);
        }
    }
    Ok(())
}

fn handle_pass(input: &Path, output: Option<&Path>, pass: &Pass, settings: &Settings, json: bool) -> Result<PassReport, String> {
    let mut tree = load_tree(input)?;
    let mut port = ai_client::port_from_settings(settings).map_err(|e| e.to_string())?;

    let report = run_pass(&mut tree, pass, &mut *port);
    port.flush().map_err(|e| format!("Failed to save prompt cache: {}", e))?;
    save_tree(&tree, output.unwrap_or(input))?;

    if json {
        println!("{}", to_json(&report)?);
    } else {
        println!(
            "{}: {} decisions, {} merged, {} removed, {} relabeled, {} failures",
            report.pass,
            report.decisions,
            report.merges.len(),
            report.removed.len(),
            report.relabeled.len(),
            report.failures
        );
        for group in &report.removed {
            println!("  removed {} ({}) with {} children", group.code, group.label, group.children.len());
        }
        for relabel in &report.relabeled {
            println!("  {}: {} -> {}", relabel.code, relabel.old_label, relabel.new_label);
        }
    }
    Ok(report)
}

fn handle_converge(
    input: &Path,
    output: Option<&Path>,
    report_path: Option<&Path>,
    config: &ConvergenceConfig,
    settings: &Settings,
    json: bool,
) -> Result<(), String> {
    let mut tree = load_tree(input)?;
    let mut port = ai_client::port_from_settings(settings).map_err(|e| e.to_string())?;

    let report = converge(&mut tree, &mut *port, config).map_err(|e| e.to_string())?;
    save_tree(&tree, output.unwrap_or(input))?;

    if let Some(path) = report_path {
        std::fs::write(path, to_json(&report)?).map_err(|e| format!("Failed to write {:?}: {}", path, e))?;
    }
    if json {
        println!("{}", to_json(&report)?);
    } else {
        println!(
            "{} -> {} rows in {} rounds ({:?}, {}s)",
            report.initial_rows,
            report.final_rows,
            report.rounds.len(),
            report.stop_reason,
            (report.finished_at - report.started_at).num_seconds()
        );
    }
    Ok(())
}

fn handle_config(cmd: ConfigCommands, mut settings: Settings, path: &Path, json: bool) -> Result<(), String> {
    match cmd {
        ConfigCommands::List => {
            settings.openai_api_key = settings.openai_key().map(|k| settings::mask_key(&k));
            settings.anthropic_api_key = settings.anthropic_key().map(|k| settings::mask_key(&k));
            if json {
                println!("{}", to_json(&settings)?);
            } else {
                let value = serde_json::to_value(&settings).map_err(|e| e.to_string())?;
                if let Some(fields) = value.as_object() {
                    for (key, value) in fields {
                        let shown = match value {
                            serde_json::Value::Null => "not set".to_string(),
                            serde_json::Value::String(s) => s.clone(),
                            other => other.to_string(),
                        };
                        println!("{:<24}{}", key, shown);
                    }
                }
            }
        }
        ConfigCommands::Set { key, value } => {
            settings.set_field(&key, &value)?;
            settings.save(path)?;
            println!("Set {}", key);
        }
        ConfigCommands::Path => println!("{}", path.display()),
    }
    Ok(())
}
