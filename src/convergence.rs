//! Fixed-point driver.
//!
//! A round repeats the sibling-merge pass until the row count stops
//! shrinking, then runs the cleanup (parent collapse plus single-child
//! collapse). Rounds repeat until the hierarchy has at most `row_floor`
//! rows. Both loops have hard ceilings, and a round that changes nothing
//! ends the run, so the driver always terminates.

use crate::decision::DecisionPort;
use crate::error::Result;
use crate::rows::{hierarchy_rows, row_count, write_rows};
use crate::settings::Settings;
use crate::taxonomy::{MergeStrategy, Taxonomy};
use crate::thresholds::recompute_thresholds;
use crate::walker::{merge_single_child_nodes, run_pass, Pass, PassReport};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct ConvergenceConfig {
    pub z_threshold: f64,
    pub row_floor: usize,
    pub max_iterations: usize,
    pub max_rounds: usize,
    pub strategy: MergeStrategy,
    /// Where per-iteration snapshots go. `None` keeps everything in memory.
    pub output_dir: Option<PathBuf>,
}

impl Default for ConvergenceConfig {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

impl ConvergenceConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            z_threshold: settings.z_threshold,
            row_floor: settings.row_floor,
            max_iterations: settings.max_iterations,
            max_rounds: settings.max_rounds,
            strategy: settings.merge_strategy(),
            output_dir: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Row count at or below the floor.
    FloorReached,
    /// A full round left the tree unchanged.
    Stalled,
    RoundLimit,
}

#[derive(Debug, Clone, Serialize)]
pub struct IterationReport {
    pub iteration: usize,
    pub rows: usize,
    pub merges: usize,
    pub removals: usize,
    pub failures: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoundReport {
    pub round: usize,
    pub iterations: Vec<IterationReport>,
    /// Whether the merge loop stopped at its ceiling instead of stabilizing.
    pub hit_iteration_limit: bool,
    pub collapsed: usize,
    pub rows_after_cleanup: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConvergenceReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub initial_rows: usize,
    pub final_rows: usize,
    pub stop_reason: StopReason,
    pub rounds: Vec<RoundReport>,
}

fn flush(port: &mut dyn DecisionPort) {
    if let Err(e) = port.flush() {
        log::warn!("Failed to persist decision cache: {}", e);
    }
}

struct Snapshots<'a> {
    dir: Option<&'a PathBuf>,
}

impl Snapshots<'_> {
    fn write(&self, name: &str, tree: &Taxonomy) -> Result<()> {
        let Some(dir) = self.dir else {
            return Ok(());
        };
        tree.save(&dir.join(format!("{}.json", name)))?;
        write_rows(&hierarchy_rows(tree), &dir.join(format!("{}_rows.json", name)))?;
        log::debug!("Saved snapshot {}", name);
        Ok(())
    }
}

/// Refine `tree` in place until it is small enough or stops changing.
pub fn converge(tree: &mut Taxonomy, port: &mut dyn DecisionPort, config: &ConvergenceConfig) -> Result<ConvergenceReport> {
    let started_at = Utc::now();
    let snapshots = Snapshots { dir: config.output_dir.as_ref() };
    let merge_pass = Pass::SiblingMerge(config.strategy.clone());

    recompute_thresholds(tree, config.z_threshold);
    let initial_rows = row_count(tree);
    let mut rows = initial_rows;
    let mut rounds = Vec::new();
    log::info!("Starting refinement at {} rows (floor {})", rows, config.row_floor);

    let stop_reason = loop {
        if rows <= config.row_floor {
            break StopReason::FloorReached;
        }
        if rounds.len() >= config.max_rounds {
            log::warn!("Stopping after {} rounds with {} rows", rounds.len(), rows);
            break StopReason::RoundLimit;
        }
        let round = rounds.len() + 1;
        log::info!("### Starting round {} ###", round);

        let mut iterations = Vec::new();
        let mut previous_rows = rows;
        let mut hit_iteration_limit = true;
        for iteration in 1..=config.max_iterations {
            let report: PassReport = run_pass(tree, &merge_pass, port);
            flush(port);
            let current = row_count(tree);
            recompute_thresholds(tree, config.z_threshold);
            snapshots.write(&format!("round{}_iter{}", round, iteration), tree)?;

            log::info!("Round {} iteration {}: {} rows", round, iteration, current);
            iterations.push(IterationReport {
                iteration,
                rows: current,
                merges: report.merges.len(),
                removals: report.removed.len(),
                failures: report.failures,
            });

            if current >= previous_rows {
                log::info!("Row count stabilized at {}", current);
                hit_iteration_limit = false;
                break;
            }
            previous_rows = current;
        }

        let collapse = run_pass(tree, &Pass::ParentCollapse, port);
        let single = merge_single_child_nodes(tree);
        recompute_thresholds(tree, config.z_threshold);
        let rows_after_cleanup = row_count(tree);
        snapshots.write(&format!("round{}_cleanup", round), tree)?;

        let changed = iterations.iter().any(|it| it.merges + it.removals > 0)
            || !collapse.merges.is_empty()
            || !single.is_empty();
        log::info!("### Round {} completed: {} rows ###", round, rows_after_cleanup);
        rounds.push(RoundReport {
            round,
            iterations,
            hit_iteration_limit,
            collapsed: collapse.merges.len() + single.len(),
            rows_after_cleanup,
        });
        rows = rows_after_cleanup;

        if !changed {
            log::info!("Round {} changed nothing, stopping", round);
            break if rows <= config.row_floor { StopReason::FloorReached } else { StopReason::Stalled };
        }
    };

    flush(port);
    log::info!("Refinement finished: {} -> {} rows ({:?})", initial_rows, rows, stop_reason);
    Ok(ConvergenceReport {
        started_at,
        finished_at: Utc::now(),
        initial_rows,
        final_rows: rows,
        stop_reason,
        rounds,
    })
}
