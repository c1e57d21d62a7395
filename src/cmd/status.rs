//! Checkpoint inspection and reset: `waypoint status`, `waypoint reset`.

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;

use waypoint::artifacts::{self, ArtifactStore, FsArtifactStore, Scope, read_json};
use waypoint::config::PIPELINE_DIR;
use waypoint::milestone::Manifest;
use waypoint::state::{MilestoneStatus, StateManager};

fn store_for(project_dir: &Path) -> Arc<FsArtifactStore> {
    Arc::new(FsArtifactStore::new(project_dir.join(PIPELINE_DIR)))
}

pub fn cmd_status(project_dir: &Path) -> Result<()> {
    let store = store_for(project_dir);

    println!();
    println!("Waypoint Pipeline Status");
    println!("========================");
    println!();

    if !store.exists(Scope::Pipeline, artifacts::MANIFEST) {
        println!("Manifest: Not parsed");
        println!();
        println!("Run 'waypoint run <REQUIREMENTS>' to start.");
        println!();
        return Ok(());
    }

    let manifest: Manifest = read_json(store.as_ref(), Scope::Pipeline, artifacts::MANIFEST)?;
    println!(
        "Project:  {} ({})",
        manifest.project.name, manifest.project.language
    );
    println!("Manifest: {} milestones", manifest.len());

    let state = StateManager::new(store.clone()).load()?;
    let Some(state) = state else {
        println!("Execution: Not started");
        println!();
        return Ok(());
    };

    println!(
        "Progress: {}/{} completed, ${:.2} spent",
        state.completed_count(),
        manifest.len(),
        state.total_cost
    );
    println!(
        "Updated:  {}",
        state.updated_at.format("%Y-%m-%d %H:%M:%S")
    );
    println!();
    println!(
        "{:<4} {:<10} {:<28} {:<12} {:<9} Cost",
        "#", "Version", "Name", "Status", "Attempts"
    );
    println!(
        "{:<4} {:<10} {:<28} {:<12} {:<9} ----",
        "----", "-------", "----", "------", "--------"
    );

    for milestone in &manifest.milestones {
        let ms = state.milestone(milestone.id);
        let status = ms.map(|m| m.status).unwrap_or_default();
        let styled = match status {
            MilestoneStatus::Completed => console::style(format!("{:<12}", status)).green(),
            MilestoneStatus::Failed => console::style(format!("{:<12}", status)).red(),
            MilestoneStatus::InProgress => console::style(format!("{:<12}", status)).yellow(),
            MilestoneStatus::Pending => console::style(format!("{:<12}", status)).dim(),
        };
        println!(
            "{:<4} {:<10} {:<28} {} {:<9} ${:.2}",
            format!("{:02}", milestone.id),
            milestone.version,
            waypoint::util::truncate_str(&milestone.name, 28),
            styled,
            ms.map(|m| m.attempts).unwrap_or(0),
            ms.map(|m| m.cost).unwrap_or(0.0)
        );
    }

    if let Some(index) = state.failed_milestone() {
        println!();
        println!(
            "{} milestone {:02} exhausted its retries. Rerun with --retry-failed.",
            console::style("Blocked:").red().bold(),
            index
        );
    } else if state.is_finished() {
        println!();
        println!("{} every milestone completed.", console::style("Done:").green().bold());
    }
    println!();
    Ok(())
}

pub fn cmd_reset(project_dir: &Path, force: bool, all: bool) -> Result<()> {
    use dialoguer::Confirm;

    if !force {
        let prompt = if all {
            "This will remove the checkpoint, manifest and every milestone artifact. Are you sure?"
        } else {
            "This will reset all progress. Are you sure?"
        };
        let confirm = Confirm::new()
            .with_prompt(prompt)
            .default(false)
            .interact()
            .unwrap_or(false);

        if !confirm {
            println!("Reset cancelled");
            return Ok(());
        }
    }

    let store = store_for(project_dir);
    StateManager::new(store.clone()).reset()?;

    if all {
        store.remove(Scope::Pipeline, artifacts::MANIFEST)?;
        store.remove(Scope::Pipeline, artifacts::REPORT)?;
        store.clear_milestones()?;
        let log_dir = store.root().join("logs");
        if log_dir.exists() {
            std::fs::remove_dir_all(&log_dir).ok();
        }
    }

    println!("Reset complete");
    Ok(())
}
