//! Volumes command - show volumes eligible for deletion

use super::open_store;
use crate::cli::args::{ListArgs, OutputFormat};
use crate::config::Config;
use crate::error::HangarResult;
use crate::lifecycle::{DeletionReason, VolumeRecord, VolumeRepository, VolumeState};
use crate::ui::{self, UiContext};
use console::style;
use serde::Serialize;

#[derive(Serialize)]
struct Candidate<'a> {
    #[serde(flatten)]
    volume: &'a VolumeRecord,
    reasons: &'a [DeletionReason],
}

/// Execute the volumes command
pub async fn execute(args: ListArgs, config: &Config) -> HangarResult<()> {
    let store = open_store(config).await?;
    let candidates = VolumeRepository::new(store.clone())
        .deletion_candidates()
        .await?;
    store.close().await;

    if candidates.is_empty() {
        match args.format {
            OutputFormat::Json => println!("[]"),
            OutputFormat::Plain => {}
            OutputFormat::Table => {
                let ctx = UiContext::detect();
                ui::step_info(&ctx, "No volumes eligible for deletion");
            }
        }
        return Ok(());
    }

    match args.format {
        OutputFormat::Table => print_table(&candidates),
        OutputFormat::Json => {
            let rows: Vec<Candidate<'_>> = candidates
                .iter()
                .map(|(volume, reasons)| Candidate { volume, reasons })
                .collect();
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        OutputFormat::Plain => {
            for (volume, _) in &candidates {
                println!("{}", volume.handle);
            }
        }
    }

    Ok(())
}

fn print_table(candidates: &[(VolumeRecord, Vec<DeletionReason>)]) {
    let ctx = UiContext::detect();
    ui::intro(&ctx, "Volumes");

    println!(
        "{:<38} {:<12} {:<8} {:<30}",
        style("HANDLE").bold(),
        style("STATE").bold(),
        style("PARENT").bold(),
        style("REASONS").bold()
    );
    println!("{}", "-".repeat(88));

    for (volume, reasons) in candidates {
        let state = match volume.state {
            VolumeState::Creating => style("creating").yellow(),
            VolumeState::Created => style("created").green(),
            VolumeState::Destroying => style("destroying").dim(),
        };
        let parent = volume
            .parent_id
            .map_or_else(|| "-".to_string(), |id| id.to_string());
        let reasons: Vec<&str> = reasons.iter().map(DeletionReason::as_label).collect();

        println!(
            "{:<38} {:<12} {:<8} {:<30}",
            volume.handle,
            state,
            parent,
            reasons.join(",")
        );
    }

    println!();
    println!("{} volume(s)", candidates.len());
}
