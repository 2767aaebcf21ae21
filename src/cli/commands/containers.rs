//! Containers command - show containers eligible for deletion

use super::open_store;
use crate::cli::args::{ListArgs, OutputFormat};
use crate::config::Config;
use crate::error::HangarResult;
use crate::lifecycle::{ContainerRecord, ContainerRepository, ContainerState, DeletionReason};
use crate::ui::{self, UiContext};
use console::style;
use serde::Serialize;

#[derive(Serialize)]
struct Candidate<'a> {
    #[serde(flatten)]
    container: &'a ContainerRecord,
    reasons: &'a [DeletionReason],
}

/// Execute the containers command
pub async fn execute(args: ListArgs, config: &Config) -> HangarResult<()> {
    let store = open_store(config).await?;
    let candidates = ContainerRepository::new(store.clone())
        .deletion_candidates()
        .await?;
    store.close().await;

    if candidates.is_empty() {
        match args.format {
            OutputFormat::Json => println!("[]"),
            OutputFormat::Plain => {}
            OutputFormat::Table => {
                let ctx = UiContext::detect();
                ui::step_info(&ctx, "No containers eligible for deletion");
            }
        }
        return Ok(());
    }

    match args.format {
        OutputFormat::Table => print_table(&candidates),
        OutputFormat::Json => print_json(&candidates)?,
        OutputFormat::Plain => print_plain(&candidates),
    }

    Ok(())
}

fn print_table(candidates: &[(ContainerRecord, Vec<DeletionReason>)]) {
    let ctx = UiContext::detect();
    ui::intro(&ctx, "Containers");

    println!(
        "{:<38} {:<12} {:<10} {:<30}",
        style("HANDLE").bold(),
        style("STATE").bold(),
        style("WORKER").bold(),
        style("REASONS").bold()
    );
    println!("{}", "-".repeat(90));

    for (container, reasons) in candidates {
        let state = match container.state {
            ContainerState::Creating => style("creating").yellow(),
            ContainerState::Created => style("created").green(),
            ContainerState::Destroying => style("destroying").dim(),
        };
        let reasons: Vec<&str> = reasons.iter().map(DeletionReason::as_label).collect();

        println!(
            "{:<38} {:<12} {:<10} {:<30}",
            container.handle,
            state,
            container.worker_name,
            reasons.join(",")
        );
    }

    println!();
    println!("{} container(s)", candidates.len());
}

fn print_json(candidates: &[(ContainerRecord, Vec<DeletionReason>)]) -> HangarResult<()> {
    let rows: Vec<Candidate<'_>> = candidates
        .iter()
        .map(|(container, reasons)| Candidate { container, reasons })
        .collect();
    println!("{}", serde_json::to_string_pretty(&rows)?);
    Ok(())
}

fn print_plain(candidates: &[(ContainerRecord, Vec<DeletionReason>)]) {
    for (container, _) in candidates {
        println!("{}", container.handle);
    }
}
