//! Pipeline command - save, pause and list pipelines

use super::open_store;
use crate::cli::args::{OutputFormat, PipelineAction, PipelineArgs};
use crate::config::Config;
use crate::db::{PipelineRecord, Store};
use crate::error::{HangarError, HangarResult};
use crate::resource::types::PipelineDefinition;
use crate::ui::{self, UiContext};
use console::style;
use std::path::Path;
use tokio::fs;

/// Execute the pipeline command
pub async fn execute(args: PipelineArgs, config: &Config) -> HangarResult<()> {
    let store = open_store(config).await?;
    let result = match args.action {
        PipelineAction::Set { name, file } => set(&store, &name, &file).await,
        PipelineAction::Pause { name } => pause(&store, &name, true).await,
        PipelineAction::Unpause { name } => pause(&store, &name, false).await,
        PipelineAction::List { format } => list(&store, format).await,
    };
    store.close().await;
    result
}

async fn set(store: &Store, name: &str, file: &Path) -> HangarResult<()> {
    let ctx = UiContext::detect();
    let definition = read_definition(file).await?;
    let pipeline = store.save_pipeline(name, &definition).await?;

    ui::step_ok_detail(
        &ctx,
        &format!("Pipeline {} saved", pipeline.name),
        &format!(
            "{} resource(s), {} resource type(s), {} job(s)",
            definition.resources.len(),
            definition.resource_types.len(),
            definition.jobs.len()
        ),
    );
    Ok(())
}

async fn read_definition(file: &Path) -> HangarResult<PipelineDefinition> {
    let content = fs::read_to_string(file)
        .await
        .map_err(|e| HangarError::io(format!("reading {}", file.display()), e))?;
    toml::from_str(&content).map_err(|e| HangarError::ConfigInvalid {
        path: file.to_path_buf(),
        reason: e.to_string(),
    })
}

async fn pause(store: &Store, name: &str, paused: bool) -> HangarResult<()> {
    store.set_pipeline_paused(name, paused).await?;
    let ctx = UiContext::detect();
    let verb = if paused { "paused" } else { "unpaused" };
    ui::step_ok(&ctx, &format!("Pipeline {} {}", name, verb));
    Ok(())
}

async fn list(store: &Store, format: OutputFormat) -> HangarResult<()> {
    let pipelines = store.list_pipelines().await?;

    if pipelines.is_empty() {
        match format {
            OutputFormat::Json => println!("[]"),
            OutputFormat::Plain => {}
            OutputFormat::Table => {
                let ctx = UiContext::detect();
                ui::step_info(&ctx, "No pipelines");
            }
        }
        return Ok(());
    }

    match format {
        OutputFormat::Table => print_table(&pipelines),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&pipelines)?),
        OutputFormat::Plain => {
            for pipeline in &pipelines {
                println!("{}", pipeline.name);
            }
        }
    }
    Ok(())
}

fn print_table(pipelines: &[PipelineRecord]) {
    let ctx = UiContext::detect();
    ui::intro(&ctx, "Pipelines");

    println!(
        "{:<30} {:<10}",
        style("NAME").bold(),
        style("STATUS").bold()
    );
    println!("{}", "-".repeat(41));

    for pipeline in pipelines {
        let status = if pipeline.paused {
            style("paused").yellow()
        } else {
            style("active").green()
        };
        println!("{:<30} {:<10}", pipeline.name, status);
    }

    println!();
    println!("{} pipeline(s)", pipelines.len());
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn definition_errors_name_the_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("pipeline.toml");
        fs::write(&path, "[[resources]]\nname = 1\n").await.unwrap();

        match read_definition(&path).await.unwrap_err() {
            HangarError::ConfigInvalid { path: p, .. } => assert_eq!(p, path),
            other => panic!("expected ConfigInvalid, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn set_then_pause() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("pipeline.toml");
        fs::write(
            &path,
            "[[resources]]\nname = \"repo\"\ntype = \"git\"\nsource = { uri = \"https://example.com/repo.git\" }\n",
        )
        .await
        .unwrap();

        let store = Store::open_in_memory().await.unwrap();
        set(&store, "main", &path).await.unwrap();
        pause(&store, "main", true).await.unwrap();

        let pipeline = store.find_pipeline("main").await.unwrap().unwrap();
        assert!(pipeline.paused);
        assert!(matches!(
            pause(&store, "other", true).await,
            Err(HangarError::PipelineNotFound(_))
        ));
    }
}
