// SPDX-License-Identifier: MIT

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use serde_json::Value;
use std::path::PathBuf;

use voxant_rs::voxant::engine::{ExecutorSettings, RunStatus};
use voxant_rs::voxant::server::{self, AppState};
use voxant_rs::voxant::workflow::builder::builtin_builder;
use voxant_rs::voxant::workflow::registry::TaskRegistry;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a workflow file and print its events as JSON lines
    Run {
        /// Path to the workflow file
        #[arg(short, long)]
        file: String,

        /// Run config as a JSON object
        #[arg(short, long, default_value = "{}")]
        config: String,
    },
    /// Serve the workflows of a directory over HTTP
    Serve {
        #[arg(short, long, default_value_t = 8080)]
        port: u16,

        /// Directory holding workflow YAML files
        #[arg(short, long, default_value = "workflows")]
        dir: PathBuf,
    },
    /// Check a workflow file without running it
    Validate {
        #[arg(short, long)]
        file: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::init();

    let args = Args::parse();
    let settings = ExecutorSettings::from_env();

    match args.command {
        Commands::Run { file, config } => {
            let config: Value =
                serde_json::from_str(&config).context("--config must be a JSON object")?;
            let compiled = builtin_builder().await.build(&file).await?;
            let executor = compiled.into_executor(settings);

            log::info!("Running workflow: {}", executor.context().name());
            let handle = executor.execute(config)?;
            let mut events = handle.events();
            while let Some(event) = events.next().await {
                println!("{}", serde_json::to_string(&event)?);
            }

            let status = handle.wait().await;
            println!("{}", serde_json::to_string(&status)?);
            if !matches!(status, RunStatus::Completed { .. }) {
                anyhow::bail!("run {} {}", handle.id(), status);
            }
        }
        Commands::Serve { port, dir } => {
            let state = AppState::new(dir, settings, TaskRegistry::with_builtins().await);
            server::serve(port, state).await?;
        }
        Commands::Validate { file } => {
            let compiled = builtin_builder().await.build(&file).await?;
            let ctx = &compiled.context;
            println!(
                "Workflow '{}' is valid: {} step(s), entry: {:?}",
                ctx.name(),
                ctx.steps().len(),
                ctx.workflow().entry_steps()
            );
        }
    }

    Ok(())
}
