use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use labelscore_rs::config::Settings;
use labelscore_rs::labelstudio::{project_accuracy, LabelStudio};
use labelscore_rs::server::{run_server, Engine};
use labelscore_rs::stats::StatsStore;
use labelscore_rs::types::Task;
use labelscore_rs::*;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "labelscore", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
    /// Settings file (TOML)
    #[arg(long, global = true, env = "LABELSCORE_CONFIG")]
    config: Option<PathBuf>,
    /// Extra backends from an llms.json (`name -> sglang url`)
    #[arg(long, global = true)]
    llms: Option<PathBuf>,
    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Cmd {
    /// Print the JSON schema compiled from a labeling config
    Schema {
        #[arg(long)]
        label_config: PathBuf,
    },
    /// Print the prompt a backend would receive for some text
    Prompt {
        #[arg(long)]
        label_config: PathBuf,
        #[arg(long)]
        text: String,
    },
    /// Predict a JSONL file of tasks with every backend; score tasks that carry ground truth
    Predict {
        #[arg(long)]
        label_config: PathBuf,
        #[arg(long)]
        input_file: PathBuf,
        /// Defaults to stdout
        #[arg(long)]
        output_file: Option<PathBuf>,
        #[arg(long, default_value_t = 8)]
        concurrency: usize,
        /// Merge the resulting accuracy into the stats store under this key
        #[arg(long)]
        project: Option<String>,
    },
    /// Recompute accuracy for a Label Studio project
    Stats {
        #[arg(long)]
        project: u64,
        /// Store the table in the stats file
        #[arg(long)]
        save: bool,
    },
    /// Run the prediction / webhook / stats server
    Serve {
        #[arg(long)]
        addr: Option<String>,
        /// Labeling config used when /predict requests carry none
        #[arg(long)]
        label_config: Option<PathBuf>,
        #[arg(long, default_value_t = 8)]
        concurrency: usize,
    },
}

fn read_spec(path: &Path) -> Result<LabelingSpec> {
    let xml = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(LabelingSpec::parse(&xml).with_context(|| format!("parsing {}", path.display()))?)
}

fn read_tasks(path: &Path) -> Result<Vec<Task>> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    text.lines()
        .enumerate()
        .filter(|(_, l)| !l.trim().is_empty())
        .map(|(i, l)| serde_json::from_str(l).with_context(|| format!("{}:{}", path.display(), i + 1)))
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "labelscore_rs=debug,info" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(llms) = &cli.llms {
        settings.add_llms_json(llms)?;
    }

    match cli.cmd {
        Cmd::Schema { label_config } => {
            let schema = compile(&read_spec(&label_config)?)?;
            println!("{}", serde_json::to_string_pretty(&schema.json_schema())?);
        }
        Cmd::Prompt { label_config, text } => {
            let spec = read_spec(&label_config)?;
            let schema = compile(&spec)?;
            let hints = prompt::FieldHints::from_schema(&schema);
            println!("{}\n---\n{}", prompt::system_prompt(&schema), prompt::assemble(&spec, &hints, &text));
        }
        Cmd::Predict { label_config, input_file, output_file, concurrency, project } => {
            let session = Session::new(
                read_spec(&label_config)?,
                settings.build_backends()?,
                settings.generation.clone(),
            )?;
            let tasks = read_tasks(&input_file)?;
            let accuracy = SharedAccuracy::new(settings.matching);
            let results = session.predict_batch(&tasks, concurrency, Some(&accuracy)).await;

            let lines = results
                .iter()
                .map(serde_json::to_string)
                .collect::<Result<Vec<_>, _>>()?
                .join("\n");
            match &output_file {
                Some(path) => std::fs::write(path, lines + "\n")
                    .with_context(|| format!("writing {}", path.display()))?,
                None => println!("{lines}"),
            }

            let table = accuracy.into_inner();
            if !table.is_empty() {
                eprintln!("{}", serde_json::to_string_pretty(&table.report())?);
                if let Some(key) = project {
                    let store = StatsStore::new(&settings.server.stats_path);
                    store.merge(&key, &table).await?;
                    info!(project = %key, "merged accuracy into {}", store.path().display());
                }
            }
        }
        Cmd::Stats { project, save } => {
            let source = LabelStudio::from_settings(&settings.labelstudio)?;
            let stats = project_accuracy(&source, project, &settings.matching).await?;
            println!("{}", serde_json::to_string_pretty(&stats.table.report())?);
            if save {
                StatsStore::new(&settings.server.stats_path).save(&stats.key(), &stats.table).await?;
            }
        }
        Cmd::Serve { addr, label_config, concurrency } => {
            let mut engine = Engine::new(
                settings.build_backends()?,
                settings.generation.clone(),
                StatsStore::new(&settings.server.stats_path),
            )
            .with_rules(settings.matching)
            .with_concurrency(concurrency);
            if let Some(path) = &label_config {
                engine = engine.with_default_spec(read_spec(path)?)?;
            }
            match LabelStudio::from_settings(&settings.labelstudio) {
                Ok(ls) => engine = engine.with_source(Arc::new(ls)),
                Err(e) => info!("webhook stats refresh disabled: {e}"),
            }
            let addr = addr.unwrap_or_else(|| settings.server.bind.clone());
            run_server(engine, &addr).await?;
        }
    }
    Ok(())
}
