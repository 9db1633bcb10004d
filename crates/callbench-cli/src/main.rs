use anyhow::{Context, Result};
use callbench_core::config::{load_settings, SettingsLoader};
use callbench_core::dataset::{load_examples, sample_examples};
use callbench_core::report::RunReport;
use callbench_core::tools::{responses_equal, ToolTable};
use callbench_core::worker::run_stdio_worker;
use callbench_core::{
    CheckpointStore, DispatchProgress, Dispatcher, EvaluationContext, ExampleWorker,
    InProcessWorker, ModelRegistry, SubprocessWorker, ToolInvoker, ToolRegistry,
};
use clap::{Args, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use log::LevelFilter;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const DEBUG_SAMPLE_SIZE: usize = 10;

#[derive(Parser, Debug)]
#[clap(
    name = "callbench",
    author,
    version = "0.1.0",
    about = "Multi-turn function-calling evaluation"
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,

    #[clap(long, short, global = true, default_value = "info")]
    log_level: String,

    #[clap(long, global = true, help = "Write logs to this file instead of stderr")]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Evaluate a model over a dataset, resuming from earlier results
    Run {
        #[clap(long)]
        model_name: String,

        #[clap(long, default_value = "data/ComplexFuncBench.jsonl")]
        input_file: PathBuf,

        #[clap(long, default_value = "full-1000")]
        exp_name: String,

        #[clap(long, default_value_t = 1, help = "Number of examples evaluated concurrently")]
        proc_num: usize,

        #[clap(long, help = "Evaluate a random sample of 10 examples")]
        debug: bool,

        #[clap(long, value_enum, default_value_t = WorkerMode::Task)]
        worker_mode: WorkerMode,

        #[clap(long, default_value = "result")]
        output_root: PathBuf,

        #[clap(flatten)]
        engine: EngineArgs,
    },
    /// Evaluate one example read from stdin and print the outcome
    #[clap(hide = true)]
    Worker {
        #[clap(long)]
        model_name: String,

        #[clap(long)]
        log_dir: Option<PathBuf>,

        #[clap(flatten)]
        engine: EngineArgs,
    },
    /// Summarize a result file
    Report { file: PathBuf },
    /// Execute two calls to one tool and compare the responses
    Probe {
        #[clap(long)]
        tool: String,

        #[clap(long, help = "Arguments of the first call, as JSON")]
        left: String,

        #[clap(long, help = "Arguments of the second call, as JSON")]
        right: String,

        #[clap(long, default_value = "utils/tool_info.json")]
        tool_table: PathBuf,

        #[clap(long)]
        settings: Option<PathBuf>,
    },
    /// List the models the registry can evaluate
    Models,
}

#[derive(Args, Debug, Clone)]
struct EngineArgs {
    #[clap(long, default_value = "utils/tool_info.json")]
    tool_table: PathBuf,

    #[clap(long, help = "YAML settings file")]
    settings: Option<PathBuf>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum WorkerMode {
    /// One tokio task per example
    Task,
    /// One child process per example
    Process,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.log_file.as_deref())?;

    match cli.command {
        Commands::Run {
            model_name,
            input_file,
            exp_name,
            proc_num,
            debug,
            worker_mode,
            output_root,
            engine,
        } => {
            let options = RunOptions {
                model_name,
                input_file,
                exp_name,
                proc_num,
                debug,
                worker_mode,
                output_root,
                log_level: cli.log_level,
            };
            run(options, engine).await
        }
        Commands::Worker {
            model_name,
            log_dir,
            engine,
        } => {
            let ctx = build_context(model_name, &engine, log_dir)?;
            run_stdio_worker(Arc::new(ctx))
                .await
                .context("worker failed")
        }
        Commands::Report { file } => report(&file),
        Commands::Probe {
            tool,
            left,
            right,
            tool_table,
            settings,
        } => probe(&tool, &left, &right, &tool_table, settings.as_deref()).await,
        Commands::Models => {
            for name in ModelRegistry::with_default_models().model_names() {
                println!("{}", name);
            }
            Ok(())
        }
    }
}

fn init_logging(level: &str, log_file: Option<&Path>) -> Result<()> {
    let level_filter = level.parse().unwrap_or(LevelFilter::Info);
    let mut builder = env_logger::Builder::new();
    builder.filter_level(level_filter);

    if let Some(path) = log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open log file {}", path.display()))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }

    builder.init();
    Ok(())
}

struct RunOptions {
    model_name: String,
    input_file: PathBuf,
    exp_name: String,
    proc_num: usize,
    debug: bool,
    worker_mode: WorkerMode,
    output_root: PathBuf,
    log_level: String,
}

fn build_context(
    model_name: String,
    engine: &EngineArgs,
    log_dir: Option<PathBuf>,
) -> Result<EvaluationContext> {
    let registry = ModelRegistry::with_default_models();
    registry.get(&model_name)?;

    let settings = load_settings(engine.settings.as_deref())?;
    let table = ToolTable::load(&engine.tool_table)
        .with_context(|| format!("Failed to load tool table {}", engine.tool_table.display()))?;
    let tools = ToolRegistry::from_table(&table, &settings.tool_api)?;
    log::info!(
        "Loaded {} tools from {}",
        tools.tool_count(),
        engine.tool_table.display()
    );

    Ok(EvaluationContext {
        model_name,
        settings,
        registry: Arc::new(registry),
        tools: Arc::new(tools),
        log_dir,
    })
}

async fn run(options: RunOptions, engine: EngineArgs) -> Result<()> {
    let model_dir = options.output_root.join(&options.model_name);
    let output_path = model_dir.join(format!("{}.jsonl", options.exp_name));
    let log_dir = model_dir.join(&options.exp_name).join("logs");

    let ctx = build_context(options.model_name.clone(), &engine, Some(log_dir.clone()))?;

    let mut examples = load_examples(&options.input_file)
        .with_context(|| format!("Failed to load {}", options.input_file.display()))?;
    if options.debug {
        examples = sample_examples(examples, DEBUG_SAMPLE_SIZE);
        log::info!("Debug run over {} sampled examples", examples.len());
    }

    let worker: Arc<dyn ExampleWorker> = match options.worker_mode {
        WorkerMode::Task => Arc::new(InProcessWorker::new(Arc::new(ctx))),
        WorkerMode::Process => {
            let program = std::env::current_exe().context("Cannot locate the callbench binary")?;
            let mut args = vec![
                "--log-level".to_string(),
                options.log_level.clone(),
                "worker".to_string(),
                "--model-name".to_string(),
                options.model_name.clone(),
                "--tool-table".to_string(),
                engine.tool_table.display().to_string(),
                "--log-dir".to_string(),
                log_dir.display().to_string(),
            ];
            if let Some(settings) = &engine.settings {
                args.push("--settings".to_string());
                args.push(settings.display().to_string());
            }
            Arc::new(SubprocessWorker::new(program, args))
        }
    };

    let store = Arc::new(CheckpointStore::new(&output_path));
    let dispatcher = Dispatcher::new(store, worker).with_concurrency(options.proc_num);

    let progress_bar = ProgressBar::new(0);
    progress_bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
            .context("Invalid progress template")?
            .progress_chars("#>-"),
    );

    let summary = dispatcher
        .run_with_progress(examples, |progress| match progress {
            DispatchProgress::Started { total, skipped } => {
                progress_bar.set_length(total as u64);
                progress_bar.set_message(format!("{} already done", skipped));
            }
            DispatchProgress::ExampleFinished {
                id,
                recorded,
                completed,
                ..
            } => {
                progress_bar.set_position(completed as u64);
                if !recorded {
                    progress_bar.set_message(format!("dropped {}", id));
                }
            }
        })
        .await?;
    progress_bar.finish_and_clear();

    println!(
        "{}: {} recorded, {} dropped, {} already done, {} duplicate ids",
        options.model_name,
        summary.recorded,
        summary.dropped.len(),
        summary.skipped,
        summary.duplicates
    );
    for dropped in &summary.dropped {
        println!("  dropped {}: {}", dropped.id, dropped.reason);
    }
    println!("Results in {}", output_path.display());
    Ok(())
}

fn report(file: &Path) -> Result<()> {
    let records = CheckpointStore::new(file).load_records()?;
    if records.is_empty() {
        anyhow::bail!("No records in {}", file.display());
    }
    print!("{}", RunReport::from_records(&records));
    Ok(())
}

async fn probe(
    tool: &str,
    left: &str,
    right: &str,
    tool_table: &Path,
    settings: Option<&Path>,
) -> Result<()> {
    let left: Value = serde_json::from_str(left).context("--left is not valid JSON")?;
    let right: Value = serde_json::from_str(right).context("--right is not valid JSON")?;

    let api = SettingsLoader::load_tool_api(settings)?;
    let table = ToolTable::load(tool_table)
        .with_context(|| format!("Failed to load tool table {}", tool_table.display()))?;
    let tools = ToolRegistry::from_table(&table, &api)?;

    let left_response = tools.call(tool, &left).await.unwrap_or_else(|e| e.to_observation());
    let right_response = tools.call(tool, &right).await.unwrap_or_else(|e| e.to_observation());

    println!("left:  {}", left_response);
    println!("right: {}", right_response);
    println!("equal: {}", responses_equal(&left_response, &right_response));
    Ok(())
}
