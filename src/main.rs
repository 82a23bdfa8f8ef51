//! Autotune CLI - Run tuning and batch jobs from JSON job files.

use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::{Parser, Subcommand};
use log::{error, info, warn};

use autotune::{
    compute::{
        BatchRunner, ClassifierRegistry, DatasetRegistry, EvaluationOptions, Evaluator,
        ProjectorRegistry, compile_job,
        evolution::{JobReport, TuningEngine},
        prepare, render_summaries,
    },
    schema::{Configuration, JobConfig},
    store::{CompressionType, ResultCache},
};

#[derive(Parser)]
#[command(name = "autotune", about = "Cached, cross-validated hyperparameter search", version)]
struct Cli {
    /// Cache directory
    #[arg(long, default_value = "cache", global = true)]
    cache_dir: PathBuf,

    /// Stop at the first configuration error
    #[arg(short = 'b', long = "strict", visible_alias = "break", global = true)]
    strict: bool,

    /// Read from the cache but never write to it
    #[arg(long, global = true)]
    no_cache_write: bool,

    /// Compress newly written cache payloads (needs the `lz4` feature)
    #[arg(long, global = true)]
    compress: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evolve the classifier configurations of a job
    Tune {
        /// Job file
        job: PathBuf,
        /// Random seed for reproducible runs
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Run every configuration of one or more jobs once
    Batch {
        /// Job files
        #[arg(required = true)]
        jobs: Vec<PathBuf>,
    },
    /// Expand meta descriptors and print the concrete job
    Compile {
        /// Job file
        job: PathBuf,
    },
    /// Inspect or clean the cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// List all entries
    List,
    /// Show stored arguments grouped by role
    Content,
    /// Delete entries starting with a prefix
    Delete {
        /// Key prefix, e.g. a dataset fingerprint
        prefix: String,
    },
    /// Delete all classifier projections
    DeleteClfProjections,
    /// Delete the whole cache
    Clear,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        error!("{e}");
        let mut source = e.source();
        while let Some(cause) = source {
            error!("  caused by: {cause}");
            source = cause.source();
        }
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    let mut cache = ResultCache::open(&cli.cache_dir)?;
    if cli.compress {
        cache = cache.with_compression(CompressionType::Lz4);
    }

    match &cli.command {
        Commands::Tune { job, seed } => {
            let cancelled = listen_for_ctrl_c();
            tune(&cli, &cache, job, *seed, cancelled)
        }
        Commands::Batch { jobs } => {
            let cancelled = listen_for_ctrl_c();
            batch(&cli, &cache, jobs, cancelled)
        }
        Commands::Compile { job } => {
            let compiled = compile_job(&JobConfig::load(job)?, cli.strict)?;
            println!("{}", serde_json::to_string_pretty(&compiled.job)?);
            Ok(())
        }
        Commands::Cache { action } => cache_command(&cache, action),
    }
}

/// Set a flag on the first Ctrl-C; exit on the second.
fn listen_for_ctrl_c() -> Arc<AtomicBool> {
    let cancelled = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&cancelled);

    std::thread::spawn(move || {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => {
                warn!("Cannot listen for Ctrl-C: {e}");
                return;
            }
        };

        runtime.block_on(async move {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            warn!("Ctrl-C received, stopping after the current evaluation (press again to exit)");
            flag.store(true, Ordering::Relaxed);

            if tokio::signal::ctrl_c().await.is_ok() {
                std::process::exit(130);
            }
        });
    });

    cancelled
}

fn tune(
    cli: &Cli,
    cache: &ResultCache,
    job_path: &Path,
    seed: Option<u64>,
    cancelled: Arc<AtomicBool>,
) -> Result<(), Box<dyn Error>> {
    info!("Reading from {}", job_path.display());
    let job = compile_job(&JobConfig::load(job_path)?, cli.strict)?.job;
    let write_to_cache = !cli.no_cache_write;

    let datasets = DatasetRegistry::with_builtins();
    let data = prepare(&job.data, &datasets, Some(cache), write_to_cache)?;

    let classifiers = ClassifierRegistry::with_builtins();
    let evaluator = Evaluator::new(&data, &classifiers, Some(cache));
    let options = EvaluationOptions {
        write_to_cache,
        ..evaluator.options()
    };
    let mut evaluator = evaluator.with_options(options);

    let search = job.search_config(seed);
    let report = JobReport::for_job(job_path);
    report.begin(&job.data.title, job_path, &search)?;

    let population = search.population;
    let mut engine =
        TuningEngine::from_configurations(search, &job.classifiers)?.with_cancel_handle(cancelled);
    let outcome = engine.run_with_callback(&mut evaluator, |record| {
        if let Err(e) = report.append_round(record, population) {
            warn!("{e}");
        }
    })?;
    report.append_history(&outcome.history)?;

    let best: Vec<Configuration> = outcome.population.iter().map(|m| m.config.clone()).collect();
    JobReport::write_results(job_path, &best)?;

    if let Some(best) = outcome.best() {
        info!(
            "Best configuration: {} (test accuracy {:.5})",
            best.title,
            best.result.accuracy()
        );
    }
    Ok(())
}

fn batch(
    cli: &Cli,
    cache: &ResultCache,
    jobs: &[PathBuf],
    cancelled: Arc<AtomicBool>,
) -> Result<(), Box<dyn Error>> {
    let datasets = DatasetRegistry::with_builtins();
    let classifiers = ClassifierRegistry::with_builtins();
    let projectors = ProjectorRegistry::with_builtins();
    let runner = BatchRunner::new(&datasets, &classifiers, &projectors, cache)
        .strict(cli.strict)
        .with_cancel_handle(cancelled);

    let run = runner.run_all(jobs);
    if !run.summaries.is_empty() || run.error.is_none() {
        println!("{}", render_summaries(&run.summaries));
    }
    match run.error {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

fn cache_command(cache: &ResultCache, action: &CacheAction) -> Result<(), Box<dyn Error>> {
    match action {
        CacheAction::List => {
            for key in cache.list_keys()? {
                println!("{key}");
            }
        }
        CacheAction::Content => {
            println!("{}", serde_json::to_string_pretty(&cache.content()?)?);
        }
        CacheAction::Delete { prefix } => {
            let summary = cache.delete_by_prefix(prefix)?;
            println!("Deleted {} files, {} errors", summary.deleted, summary.errors);
        }
        CacheAction::DeleteClfProjections => {
            let summary = cache.delete_classifier_projections()?;
            println!("Deleted {} files, {} errors", summary.deleted, summary.errors);
        }
        CacheAction::Clear => cache.clear()?,
    }
    Ok(())
}
