use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use question_bank::compact_export::export_compact;
use question_bank::config::LoggingConfig;
use question_bank::{
    BankService, Config, ContributionMerger, Database, EntityStore, FsResourceFetcher, MergeOptions, PracticeService,
    ResourceCache, ReviewScheduler, bank_transfer, build_contribution_pack, log_service_error, log_system_event,
};

#[derive(Parser)]
#[command(name = "question-bank", version, about = "Local study-question bank")]
struct Cli {
    /// Overrides DATABASE_URL
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Merge a contribution pack into the bank
    ImportPack { file: PathBuf },
    /// Write a contribution pack for the given subjects
    ExportPack {
        file: PathBuf,
        #[arg(required = true)]
        subject_ids: Vec<String>,
        #[arg(long)]
        created_by: Option<String>,
    },
    /// Load a bank backup with fresh ids
    ImportBank { file: PathBuf },
    /// Write a full bank backup
    ExportBank { file: PathBuf },
    /// Write the compact per-subject projection
    ExportCompact { file: PathBuf },
    /// List subjects
    Subjects,
    /// List questions due today for a subject
    Due { subject_id: String },
    /// Show static resources for subjects, all subjects when none are named
    Resources { subjects: Vec<String> },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let mut config = Config::from_env()?;
    if let Some(url) = cli.database_url {
        config.database.url = url;
    }

    let _guard = setup_logging(&config.logging)?;
    config.validate()?;
    log_system_event!(startup, component = "cli", "question bank starting");

    let db = Database::new(&config.database.url)
        .await
        .with_context(|| format!("failed to open {}", config.database.url))?;
    let store: Arc<dyn EntityStore> = Arc::new(db);

    if let Err(e) = run(cli.command, &config, store).await {
        log_service_error!("cli", "run_command", error = e);
        return Err(e);
    }

    log_system_event!(shutdown, component = "cli", "question bank finished");
    Ok(())
}

async fn run(command: Command, config: &Config, store: Arc<dyn EntityStore>) -> Result<()> {
    match command {
        Command::ImportPack { file } => {
            let json = fs::read_to_string(&file).await?;
            let merger = ContributionMerger::with_options(
                Arc::clone(&store),
                MergeOptions {
                    max_image_bytes: config.import.max_image_bytes,
                },
            );
            let summary = merger.merge_json(&json).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::ExportPack {
            file,
            subject_ids,
            created_by,
        } => {
            let pack = build_contribution_pack(store.as_ref(), &subject_ids, created_by).await?;
            fs::write(&file, pack.to_json()?).await?;
            println!("Wrote {} questions to {}", pack.questions.len(), file.display());
        }
        Command::ImportBank { file } => {
            let json = fs::read_to_string(&file).await?;
            let summary = bank_transfer::import_bank(store.as_ref(), &json).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::ExportBank { file } => {
            let snapshot = bank_transfer::export_bank(store.as_ref()).await?;
            fs::write(&file, snapshot.to_json()?).await?;
            println!("Wrote {} questions to {}", snapshot.questions.len(), file.display());
        }
        Command::ExportCompact { file } => {
            let compact = export_compact(store.as_ref()).await?;
            fs::write(&file, serde_json::to_string(&compact)?).await?;
            println!("Wrote {} subjects to {}", compact.len(), file.display());
        }
        Command::Subjects => {
            let service = BankService::new(Arc::clone(&store));
            for subject in service.list_subjects().await? {
                let count = service.list_questions(&subject.id).await?.len();
                println!("{}\t{}\t{} questions", subject.id, subject.name, count);
            }
        }
        Command::Due { subject_id } => {
            let practice = PracticeService::new(Arc::clone(&store));
            let today = ReviewScheduler::today();
            for question in practice.due_questions(&subject_id, today).await? {
                let due = question
                    .stats
                    .next_review_at
                    .map(|d| d.to_string())
                    .unwrap_or_else(|| "new".to_string());
                println!("{}\t{}\t{}\t{}", question.id, question.question_type(), due, question.prompt);
            }
        }
        Command::Resources { subjects } => {
            let cache = ResourceCache::new(Arc::new(FsResourceFetcher::new(&config.resources.directory)));
            let names = if subjects.is_empty() {
                store.list_subjects().await?.into_iter().map(|s| s.name).collect()
            } else {
                subjects
            };
            for name in names {
                let resources = cache.get_or_fetch(&name).await?;
                let files = resources
                    .file_index
                    .as_ref()
                    .map(|f| f.len().to_string())
                    .unwrap_or_else(|| "-".to_string());
                let info = resources.extra_info.as_ref().map(|v| v.to_string()).unwrap_or_default();
                println!("{}\t{}\t{} files\t{}", name, resources.slug, files, info);
            }
        }
    }

    Ok(())
}

fn setup_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::fmt;

    let env_filter = EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("info"));

    // Logs go to stderr so command output on stdout stays pipeable.
    let console_layer = config.console_enabled.then(|| {
        fmt::layer()
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .with_ansi(true)
            .with_writer(std::io::stderr)
    });

    let (file_layer, guard) = if config.file_enabled {
        std::fs::create_dir_all(&config.log_directory).unwrap_or_else(|e| {
            eprintln!("Warning: Could not create log directory {}: {}", config.log_directory, e);
        });
        let file_appender = tracing_appender::rolling::daily(&config.log_directory, "question-bank.log");
        let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);
        let layer = fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_ansi(false)
            .with_writer(non_blocking_file);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    info!(
        file_enabled = config.file_enabled,
        log_directory = %config.log_directory,
        "Logging initialized"
    );

    Ok(guard)
}
