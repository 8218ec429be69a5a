use anyhow::Result;
use clap::Parser;
use std::sync::Arc;

use question_bank::bank_service::{BankService, RehashReport};
use question_bank::{Database, EntityStore};

/// Recomputes the stored content hash of every question.
///
/// Needed after the hashing rules change or after rows were edited outside
/// the bank service.
#[derive(Parser)]
#[command(name = "rehash_questions")]
struct Args {
    /// Report what would change without writing
    #[arg(long)]
    dry_run: bool,

    #[arg(long, env = "DATABASE_URL", default_value = "sqlite:question_bank.db")]
    database_url: String,
}

const LISTED_IDS: usize = 10;

fn summary_lines(report: &RehashReport) -> Vec<String> {
    let mut lines = vec!["\n=== Rehash Summary ===".to_string(), format!("Questions examined: {}", report.examined)];

    if report.dry_run {
        lines.push(format!("Hashes that WOULD BE updated: {}", report.changed_question_ids.len()));
        lines.push("\n** DRY RUN MODE - No changes were made **".to_string());
    } else {
        lines.push(format!("Hashes updated: {}", report.changed_question_ids.len()));
    }

    for id in report.changed_question_ids.iter().take(LISTED_IDS) {
        lines.push(format!("  - {}", id));
    }
    if report.changed_question_ids.len() > LISTED_IDS {
        lines.push(format!("  ... and {} more", report.changed_question_ids.len() - LISTED_IDS));
    }

    lines
}

fn print_summary(report: &RehashReport) {
    for line in summary_lines(report) {
        println!("{}", line);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    println!("=== Question Rehash Tool ===");
    if args.dry_run {
        println!("** RUNNING IN DRY-RUN MODE **");
    }
    println!("\nConnecting to database: {}", args.database_url);

    let db = Database::new(&args.database_url).await?;
    let store: Arc<dyn EntityStore> = Arc::new(db);
    let service = BankService::new(store);

    let report = service.rehash_questions(args.dry_run).await?;
    print_summary(&report);

    if args.dry_run && !report.changed_question_ids.is_empty() {
        println!("\nTo apply the changes, run:");
        println!("cargo run --bin rehash_questions");
    }

    Ok(())
}
