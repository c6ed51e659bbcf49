use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{ArgGroup, Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use grade_alerts::batch::BatchRegisterWorkflow;
use grade_alerts::config::{Settings, SubmitterArgs};
use grade_alerts::db::{self, PgStore};
use grade_alerts::directory::Directories;
use grade_alerts::http::{AcademicServiceClient, PeopleServiceClient, ServiceDirectory};
use grade_alerts::import;
use grade_alerts::models::GradeRequest;
use grade_alerts::store::{OutboxStore, Stores};
use grade_alerts::workflow::RegisterGradeWorkflow;

#[derive(Parser)]
#[command(name = "grade-alerts")]
#[command(about = "Grade registration with low-grade guardian alerts", long_about = None)]
struct Cli {
    #[command(flatten)]
    settings: Settings,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load the standard evaluation types
    Seed,
    /// Register a single grade
    #[command(group(
        ArgGroup::new("value")
            .args(["numeric", "literal"])
            .required(true)
            .multiple(false)
    ))]
    Register {
        #[command(flatten)]
        submitter: SubmitterArgs,
        #[arg(long)]
        enrollment: String,
        #[arg(long)]
        evaluation_type: String,
        #[arg(long)]
        period: String,
        #[arg(long)]
        scale: String,
        #[arg(long)]
        numeric: Option<f64>,
        #[arg(long)]
        literal: Option<String>,
        #[arg(long)]
        weight: Option<f64>,
        #[arg(long)]
        notes: Option<String>,
        #[arg(long)]
        column: Option<String>,
    },
    /// Register every grade of a gradebook CSV export
    Import {
        #[command(flatten)]
        submitter: SubmitterArgs,
        #[arg(long)]
        csv: PathBuf,
        #[arg(long)]
        idempotency_key: Option<String>,
    },
    /// List notifications waiting for delivery
    Pending {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

fn build_workflow(settings: &Settings, pool: PgPool) -> anyhow::Result<RegisterGradeWorkflow> {
    let timeout = settings.lookup_timeout();
    let directory = ServiceDirectory {
        people: PeopleServiceClient::new(&settings.people_service_url, timeout)?,
        academic: AcademicServiceClient::new(&settings.academic_service_url, timeout)?,
    };

    Ok(RegisterGradeWorkflow::new(
        Stores::shared(Arc::new(PgStore::new(pool))),
        Directories::shared(Arc::new(directory), timeout),
    ))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    let settings = cli.settings;

    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .connect(&settings.database_url)
        .await
        .context("failed to connect to Postgres")?;
    info!("Connected to database");

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Evaluation types inserted.");
        }
        Commands::Register {
            submitter,
            enrollment,
            evaluation_type,
            period,
            scale,
            numeric,
            literal,
            weight,
            notes,
            column,
        } => {
            let workflow = build_workflow(&settings, pool)?;
            let request = GradeRequest {
                enrollment_id: enrollment,
                evaluation_type_id: evaluation_type,
                period_id: period,
                scale_id: scale,
                numeric_value: numeric,
                literal_value: literal,
                weight,
                notes,
                grading_column: column,
            };

            let registration = workflow.submit(&submitter.submitter(), &request).await?;
            println!("{}", serde_json::to_string_pretty(&registration)?);
        }
        Commands::Import {
            submitter,
            csv,
            idempotency_key,
        } => {
            let batch = import::read_batch_file(&csv, idempotency_key)?;
            let workflow = BatchRegisterWorkflow::new(
                build_workflow(&settings, pool)?,
                settings.batch_concurrency,
            );

            let results = workflow.run(&submitter.submitter(), &batch).await?;
            let succeeded = results.iter().filter(|result| result.is_ok()).count();
            println!("{}", serde_json::to_string_pretty(&results)?);
            println!(
                "Registered {succeeded} of {} grades from {}.",
                results.len(),
                csv.display()
            );
        }
        Commands::Pending { limit } => {
            let messages = PgStore::new(pool).pending(limit).await?;

            if messages.is_empty() {
                println!("No notifications pending.");
                return Ok(());
            }

            println!("Pending notifications:");
            for message in messages {
                println!(
                    "- {} to {} (alert {}, queued {})",
                    message.channel.as_str(),
                    message.recipient,
                    message.alert_id,
                    message.created_at.format("%Y-%m-%d %H:%M")
                );
            }
        }
    }

    Ok(())
}
