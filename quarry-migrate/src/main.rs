//! Quarry Migration CLI Tool
//!
//! Plans batch artifacts from a desired schema, prints their SQL, and
//! applies or reverts them against PostgreSQL.

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::Colorize;
use quarry::migration::load_batches;
use quarry::{Migrator, PostgresConnection, QuarryConfig, RenamePolicy};
use quarry_migrate::{batch_sql, find_batch, load_schema, plan_next, save};
use std::path::{Path, PathBuf};
use std::process;

#[derive(Parser)]
#[command(name = "quarry-migrate")]
#[command(about = "Migration management tool for Quarry")]
#[command(version = "0.1.0")]
struct Cli {
    /// Database connection URL (overrides configuration)
    #[arg(long)]
    database_url: Option<String>,

    /// Migrations directory path (overrides configuration)
    #[arg(long)]
    migrations_dir: Option<PathBuf>,

    /// Configuration file
    #[arg(long, default_value = "config/quarry.toml")]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Quiet output (errors only)
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Plan the next batch from a desired schema file
    Plan {
        /// Desired schema (JSON)
        desired: PathBuf,

        /// Batch name (e.g., "add_books")
        #[arg(long)]
        name: String,

        /// Rename detection policy: strict, positional or never
        #[arg(long)]
        rename_policy: Option<String>,

        /// Print the plan without writing the artifact
        #[arg(long)]
        dry_run: bool,
    },

    /// Print the SQL of a batch (default: the newest)
    Sql {
        identifier: Option<String>,

        /// Print the revert statements instead
        #[arg(long)]
        revert: bool,
    },

    /// Show migration status (applied vs pending)
    Status,

    /// Apply pending batches
    Apply {
        /// Dry run - show what would be applied without running
        #[arg(long)]
        dry_run: bool,
    },

    /// Revert the most recently applied batch
    Revert {
        /// Dry run - show what would be reverted
        #[arg(long)]
        dry_run: bool,
    },
}

fn main() {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let level = if cli.quiet {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match run(cli) {
        Ok(()) => process::exit(0),
        Err(e) => {
            eprintln!("{} {e:#}", "error:".red().bold());
            process::exit(1);
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = QuarryConfig::load_from(&cli.config).context("failed to load configuration")?;
    let migrations_dir = cli
        .migrations_dir
        .clone()
        .unwrap_or_else(|| config.migrations.directory.clone());
    let database_url = cli
        .database_url
        .clone()
        .or_else(|| std::env::var("DATABASE_URL").ok())
        .unwrap_or_else(|| config.database.url.clone());
    let migrator = Migrator::from_config(&config.migrations);
    log::debug!(
        "migrations in {}, history table {}",
        migrations_dir.display(),
        migrator.history_table().name()
    );

    match cli.command {
        Commands::Plan {
            desired,
            name,
            rename_policy,
            dry_run,
        } => {
            let policy = match rename_policy {
                Some(p) => parse_policy(&p)?,
                None => config.planner.rename_policy,
            };
            handle_plan(&migrations_dir, &desired, &name, policy, dry_run)
        }
        Commands::Sql { identifier, revert } => handle_sql(&migrations_dir, identifier.as_deref(), revert),
        Commands::Status => {
            let conn = connect(&database_url)?;
            handle_status(&migrator, &conn, &migrations_dir)
        }
        Commands::Apply { dry_run } => {
            let conn = connect(&database_url)?;
            handle_apply(&migrator, &conn, &migrations_dir, dry_run)
        }
        Commands::Revert { dry_run } => {
            let conn = connect(&database_url)?;
            handle_revert(&migrator, &conn, &migrations_dir, dry_run)
        }
    }
}

fn parse_policy(value: &str) -> anyhow::Result<RenamePolicy> {
    match value {
        "strict" => Ok(RenamePolicy::Strict),
        "positional" => Ok(RenamePolicy::Positional),
        "never" => Ok(RenamePolicy::Never),
        other => anyhow::bail!("unknown rename policy '{other}' (expected strict, positional or never)"),
    }
}

fn connect(url: &str) -> anyhow::Result<PostgresConnection> {
    PostgresConnection::connect(url).context("failed to connect to the database")
}

fn handle_plan(
    migrations_dir: &Path,
    desired: &Path,
    name: &str,
    policy: RenamePolicy,
    dry_run: bool,
) -> anyhow::Result<()> {
    let desired = load_schema(desired)?;
    let Some(planned) = plan_next(migrations_dir, &desired, name, policy)? else {
        println!("{}", "Schema is up to date; nothing to plan".green());
        return Ok(());
    };

    println!("\n{} {}\n", "Batch".bold(), planned.batch.identifier);
    for (i, op) in planned.batch.operations.iter().enumerate() {
        println!("  {}. {op}", i + 1);
    }
    for warning in &planned.warnings {
        println!("  {} {warning}", "warning:".yellow().bold());
    }

    if dry_run {
        println!("\n(dry run, nothing written)");
    } else {
        let path = save(migrations_dir, &planned)?;
        println!("\n{} {}", "Wrote".green(), path.display());
    }
    Ok(())
}

fn handle_sql(migrations_dir: &Path, identifier: Option<&str>, revert: bool) -> anyhow::Result<()> {
    let batches = load_batches(migrations_dir)?;
    let batch = find_batch(&batches, identifier)?;
    println!("-- {}{}", batch.identifier, if revert { " (revert)" } else { "" });
    for sql in batch_sql(batch, revert) {
        println!("{sql};");
    }
    Ok(())
}

fn handle_status(migrator: &Migrator, conn: &PostgresConnection, migrations_dir: &Path) -> anyhow::Result<()> {
    let batches = load_batches(migrations_dir)?;
    let status = migrator.status(conn, &batches)?;

    println!("\n{}\n", "Migration Status".bold());
    if status.applied.is_empty() {
        println!("Applied: none");
    } else {
        println!("Applied ({}):", status.applied_count());
        for record in &status.applied {
            println!(
                "  {} {} ({})",
                "✓".green(),
                record.identifier,
                record.applied_at.format("%Y-%m-%d %H:%M:%S")
            );
        }
    }
    println!();
    if status.pending.is_empty() {
        println!("Pending: none");
    } else {
        println!("Pending ({}):", status.pending_count());
        for batch in &status.pending {
            println!("  {} {}", "…".yellow(), batch.identifier);
        }
    }
    println!(
        "\nSummary: {} applied, {} pending",
        status.applied_count(),
        status.pending_count()
    );
    Ok(())
}

fn handle_apply(
    migrator: &Migrator,
    conn: &PostgresConnection,
    migrations_dir: &Path,
    dry_run: bool,
) -> anyhow::Result<()> {
    let batches = load_batches(migrations_dir)?;
    if dry_run {
        let status = migrator.status(conn, &batches)?;
        if status.is_up_to_date() {
            println!("No pending batches to apply");
        }
        for batch in &status.pending {
            println!("Would apply {}:", batch.identifier);
            for sql in batch_sql(batch, false) {
                println!("  {sql};");
            }
        }
        return Ok(());
    }

    let applied = migrator.apply_pending(conn, &batches)?;
    println!("{} {applied} batch(es) applied", "✓".green());
    Ok(())
}

fn handle_revert(
    migrator: &Migrator,
    conn: &PostgresConnection,
    migrations_dir: &Path,
    dry_run: bool,
) -> anyhow::Result<()> {
    let batches = load_batches(migrations_dir)?;
    let status = migrator.status(conn, &batches)?;
    let Some(latest) = status.latest_applied() else {
        println!("Nothing to revert");
        return Ok(());
    };
    let batch = find_batch(&batches, Some(latest))?;

    if dry_run {
        println!("Would revert {}:", batch.identifier);
        for sql in batch_sql(batch, true) {
            println!("  {sql};");
        }
        return Ok(());
    }

    migrator.revert(conn, batch)?;
    println!("{} reverted {}", "✓".green(), batch.identifier);
    Ok(())
}
