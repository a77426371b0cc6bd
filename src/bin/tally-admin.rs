use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tally::analytics::models::{Dimension, StatsQuery};
use tally::analytics::query::default_window;
use tally::analytics::{BotFilter, Estimator, QueryService};
use tally::config::Config;
use tally::storage;

#[derive(Parser)]
#[command(name = "tally-admin")]
#[command(about = "Tally stats and diagnostics CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print visitor counts for a domain
    Stats {
        /// Site domain as recorded by the tracker
        #[arg(long)]
        domain: String,
        /// pages, countries or sources
        #[arg(long, default_value = "pages")]
        table: Dimension,
        /// Merge all paths per day (pages only)
        #[arg(long)]
        aggregate: bool,
        /// First day, YYYY-MM-DD (default: 30 days ago)
        #[arg(long)]
        start: Option<NaiveDate>,
        /// Last day, YYYY-MM-DD (default: today)
        #[arg(long)]
        end: Option<NaiveDate>,
    },
    /// Show how the bot filter classifies a user agent
    Classify {
        /// Full User-Agent header value
        user_agent: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Commands::Stats {
            domain,
            table,
            aggregate,
            start,
            end,
        } => {
            let store = storage::connect(&config.database).await?;
            let (default_start, default_end) = default_window();
            let query = StatsQuery {
                table,
                domain,
                start_day: start.unwrap_or(default_start),
                end_day: end.unwrap_or(default_end),
                aggregate,
            };

            let rows = QueryService::new(store).query(&query).await?;
            if rows.is_empty() {
                println!(
                    "No {} recorded for {} between {} and {}",
                    table, query.domain, query.start_day, query.end_day
                );
                return Ok(());
            }

            let label = if aggregate { "all" } else { table.column() };
            println!("{:<12} {:>10}  {}", "day", "visitors", label);
            println!("{}", "-".repeat(48));
            let error = Estimator::empty().expected_error() * 100.0;
            for row in rows {
                println!(
                    "{:<12} {:>10}  {}",
                    row.day,
                    row.visitors,
                    row.value.as_deref().unwrap_or("*")
                );
            }
            println!("Visitor counts are estimates (standard error ±{:.1}%)", error);
        }
        Commands::Classify { user_agent } => {
            let filter = BotFilter::from_config(&config.tracking)
                .context("Failed to load bot signatures")?;
            let classification = filter.classify(&user_agent);

            println!("device family: {}", classification.device_family);
            println!("ua family:     {}", classification.ua_family);
            println!(
                "verdict:       {}",
                if filter.is_bot(&user_agent) { "bot" } else { "human" }
            );
        }
    }

    Ok(())
}
