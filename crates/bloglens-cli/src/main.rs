use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "bloglens-cli")]
#[command(about = "Bloglens operational command line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Database management commands
    Db {
        #[command(subcommand)]
        command: DbCommands,
    },
    /// Seed the category/tag taxonomy from the YAML file
    SeedTaxonomy {
        /// Path to the taxonomy file
        #[arg(long, default_value = "./config/taxonomy.yaml")]
        path: PathBuf,
    },
    /// Queue full_scrape tasks for the given usernames
    Scrape {
        /// Instagram usernames (with or without a leading @)
        #[arg(required = true)]
        usernames: Vec<String>,
    },
    /// Queue a hashtag discovery task
    Discover {
        /// Hashtag (with or without a leading #)
        hashtag: String,

        /// Minimum follower count for discovered candidates
        #[arg(long, default_value_t = 1000)]
        min_followers: i64,
    },
}

#[derive(Debug, Subcommand)]
enum DbCommands {
    /// Test the database connection
    Ping,
    /// Run pending migrations
    Migrate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let env_filter = EnvFilter::try_from_default_env().or_else(|_| {
        let level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        EnvFilter::try_new(level)
    })?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();
    match cli.command {
        Some(Commands::Db { command }) => match command {
            DbCommands::Ping => run_db_ping().await?,
            DbCommands::Migrate => run_db_migrate().await?,
        },
        Some(Commands::SeedTaxonomy { path }) => run_seed_taxonomy(&path).await?,
        Some(Commands::Scrape { usernames }) => run_scrape(&usernames).await?,
        Some(Commands::Discover {
            hashtag,
            min_followers,
        }) => run_discover(&hashtag, min_followers).await?,
        None => println!("bloglens-cli: use --help for available commands"),
    }

    Ok(())
}

async fn run_db_ping() -> anyhow::Result<()> {
    let pool = connect_or_exit().await;
    bloglens_db::health_check(&pool).await?;
    println!("database is healthy");
    Ok(())
}

async fn run_db_migrate() -> anyhow::Result<()> {
    let pool = connect_or_exit().await;
    bloglens_db::run_migrations(&pool).await?;
    println!("database schema is up to date");
    Ok(())
}

async fn run_seed_taxonomy(path: &std::path::Path) -> anyhow::Result<()> {
    let taxonomy = bloglens_core::load_taxonomy(path).unwrap_or_else(|e| {
        eprintln!("error: failed to load taxonomy file: {e}");
        std::process::exit(1);
    });
    let pool = connect_or_exit().await;
    let counts = bloglens_db::seed_taxonomy(&pool, &taxonomy).await?;
    println!(
        "seeded {} categories and {} tags",
        counts.categories, counts.tags
    );
    Ok(())
}

async fn run_scrape(usernames: &[String]) -> anyhow::Result<()> {
    let pool = connect_or_exit().await;

    let mut created = 0_usize;
    let mut skipped = 0_usize;
    for raw in usernames {
        let username = raw.trim().trim_start_matches('@').trim();
        if username.is_empty() {
            continue;
        }

        let blog = bloglens_db::upsert_blog_shell(&pool, username).await?;
        let task_id = bloglens_db::create_task_if_absent(
            &pool,
            Some(blog.id),
            bloglens_db::TaskType::FullScrape,
            5,
            serde_json::json!({}),
        )
        .await?;

        match task_id {
            Some(task_id) => {
                created += 1;
                println!("@{username}: task {task_id} (blog {})", blog.id);
            }
            None => {
                skipped += 1;
                println!("@{username}: already queued (blog {})", blog.id);
            }
        }
    }

    println!("{created} created, {skipped} skipped");
    Ok(())
}

async fn run_discover(hashtag: &str, min_followers: i64) -> anyhow::Result<()> {
    let hashtag = hashtag.trim().trim_start_matches('#').trim();
    if hashtag.is_empty() {
        eprintln!("error: hashtag must not be empty");
        std::process::exit(1);
    }

    let pool = connect_or_exit().await;
    let task_id = bloglens_db::create_task_if_absent(
        &pool,
        None,
        bloglens_db::TaskType::Discover,
        5,
        serde_json::json!({ "hashtag": hashtag, "min_followers": min_followers }),
    )
    .await?;

    match task_id {
        Some(task_id) => println!("#{hashtag}: task {task_id}"),
        None => println!("#{hashtag}: a discovery task is already active"),
    }
    Ok(())
}

async fn connect_or_exit() -> sqlx::PgPool {
    bloglens_db::connect_pool_from_env().await.unwrap_or_else(|e| {
        match &e {
            bloglens_db::DbError::MissingDatabaseUrl => {
                eprintln!("error: DATABASE_URL is not set");
                eprintln!("hint: copy .env.example to .env and set DATABASE_URL");
            }
            other => {
                eprintln!("error: failed to connect to database: {other}");
                eprintln!("hint: ensure postgres is running");
            }
        }
        std::process::exit(1);
    })
}
