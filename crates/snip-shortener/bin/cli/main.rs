mod cli;

use crate::cli::{Command, LogFormat, StorageBackendArg, CLI};
use anyhow::{bail, Context};
use clap::Parser;
use snip_core::{OwnerId, Repository, Shortener, ShortenerError};
use snip_generator::RandomGenerator;
use snip_shortener::ShortenerService;
use snip_storage::{FileRepository, InMemoryRepository, PostgresRepository};
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = CLI::parse();
    init_tracing(config.log_format);

    info!(
        storage_backend = %config.storage,
        duplicate_detection = config.duplicate_detection,
        "starting snip"
    );

    match config.storage {
        StorageBackendArg::InMemory => run(&config, in_memory(config.duplicate_detection)).await,
        StorageBackendArg::File => {
            let repository = FileRepository::open(
                &config.file_storage_path,
                in_memory(config.duplicate_detection),
            )
            .await
            .with_context(|| {
                format!(
                    "failed to open link log {}",
                    config.file_storage_path.display()
                )
            })?;
            run(&config, repository).await
        }
        StorageBackendArg::Postgres => {
            let dsn = config
                .database_dsn
                .as_deref()
                .context("database dsn is required when storage backend is postgres")?;
            let repository = PostgresRepository::connect(dsn)
                .await
                .context("failed to connect to postgres")?;
            repository
                .ensure_schema()
                .await
                .context("failed to create schema")?;
            run(&config, repository).await
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn in_memory(duplicate_detection: bool) -> InMemoryRepository {
    if duplicate_detection {
        InMemoryRepository::new()
    } else {
        InMemoryRepository::without_duplicate_detection()
    }
}

async fn run<R: Repository>(config: &CLI, repository: R) -> anyhow::Result<()> {
    let mut service = ShortenerService::new(repository, RandomGenerator::new());
    if let Some(ms) = config.operation_timeout_ms {
        service = service.with_timeout(Duration::from_millis(ms));
    }

    let outcome = execute(&service, config).await;

    if let Err(e) = service.repository().close().await {
        warn!(error = %e, "failed to close storage backend");
    }
    outcome
}

fn owner_or_random(owner: Option<OwnerId>) -> OwnerId {
    owner.unwrap_or_else(|| {
        let owner = OwnerId::random();
        eprintln!("owner: {owner}");
        owner
    })
}

async fn execute<S: Shortener>(service: &S, config: &CLI) -> anyhow::Result<()> {
    let base_url = config.base_url.as_str();

    match &config.command {
        Command::Shorten { url, owner } => {
            let owner = owner_or_random(*owner);
            match service.create_short(url, &owner).await {
                Ok(code) => println!("{}", code.to_url(base_url)),
                Err(ShortenerError::DuplicateDestination(existing)) => {
                    println!("{}", existing.to_url(base_url));
                    eprintln!("already shortened");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Command::Batch { urls, owner } => {
            let owner = owner_or_random(*owner);
            match service.batch_create(urls, &owner).await {
                Ok(codes) => {
                    for (code, url) in codes.iter().zip(urls) {
                        println!("{}\t{}", code.to_url(base_url), url);
                    }
                }
                Err(ShortenerError::DuplicateDestination(existing)) => bail!(
                    "batch rejected: a destination is already shortened as {}",
                    existing.to_url(base_url)
                ),
                Err(e) => return Err(e.into()),
            }
        }
        Command::Resolve { code } => match service.resolve(code).await? {
            Some(destination) => println!("{destination}"),
            None => bail!("short code {code} not found"),
        },
        Command::List { owner } => {
            for entry in service.list_for_owner(owner).await? {
                println!("{}\t{}", entry.code.to_url(base_url), entry.destination);
            }
        }
        Command::Delete { codes, owner } => {
            if !service.delete_for_owner(codes, owner).await? {
                bail!("some short codes were not found or belong to another owner");
            }
        }
        Command::Stats => {
            let stats = service.stats().await?;
            println!("urls: {}", stats.urls);
            println!("users: {}", stats.users);
        }
    }

    Ok(())
}
