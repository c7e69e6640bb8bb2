//! Datastore Manager - Main entry point.
//!
//! Loads the configuration document, brings up the SQL and Redis handles it
//! describes and keeps them connected until Ctrl-C. This is the only place
//! that decides to end the process on a fatal datastore error.

use datastore_manager::config::Config;
use datastore_manager::configuration::Configurations;
use datastore_manager::error::{DbError, DbResult};
use datastore_manager::registry::{Datastore, Registry};
use datastore_manager::{DatabaseManager, RedisManager};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber
            .with(fmt::layer().with_target(true).with_thread_ids(false))
            .init();
    }
}

/// Load and connect one manager's section. An absent section is skipped.
async fn start<H: Datastore>(
    manager: &Registry<H>,
    section: &str,
    connect_all: bool,
) -> DbResult<()> {
    if !manager.configurations().contains_section(section) {
        info!(kind = H::KIND, section = %section, "Configuration section absent, skipping");
        return Ok(());
    }

    manager.load_from_configuration(section).await?;
    if connect_all {
        manager.connect_all(section).await
    } else {
        manager.connect_all_at_start(section).await
    }
}

/// Keep fatal errors, report the rest and carry on with what was started.
fn tolerate(kind: &str, result: DbResult<()>) -> DbResult<()> {
    match result {
        Err(e) if !e.is_fatal() => {
            warn!(kind = %kind, error = %e, "Datastore startup incomplete");
            Ok(())
        }
        other => other,
    }
}

async fn shutdown(databases: &DatabaseManager, redis: &RedisManager) -> DbResult<()> {
    databases.disconnect_all().await?;
    redis.disconnect_all().await?;
    info!("All datastores disconnected");
    Ok(())
}

async fn print_summaries(
    databases: &DatabaseManager,
    redis: &RedisManager,
) -> Result<(), serde_json::Error> {
    let mut summaries = databases.list_handles().await;
    summaries.extend(redis.list_handles().await);
    println!("{}", serde_json::to_string_pretty(&summaries)?);
    Ok(())
}

fn exit_fatal(e: &DbError) -> ! {
    error!(
        error = %e,
        suggestion = e.suggestion().unwrap_or("-"),
        "Fatal datastore error, exiting"
    );
    std::process::exit(1);
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::parse_args();

    init_tracing(&config);

    info!(
        config = %config.config.display(),
        "Starting datastore manager v{}",
        env!("CARGO_PKG_VERSION")
    );

    let configurations = Arc::new(Configurations::from_file(&config.config)?);
    let databases = DatabaseManager::new(Arc::clone(&configurations));
    let redis = RedisManager::new(Arc::clone(&configurations));

    let database_started = tolerate(
        databases.kind(),
        start(&databases, &config.database_section, config.connect_all).await,
    );
    let started = match database_started {
        Ok(()) => tolerate(
            redis.kind(),
            start(&redis, &config.redis_section, config.connect_all).await,
        ),
        Err(e) => Err(e),
    };
    if let Err(e) = started {
        if let Err(shutdown_err) = shutdown(&databases, &redis).await {
            warn!(error = %shutdown_err, "Shutdown after fatal error incomplete");
        }
        exit_fatal(&e);
    }

    print_summaries(&databases, &redis).await?;

    if !config.check {
        info!("Datastores ready, waiting for Ctrl-C");
        tokio::signal::ctrl_c().await?;
        info!("Shutdown signal received");
    }

    if let Err(e) = shutdown(&databases, &redis).await {
        error!(error = %e, "Shutdown incomplete");
        return Err(e.into());
    }

    info!("Datastore manager stopped");
    Ok(())
}
