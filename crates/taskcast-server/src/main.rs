//! # taskcast
//!
//! Realtime notification hub for a task-management backend.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! taskcast
//!
//! # Run with environment overrides
//! TASKCAST_HOST=0.0.0.0 TASKCAST_PORT=8080 taskcast
//! ```

use anyhow::Result;
use std::sync::Arc;
use taskcast_core::ids::{TaskId, UserId};
use taskcast_server::config::Config;
use taskcast_server::directory::{MemoryDirectory, TaskRef, UserIdentity};
use taskcast_server::handlers;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "taskcast_server=debug,taskcast_core=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::load()?;

    info!("Starting taskcast hub on {}:{}", config.host, config.port);

    // Seed the in-memory directory
    let directory = Arc::new(MemoryDirectory::new());
    for user in &config.seed.users {
        directory.insert_user(UserIdentity {
            id: UserId::new(user.id),
            subject: user.subject.clone(),
            superuser: user.superuser,
        });
    }
    for task in &config.seed.tasks {
        directory.insert_task(TaskRef {
            id: TaskId::new(task.id),
            owner: UserId::new(task.owner),
        });
    }
    if !config.seed.users.is_empty() || !config.seed.tasks.is_empty() {
        info!(
            users = config.seed.users.len(),
            tasks = config.seed.tasks.len(),
            "seeded in-memory directory"
        );
    }

    // Start the server
    handlers::run_server(config, directory).await?;

    Ok(())
}
