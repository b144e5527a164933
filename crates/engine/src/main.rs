//! Taskloom Engine - Main entry point.
//!
//! Runs the scheduler against an in-memory environment with a logging task,
//! which is enough to watch schedules fire without a live client.

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use taskloom_domain::condition::IntervalCondition;
use taskloom_domain::{Condition, ScheduleEntry};
use taskloom_engine::infrastructure::clock::{SystemClock, SystemRandom};
use taskloom_engine::infrastructure::environment::StaticEnvironment;
use taskloom_engine::infrastructure::ports::ClockPort;
use taskloom_engine::infrastructure::schedule_store::JsonScheduleStore;
use taskloom_engine::infrastructure::settings::EngineSettings;
use taskloom_engine::task::LoggingTask;
use taskloom_engine::Scheduler;

const DEMO_TASK: &str = "demo";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment from repo root (the engine may be run from `crates/engine`).
    load_dotenv_from_repo_root();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "taskloom_engine=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = EngineSettings::from_env()?;
    tracing::info!(
        schedule_file = %settings.schedule_file.display(),
        tick_ms = settings.tick.as_millis() as u64,
        "Starting Taskloom Engine"
    );

    let clock = Arc::new(SystemClock::new());
    let mut scheduler = Scheduler::new(
        Arc::new(StaticEnvironment::default()),
        clock.clone(),
        Arc::new(SystemRandom::new()),
        settings.clone(),
    )
    .with_store(JsonScheduleStore::new(&settings.schedule_file));

    scheduler.register_task(LoggingTask::new(DEMO_TASK).finishing_after(5))?;

    if scheduler.load_entries().await? == 0 {
        let now = clock.now();
        let entry = ScheduleEntry::new(
            "Demo every 5 minutes",
            DEMO_TASK,
            Condition::and([Condition::from(IntervalCondition::every_minutes(5, now))]),
            Condition::or([]),
            now,
        )?;
        scheduler.add_entry(entry)?;
    }

    let handle = scheduler.handle();
    let running = tokio::spawn(scheduler.run());

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");
    if let Ok(status) = handle.status().await {
        tracing::info!(status = %serde_json::to_string(&status)?, "Schedule at shutdown");
    }
    handle.shutdown();
    running.await?;

    Ok(())
}

fn load_dotenv_from_repo_root() {
    let repo_root = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..");

    // Prefer local overrides.
    for filename in [".env.local", ".env"] {
        let path = repo_root.join(filename);
        if path.exists() {
            let _ = dotenvy::from_path(path);
        }
    }
}
