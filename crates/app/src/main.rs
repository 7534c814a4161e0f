use std::time::Duration;

use clap::Parser;
use relay::{ChatId, Subscription};
use tokio::{sync::watch, task::JoinSet};

mod settings;

/// Time given to running tasks to finish once shutdown is requested.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Parser)]
#[command(version, about = "Telegram report bot and broker relay")]
struct Args {
    /// Settings file, the extension may be omitted.
    #[arg(long, env = "KNIGHT_SETTINGS", default_value = "settings")]
    settings: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    let settings = settings::Settings::new(&args.settings)?;

    tracing_subscriber::fmt()
        .with_env_filter(format!(
            "knight_bot={level},telegram_bot={level},relay={level}",
            level = settings.app.level
        ))
        .init();

    let mut bot = telegram_bot::Bot::builder()
        .token(&settings.telegram.token)
        .allowed_users(settings.telegram.allowed_users.iter().copied())
        .timezone(&settings.telegram.timezone)
        .report_backend(
            &settings.report.base_url,
            Duration::from_secs(settings.report.timeout_secs),
        )
        .session_eviction(
            settings.sessions.idle_ttl_secs.map(Duration::from_secs),
            Duration::from_secs(settings.sessions.sweep_interval_secs),
        );
    if let (Some(username), Some(password)) = (&settings.report.username, &settings.report.password)
    {
        bot = bot.report_credentials(username, password);
    }
    let bot = bot.build()?;
    let username = bot.verify().await?;
    tracing::info!("Authorized as @{username}");

    let relay = relay::Relay::builder()
        .url(&settings.broker.url)
        .prefetch(settings.broker.prefetch)
        .subscriptions(
            settings
                .relay
                .routes
                .iter()
                .map(|(queue, chat)| Subscription::new(queue.clone(), ChatId(*chat))),
        )
        .connect()
        .await?;

    let (stop, shutdown) = watch::channel(false);
    let mut tasks: JoinSet<TaskResult> = JoinSet::new();

    let sender = bot.sender();
    let relay_shutdown = shutdown.clone();
    tasks.spawn(async move {
        relay.run(sender, relay_shutdown).await?;
        TaskResult::Ok(())
    });
    tasks.spawn(async move {
        bot.run(shutdown).await;
        TaskResult::Ok(())
    });

    match supervise(tasks, &stop, shutdown_signal(), SHUTDOWN_GRACE).await {
        Exit::Requested => Ok(()),
        Exit::Failed(reason) => Err(reason.into()),
    }
}

type TaskResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Why the process is stopping.
#[derive(Debug, PartialEq, Eq)]
enum Exit {
    /// A signal asked for it and every task stopped cleanly.
    Requested,
    /// A task failed, or returned while nobody asked it to stop.
    Failed(String),
}

/// Waits for `signal` or the first task to finish, then stops every task.
///
/// Tasks get `grace` to drain before they are aborted.
async fn supervise(
    mut tasks: JoinSet<TaskResult>,
    stop: &watch::Sender<bool>,
    signal: impl Future<Output = ()>,
    grace: Duration,
) -> Exit {
    let mut exit = tokio::select! {
        _ = signal => {
            tracing::info!("Shutdown requested");
            Exit::Requested
        }
        Some(joined) = tasks.join_next() => match task_failure(joined) {
            Some(reason) => Exit::Failed(reason),
            None => Exit::Failed("a task exited without a shutdown request".to_string()),
        },
    };
    if let Exit::Failed(reason) = &exit {
        tracing::error!("{reason}, shutting down");
    }
    stop.send_replace(true);

    let drained = tokio::time::timeout(grace, async {
        while let Some(joined) = tasks.join_next().await {
            if let Some(reason) = task_failure(joined) {
                tracing::error!("{reason}");
                if exit == Exit::Requested {
                    exit = Exit::Failed(reason);
                }
            }
        }
    })
    .await;
    if drained.is_err() {
        tracing::warn!("Tasks did not stop in time, aborting them");
        tasks.shutdown().await;
    }

    exit
}

fn task_failure(joined: Result<TaskResult, tokio::task::JoinError>) -> Option<String> {
    match joined {
        Ok(Ok(())) => None,
        Ok(Err(err)) => Some(err.to_string()),
        Err(err) => Some(format!("task panicked: {err}")),
    }
}

/// Resolves on SIGINT, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::error!("failed to listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
