//! Telegram bot.
//!
//! Admins pick a date range on an inline calendar and get back the
//! profit/loss totals computed by the reporting backend. The bot never
//! computes anything itself: it only talks to the backend over HTTP.

use std::time::Duration;

use base64::Engine;
use chrono::{NaiveDate, Utc};
use chrono_tz::Tz;
use reqwest::{Client, header};
use teloxide::{prelude::*, types::UserId};
use tokio::sync::watch;

mod access;
mod actions;
mod api;
mod flow;
mod handlers;
mod report;
mod state;
mod ui;

const DEFAULT_REPORT_URL: &str = "http://localhost:8081";
const DEFAULT_REPORT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
pub enum BotError {
    #[error("invalid bot configuration: {0}")]
    Config(String),
    #[error("failed to build http client: {0}")]
    Http(#[from] reqwest::Error),
    #[error("telegram request failed: {0}")]
    Telegram(#[from] teloxide::RequestError),
}

#[derive(Clone)]
pub struct ConfigParameters {
    guard: access::AccessGuard,
    reports: report::ReportService,
    sessions: state::SessionStore,
    timezone: Tz,
}

impl ConfigParameters {
    /// Current date in the configured time zone.
    fn today(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.timezone).date_naive()
    }
}

pub struct Bot {
    bot: teloxide::Bot,
    allowed_users: Vec<UserId>,
    report_url: String,
    client: Client,
    timezone: Tz,
    session_ttl: Option<Duration>,
    sweep_interval: Duration,
}

impl Bot {
    pub fn builder() -> BotBuilder {
        BotBuilder::default()
    }

    /// Outbound Telegram client. Cheap to clone and safe to share between
    /// tasks, the queue relay sends through it too.
    pub fn sender(&self) -> teloxide::Bot {
        self.bot.clone()
    }

    /// Checks the token against Telegram and returns the bot username.
    pub async fn verify(&self) -> Result<String, BotError> {
        let me = self.bot.get_me().await?;
        Ok(me.user.username.clone().unwrap_or_default())
    }

    /// Serves updates until `shutdown` flips to `true`.
    ///
    /// Updates are distributed by sender: one user's updates are handled in
    /// order, different users are handled concurrently.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!("Starting telegram bot...");

        let sessions = state::SessionStore::default();
        let sweeper = self
            .session_ttl
            .map(|ttl| sessions.spawn_sweeper(ttl, self.sweep_interval, shutdown.clone()));

        let parameters = ConfigParameters {
            guard: access::AccessGuard::new(self.allowed_users.clone()),
            reports: report::ReportService::new(api::ApiClient::new(
                self.client.clone(),
                self.report_url.clone(),
            )),
            sessions,
            timezone: self.timezone,
        };

        let handler = dptree::entry()
            .branch(Update::filter_message().endpoint(handlers::handle_message))
            .branch(Update::filter_callback_query().endpoint(handlers::handle_callback));

        let mut dispatcher = Dispatcher::builder(self.bot.clone(), handler)
            .dependencies(dptree::deps![parameters])
            .distribution_function(|upd: &Update| upd.from().map(|user| user.id))
            .default_handler(|upd| async move {
                tracing::warn!("Unhandled update: {:?}", upd);
            })
            .error_handler(LoggingErrorHandler::with_custom_text(
                "An error has occurred in the dispatcher",
            ))
            .build();

        let token = dispatcher.shutdown_token();
        let stopper = tokio::spawn(async move {
            wait_for_shutdown(&mut shutdown).await;
            tracing::info!("Stopping telegram bot...");
            // The token refuses to stop a dispatcher that has not started yet.
            loop {
                match token.shutdown() {
                    Ok(stopped) => break stopped.await,
                    Err(_) => tokio::time::sleep(Duration::from_millis(100)).await,
                }
            }
        });

        dispatcher.dispatch().await;

        stopper.abort();
        if let Some(sweeper) = sweeper {
            sweeper.abort();
        }
        tracing::info!("Telegram bot stopped");
    }
}

/// Resolves once `shutdown` holds `true` or its sender is gone.
pub(crate) async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

#[derive(Default, Debug)]
pub struct BotBuilder {
    token: String,
    allowed_users: Vec<UserId>,
    report_url: Option<String>,
    report_timeout: Option<Duration>,
    report_credentials: Option<(String, String)>,
    timezone: Option<String>,
    session_ttl: Option<Duration>,
    sweep_interval: Option<Duration>,
}

impl BotBuilder {
    pub fn token(mut self, token: &str) -> BotBuilder {
        self.token = token.to_string();
        self
    }

    pub fn allowed_users(mut self, allowed_users: impl IntoIterator<Item = u64>) -> BotBuilder {
        self.allowed_users = allowed_users.into_iter().map(UserId).collect();
        self
    }

    pub fn report_backend(mut self, base_url: &str, timeout: Duration) -> BotBuilder {
        self.report_url = Some(base_url.to_string());
        self.report_timeout = Some(timeout);
        self
    }

    pub fn report_credentials(mut self, username: &str, password: &str) -> BotBuilder {
        self.report_credentials = Some((username.to_string(), password.to_string()));
        self
    }

    /// IANA time zone used to decide which month the calendar opens on.
    pub fn timezone(mut self, timezone: &str) -> BotBuilder {
        self.timezone = Some(timezone.to_string());
        self
    }

    /// Evict sessions idle for longer than `ttl`, checking every `every`.
    pub fn session_eviction(mut self, ttl: Option<Duration>, every: Duration) -> BotBuilder {
        self.session_ttl = ttl;
        self.sweep_interval = Some(every);
        self
    }

    pub fn build(self) -> Result<Bot, BotError> {
        tracing::info!("Initializing telegram bot...");

        if self.token.trim().is_empty() {
            return Err(BotError::Config("bot token is empty".to_string()));
        }
        if self.allowed_users.is_empty() {
            return Err(BotError::Config("no allowed users configured".to_string()));
        }

        let timezone = match self.timezone.as_deref() {
            None => Tz::UTC,
            Some(name) => name
                .parse::<Tz>()
                .map_err(|_| BotError::Config(format!("unknown time zone `{name}`")))?,
        };

        let timeout = self
            .report_timeout
            .filter(|t| !t.is_zero())
            .unwrap_or(DEFAULT_REPORT_TIMEOUT);

        let mut headers = header::HeaderMap::new();
        if let Some((username, password)) = &self.report_credentials {
            // Basic authorization is in the form "Basic `secret`" where `secret` is
            // the base64 of the string "username:password".
            let secret = format!("{username}:{password}");
            let secret = format!("Basic {}", base64::prelude::BASE64_STANDARD.encode(secret));

            let mut auth = header::HeaderValue::try_from(secret)
                .map_err(|err| BotError::Config(format!("invalid auth header value: {err}")))?;
            auth.set_sensitive(true);
            headers.insert(header::AUTHORIZATION, auth);
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()?;

        Ok(Bot {
            bot: teloxide::Bot::new(&self.token),
            allowed_users: self.allowed_users,
            report_url: self
                .report_url
                .unwrap_or_else(|| DEFAULT_REPORT_URL.to_string()),
            client,
            timezone,
            session_ttl: self.session_ttl,
            sweep_interval: self.sweep_interval.unwrap_or(DEFAULT_SWEEP_INTERVAL),
        })
    }
}
