use teloxide::{
    prelude::*,
    types::{CallbackQuery, CallbackQueryId, ChatId, UserId},
};

use crate::{
    ConfigParameters,
    actions::Action,
    flow::{self, Event, Reply},
    ui,
};

/// Outcome of routing one inbound event through the guard and the flow.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Routed {
    Denied,
    Reply(Reply),
}

pub(crate) async fn handle_message(
    bot: Bot,
    msg: Message,
    cfg: ConfigParameters,
) -> ResponseResult<()> {
    let chat_id = msg.chat.id;
    let from = msg.from.as_ref().map(|user| user.id);
    let event = Event::Text(msg.text().unwrap_or_default().to_string());

    match route(&cfg, from, event).await {
        Routed::Denied => {
            tracing::info!("denied message from {from:?} in chat {}", chat_id.0);
            bot.send_message(chat_id, ui::ACCESS_DENIED).await?;
            Ok(())
        }
        Routed::Reply(reply) => respond(&bot, chat_id, None, &cfg, reply).await,
    }
}

pub(crate) async fn handle_callback(
    bot: Bot,
    q: CallbackQuery,
    cfg: ConfigParameters,
) -> ResponseResult<()> {
    let Some(chat_id) = q.message.as_ref().map(|message| message.chat().id) else {
        acknowledge(&bot, Some(&q.id), None).await;
        return Ok(());
    };

    let data = q.data.as_deref().unwrap_or_default();
    let event = match data.parse::<Action>() {
        Ok(action) => Event::Action(action),
        Err(err) => {
            tracing::debug!("undecodable callback from {}: {err}", q.from.id.0);
            Event::Unrecognized
        }
    };

    match route(&cfg, Some(q.from.id), event).await {
        Routed::Denied => {
            tracing::info!("denied callback `{data}` from {}", q.from.id.0);
            acknowledge(&bot, Some(&q.id), Some(ui::ACCESS_DENIED.to_string())).await;
            Ok(())
        }
        Routed::Reply(reply) => respond(&bot, chat_id, Some(&q.id), &cfg, reply).await,
    }
}

/// Checks the allow-list, then advances the user's session.
///
/// The session lock is released before returning, so slow work such as
/// fetching a report happens outside of it.
pub(crate) async fn route(cfg: &ConfigParameters, from: Option<UserId>, event: Event) -> Routed {
    let Some(user) = from.filter(|user| cfg.guard.is_authorized(*user)) else {
        return Routed::Denied;
    };

    let mut session = cfg.sessions.get_or_create(user.0).await;
    let reply = flow::advance(&mut session, &event, cfg.today());
    tracing::debug!("user {} is now at {:?}", user.0, session.step);
    Routed::Reply(reply)
}

async fn respond(
    bot: &Bot,
    chat_id: ChatId,
    callback: Option<&CallbackQueryId>,
    cfg: &ConfigParameters,
    reply: Reply,
) -> ResponseResult<()> {
    match reply {
        Reply::Menu => {
            acknowledge(bot, callback, None).await;
            let (text, kb) = ui::render_menu();
            bot.send_message(chat_id, text).reply_markup(kb).await?;
        }
        Reply::Calendar {
            step,
            month,
            notice,
        } => {
            acknowledge(bot, callback, notice).await;
            let (text, kb) = ui::render_calendar(step, month);
            bot.send_message(chat_id, text).reply_markup(kb).await?;
        }
        Reply::Report { from, to, notice } => {
            acknowledge(bot, callback, Some(notice)).await;
            let text = report_text(cfg, &from, &to).await;
            bot.send_message(chat_id, text).await?;
        }
        Reply::Silent => acknowledge(bot, callback, None).await,
        Reply::Unknown => match callback {
            Some(_) => acknowledge(bot, callback, Some(ui::UNKNOWN_ACTION.to_string())).await,
            None => {
                bot.send_message(chat_id, ui::UNKNOWN_INPUT).await?;
            }
        },
    }

    Ok(())
}

/// Fetches the report and renders it, or the message explaining why not.
pub(crate) async fn report_text(cfg: &ConfigParameters, from: &str, to: &str) -> String {
    match cfg.reports.get_report(from, to).await {
        Ok(report) => ui::render_report(&report),
        Err(err) => {
            tracing::warn!("report {from} -> {to} failed: {err}");
            ui::user_message_for_report_error(&err)
        }
    }
}

/// Answers a callback query so the client stops showing a spinner.
async fn acknowledge(bot: &Bot, callback: Option<&CallbackQueryId>, text: Option<String>) {
    let Some(id) = callback else {
        return;
    };

    let mut request = bot.answer_callback_query(id.clone());
    if let Some(text) = text {
        request = request.text(text);
    }
    if let Err(err) = request.await {
        tracing::debug!("answering callback failed: {err}");
    }
}

#[cfg(test)]
mod tests {
    use axum::{Json, Router, http::StatusCode, routing::get};
    use chrono::NaiveDate;
    use reqwest::Client;
    use serde_json::json;

    use super::*;
    use crate::{
        access::AccessGuard,
        actions::CalendarStep,
        api::{ApiClient, spawn_backend},
        report::ReportService,
        state::{SessionStore, Step},
    };

    fn parameters(allowed: Vec<u64>) -> ConfigParameters {
        backed_by(allowed, "http://127.0.0.1:9")
    }

    fn backed_by(allowed: Vec<u64>, base_url: &str) -> ConfigParameters {
        ConfigParameters {
            guard: AccessGuard::new(allowed.into_iter().map(UserId).collect()),
            reports: ReportService::new(ApiClient::new(Client::new(), base_url.to_string())),
            sessions: SessionStore::default(),
            timezone: chrono_tz::UTC,
        }
    }

    fn select(raw: &str, step: CalendarStep) -> Event {
        Event::Action(Action::SelectDate {
            date: NaiveDate::parse_from_str(raw, "%Y-%m-%d").unwrap(),
            step,
        })
    }

    #[tokio::test]
    async fn unauthorized_user_never_gets_a_session() {
        let cfg = parameters(vec![1]);

        let routed = route(&cfg, Some(UserId(2)), Event::Action(Action::StartFlow)).await;
        assert_eq!(routed, Routed::Denied);
        let routed = route(&cfg, Some(UserId(2)), Event::Text("/start".to_string())).await;
        assert_eq!(routed, Routed::Denied);

        assert!(cfg.sessions.snapshot(2).await.is_none());
        assert_eq!(cfg.sessions.len().await, 0);
    }

    #[tokio::test]
    async fn unauthorized_user_cannot_touch_an_existing_session() {
        let cfg = parameters(vec![1]);
        {
            let mut session = cfg.sessions.get_or_create(2).await;
            session.step = Step::AwaitingEnd;
            session.start_date = Some("2024-01-10".to_string());
        }
        let before = cfg.sessions.snapshot(2).await;

        let routed = route(&cfg, Some(UserId(2)), Event::Action(Action::StartFlow)).await;
        assert_eq!(routed, Routed::Denied);
        assert_eq!(cfg.sessions.snapshot(2).await, before);
    }

    #[tokio::test]
    async fn updates_without_sender_are_denied() {
        let cfg = parameters(vec![1]);
        let routed = route(&cfg, None, Event::Text("/start".to_string())).await;
        assert_eq!(routed, Routed::Denied);
    }

    #[tokio::test]
    async fn authorized_flow_ends_with_a_report_request() {
        let cfg = parameters(vec![1]);
        let user = Some(UserId(1));

        route(&cfg, user, Event::Action(Action::StartFlow)).await;
        route(&cfg, user, select("2024-01-10", CalendarStep::Start)).await;
        let routed = route(&cfg, user, select("2024-01-20", CalendarStep::End)).await;

        assert!(matches!(
            routed,
            Routed::Reply(Reply::Report { ref from, ref to, .. })
                if from == "2024-01-10" && to == "2024-01-20"
        ));
        let session = cfg.sessions.snapshot(1).await.unwrap();
        assert_eq!(session.step, Step::Idle);
    }

    #[tokio::test]
    async fn users_do_not_share_flows() {
        let cfg = parameters(vec![1, 2]);

        route(&cfg, Some(UserId(1)), Event::Action(Action::StartFlow)).await;
        route(&cfg, Some(UserId(1)), select("2024-01-10", CalendarStep::Start)).await;
        route(&cfg, Some(UserId(2)), Event::Action(Action::StartFlow)).await;
        route(&cfg, Some(UserId(2)), select("2024-05-01", CalendarStep::Start)).await;

        let alice = cfg.sessions.snapshot(1).await.unwrap();
        let bob = cfg.sessions.snapshot(2).await.unwrap();
        assert_eq!(alice.start_date.as_deref(), Some("2024-01-10"));
        assert_eq!(bob.start_date.as_deref(), Some("2024-05-01"));
    }

    #[tokio::test]
    async fn completed_flow_renders_the_backend_totals() {
        let router = Router::new().route(
            "/reports",
            get(|| async { Json(json!({ "income": 1500.5, "expense": 320.25 })) }),
        );
        let cfg = backed_by(vec![1], &spawn_backend(router).await);
        let user = Some(UserId(1));

        route(&cfg, user, Event::Action(Action::StartFlow)).await;
        route(&cfg, user, select("2024-01-10", CalendarStep::Start)).await;
        let Routed::Reply(Reply::Report { from, to, .. }) =
            route(&cfg, user, select("2024-01-20", CalendarStep::End)).await
        else {
            panic!("expected a report request");
        };

        assert_eq!(
            report_text(&cfg, &from, &to).await,
            "Report from 2024-01-10 to 2024-01-20. Income: 1500.50, Expense: 320.25"
        );
    }

    #[tokio::test]
    async fn backend_failure_is_reported_generically() {
        let router = Router::new().route(
            "/reports",
            get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "database is down") }),
        );
        let cfg = backed_by(vec![1], &spawn_backend(router).await);

        let text = report_text(&cfg, "2024-01-10", "2024-01-20").await;

        assert_eq!(text, "error: the report could not be produced, try again later");
        assert!(!text.contains("503"));
        assert!(!text.contains("database"));
    }

    #[tokio::test]
    async fn malformed_date_is_reported_verbatim() {
        let cfg = parameters(vec![1]);

        let text = report_text(&cfg, "2024-1-10", "2024-01-20").await;

        assert_eq!(
            text,
            "error: invalid start date `2024-1-10`, expected YYYY-MM-DD"
        );
    }
}
