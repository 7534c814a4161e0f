//! Date-range selection flow.
//!
//! [`advance`] is the whole state machine: it mutates the user's session and
//! says what has to be shown next. Talking to Telegram or to the report
//! backend is left to the handlers.

use chrono::NaiveDate;

use crate::{
    actions::{Action, CalendarStep, YearMonth},
    report::DATE_FORMAT,
    state::{Step, UserSession},
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Event {
    Text(String),
    Action(Action),
    /// Callback data that does not decode to an [`Action`].
    Unrecognized,
}

/// What the handler has to render after a transition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Reply {
    Menu,
    Calendar {
        step: CalendarStep,
        month: YearMonth,
        notice: Option<String>,
    },
    /// Both dates are chosen; the report has to be fetched.
    Report {
        from: String,
        to: String,
        notice: String,
    },
    /// Nothing to show (the month label was pressed).
    Silent,
    Unknown,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Command {
    Start,
}

fn parse_command(text: &str) -> Option<Command> {
    let trimmed = text.trim();
    // Commands sent in groups look like `/start@knight_bot`.
    let command = trimmed.split('@').next().unwrap_or(trimmed);
    match command {
        "/start" => Some(Command::Start),
        _ => None,
    }
}

fn expected_step(step: Step) -> Option<CalendarStep> {
    match step {
        Step::Idle => None,
        Step::AwaitingStart => Some(CalendarStep::Start),
        Step::AwaitingEnd => Some(CalendarStep::End),
    }
}

/// Applies `event` to `session`. `today` roots the first calendar.
pub(crate) fn advance(session: &mut UserSession, event: &Event, today: NaiveDate) -> Reply {
    let action = match event {
        Event::Text(text) => {
            return match parse_command(text) {
                Some(Command::Start) => {
                    session.step = Step::Idle;
                    Reply::Menu
                }
                None => Reply::Unknown,
            };
        }
        Event::Action(action) => action,
        Event::Unrecognized => return Reply::Unknown,
    };

    match action {
        Action::StartFlow => {
            session.step = Step::AwaitingStart;
            session.start_date = None;
            session.end_date = None;
            Reply::Calendar {
                step: CalendarStep::Start,
                month: YearMonth::of(today),
                notice: None,
            }
        }
        Action::SelectDate { date, step } if expected_step(session.step) == Some(*step) => {
            let picked = date.format(DATE_FORMAT).to_string();
            match step {
                CalendarStep::Start => {
                    session.start_date = Some(picked.clone());
                    session.step = Step::AwaitingEnd;
                    Reply::Calendar {
                        step: CalendarStep::End,
                        month: YearMonth::of(*date),
                        notice: Some(format!("Start date selected: {picked}")),
                    }
                }
                CalendarStep::End => {
                    session.step = Step::Idle;
                    let Some(from) = session.start_date.clone() else {
                        return Reply::Unknown;
                    };
                    session.end_date = Some(picked.clone());
                    Reply::Report {
                        from,
                        to: picked.clone(),
                        notice: format!("End date selected: {picked}"),
                    }
                }
            }
        }
        Action::ChangeMonth { target, step } if expected_step(session.step) == Some(*step) => {
            Reply::Calendar {
                step: *step,
                month: *target,
                notice: Some("Month changed".to_string()),
            }
        }
        Action::Noop => Reply::Silent,
        Action::SelectDate { .. } | Action::ChangeMonth { .. } => Reply::Unknown,
    }
}
