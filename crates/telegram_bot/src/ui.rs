use chrono::Datelike;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};

use crate::{
    actions::{Action, CalendarStep, YearMonth},
    report::{Report, ReportError},
};

pub(crate) const ACCESS_DENIED: &str = "Access denied";
pub(crate) const UNKNOWN_INPUT: &str = "Unknown input. Use /start to open menu";
pub(crate) const UNKNOWN_ACTION: &str = "Unknown action";

const DAYS_PER_ROW: usize = 7;

/// One inline button of the calendar keyboard.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct CalendarButton {
    pub label: String,
    pub action: Action,
}

impl CalendarButton {
    fn new(label: impl Into<String>, action: Action) -> Self {
        Self {
            label: label.into(),
            action,
        }
    }
}

pub(crate) fn render_menu() -> (String, InlineKeyboardMarkup) {
    let kb = InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::callback(
        "Total Profit/Loss %",
        Action::StartFlow.to_string(),
    )]]);
    ("Choose action:".to_string(), kb)
}

/// Day buttons in rows of seven, followed by a `◀ | Month Year | ▶` row.
///
/// Every button carries the step it belongs to, so a press can be routed
/// without looking anything up.
pub(crate) fn calendar_grid(step: CalendarStep, month: YearMonth) -> Vec<Vec<CalendarButton>> {
    let mut rows: Vec<Vec<CalendarButton>> = Vec::new();
    let mut week: Vec<CalendarButton> = Vec::with_capacity(DAYS_PER_ROW);

    for date in (1..=month.days()).filter_map(|day| month.day(day)) {
        week.push(CalendarButton::new(
            format!("{:02}", date.day()),
            Action::SelectDate { date, step },
        ));
        if week.len() == DAYS_PER_ROW {
            rows.push(std::mem::take(&mut week));
        }
    }
    if !week.is_empty() {
        rows.push(week);
    }

    rows.push(vec![
        CalendarButton::new(
            "◀",
            Action::ChangeMonth {
                target: month.prev(),
                step,
            },
        ),
        CalendarButton::new(
            format!("{} {}", month.month_name(), month.year()),
            Action::Noop,
        ),
        CalendarButton::new(
            "▶",
            Action::ChangeMonth {
                target: month.next(),
                step,
            },
        ),
    ]);

    rows
}

pub(crate) fn render_calendar(
    step: CalendarStep,
    month: YearMonth,
) -> (String, InlineKeyboardMarkup) {
    let rows = calendar_grid(step, month)
        .into_iter()
        .map(|row| {
            row.into_iter()
                .map(|button| InlineKeyboardButton::callback(button.label, button.action.to_string()))
                .collect::<Vec<_>>()
        })
        .collect::<Vec<_>>();

    let text = match step {
        CalendarStep::Start => "Select start date:",
        CalendarStep::End => "Select end date:",
    };
    (text.to_string(), InlineKeyboardMarkup::new(rows))
}

pub(crate) fn render_report(report: &Report) -> String {
    format!(
        "Report from {} to {}. Income: {:.2}, Expense: {:.2}",
        report.from, report.to, report.income, report.expense
    )
}

pub(crate) fn user_message_for_report_error(err: &ReportError) -> String {
    match err {
        ReportError::InvalidDate { .. } => format!("error: {err}"),
        ReportError::Upstream(_) => {
            "error: the report could not be produced, try again later".to_string()
        }
    }
}
