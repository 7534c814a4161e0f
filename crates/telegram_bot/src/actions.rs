//! Callback actions carried by inline keyboard buttons.
//!
//! Telegram hands callback data back as an opaque string. It is decoded once
//! here into [`Action`], so the rest of the bot never looks at raw payloads.
//!
//! Wire format:
//! - `menu:report` => [`Action::StartFlow`]
//! - `date:YYYY-MM-DD:<step>` => [`Action::SelectDate`]
//! - `month:YYYY-MM:<step>` => [`Action::ChangeMonth`]
//! - `noop` => [`Action::Noop`]

use std::{fmt, str::FromStr};

use chrono::{Datelike, Month, NaiveDate};

use crate::report::{DATE_FORMAT, parse_date};

const START_FLOW: &str = "menu:report";
const NOOP: &str = "noop";

/// Which bound of the range a calendar is collecting.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) enum CalendarStep {
    Start,
    End,
}

impl CalendarStep {
    fn code(self) -> u8 {
        match self {
            Self::Start => 1,
            Self::End => 2,
        }
    }

    fn from_code(raw: &str) -> Option<Self> {
        match raw {
            "1" => Some(Self::Start),
            "2" => Some(Self::End),
            _ => None,
        }
    }
}

/// A calendar month, always within `MIN_YEAR..=MAX_YEAR`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct YearMonth {
    year: i32,
    month: u32,
}

impl YearMonth {
    pub(crate) const MIN_YEAR: i32 = 1;
    pub(crate) const MAX_YEAR: i32 = 9999;

    pub(crate) fn new(year: i32, month: u32) -> Option<Self> {
        let valid = (Self::MIN_YEAR..=Self::MAX_YEAR).contains(&year) && (1..=12).contains(&month);
        valid.then_some(Self { year, month })
    }

    /// Month containing `date`, clamped to the supported year range.
    pub(crate) fn of(date: NaiveDate) -> Self {
        Self {
            year: date.year().clamp(Self::MIN_YEAR, Self::MAX_YEAR),
            month: date.month(),
        }
    }

    pub(crate) fn year(self) -> i32 {
        self.year
    }

    pub(crate) fn days(self) -> u32 {
        match self.month {
            1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
            4 | 6 | 9 | 11 => 30,
            _ if is_leap_year(self.year) => 29,
            _ => 28,
        }
    }

    /// Previous month; stays put at the lower edge of the range.
    pub(crate) fn prev(self) -> Self {
        match (self.year, self.month) {
            (Self::MIN_YEAR, 1) => self,
            (year, 1) => Self { year: year - 1, month: 12 },
            (year, month) => Self { year, month: month - 1 },
        }
    }

    /// Next month; stays put at the upper edge of the range.
    pub(crate) fn next(self) -> Self {
        match (self.year, self.month) {
            (Self::MAX_YEAR, 12) => self,
            (year, 12) => Self { year: year + 1, month: 1 },
            (year, month) => Self { year, month: month + 1 },
        }
    }

    pub(crate) fn day(self, day: u32) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year, self.month, day)
    }

    /// English month name, e.g. "February".
    pub(crate) fn month_name(self) -> &'static str {
        u8::try_from(self.month)
            .ok()
            .and_then(|m| Month::try_from(m).ok())
            .map(|m| m.name())
            .unwrap_or("?")
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Action {
    StartFlow,
    SelectDate { date: NaiveDate, step: CalendarStep },
    ChangeMonth { target: YearMonth, step: CalendarStep },
    Noop,
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub(crate) enum ActionError {
    #[error("unknown action `{0}`")]
    Unknown(String),
    #[error("malformed action payload `{0}`")]
    Malformed(String),
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StartFlow => f.write_str(START_FLOW),
            Self::SelectDate { date, step } => {
                write!(f, "date:{}:{}", date.format(DATE_FORMAT), step.code())
            }
            Self::ChangeMonth { target, step } => write!(f, "month:{target}:{}", step.code()),
            Self::Noop => f.write_str(NOOP),
        }
    }
}

impl FromStr for Action {
    type Err = ActionError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        match data {
            START_FLOW => return Ok(Self::StartFlow),
            NOOP => return Ok(Self::Noop),
            _ => {}
        }

        let malformed = || ActionError::Malformed(data.to_string());
        let mut parts = data.split(':');
        let prefix = parts.next().unwrap_or_default();
        let (Some(value), Some(step), None) = (parts.next(), parts.next(), parts.next()) else {
            return match prefix {
                "date" | "month" => Err(malformed()),
                _ => Err(ActionError::Unknown(data.to_string())),
            };
        };

        match prefix {
            "date" => {
                let date = parse_date(value).ok_or_else(malformed)?;
                let step = CalendarStep::from_code(step).ok_or_else(malformed)?;
                Ok(Self::SelectDate { date, step })
            }
            "month" => {
                let target = parse_year_month(value).ok_or_else(malformed)?;
                let step = CalendarStep::from_code(step).ok_or_else(malformed)?;
                Ok(Self::ChangeMonth { target, step })
            }
            _ => Err(ActionError::Unknown(data.to_string())),
        }
    }
}

fn parse_year_month(raw: &str) -> Option<YearMonth> {
    let (year, month) = raw.split_once('-')?;
    YearMonth::new(year.parse().ok()?, month.parse().ok()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ym(year: i32, month: u32) -> YearMonth {
        YearMonth::new(year, month).unwrap()
    }

    #[test]
    fn decodes_start_flow_and_noop() {
        assert_eq!("menu:report".parse::<Action>(), Ok(Action::StartFlow));
        assert_eq!("noop".parse::<Action>(), Ok(Action::Noop));
    }

    #[test]
    fn decodes_date_selection() {
        let action: Action = "date:2024-01-10:1".parse().unwrap();
        assert_eq!(
            action,
            Action::SelectDate {
                date: NaiveDate::from_ymd_opt(2024, 1, 10).unwrap(),
                step: CalendarStep::Start,
            }
        );
    }

    #[test]
    fn decodes_month_navigation() {
        let action: Action = "month:2023-12:2".parse().unwrap();
        assert_eq!(
            action,
            Action::ChangeMonth {
                target: ym(2023, 12),
                step: CalendarStep::End,
            }
        );
    }

    #[test]
    fn encoding_matches_wire_format() {
        let select = Action::SelectDate {
            date: NaiveDate::from_ymd_opt(2024, 2, 29).unwrap(),
            step: CalendarStep::End,
        };
        assert_eq!(select.to_string(), "date:2024-02-29:2");

        let nav = Action::ChangeMonth {
            target: ym(987, 3),
            step: CalendarStep::Start,
        };
        assert_eq!(nav.to_string(), "month:0987-03:1");
        assert_eq!(nav.to_string().parse::<Action>(), Ok(nav));
    }

    #[test]
    fn rejects_impossible_dates_and_steps() {
        assert!(matches!(
            "date:2023-02-29:1".parse::<Action>(),
            Err(ActionError::Malformed(_))
        ));
        assert!(matches!(
            "date:2024-01-10:3".parse::<Action>(),
            Err(ActionError::Malformed(_))
        ));
        assert!(matches!(
            "month:2024-13:1".parse::<Action>(),
            Err(ActionError::Malformed(_))
        ));
        assert!(matches!(
            "date:2024-01-10".parse::<Action>(),
            Err(ActionError::Malformed(_))
        ));
    }

    #[test]
    fn rejects_unknown_prefix() {
        assert!(matches!(
            "menu:total_profit_loss".parse::<Action>(),
            Err(ActionError::Unknown(_))
        ));
        assert!(matches!("".parse::<Action>(), Err(ActionError::Unknown(_))));
    }

    #[test]
    fn month_navigation_wraps_years() {
        assert_eq!(ym(2024, 1).prev(), ym(2023, 12));
        assert_eq!(ym(2023, 12).next(), ym(2024, 1));
        assert_eq!(ym(2024, 6).next(), ym(2024, 7));
        assert_eq!(ym(1, 1).prev(), ym(1, 1));
        assert_eq!(ym(9999, 12).next(), ym(9999, 12));
    }

    #[test]
    fn day_counts_follow_leap_rules() {
        assert_eq!(ym(2024, 2).days(), 29);
        assert_eq!(ym(2023, 2).days(), 28);
        assert_eq!(ym(1900, 2).days(), 28);
        assert_eq!(ym(2000, 2).days(), 29);
        assert_eq!(ym(2024, 4).days(), 30);
        assert_eq!(ym(2024, 12).days(), 31);
    }
}
