//! Profit/loss reports over a date range.

use std::future::Future;

use chrono::NaiveDate;

use crate::api::{ApiClient, ApiError, ReportTotals};

/// Textual date format used in callbacks, sessions and report queries.
pub(crate) const DATE_FORMAT: &str = "%Y-%m-%d";

/// Strictly parses a `YYYY-MM-DD` date.
pub(crate) fn parse_date(raw: &str) -> Option<NaiveDate> {
    let bytes = raw.as_bytes();
    let shaped = bytes.len() == 10
        && bytes.iter().enumerate().all(|(idx, b)| match idx {
            4 | 7 => *b == b'-',
            _ => b.is_ascii_digit(),
        });
    if !shaped {
        return None;
    }
    NaiveDate::parse_from_str(raw, DATE_FORMAT).ok()
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Report {
    pub from: String,
    pub to: String,
    pub income: f64,
    pub expense: f64,
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum ReportError {
    #[error("invalid {bound} date `{value}`, expected YYYY-MM-DD")]
    InvalidDate { bound: &'static str, value: String },
    #[error("report unavailable: {0}")]
    Upstream(#[from] ApiError),
}

/// Source of report totals. Implemented by [`ApiClient`].
pub(crate) trait ReportFetcher: Send + Sync {
    fn fetch(
        &self,
        from: &str,
        to: &str,
    ) -> impl Future<Output = Result<ReportTotals, ApiError>> + Send;
}

impl ReportFetcher for ApiClient {
    async fn fetch(&self, from: &str, to: &str) -> Result<ReportTotals, ApiError> {
        self.fetch_report(from, to).await
    }
}

#[derive(Clone, Debug)]
pub(crate) struct ReportService<F = ApiClient> {
    fetcher: F,
}

impl<F: ReportFetcher> ReportService<F> {
    pub(crate) fn new(fetcher: F) -> Self {
        Self { fetcher }
    }

    pub(crate) async fn get_report(&self, from: &str, to: &str) -> Result<Report, ReportError> {
        if parse_date(from).is_none() {
            return Err(ReportError::InvalidDate {
                bound: "start",
                value: from.to_string(),
            });
        }
        if parse_date(to).is_none() {
            return Err(ReportError::InvalidDate {
                bound: "end",
                value: to.to_string(),
            });
        }

        tracing::debug!("requesting report {from} -> {to}");
        let totals = self.fetcher.fetch(from, to).await?;

        Ok(Report {
            from: from.to_string(),
            to: to.to_string(),
            income: totals.income,
            expense: totals.expense,
        })
    }
}
