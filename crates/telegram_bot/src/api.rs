use reqwest::{Client, StatusCode};
use serde::Deserialize;

/// Client for the reporting backend.
#[derive(Clone, Debug)]
pub(crate) struct ApiClient {
    client: Client,
    base_url: String,
}

/// Body of a successful `GET /reports`.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
pub(crate) struct ReportTotals {
    pub income: f64,
    pub expense: f64,
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum ApiError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("unexpected status: {0}")]
    Status(StatusCode),
    #[error("malformed response body: {0}")]
    Body(reqwest::Error),
}

impl ApiClient {
    pub(crate) fn new(client: Client, base_url: String) -> Self {
        Self { client, base_url }
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    pub(crate) async fn fetch_report(&self, from: &str, to: &str) -> Result<ReportTotals, ApiError> {
        let resp = self
            .client
            .get(self.url("/reports"))
            .query(&[("from", from), ("to", to)])
            .send()
            .await?;

        let status = resp.status();
        if status != StatusCode::OK {
            match resp.text().await {
                Ok(body) => tracing::debug!("report backend answered {status}: {body}"),
                Err(err) => tracing::debug!("body read failed: {err}"),
            }
            return Err(ApiError::Status(status));
        }

        resp.json::<ReportTotals>().await.map_err(ApiError::Body)
    }
}

/// Serves `router` on an ephemeral local port and returns its base url.
#[cfg(test)]
pub(crate) async fn spawn_backend(router: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}
