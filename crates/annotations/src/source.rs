//! Upstream location record sources.

use std::collections::HashMap;
use std::time::Duration;

use foundation::LocationRecord;
use futures_util::future::{self, BoxFuture};
use serde::Deserialize;
use tracing::debug;

/// Error type for record source operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    Transport(String),
    Status(u16),
    Decode(String),
}

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceError::Transport(msg) => write!(f, "record source transport error: {msg}"),
            SourceError::Status(code) => write!(f, "record source returned status {code}"),
            SourceError::Decode(msg) => write!(f, "record source payload invalid: {msg}"),
        }
    }
}

impl std::error::Error for SourceError {}

/// Supplies the location records for a context (a location filter, a
/// viewport key, ...). The records are treated as opaque fetched data.
pub trait RecordSource: Send + Sync {
    fn fetch<'a>(&'a self, context: &'a str)
    -> BoxFuture<'a, Result<Vec<LocationRecord>, SourceError>>;
}

/// Fetches `GET {base_url}/locations?context=<context>`.
pub struct HttpRecordSource {
    base_url: String,
    client: reqwest::Client,
}

impl HttpRecordSource {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SourceError::Transport(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into(),
            client,
        })
    }

    pub fn locations_url(&self) -> String {
        format!("{}/locations", self.base_url.trim_end_matches('/'))
    }
}

impl RecordSource for HttpRecordSource {
    fn fetch<'a>(
        &'a self,
        context: &'a str,
    ) -> BoxFuture<'a, Result<Vec<LocationRecord>, SourceError>> {
        Box::pin(async move {
            let response = self
                .client
                .get(self.locations_url())
                .query(&[("context", context)])
                .send()
                .await
                .map_err(|e| SourceError::Transport(e.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                return Err(SourceError::Status(status.as_u16()));
            }
            let body = response
                .text()
                .await
                .map_err(|e| SourceError::Transport(e.to_string()))?;
            let records = parse_records(&body)?;
            debug!(context, records = records.len(), "fetched location records");
            Ok(records)
        })
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Payload {
    List(Vec<LocationRecord>),
    Envelope { records: Vec<LocationRecord> },
}

/// Accepts either a bare array or `{ "records": [...] }`.
pub fn parse_records(body: &str) -> Result<Vec<LocationRecord>, SourceError> {
    match serde_json::from_str(body) {
        Ok(Payload::List(records)) | Ok(Payload::Envelope { records }) => Ok(records),
        Err(e) => Err(SourceError::Decode(e.to_string())),
    }
}

/// Fixed records per context. Unknown contexts yield no records.
#[derive(Debug, Clone, Default)]
pub struct StaticRecordSource {
    by_context: HashMap<String, Vec<LocationRecord>>,
}

impl StaticRecordSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_context(mut self, context: &str, records: Vec<LocationRecord>) -> Self {
        self.by_context.insert(context.to_string(), records);
        self
    }
}

impl RecordSource for StaticRecordSource {
    fn fetch<'a>(
        &'a self,
        context: &'a str,
    ) -> BoxFuture<'a, Result<Vec<LocationRecord>, SourceError>> {
        let records = self.by_context.get(context).cloned().unwrap_or_default();
        Box::pin(future::ready(Ok(records)))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use foundation::Coordinate;

    use super::{HttpRecordSource, RecordSource, SourceError, StaticRecordSource, parse_records};

    #[test]
    fn parses_bare_list_and_envelope() {
        let list = parse_records(r#"[{"id":"1","address":"A"}]"#).unwrap();
        assert_eq!(list.len(), 1);

        let env = parse_records(
            r#"{"records":[{"id":"1","lat":1.0,"lng":2.0},{"id":"2","address":"B"}]}"#,
        )
        .unwrap();
        assert_eq!(env.len(), 2);
        assert_eq!(env[0].coordinate, Some(Coordinate::new(1.0, 2.0)));
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(parse_records("{}"), Err(SourceError::Decode(_))));
    }

    #[test]
    fn locations_url_trims_slash() {
        let s = HttpRecordSource::new("http://api.local/v1/", Duration::from_secs(1)).unwrap();
        assert_eq!(s.locations_url(), "http://api.local/v1/locations");
    }

    #[tokio::test]
    async fn static_source_returns_context_records() {
        let s = StaticRecordSource::new().with_context(
            "downtown",
            parse_records(r#"[{"id":"1","address":"A"}]"#).unwrap(),
        );
        assert_eq!(s.fetch("downtown").await.unwrap().len(), 1);
        assert!(s.fetch("elsewhere").await.unwrap().is_empty());
    }
}
