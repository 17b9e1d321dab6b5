use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

/// Prefix under which caller-supplied context keys are stored.
pub const CTX_PREFIX: &str = "ctx.";

/// Severity level for stored records.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
    Critical,
}

impl Severity {
    pub fn icon(self) -> &'static str {
        match self {
            Severity::Debug => "🔍",
            Severity::Info => "•",
            Severity::Warn => "⚠",
            Severity::Error => "❌",
            Severity::Critical => "🚨",
        }
    }
}

/// One persisted line.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub ts: DateTime<Utc>,
    pub severity: Severity,
    pub category: String,
    pub message: String,
    /// Context fields, keys always carry the `ctx.` prefix.
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

impl LogRecord {
    pub fn new(category: impl Into<String>, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            ts: Utc::now(),
            severity,
            category: category.into(),
            message: message.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn at(mut self, ts: DateTime<Utc>) -> Self {
        self.ts = ts;
        self
    }

    /// Attach a context field. The key is namespaced so it can never shadow
    /// `ts`, `severity`, `category` or `message`.
    pub fn with_field(mut self, key: &str, value: impl fmt::Display) -> Self {
        self.fields.insert(ctx_key(key), value.to_string());
        self
    }

    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields.get(&ctx_key(key)).map(String::as_str)
    }

    /// `HH:MM:SS <icon> [<category>] <message> | ctx.k=v ...` in local time.
    pub fn render_line(&self) -> String {
        let local: DateTime<Local> = self.ts.with_timezone(&Local);
        let mut line = format!(
            "{} {} [{}] {}",
            local.format("%H:%M:%S"),
            self.severity.icon(),
            self.category,
            self.message.replace('\n', " ")
        );
        if !self.fields.is_empty() {
            line.push_str(" |");
            for (k, v) in &self.fields {
                line.push(' ');
                line.push_str(k);
                line.push('=');
                line.push_str(&v.replace('\n', " "));
            }
        }
        line
    }
}

fn ctx_key(key: &str) -> String {
    if key.starts_with(CTX_PREFIX) {
        key.to_string()
    } else {
        format!("{CTX_PREFIX}{key}")
    }
}

/// Where an artifact sits in its lifecycle.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactState {
    Raw,
    Compressed,
    Purged,
}

impl ArtifactState {
    /// Only forward moves are legal.
    pub fn can_transition_to(self, next: ArtifactState) -> bool {
        matches!(
            (self, next),
            (ArtifactState::Raw, ArtifactState::Compressed)
                | (ArtifactState::Compressed, ArtifactState::Purged)
        )
    }
}

/// A file produced by the logging or diagnostics layer.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LogArtifact {
    pub path: PathBuf,
    pub category: String,
    pub modified: DateTime<Utc>,
    pub size: u64,
    pub state: ArtifactState,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn context_fields_are_namespaced() {
        let record = LogRecord::new("steps", Severity::Warn, "retrying")
            .with_field("message", "shadow attempt")
            .with_field("attempt", 2);
        assert_eq!(record.message, "retrying");
        assert_eq!(record.field("message"), Some("shadow attempt"));
        assert!(record.fields.contains_key("ctx.attempt"));
        assert!(!record.fields.contains_key("message"));
    }

    #[test]
    fn render_line_is_compact() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 5).unwrap();
        let record = LogRecord::new("locator", Severity::Error, "not found\nat all")
            .at(ts)
            .with_field("name", "submit");
        let line = record.render_line();
        assert!(line.contains("❌ [locator] not found at all | ctx.name=submit"));
        assert_eq!(line.split(' ').next().map(str::len), Some(8));
    }

    #[test]
    fn state_moves_forward_only() {
        assert!(ArtifactState::Raw.can_transition_to(ArtifactState::Compressed));
        assert!(ArtifactState::Compressed.can_transition_to(ArtifactState::Purged));
        assert!(!ArtifactState::Raw.can_transition_to(ArtifactState::Purged));
        assert!(!ArtifactState::Compressed.can_transition_to(ArtifactState::Raw));
    }
}
