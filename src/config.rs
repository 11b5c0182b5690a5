//! Deserializable shape of a watch configuration.
//!
//! Loading the document (from YAML, JSON, ...) is up to the caller; every
//! type here only derives `serde::Deserialize`.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;
use serde_json::Value;

use crate::matcher::RouterArgs;
use crate::reassembly::{FirstLine, Flush};

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub watch: Vec<WatchConfig>,
    /// Skip the liveness notice sent to every router at startup.
    #[serde(default)]
    pub no_hello: bool,
}

/// One watched directory.
#[derive(Clone, Debug, Deserialize)]
pub struct WatchConfig {
    pub dir: PathBuf,
    /// Regex searched over the file name of every candidate file. Not
    /// anchored: use `^...$` to require a full match.
    pub filename: String,
    /// Regex matching the first line of each message. It and `first_line`
    /// and `flush` are rejected for the `json` format.
    #[serde(default)]
    pub text_pattern: Option<String>,
    #[serde(default)]
    pub format: Format,
    #[serde(default)]
    pub first_line: FirstLine,
    #[serde(default)]
    pub flush: Flush,
    #[serde(default)]
    pub triggers: Vec<TriggerConfig>,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Format {
    /// Free text, messages split on `text_pattern`.
    #[default]
    Text,
    /// One JSON record per line.
    Json,
}

#[derive(Clone, Debug, Deserialize)]
pub struct TriggerConfig {
    #[serde(alias = "text_pattern")]
    pub pattern: PatternSpec,
    pub routers: Vec<RouterTargetConfig>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct RouterTargetConfig {
    pub name: String,
    #[serde(default)]
    pub args: RouterArgs,
}

/// Uncompiled match rule: a regex, a map of per-field rules, or a literal
/// to compare a field against.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum PatternSpec {
    Regex(String),
    Fields(BTreeMap<String, PatternSpec>),
    Literal(Value),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_full_config() {
        let config: Config = serde_json::from_value(json!({
            "no_hello": true,
            "watch": [
                {
                    "dir": "/var/log/app",
                    "filename": r"\.log$",
                    "text_pattern": r"^\[\d{4}-\d{2}-\d{2}\]",
                    "first_line": "accumulate",
                    "flush": "at_eof",
                    "triggers": [
                        {
                            "text_pattern": "ERROR",
                            "routers": [{ "name": "ops", "args": { "color": "#ff0000" } }]
                        }
                    ]
                },
                {
                    "dir": "/var/log/json",
                    "filename": r"\.jsonl$",
                    "format": "json",
                    "triggers": [
                        {
                            "pattern": { "level": "ERROR", "status": 500, "ctx": { "svc": "^api" } },
                            "routers": [{ "name": "ops" }]
                        }
                    ]
                }
            ]
        }))
        .unwrap();

        assert!(config.no_hello);
        let text = &config.watch[0];
        assert_eq!(text.format, Format::Text);
        assert_eq!(text.first_line, FirstLine::Accumulate);
        assert_eq!(text.flush, Flush::AtEof);
        assert_eq!(text.triggers[0].pattern, PatternSpec::Regex("ERROR".into()));
        assert_eq!(text.triggers[0].routers[0].args["color"], json!("#ff0000"));

        let records = &config.watch[1];
        assert_eq!(records.format, Format::Json);
        assert_eq!(records.first_line, FirstLine::RequireBoundary);
        assert_eq!(records.flush, Flush::Defer);
        assert!(records.text_pattern.is_none());
        let PatternSpec::Fields(fields) = &records.triggers[0].pattern else {
            panic!("expected field rule");
        };
        assert_eq!(fields["status"], PatternSpec::Literal(json!(500)));
        assert!(matches!(fields["ctx"], PatternSpec::Fields(_)));
        assert!(records.triggers[0].routers[0].args.is_empty());
    }
}
