//! Matching completed messages against the configured triggers.

use std::collections::BTreeMap;

use regex::Regex;
use serde_json::Value;

use crate::config::PatternSpec;
use crate::cursor::Message;
use crate::error::{self, Error, Result};

/// Named groups and matched fields exposed to routers for formatting.
pub type Captures = BTreeMap<String, String>;

/// Router options given per trigger target, overriding router defaults.
pub type RouterArgs = serde_json::Map<String, Value>;

/// Condition a message has to satisfy for a trigger to fire.
#[derive(Clone, Debug)]
pub enum MatchRule {
    /// Regex searched over the message text.
    Text(Regex),
    /// Field-by-field match over the message parsed as a JSON object.
    Fields(FieldRule),
}

/// Required fields of a JSON object, in configuration order.
#[derive(Clone, Debug, Default)]
pub struct FieldRule {
    fields: Vec<(String, FieldMatch)>,
}

#[derive(Clone, Debug)]
pub enum FieldMatch {
    /// Regex searched over a string value.
    Pattern(Regex),
    /// Literal equality for numbers, booleans, null and arrays.
    Exact(Value),
    /// Rule applied to an object value.
    Nested(FieldRule),
}

impl MatchRule {
    pub fn compile(spec: &PatternSpec) -> Result<Self> {
        match spec {
            PatternSpec::Regex(pattern) => Ok(MatchRule::Text(error::pattern("trigger", pattern)?)),
            PatternSpec::Fields(fields) => Ok(MatchRule::Fields(FieldRule::compile(fields)?)),
            PatternSpec::Literal(value) => Err(Error::Rule(format!(
                "expected a pattern or a field map, found `{}`",
                value
            ))),
        }
    }

    pub fn is_structured(&self) -> bool {
        matches!(self, MatchRule::Fields(_))
    }

    /// Evaluates the rule, returning captures on a match.
    ///
    /// Field rules need the parsed `record`; without one they never match.
    pub fn evaluate(&self, text: &str, record: Option<&Value>) -> Option<Captures> {
        let mut captures = Captures::new();
        let matched = match self {
            MatchRule::Text(regex) => capture(regex, text, &mut captures),
            MatchRule::Fields(rule) => match record {
                Some(record) => rule.evaluate(record, "", &mut captures),
                None => false,
            },
        };

        if matched {
            Some(captures)
        } else {
            None
        }
    }
}

impl FieldRule {
    fn compile(fields: &BTreeMap<String, PatternSpec>) -> Result<Self> {
        let fields = fields
            .iter()
            .map(|(key, spec)| {
                let field = match spec {
                    PatternSpec::Regex(pattern) => {
                        FieldMatch::Pattern(error::pattern("trigger field", pattern)?)
                    }
                    PatternSpec::Fields(nested) => FieldMatch::Nested(FieldRule::compile(nested)?),
                    PatternSpec::Literal(value) => FieldMatch::Exact(value.clone()),
                };
                Ok((key.clone(), field))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(FieldRule { fields })
    }

    /// Fails closed on the first missing or mismatching field.
    fn evaluate(&self, value: &Value, prefix: &str, captures: &mut Captures) -> bool {
        let Value::Object(object) = value else {
            return false;
        };

        for (key, field) in &self.fields {
            let Some(value) = object.get(key) else {
                return false;
            };
            let path = if prefix.is_empty() {
                key.clone()
            } else {
                format!("{}.{}", prefix, key)
            };

            let matched = match field {
                FieldMatch::Pattern(regex) => match value {
                    Value::String(s) => capture(regex, s, captures),
                    _ => false,
                },
                FieldMatch::Exact(expected) => value == expected,
                FieldMatch::Nested(rule) => rule.evaluate(value, &path, captures),
            };
            if !matched {
                return false;
            }

            if !matches!(field, FieldMatch::Nested(_)) {
                captures.insert(path, render(value));
            }
        }

        true
    }
}

fn capture(regex: &Regex, text: &str, captures: &mut Captures) -> bool {
    let Some(caps) = regex.captures(text) else {
        return false;
    };

    for name in regex.capture_names().flatten() {
        if let Some(m) = caps.name(name) {
            captures.insert(name.to_owned(), m.as_str().to_owned());
        }
    }

    true
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// A router to notify, with its per-trigger option overrides.
#[derive(Clone, Debug, PartialEq)]
pub struct RouterTarget {
    pub name: String,
    pub args: RouterArgs,
}

/// Match rule plus the ordered routers to notify when it fires.
#[derive(Clone, Debug)]
pub struct Trigger {
    rule: MatchRule,
    targets: Vec<RouterTarget>,
}

impl Trigger {
    pub fn new(rule: MatchRule, targets: Vec<RouterTarget>) -> Self {
        Trigger { rule, targets }
    }

    pub fn targets(&self) -> &[RouterTarget] {
        &self.targets
    }
}

/// A trigger that fired for a message.
#[derive(Debug)]
pub struct Hit<'a> {
    pub trigger: &'a Trigger,
    pub captures: Captures,
}

/// The ordered trigger set of a registration.
#[derive(Clone, Debug, Default)]
pub struct Triggers {
    triggers: Vec<Trigger>,
}

impl Triggers {
    pub fn new(triggers: Vec<Trigger>) -> Self {
        Triggers { triggers }
    }

    pub fn len(&self) -> usize {
        self.triggers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triggers.is_empty()
    }

    /// Every trigger is evaluated in order; one message may fire several.
    pub fn evaluate(&self, message: &Message, record: Option<&Value>) -> Vec<Hit<'_>> {
        if message.is_idle() {
            return Vec::new();
        }

        self.triggers
            .iter()
            .filter_map(|trigger| {
                trigger
                    .rule
                    .evaluate(message.text(), record)
                    .map(|captures| Hit { trigger, captures })
            })
            .collect()
    }
}
