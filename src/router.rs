//! The delivery side: routers format matched messages and send them.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use futures_util::future::{self, BoxFuture, FutureExt};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::cursor::Cursor;
use crate::error::DeliveryError;
use crate::matcher::{Captures, RouterArgs};

/// Opaque, router-specific delivery payload.
pub type Payload = Value;

/// A named notification channel.
///
/// `payload` must not perform I/O; all delivery happens in `send`. Errors
/// returned by `send` and `send_hello` are logged by the caller and never
/// retried.
pub trait Router: Send + Sync {
    /// Liveness notice sent once at startup.
    fn send_hello(&self) -> BoxFuture<'_, Result<(), DeliveryError>> {
        future::ready(Ok(())).boxed()
    }

    fn payload(&self, text: &str, cursor: &Cursor, captures: &Captures, args: &RouterArgs)
        -> Payload;

    fn send(&self, payload: Payload) -> BoxFuture<'_, Result<(), DeliveryError>>;
}

/// Routers of a registration, looked up by name.
#[derive(Clone, Default)]
pub struct RouterTable {
    routers: HashMap<String, Arc<dyn Router>>,
}

impl fmt::Debug for RouterTable {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        let mut names: Vec<_> = self.routers.keys().collect();
        names.sort();
        f.debug_struct("RouterTable").field("routers", &names).finish()
    }
}

impl RouterTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, router: Arc<dyn Router>) {
        self.routers.insert(name.into(), router);
    }

    pub fn with(mut self, name: impl Into<String>, router: Arc<dyn Router>) -> Self {
        self.insert(name, router);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Router>> {
        self.routers.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.routers.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.routers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routers.is_empty()
    }

    /// Sends the startup liveness notice through every router. Failures
    /// are logged and otherwise ignored.
    pub async fn hello_all(&self) {
        for (name, router) in &self.routers {
            match router.send_hello().await {
                Ok(()) => info!(router = %name, "Sent hello"),
                Err(e) => warn!(router = %name, error = %e, "Failed to send hello"),
            }
        }
    }
}

/// Name of the local host, looked up once.
pub fn local_hostname() -> &'static str {
    static HOSTNAME: OnceLock<String> = OnceLock::new();
    HOSTNAME.get_or_init(|| {
        hostname::get()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "localhost".to_owned())
    })
}

/// Substitutes `{NAME}` placeholders in `template`.
///
/// Capture names take precedence over the built-in `HOSTNAME`, `LOGFILE`,
/// `LINENO` and `MESSAGE`. Unknown placeholders are kept verbatim.
pub fn render_template(template: &str, text: &str, cursor: &Cursor, captures: &Captures) -> String {
    let mut out = String::with_capacity(template.len() + text.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            out.push_str(&rest[open..]);
            return out;
        };

        let key = &after[..close];
        match captures.get(key) {
            Some(value) => out.push_str(value),
            None => match key {
                "HOSTNAME" => out.push_str(local_hostname()),
                "LOGFILE" => out.push_str(&cursor.path().display().to_string()),
                "LINENO" => out.push_str(&cursor.line().to_string()),
                "MESSAGE" => out.push_str(text),
                _ => {
                    out.push('{');
                    out.push_str(key);
                    out.push('}');
                }
            },
        }
        rest = &after[close + 1..];
    }
    out.push_str(rest);

    out
}

/// Router that emits matched messages as `tracing` events.
///
/// The `template` argument of a trigger target overrides the default
/// template for that target.
#[derive(Clone, Debug)]
pub struct LogRouter {
    template: String,
}

impl LogRouter {
    pub const DEFAULT_TEMPLATE: &'static str = "{LOGFILE}:{LINENO}: {MESSAGE}";

    pub fn new(template: impl Into<String>) -> Self {
        LogRouter {
            template: template.into(),
        }
    }
}

impl Default for LogRouter {
    fn default() -> Self {
        Self::new(Self::DEFAULT_TEMPLATE)
    }
}

impl Router for LogRouter {
    fn payload(
        &self,
        text: &str,
        cursor: &Cursor,
        captures: &Captures,
        args: &RouterArgs,
    ) -> Payload {
        let template = args
            .get("template")
            .and_then(Value::as_str)
            .unwrap_or(self.template.as_str());

        json!({
            "text": render_template(template, text, cursor, captures),
            "logfile": cursor.path().display().to_string(),
            "lineno": cursor.line(),
        })
    }

    fn send(&self, payload: Payload) -> BoxFuture<'_, Result<(), DeliveryError>> {
        let text = payload["text"].as_str().unwrap_or_default();
        info!(target: "tailwatch::alert", "{}", text);
        future::ready(Ok(())).boxed()
    }
}
