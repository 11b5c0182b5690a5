//! Tails log files under watched directories, reassembles multi-line log
//! messages and routes the ones matching configured triggers to notifiers.
//!
//! Files are followed through recursive [`notify`](https://crates.io/crates/notify)
//! watches. Each [`Registration`] keeps a cursor per file and only ever reads
//! the bytes appended since, splitting them into messages with a boundary
//! regex (or one JSON record per line).
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use tailwatch::{Config, LogRouter, RouterTable};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config: Config = serde_json::from_str(r#"{
//!         "watch": [{
//!             "dir": "/var/log/app",
//!             "filename": "\\.log$",
//!             "text_pattern": "^\\[\\d{4}-\\d{2}-\\d{2}\\]",
//!             "triggers": [{ "pattern": "ERROR", "routers": [{ "name": "log" }] }]
//!         }]
//!     }"#)?;
//!     let routers = RouterTable::new().with("log", Arc::new(LogRouter::default()));
//!
//!     for handle in tailwatch::spawn_all(&config, &routers).await? {
//!         handle.await??;
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Caveats
//!
//! A message is only closed by the next boundary line (or, with
//! `"flush": "at_eof"`, by reaching the end of the file). Buffered text of a
//! file that is deleted or moved away is discarded, and removing or moving a
//! directory stops tracking every file below it.
//!
//! The `filename` filter is searched anywhere in the file name; anchor it
//! (`^app\.log$`) to require a full match.

mod cache;
mod config;
mod cursor;
mod error;
mod events;
mod matcher;
mod reassembly;
mod registration;
mod router;
mod watch;

pub use cache::{Entry, WatchCache};
pub use config::{Config, Format, PatternSpec, RouterTargetConfig, TriggerConfig, WatchConfig};
pub use cursor::{Cursor, Message};
pub use error::{DeliveryError, Error, Result};
pub use events::{DirectoryEvents, EventKind, WatchEvent};
pub use matcher::{
    Captures, FieldMatch, FieldRule, Hit, MatchRule, RouterArgs, RouterTarget, Trigger, Triggers,
};
pub use reassembly::{FirstLine, Flush, Reassembly};
pub use registration::Registration;
pub use router::{local_hostname, render_template, LogRouter, Payload, Router, RouterTable};
pub use watch::{spawn_all, Watch};

#[cfg(doctest)]
doc_comment::doctest!("../README.md");
