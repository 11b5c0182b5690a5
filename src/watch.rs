//! Runs registrations against live filesystem notifications.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::info;

use crate::config::Config;
use crate::error::Result;
use crate::events::DirectoryEvents;
use crate::registration::Registration;
use crate::router::RouterTable;

/// A registration paired with the recursive watch over its root.
#[derive(Debug)]
pub struct Watch {
    registration: Arc<Registration>,
    events: DirectoryEvents,
}

impl Watch {
    /// Subscribes to the registration's root.
    ///
    /// The subscription exists before [`run`](Self::run) scans the tree, so
    /// writes landing between the two are not missed.
    pub fn new(registration: Registration) -> Result<Self> {
        let events = DirectoryEvents::new(registration.root())?;

        Ok(Watch {
            registration: Arc::new(registration),
            events,
        })
    }

    pub fn registration(&self) -> &Arc<Registration> {
        &self.registration
    }

    /// Seeds existing files, then handles events until the watch ends.
    pub async fn run(mut self) -> Result<()> {
        let seeded = self.registration.scan().await?;
        info!(root = %self.registration.root().display(), seeded, "Watching directory");

        while let Some(event) = self.events.next_event().await {
            self.registration.handle(&event).await;
        }

        Ok(())
    }
}

/// Builds every configured watch and runs each on its own task.
///
/// All registrations are validated before anything is spawned. To reload,
/// build a fresh set from the new configuration and abort the old handles.
pub async fn spawn_all(
    config: &Config,
    routers: &RouterTable,
) -> Result<Vec<JoinHandle<Result<()>>>> {
    let watches = config
        .watch
        .iter()
        .map(|watch| Registration::new(watch, routers).and_then(Watch::new))
        .collect::<Result<Vec<_>>>()?;

    if !config.no_hello {
        routers.hello_all().await;
    }

    Ok(watches
        .into_iter()
        .map(|watch| tokio::spawn(watch.run()))
        .collect())
}
