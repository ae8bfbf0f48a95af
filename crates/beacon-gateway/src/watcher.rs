use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use beacon_store::StatusStore;
use beacon_types::status::{RawStatus, Snowflake, StatusRecord};

use crate::source::{GuildDirectory, SourceEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    Disconnected,
    Connected,
}

/// Keeps the stored [`StatusRecord`] in line with the tracked user's
/// presence.
///
/// All work happens on the single task running [`PresenceWatcher::run`], so
/// two derivations never overlap. Every operation is fault-isolated: an
/// error is logged and the watcher waits for the next event or tick.
pub struct PresenceWatcher {
    target: Snowflake,
    store: StatusStore,
    directory: Arc<dyn GuildDirectory>,
    state: WatcherState,
}

impl PresenceWatcher {
    pub fn new(target: Snowflake, store: StatusStore, directory: Arc<dyn GuildDirectory>) -> Self {
        Self {
            target,
            store,
            directory,
            state: WatcherState::Disconnected,
        }
    }

    pub fn state(&self) -> WatcherState {
        self.state
    }

    /// Consume source events and reconcile every `reconcile_every`. Runs
    /// until the task is aborted at shutdown; if the event source goes away
    /// for good, reconciliation carries on from the last cached snapshot.
    pub async fn run(mut self, mut events: mpsc::Receiver<SourceEvent>, reconcile_every: Duration) {
        let mut ticker = tokio::time::interval(reconcile_every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // interval() fires immediately; the first real pass comes from Connected
        ticker.tick().await;

        info!(
            "Watching presence of {} (reconcile every {:?})",
            self.target, reconcile_every
        );

        let mut source_open = true;

        loop {
            tokio::select! {
                event = events.recv(), if source_open => {
                    let Some(event) = event else {
                        error!("Event source closed; serving the last known status and reconciling from the cache until shutdown");
                        self.on_disconnected();
                        source_open = false;
                        continue;
                    };
                    self.handle_event(event).await;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.on_reconcile_tick().await {
                        warn!("Reconcile tick failed: {:#}", e);
                    }
                }
            }
        }
    }

    pub async fn handle_event(&mut self, event: SourceEvent) {
        let result = match event {
            SourceEvent::Connected => self.on_connected().await,
            SourceEvent::Disconnected => {
                self.on_disconnected();
                Ok(())
            }
            SourceEvent::PresenceChanged { user_id, status } => {
                self.on_presence_change(user_id, status).await
            }
        };
        if let Err(e) = result {
            warn!("Presence watcher operation failed: {:#}", e);
        }
    }

    /// Enter `Connected` and reconcile straight away.
    pub async fn on_connected(&mut self) -> anyhow::Result<()> {
        if self.state != WatcherState::Connected {
            info!("Presence watcher connected");
        }
        self.state = WatcherState::Connected;
        self.reconcile().await
    }

    pub fn on_disconnected(&mut self) {
        if self.state != WatcherState::Disconnected {
            warn!("Presence watcher lost its connection, waiting for reconnect");
        }
        self.state = WatcherState::Disconnected;
    }

    /// Store the pushed status if it belongs to the tracked user.
    pub async fn on_presence_change(&self, user_id: Snowflake, status: RawStatus) -> anyhow::Result<()> {
        if user_id != self.target {
            return Ok(());
        }
        let record = StatusRecord::from_raw(status);
        info!("Presence push for {}: {}", self.target, record.message());
        self.store.set(&record).await;
        Ok(())
    }

    pub async fn on_reconcile_tick(&self) -> anyhow::Result<()> {
        self.reconcile().await
    }

    /// Scan guilds in order; the first one listing the tracked user wins.
    /// If no guild lists them, the stored record is left alone.
    async fn reconcile(&self) -> anyhow::Result<()> {
        let guilds = self.directory.guilds()?;

        let found = guilds
            .iter()
            .find_map(|guild| guild.members.get(&self.target).map(|status| (guild.id, *status)));

        match found {
            Some((guild_id, status)) => {
                let record = StatusRecord::from_raw(status);
                debug!(
                    "Found {} in guild {} with status {:?}",
                    self.target, guild_id, status
                );
                self.store.set(&record).await;
                info!("Updated status to: {}", record.message());
            }
            None => {
                debug!(
                    "{} not visible in any of {} guilds, keeping stored status",
                    self.target,
                    guilds.len()
                );
            }
        }
        Ok(())
    }
}
