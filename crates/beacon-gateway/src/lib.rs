pub mod cache;
pub mod client;
mod dispatch;
pub mod error;
pub mod source;
pub mod watcher;

pub use cache::PresenceCache;
pub use client::{GatewayClient, GatewayConfig};
pub use error::GatewayError;
pub use source::{GuildDirectory, GuildSnapshot, SourceEvent};
pub use watcher::{PresenceWatcher, WatcherState};
