pub mod config;
pub mod errors;
pub mod resource;
pub mod store;
pub mod watcher;

pub use resource::{FieldValue, Resource, ResourceEvent, TrackedKind};
pub use store::{ResourceCache, SharedCache, lock_cache};
pub use watcher::{ResourceWatcher, WatchSettings, WatchState, WatchStats};
