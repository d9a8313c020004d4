pub mod config;
pub mod sync;

pub use config::SyncConfig;
pub use sync::engine::{EngineError, SyncEngine};
pub use sync::events::{EventKind, SubscriptionId, SyncEvent};
pub use sync::state::{FileRecord, FileStats, StatePatch, SyncState};
pub use sync::store::LocalBackend;
