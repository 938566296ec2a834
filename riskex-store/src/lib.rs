//! Session record persistence with a local fallback store.

pub mod error;
pub mod record;
pub mod sink;

pub use error::StoreError;
pub use record::{RECORD_VERSION, SessionRecord, file_stamp};
pub use sink::{DirectorySink, FallbackSink, LocalStore, PersistenceSink, SavedRecord};
