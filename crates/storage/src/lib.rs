pub mod conformance;
mod error;
pub mod memory;
mod record;
mod traits;

pub use error::StorageError;
pub use record::{
    BatchRecord, BatchSelection, BatchStatus, FlatState, ResultPayload, StateChanges,
    TestCaseRecord,
};
pub use traits::{BatchStore, BlobStore, ConfigStore, SessionStore, TestStore};
