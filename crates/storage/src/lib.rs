pub mod conformance;
mod error;
mod memory;
mod record;
mod traits;

pub use error::StorageError;
pub use memory::{InMemoryStorage, MemorySnapshot};
pub use record::{
    now_rfc3339, CurrentStateRecord, NewTransitionLog, TransitionLogRecord, TransitionQuery,
};
pub use traits::StateStorage;
