//! Error taxonomy and the shared error store.

pub mod kind;
pub mod record;
pub mod status;
pub mod store;

pub use kind::ErrorKind;
pub use record::{ErrorId, ErrorRecord, ErrorUpdate, NewError};
pub use status::{ConnectionType, NetworkStatus, NetworkStatusUpdate};
pub use store::{ErrorStore, ErrorStoreState, MonitorGuard, StoreAction};
