pub mod cached_client;
pub mod demo;
pub mod keys;
pub mod types;

pub use cached_client::CachedPortalClient;
pub use keys::PortalKey;
pub use types::{Group, Pack, PackKind, PackStatus, Role, Selection, SelectionStatus, User};
