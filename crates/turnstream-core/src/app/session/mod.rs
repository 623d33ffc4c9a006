pub mod sqlite_store;
pub mod store;

pub use sqlite_store::SqliteSessionStore;
pub use store::{InMemorySessionStore, SessionStore, StoreError, update_message};
