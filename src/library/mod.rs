//! User libraries: accounts, session tokens, uploaded tracks, tags and predictions.

mod models;
mod schema;
mod sqlite_store;
mod store;

pub use models::*;
pub use sqlite_store::SqliteLibraryStore;
pub use store::{TrackStore, UserStore};
