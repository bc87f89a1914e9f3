pub mod database;
pub mod store;

pub use database::{Database, DatabaseConfig};
pub use store::{PgProfileStore, StoreCounts};
