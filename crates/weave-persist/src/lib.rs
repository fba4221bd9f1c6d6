pub mod dbs;
pub mod error;
pub mod memory;
pub mod traits;

pub use error::{PersistError, Result};
pub use memory::InMemoryStore;
pub use traits::MessageStore;

#[cfg(feature = "mongodb")]
pub use dbs::mongo::MongoMessageStore;
