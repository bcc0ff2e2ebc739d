//! Order store and portfolio read model adapters.

mod in_memory;
mod sqlite;

pub use in_memory::{InMemoryOrderStore, InMemoryPortfolio};
pub use sqlite::SqliteOrderStore;
