pub mod memory;
pub mod postgres;
pub mod qdrant;

pub use memory::InMemoryStore;
pub use postgres::PgVectorStore;
pub use qdrant::QdrantStore;
