pub mod dynamodb_repository;
pub mod memory_repository;
pub mod models;
pub mod repository;

pub use memory_repository::InMemoryRepository;
pub use repository::{Repository, RepositoryError};
