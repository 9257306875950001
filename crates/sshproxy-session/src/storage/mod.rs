//! Storage implementations.

pub mod credential;
pub mod file;
pub mod memory;

pub use credential::FileStager;
pub use file::FileStore;
pub use memory::MemoryStore;
