//! Core order handling: the repository over the key-value store, the
//! lifecycle rules, ID assignment and the engine that ties them together.

pub mod builder;
pub mod engine;
pub mod id;
pub mod lifecycle;
pub mod repository;

pub use builder::{BuilderError, OrderEngineBuilder};
pub use engine::OrderEngine;
pub use id::{IdGenerator, RandomIdGenerator, SequentialIdGenerator};
pub use lifecycle::{apply_transition, apply_transition_at, LifecycleError};
pub use repository::{FindAllPage, FindResult, OrderRepository, RepositoryError};
