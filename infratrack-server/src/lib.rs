pub mod cache;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod repository;

pub use cache::{NoSummaryCache, SummaryCache, TtlSummaryCache};
pub use config::Config;
pub use coordinator::{Committed, TransactionCoordinator};
pub use engine::{CallContext, Clock, EngineSettings, Mutation, ProjectEngine};
pub use repository::{
    InMemoryRepository, ProjectCommit, ProjectRepository, RepositoryError, SqliteRepository,
};
