pub mod sqlite_account_repository;
pub mod sqlite_node_repository;
pub mod sqlite_task_repository;
pub mod sqlite_version_repository;

pub use sqlite_account_repository::SqliteAccountRepository;
pub use sqlite_node_repository::SqliteNodeRepository;
pub use sqlite_task_repository::SqliteTaskRepository;
pub use sqlite_version_repository::SqliteVersionRepository;
