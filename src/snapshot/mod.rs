mod manager;

pub use manager::SnapshotError;
pub use manager::SnapshotManager;
