mod index;
mod record;
mod segment;
mod wal;

pub use index::Index;
pub use wal::Wal;
pub use wal::WalContents;
pub use wal::WalError;
pub use wal::WalOptions;
