mod store;

pub use store::{KvCommand, KvReader, KvStore};
