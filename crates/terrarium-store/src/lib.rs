pub mod error;
pub mod store;
pub mod local;

pub use error::StoreError;
pub use store::KvStore;
pub use local::LocalKvStore;
