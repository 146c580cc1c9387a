pub mod error;
pub mod keys;
pub mod types;


pub use error::DomainError;
pub use types::*;
