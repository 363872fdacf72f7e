pub mod error;
pub mod payload;
pub mod types;

pub use error::*;
pub use payload::*;
pub use types::*;
