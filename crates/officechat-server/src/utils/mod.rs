pub mod error;
pub mod guid;
pub mod logger;
pub mod token_estimator;

pub use error::ChatError;
pub use guid::new_guid;
