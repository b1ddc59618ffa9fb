mod error;
mod types;

pub use error::CoreError;
pub use types::*;
