pub mod error;
pub mod fs;
pub mod logging;

pub use error::{AppError, FetchError, Result};
