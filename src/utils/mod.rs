pub mod errors;
pub mod logging;

pub use errors::{ErrorContext, Result, SokuWebError};
pub use logging::Logger;
