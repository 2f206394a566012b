//! Shared types for the OAuth token manager workspace

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
