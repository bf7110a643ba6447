// region:    --- Modules

mod error;

pub mod b64;
pub mod crypt;
pub mod envs;

pub use self::error::{Error, Result};

// endregion: --- Modules
