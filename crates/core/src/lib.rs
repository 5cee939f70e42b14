pub mod config;
pub mod content;
pub mod error;
pub mod job;

pub use config::Config;
pub use content::*;
pub use error::*;
pub use job::*;
