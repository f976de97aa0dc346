pub mod config;
pub mod query;

pub use config::*;
pub use query::*;
