pub mod cli;
pub mod config;
pub mod convert;
pub mod engine;
pub mod error;
pub mod postprocess;
pub mod server;
pub mod util;

pub use error::{Error, ErrorKind};
