#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate
)]

pub mod channels;
pub mod config;
pub mod daemon;
pub mod error;
pub mod hardware;
pub mod llm;

pub use config::Config;
pub use error::ClawError;
