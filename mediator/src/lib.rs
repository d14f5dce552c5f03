pub mod app;
pub mod cli;
pub mod load_config;

pub use app::Mediator;
pub use cli::{run, Cli, Commands};
