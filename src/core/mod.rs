pub mod config;
pub mod io;
pub mod prompts;
pub mod state;
