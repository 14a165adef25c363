pub mod export;
pub mod genres;
pub mod llm;
pub mod outline;
pub mod server;
pub mod story;
