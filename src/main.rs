mod cli;
mod session;
mod setup;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands, ExportFormat, SettingsCommands};
use inkwell::core::config::{ServerConfig, Settings};
use inkwell::core::io::FileStorage;
use inkwell::services::export;
use inkwell::services::llm::HttpCompletionClient;
use inkwell::services::server;
use inkwell::services::story::StoryEngine;
use log::info;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    env_logger::init();

    let cli = Cli::parse();

    let mut settings = match Settings::load() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Error loading settings: {}", e);
            eprintln!("Please fix or remove 'inkwell.yml'.");
            return Err(e);
        }
    };
    if let Some(data) = &cli.data {
        settings.data_folder = data.to_string_lossy().into_owned();
    }

    match cli.command.unwrap_or(Commands::Write) {
        Commands::Serve { port } => {
            let mut config = ServerConfig::from_env();
            if let Some(port) = port {
                config.port = port;
            } else if std::env::var_os("PORT").is_none() {
                config.port = settings.port;
            }
            server::serve(config).await
        }
        Commands::Write => {
            let engine = open_engine(&settings)?;
            setup::run_setup(&engine)?;
            session::run(&engine, &settings).await
        }
        Commands::Export { format, output } => {
            let engine = open_engine(&settings)?;
            let story = engine.story();
            let (path, content) = match format {
                ExportFormat::Markdown => (
                    output.unwrap_or_else(|| PathBuf::from(export::markdown_file_name(&story.plan.title))),
                    export::to_markdown(&story),
                ),
                ExportFormat::Json => {
                    let stem = export::markdown_file_name(&story.plan.title);
                    (
                        output.unwrap_or_else(|| PathBuf::from(stem).with_extension("json")),
                        export::story_to_json(&engine.export())?,
                    )
                }
            };
            write_file(&path, &content)
        }
        Commands::Import { path } => {
            let engine = open_engine(&settings)?;
            let text = fs::read_to_string(&path)?;
            let imported = export::parse_story_json(&text, &engine.config())?;
            engine.import_story(imported)?;
            println!("Story imported from {}", path.display());
            Ok(())
        }
        Commands::Settings { command } => {
            let engine = open_engine(&settings)?;
            match command {
                SettingsCommands::Export { output } => {
                    let path = output.unwrap_or_else(|| {
                        PathBuf::from(export::settings_file_name(chrono::Local::now().date_naive()))
                    });
                    write_file(&path, &export::settings_to_json(&engine.config(), &engine.prompts())?)
                }
                SettingsCommands::Import { path } => {
                    let text = fs::read_to_string(&path)?;
                    engine.import_settings(&text)?;
                    println!("Settings imported successfully!");
                    Ok(())
                }
            }
        }
    }
}

fn open_engine(settings: &Settings) -> Result<StoryEngine> {
    settings.ensure_directories()?;
    let storage = Arc::new(FileStorage::new(&settings.data_folder)?);
    info!("Using data folder {}", storage.root().display());
    let engine = StoryEngine::open(storage, Box::new(HttpCompletionClient::new()))?;
    Ok(engine)
}

fn write_file(path: &Path, content: &str) -> Result<()> {
    fs::write(path, content)?;
    println!("Wrote {}", path.display());
    Ok(())
}
