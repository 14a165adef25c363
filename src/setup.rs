use anyhow::Result;
use inkwell::core::config::StoryConfig;
use inkwell::services::story::StoryEngine;
use inquire::{Password, Select, Text};

const OWN_KEY: &str = "Use my own API key";
const SHARED_BACKEND: &str = "Use the shared backend server";

/// First-run setup: asks how to reach the model when neither an API key nor
/// the shared backend is configured.
pub fn run_setup(engine: &StoryEngine) -> Result<()> {
    let config = engine.config();
    if !config.api_key.trim().is_empty() || config.use_backend_server {
        return Ok(());
    }

    println!("Inkwell needs a model to write with.");
    configure_connection(engine)
}

pub fn configure_connection(engine: &StoryEngine) -> Result<()> {
    let mut config = engine.config();

    let choice = Select::new("How should Inkwell reach the model?", vec![OWN_KEY, SHARED_BACKEND]).prompt()?;
    if choice == OWN_KEY {
        prompt_provider(&mut config)?;
    } else {
        config.use_backend_server = true;
        config.backend_url = Text::new("Backend URL:")
            .with_default(&config.backend_url)
            .prompt()?;
    }

    engine.update_config(config)?;
    println!("Configuration saved.");
    Ok(())
}

fn prompt_provider(config: &mut StoryConfig) -> Result<()> {
    let key = Password::new("API key:")
        .without_confirmation()
        .with_help_message("Leave empty to keep the current key")
        .prompt()?;
    if !key.trim().is_empty() {
        config.api_key = key.trim().to_string();
    }

    config.base_url = Text::new("Base URL:").with_default(&config.base_url).prompt()?;
    config.model = Text::new("Model:").with_default(&config.model).prompt()?;
    config.use_backend_server = false;
    Ok(())
}
