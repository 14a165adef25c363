use crate::core::config::StoryConfig;
use crate::core::state::{StoryState, SystemPrompts};
use crate::services::outline::outline_to_text;
use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Story file: the document plus the configuration it was written with.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct StoryExport {
    pub story: StoryState,
    pub config: StoryConfig,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SettingsExport {
    pub config: StoryConfig,
    pub prompts: SystemPrompts,
}

pub fn to_markdown(story: &StoryState) -> String {
    let plan = &story.plan;
    let mut text = format!(
        "# {}\n\n## Characters\n{}\n\n## Outline\n{}\n\n---\n\n",
        plan.title,
        plan.characters,
        outline_to_text(&plan.outline)
    );
    for chapter in &story.chapters {
        text.push_str(&format!("## {}\n\n{}\n\n", chapter.title, chapter.content));
    }
    text
}

/// `The Long Night` becomes `The_Long_Night.md`; an untitled story is `story.md`.
pub fn markdown_file_name(title: &str) -> String {
    let name = title.split_whitespace().collect::<Vec<_>>().join("_");
    if name.is_empty() {
        "story.md".to_string()
    } else {
        format!("{}.md", name)
    }
}

pub fn settings_file_name(date: NaiveDate) -> String {
    format!("inkwell-settings-{}.json", date.format("%Y-%m-%d"))
}

pub fn story_to_json(export: &StoryExport) -> Result<String> {
    let export = StoryExport {
        story: export.story.clone(),
        config: export.config.without_api_key(),
    };
    serde_json::to_string_pretty(&export).context("Failed to serialize story")
}

/// Parses a story file. Its `config` fields are merged over `current`.
pub fn parse_story_json(text: &str, current: &StoryConfig) -> Result<StoryExport> {
    let value: Value = serde_json::from_str(text).context("Story file is not valid JSON")?;
    let Some(story) = value.get("story") else {
        bail!("Invalid story file format: missing \"story\"");
    };
    let story: StoryState = serde_json::from_value(story.clone()).context("Invalid story document")?;
    let config = match value.get("config") {
        Some(overlay) => merge_over(current, overlay)?,
        None => current.clone(),
    };
    Ok(StoryExport { story, config })
}

pub fn settings_to_json(config: &StoryConfig, prompts: &SystemPrompts) -> Result<String> {
    let export = SettingsExport {
        config: config.without_api_key(),
        prompts: prompts.clone(),
    };
    serde_json::to_string_pretty(&export).context("Failed to serialize settings")
}

/// Merges a settings file over the current configuration and prompts.
pub fn import_settings(
    text: &str,
    config: &StoryConfig,
    prompts: &SystemPrompts,
) -> Result<(StoryConfig, SystemPrompts)> {
    let value: Value = serde_json::from_str(text).context("Failed to parse settings file")?;

    let config_overlay = value.get("config").filter(|v| v.is_object());
    let prompts_overlay = value.get("prompts").filter(|v| v.is_object());
    if config_overlay.is_none() && prompts_overlay.is_none() {
        bail!("Invalid settings file format.");
    }

    let config = match config_overlay {
        Some(overlay) => merge_over(config, overlay)?,
        None => config.clone(),
    };
    let prompts = match prompts_overlay {
        Some(overlay) => merge_over(prompts, overlay)?,
        None => prompts.clone(),
    };
    Ok((config, prompts))
}

/// Overlays the top-level fields of `overlay` onto `current`.
fn merge_over<T: Serialize + DeserializeOwned>(current: &T, overlay: &Value) -> Result<T> {
    let mut merged = serde_json::to_value(current)?;
    if let (Value::Object(base), Value::Object(fields)) = (&mut merged, overlay) {
        for (key, value) in fields {
            base.insert(key.clone(), value.clone());
        }
    }
    serde_json::from_value(merged).context("Imported values have the wrong shape")
}
