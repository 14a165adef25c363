//! The story state machine: plan generation, chapter writing and the
//! document edits in between. Every transition persists the document before
//! it becomes visible; a failed transition leaves the previous state intact.

use crate::core::config::StoryConfig;
use crate::core::io::{load_json, save_json, Storage, KEY_CONFIG, KEY_PROMPTS, KEY_STORY};
use crate::core::prompts::{default_prompts, language_label, prompts_for_language};
use crate::core::state::{summarize, Chapter, Outline, PromptKind, StoryPlan, StoryState, SystemPrompts};
use crate::services::export::{self, StoryExport};
use crate::services::genres::{effective_prompts, find_genre};
use crate::services::llm::{ChatMessage, CompletionClient, CompletionError};
use crate::services::outline::{extract_chapter_plan, normalize_outline, outline_to_text, suggested_instructions};
use log::{info, warn};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

const DEFAULT_CHAPTER_INSTRUCTIONS: &str = "Follow the outline.";
const DEFAULT_REWRITE_INSTRUCTIONS: &str =
    "Stay faithful to the outline for this chapter while improving the prose, pacing and dialogue.";

#[derive(Debug, Error)]
pub enum StoryError {
    #[error("A generation is already in progress")]
    Busy,

    #[error(transparent)]
    Completion(#[from] CompletionError),

    #[error("Failed to parse plan: {0}. Check API key or model output.")]
    PlanParse(String),

    #[error("Generate a story plan first")]
    NoPlan,

    #[error("Chapter {} does not exist", .0 + 1)]
    ChapterNotFound(usize),

    #[error("Import failed: {0}")]
    Import(#[source] anyhow::Error),

    #[error("Failed to save: {0}")]
    Storage(#[source] anyhow::Error),
}

/// User inputs for plan generation.
#[derive(Debug, Clone, Default)]
pub struct PlanInputs {
    pub premise: String,
    pub characters: String,
    pub total_chapters: u32,
    pub genre_value: Option<String>,
    pub custom_prompts: Option<SystemPrompts>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Next,
    Prev,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChapterMode {
    Write,
    Rewrite,
}

/// Holds the generation flag for as long as it lives.
struct GenerationGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> GenerationGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self, StoryError> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| StoryError::Busy)?;
        Ok(Self { flag })
    }
}

impl Drop for GenerationGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

pub struct StoryEngine {
    storage: Arc<dyn Storage>,
    client: Box<dyn CompletionClient>,
    config: Mutex<StoryConfig>,
    prompts: Mutex<SystemPrompts>,
    story: Mutex<StoryState>,
    generating: AtomicBool,
}

impl StoryEngine {
    /// Restores configuration, prompts and the story document from
    /// `storage`, falling back to defaults for anything missing.
    pub fn open(storage: Arc<dyn Storage>, client: Box<dyn CompletionClient>) -> Result<Self, StoryError> {
        let config: StoryConfig = load_json(storage.as_ref(), KEY_CONFIG)
            .map_err(StoryError::Storage)?
            .unwrap_or_default();
        let prompts: SystemPrompts = load_json(storage.as_ref(), KEY_PROMPTS)
            .map_err(StoryError::Storage)?
            .unwrap_or_else(default_prompts);
        let mut story: StoryState = load_json(storage.as_ref(), KEY_STORY)
            .map_err(StoryError::Storage)?
            .unwrap_or_default();

        if story.has_plan && story.plan.outline.is_legacy() {
            info!("Converting legacy outline to structured form");
            story.plan.outline = story.plan.outline.migrated();
            save_json(storage.as_ref(), KEY_STORY, &story).map_err(StoryError::Storage)?;
        }
        if story.current_chapter_index.is_some_and(|i| i >= story.chapters.len()) {
            warn!("Stored chapter cursor out of range, resetting");
            story.current_chapter_index = story.chapters.len().checked_sub(1);
        }

        Ok(Self {
            storage,
            client,
            config: Mutex::new(config),
            prompts: Mutex::new(prompts),
            story: Mutex::new(story),
            generating: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> StoryConfig {
        self.config.lock().clone()
    }

    pub fn prompts(&self) -> SystemPrompts {
        self.prompts.lock().clone()
    }

    pub fn story(&self) -> StoryState {
        self.story.lock().clone()
    }

    pub fn is_generating(&self) -> bool {
        self.generating.load(Ordering::Acquire)
    }

    // --- Configuration ---

    /// Replaces the configuration. Switching UI language also switches the
    /// global prompts to that language's defaults.
    pub fn update_config(&self, new_config: StoryConfig) -> Result<(), StoryError> {
        let mut config = self.config.lock();
        if new_config.ui_language != config.ui_language {
            let prompts = prompts_for_language(&new_config.ui_language);
            save_json(self.storage.as_ref(), KEY_PROMPTS, &prompts).map_err(StoryError::Storage)?;
            *self.prompts.lock() = prompts;
            info!("Language changed to {}", new_config.ui_language.to_uppercase());
        }
        save_json(self.storage.as_ref(), KEY_CONFIG, &new_config).map_err(StoryError::Storage)?;
        *config = new_config;
        Ok(())
    }

    pub fn update_prompts(&self, new_prompts: SystemPrompts) -> Result<(), StoryError> {
        let mut prompts = self.prompts.lock();
        save_json(self.storage.as_ref(), KEY_PROMPTS, &new_prompts).map_err(StoryError::Storage)?;
        *prompts = new_prompts;
        Ok(())
    }

    /// Restores one prompt to the default of the current UI language.
    pub fn reset_prompt(&self, kind: PromptKind) -> Result<(), StoryError> {
        let defaults = prompts_for_language(&self.config.lock().ui_language);
        let mut prompts = self.prompts();
        prompts.set(kind, defaults.get(kind).to_string());
        self.update_prompts(prompts)
    }

    // --- Plan ---

    pub async fn generate_plan(&self, inputs: PlanInputs) -> Result<(), StoryError> {
        let _guard = self.begin_generation()?;

        let config = self.config();
        let global_prompts = self.prompts();
        let language = language_label(&config.ui_language).to_string();

        let mut candidate = self.story.lock().plan.clone();
        candidate.premise = inputs.premise.clone();
        candidate.characters = inputs.characters.clone();
        candidate.total_chapters = inputs.total_chapters;
        if let Some(genre_value) = &inputs.genre_value {
            candidate.genre_value = genre_value.clone();
        }
        if inputs.custom_prompts.is_some() {
            candidate.custom_prompts = inputs.custom_prompts.clone();
        }
        candidate.language = language.clone();

        let prompts = effective_prompts(&candidate, &global_prompts);
        let genre = find_genre(&candidate.genre_value)
            .map(|g| g.label)
            .unwrap_or("Any");
        let user_prompt = format!(
            "Premise: {}\nDesired Characters: {}\nTarget Language: {}\nGenre: {}\nApproximate Chapters: {}",
            inputs.premise, inputs.characters, language, genre, inputs.total_chapters
        );

        let reply = self
            .client
            .complete(&config, &[ChatMessage::system(prompts.planning), ChatMessage::user(user_prompt)])
            .await?;

        let plan = merge_plan_reply(candidate, &reply)?;
        let chapters = plan.outline.len();

        let mut story = self.story.lock();
        let mut next = story.clone();
        next.has_plan = true;
        next.plan = plan;
        self.persist(&next)?;
        *story = next;

        info!("Story plan generated ({} outline entries)", chapters);
        Ok(())
    }

    /// Runs plan generation again with the stored premise, characters,
    /// chapter count and genre.
    pub async fn regenerate_plan(&self) -> Result<(), StoryError> {
        let plan = self.story.lock().plan.clone();
        self.generate_plan(PlanInputs {
            premise: plan.premise,
            characters: plan.characters,
            total_chapters: plan.total_chapters,
            genre_value: Some(plan.genre_value),
            custom_prompts: None,
        })
        .await
    }

    pub fn update_plan(&self, plan: StoryPlan) -> Result<(), StoryError> {
        self.mutate(|story| {
            story.plan = plan;
            story.plan.outline.assign_missing_ids();
            Ok(())
        })
    }

    /// Converts a legacy free-text outline to the structured list.
    pub fn migrate_outline(&self) -> Result<bool, StoryError> {
        self.mutate(|story| {
            if !story.plan.outline.is_legacy() {
                return Ok(false);
            }
            story.plan.outline = story.plan.outline.migrated();
            Ok(true)
        })
    }

    // --- Chapters ---

    /// 1-based number of the chapter `generate_chapter` would write.
    pub fn next_chapter_number(&self) -> usize {
        target_slot(&self.story.lock()) + 1
    }

    /// Outline entry for the next chapter, for pre-filling instructions.
    pub fn suggested_instructions(&self) -> String {
        let story = self.story.lock();
        suggested_instructions(&story.plan.outline, target_slot(&story) + 1)
    }

    /// Writes the current chapter if it is an empty slot, otherwise appends a
    /// new chapter, and moves the cursor to it.
    pub async fn generate_chapter(&self, instructions: &str) -> Result<usize, StoryError> {
        let _guard = self.begin_generation()?;

        let (snapshot, index) = {
            let story = self.story.lock();
            if !story.has_plan {
                return Err(StoryError::NoPlan);
            }
            (story.clone(), target_slot(&story))
        };

        let content = self.write_chapter(&snapshot, index, instructions, ChapterMode::Write).await?;

        let mut story = self.story.lock();
        let mut next = story.clone();
        while next.chapters.len() < index {
            let number = next.chapters.len() + 1;
            next.chapters.push(Chapter::slot(number));
        }
        let chapter = Chapter::written(index + 1, content);
        if index < next.chapters.len() {
            next.chapters[index] = chapter;
        } else {
            next.chapters.push(chapter);
        }
        next.current_chapter_index = Some(index);
        self.persist(&next)?;
        *story = next;

        info!("Chapter {} written", index + 1);
        Ok(index)
    }

    /// Replaces an existing chapter with a fresh draft. The cursor stays put.
    pub async fn rewrite_chapter(&self, index: usize, instructions: &str) -> Result<(), StoryError> {
        let _guard = self.begin_generation()?;

        let snapshot = {
            let story = self.story.lock();
            if !story.has_plan {
                return Err(StoryError::NoPlan);
            }
            if index >= story.chapters.len() {
                return Err(StoryError::ChapterNotFound(index));
            }
            story.clone()
        };

        let content = self.write_chapter(&snapshot, index, instructions, ChapterMode::Rewrite).await?;

        let mut story = self.story.lock();
        if index >= story.chapters.len() {
            return Err(StoryError::ChapterNotFound(index));
        }
        let mut next = story.clone();
        next.chapters[index] = Chapter::written(index + 1, content);
        self.persist(&next)?;
        *story = next;

        info!("Chapter {} rewritten", index + 1);
        Ok(())
    }

    /// Manual edit of a chapter's text. The summary follows the new content.
    pub fn edit_chapter(&self, index: usize, content: &str) -> Result<(), StoryError> {
        self.mutate(|story| {
            let chapter = story.chapters.get_mut(index).ok_or(StoryError::ChapterNotFound(index))?;
            chapter.content = content.to_string();
            chapter.summary = if content.is_empty() { String::new() } else { summarize(content) };
            Ok(())
        })
    }

    /// Removes the last chapter, or clears any other chapter back to an empty
    /// slot so later chapters keep their numbers.
    pub fn delete_chapter(&self, index: usize) -> Result<(), StoryError> {
        self.mutate(|story| {
            let len = story.chapters.len();
            if index >= len {
                return Err(StoryError::ChapterNotFound(index));
            }

            if index == len - 1 {
                story.chapters.pop();
                let last = story.chapters.len().checked_sub(1);
                story.current_chapter_index = match (story.current_chapter_index, last) {
                    (Some(cursor), Some(last)) => Some(cursor.min(last)),
                    _ => None,
                };
            } else {
                let chapter = &mut story.chapters[index];
                chapter.content.clear();
                chapter.summary.clear();
            }
            info!("Chapter {} deleted", index + 1);
            Ok(())
        })
    }

    /// Moves the cursor one chapter, staying within the written range.
    pub fn navigate_chapter(&self, direction: Direction) -> Result<Option<usize>, StoryError> {
        let mut story = self.story.lock();
        let Some(last) = story.chapters.len().checked_sub(1) else {
            return Ok(story.current_chapter_index);
        };

        let target = match (story.current_chapter_index, direction) {
            (None, _) => 0,
            (Some(i), Direction::Next) => (i + 1).min(last),
            (Some(i), Direction::Prev) => i.saturating_sub(1),
        };
        if story.current_chapter_index == Some(target) {
            return Ok(Some(target));
        }

        let mut next = story.clone();
        next.current_chapter_index = Some(target);
        self.persist(&next)?;
        *story = next;
        Ok(Some(target))
    }

    pub fn select_chapter(&self, index: usize) -> Result<(), StoryError> {
        let mut story = self.story.lock();
        if index >= story.chapters.len() {
            return Err(StoryError::ChapterNotFound(index));
        }
        let mut next = story.clone();
        next.current_chapter_index = Some(index);
        self.persist(&next)?;
        *story = next;
        Ok(())
    }

    /// Drops every chapter but keeps the plan.
    pub fn clear_chapters(&self) -> Result<(), StoryError> {
        self.mutate(|story| {
            story.chapters.clear();
            story.current_chapter_index = None;
            info!("Chapters cleared");
            Ok(())
        })
    }

    /// Returns the story to its empty form once `confirm` agrees.
    pub fn reset_story<F>(&self, confirm: F) -> Result<bool, StoryError>
    where
        F: FnOnce() -> bool,
    {
        if self.is_generating() {
            return Err(StoryError::Busy);
        }
        if !confirm() {
            return Ok(false);
        }
        self.mutate(|story| {
            *story = StoryState::default();
            Ok(())
        })?;
        info!("Story reset");
        Ok(true)
    }

    // --- Import / export ---

    pub fn export(&self) -> StoryExport {
        StoryExport {
            story: self.story(),
            config: self.config().without_api_key(),
        }
    }

    /// Replaces the story with an exported one. Imported configuration is
    /// merged over the current one, keeping the configured API key.
    pub fn import_story(&self, export: StoryExport) -> Result<(), StoryError> {
        let StoryExport { mut story, config } = export;
        if story.has_plan && story.plan.outline.is_legacy() {
            story.plan.outline = story.plan.outline.migrated();
        }
        self.mutate(|current| {
            *current = story;
            Ok(())
        })?;
        self.store_config(self.keep_api_key(config))
    }

    pub fn import_settings(&self, text: &str) -> Result<(), StoryError> {
        let (config, prompts) =
            export::import_settings(text, &self.config(), &self.prompts()).map_err(StoryError::Import)?;

        self.store_config(self.keep_api_key(config))?;
        self.update_prompts(prompts)
    }

    fn store_config(&self, config: StoryConfig) -> Result<(), StoryError> {
        let mut current = self.config.lock();
        save_json(self.storage.as_ref(), KEY_CONFIG, &config).map_err(StoryError::Storage)?;
        *current = config;
        Ok(())
    }

    fn keep_api_key(&self, mut config: StoryConfig) -> StoryConfig {
        if config.api_key.is_empty() {
            config.api_key = self.config.lock().api_key.clone();
        }
        config
    }

    // --- Internals ---

    /// Applies `change` to a copy of the document, persists it, then
    /// publishes it. Rejected while a generation is in flight.
    fn mutate<T, F>(&self, change: F) -> Result<T, StoryError>
    where
        F: FnOnce(&mut StoryState) -> Result<T, StoryError>,
    {
        let mut story = self.story.lock();
        if self.is_generating() {
            return Err(StoryError::Busy);
        }
        let mut next = story.clone();
        let result = change(&mut next)?;
        self.persist(&next)?;
        *story = next;
        Ok(result)
    }

    /// Raises the generation flag under the story lock, so a mutation that
    /// saw the flag down commits before any generation takes its snapshot.
    fn begin_generation(&self) -> Result<GenerationGuard<'_>, StoryError> {
        let _story = self.story.lock();
        GenerationGuard::acquire(&self.generating)
    }

    fn persist(&self, story: &StoryState) -> Result<(), StoryError> {
        save_json(self.storage.as_ref(), KEY_STORY, story).map_err(StoryError::Storage)
    }

    async fn write_chapter(
        &self,
        story: &StoryState,
        index: usize,
        instructions: &str,
        mode: ChapterMode,
    ) -> Result<String, StoryError> {
        let config = self.config();
        let prompts = effective_prompts(&story.plan, &self.prompts());
        let user_prompt = chapter_prompt(story, index, instructions, mode);

        let content = self
            .client
            .complete(&config, &[ChatMessage::system(prompts.writing), ChatMessage::user(user_prompt)])
            .await?;
        Ok(content)
    }
}

/// Index the next written chapter lands on: the current chapter when it is
/// an empty slot, otherwise one past the end.
fn target_slot(story: &StoryState) -> usize {
    match (story.current_chapter_index, story.current_chapter()) {
        (Some(i), Some(chapter)) if chapter.is_slot() => i,
        _ => story.chapters.len(),
    }
}

fn chapter_prompt(story: &StoryState, index: usize, instructions: &str, mode: ChapterMode) -> String {
    let plan = &story.plan;
    let number = index + 1;

    let context = story.chapters[index.saturating_sub(2)..index.min(story.chapters.len())]
        .iter()
        .filter(|c| !c.summary.is_empty())
        .map(|c| format!("Chapter {} Summary: {}", c.id, c.summary))
        .collect::<Vec<_>>()
        .join("\n");

    let mut prompt = format!(
        "Plan Context:\nTitle: {}\nGenre: {}\nLanguage: {}\nCharacters: {}\nOutline:\n{}\n\nPrevious Context:\n{}\n",
        plan.title,
        plan.genre,
        plan.language,
        plan.characters,
        outline_to_text(&plan.outline),
        if context.is_empty() { "(none)" } else { context.as_str() },
    );

    let chapter_plan = extract_chapter_plan(&plan.outline, number);
    if !chapter_plan.is_empty() {
        prompt.push_str(&format!("\nOutline for this chapter: {}\n", chapter_plan));
    }

    let instructions = instructions.trim();
    match mode {
        ChapterMode::Write => {
            prompt.push_str(&format!("\nTask: Write Chapter {}.\n", number));
            prompt.push_str(&format!(
                "Specific Instructions for this chapter: {}",
                if instructions.is_empty() { DEFAULT_CHAPTER_INSTRUCTIONS } else { instructions }
            ));
        }
        ChapterMode::Rewrite => {
            prompt.push_str(&format!("\nTask: REWRITE Chapter {}.\n", number));
            if let Some(existing) = story.chapters.get(index).filter(|c| !c.is_slot()) {
                prompt.push_str(&format!("Current draft:\n{}\n\n", existing.content));
            }
            prompt.push_str(&format!(
                "Rewrite instructions: {}",
                if instructions.is_empty() { DEFAULT_REWRITE_INSTRUCTIONS } else { instructions }
            ));
        }
    }
    prompt
}

/// Parses a planning reply and merges its fields over `plan`.
fn merge_plan_reply(mut plan: StoryPlan, reply: &str) -> Result<StoryPlan, StoryError> {
    let json = extract_json_object(reply)
        .ok_or_else(|| StoryError::PlanParse("no JSON object in the model reply".to_string()))?;
    let value: Value = serde_json::from_str(json).map_err(|e| StoryError::PlanParse(e.to_string()))?;
    let Value::Object(fields) = value else {
        return Err(StoryError::PlanParse("reply is not a JSON object".to_string()));
    };

    let text = |key: &str| fields.get(key).and_then(Value::as_str).map(str::to_string);
    if let Some(title) = text("title") {
        plan.title = title;
    }
    if let Some(genre) = text("genre") {
        plan.genre = genre;
    }
    if let Some(characters) = text("characters") {
        plan.characters = characters;
    }
    if let Some(premise) = text("premise") {
        plan.premise = premise;
    }
    if let Some(total) = fields.get("totalChapters").and_then(Value::as_u64) {
        plan.total_chapters = u32::try_from(total).unwrap_or(plan.total_chapters);
    }
    match fields.get("outline").and_then(normalize_outline) {
        Some(items) => plan.outline = Outline::Structured(items),
        None => {
            warn!("Plan reply has no usable outline, keeping the previous one");
            plan.outline = plan.outline.migrated();
        }
    }
    Ok(plan)
}

/// First balanced `{...}` block in `text`, ignoring braces inside strings.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Context, Result};
    use crate::core::io::MemoryStorage;
    use crate::core::state::OutlineItem;
    use crate::services::llm::Role;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::time::Duration;

    const PLAN_REPLY: &str = r#"{"title":"Tick","genre":"Mystery","outline":["Intro","Clue 1","Clue 2","Reveal","End"],"characters":"Miller: gruff"}"#;

    #[derive(Debug, Default)]
    struct StubClient {
        replies: Mutex<VecDeque<Result<String, CompletionError>>>,
        calls: Mutex<Vec<Vec<ChatMessage>>>,
        delay: Option<Duration>,
    }

    impl StubClient {
        fn replying(replies: Vec<Result<String, CompletionError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl CompletionClient for Arc<StubClient> {
        async fn complete(&self, _config: &StoryConfig, messages: &[ChatMessage]) -> Result<String, CompletionError> {
            self.calls.lock().push(messages.to_vec());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.replies
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(CompletionError::Format("no scripted reply".to_string())))
        }
    }

    fn network_failure() -> CompletionError {
        CompletionError::Network {
            route: crate::services::llm::Route::Direct,
            message: "connection refused".to_string(),
        }
    }

    fn engine_with(stub: Arc<StubClient>) -> Result<(StoryEngine, Arc<MemoryStorage>)> {
        let storage = Arc::new(MemoryStorage::new());
        let engine = StoryEngine::open(storage.clone(), Box::new(stub))?;
        Ok((engine, storage))
    }

    fn clock_inputs() -> PlanInputs {
        PlanInputs {
            premise: "A detective discovers a clock that counts backwards".to_string(),
            characters: "Miller".to_string(),
            total_chapters: 5,
            ..Default::default()
        }
    }

    fn stored_story(storage: &MemoryStorage) -> Result<StoryState> {
        load_json(storage, KEY_STORY)?.context("story was not saved")
    }

    fn story_with_chapters(n: usize, cursor: Option<usize>) -> StoryState {
        StoryState {
            has_plan: true,
            plan: StoryPlan {
                title: "Tick".to_string(),
                ..Default::default()
            },
            chapters: (1..=n).map(|i| Chapter::written(i, format!("Text {}", i))).collect(),
            current_chapter_index: cursor,
        }
    }

    fn engine_with_story(state: &StoryState, stub: Arc<StubClient>) -> Result<(StoryEngine, Arc<MemoryStorage>)> {
        let storage = Arc::new(MemoryStorage::new());
        save_json(storage.as_ref(), KEY_STORY, state)?;
        let engine = StoryEngine::open(storage.clone(), Box::new(stub))?;
        Ok((engine, storage))
    }

    #[tokio::test]
    async fn test_generate_plan_scenario() -> Result<()> {
        let stub = Arc::new(StubClient::replying(vec![Ok(PLAN_REPLY.to_string())]));
        let (engine, storage) = engine_with(stub.clone())?;

        engine.generate_plan(clock_inputs()).await?;

        let story = engine.story();
        assert!(story.has_plan);
        assert_eq!(story.plan.title, "Tick");
        assert_eq!(story.plan.genre, "Mystery");
        assert_eq!(story.plan.characters, "Miller: gruff");
        assert_eq!(story.plan.outline.len(), 5);
        assert_eq!(story.plan.total_chapters, 5);
        assert_eq!(story.plan.language, "English");
        assert_eq!(stored_story(&storage)?, story);
        assert!(!engine.is_generating());

        let calls = stub.calls.lock();
        assert_eq!(calls[0][0].role, Role::System);
        assert!(calls[0][1].content.contains("clock that counts backwards"));
        assert!(calls[0][1].content.contains("Approximate Chapters: 5"));
        Ok(())
    }

    #[tokio::test]
    async fn test_generate_plan_tolerates_prose_and_strips_numbers() -> Result<()> {
        let reply = "Sure! Here is your plan:\n```json\n{\"title\":\"Tick {draft}\",\"outline\":[{\"title\":\"Chapter 1: Intro\",\"description\":\"Rain\"}]}\n```\nEnjoy.";
        let stub = Arc::new(StubClient::replying(vec![Ok(reply.to_string())]));
        let (engine, _) = engine_with(stub)?;

        engine.generate_plan(clock_inputs()).await?;

        let story = engine.story();
        assert_eq!(story.plan.title, "Tick {draft}");
        assert_eq!(extract_chapter_plan(&story.plan.outline, 1), "Intro: Rain");
        Ok(())
    }

    #[tokio::test]
    async fn test_generate_plan_uses_genre_prompts() -> Result<()> {
        let stub = Arc::new(StubClient::replying(vec![Ok(PLAN_REPLY.to_string())]));
        let (engine, _) = engine_with(stub.clone())?;

        let inputs = PlanInputs {
            genre_value: Some("horror".to_string()),
            ..clock_inputs()
        };
        engine.generate_plan(inputs).await?;

        assert!(stub.calls.lock()[0][0].content.contains("STORY GENRE/STYLE: Horror"));
        assert_eq!(engine.story().plan.genre_value, "horror");
        Ok(())
    }

    #[tokio::test]
    async fn test_generate_plan_parse_failure_keeps_state() -> Result<()> {
        let stub = Arc::new(StubClient::replying(vec![Ok("I cannot help with that.".to_string())]));
        let (engine, storage) = engine_with(stub)?;

        let err = engine.generate_plan(clock_inputs()).await.unwrap_err();

        assert!(matches!(err, StoryError::PlanParse(_)));
        assert!(err.to_string().contains("Check API key or model output"));
        assert_eq!(engine.story(), StoryState::default());
        assert!(storage.get(KEY_STORY)?.is_none());
        assert!(!engine.is_generating());
        Ok(())
    }

    #[tokio::test]
    async fn test_generate_chapter_scenario() -> Result<()> {
        let stub = Arc::new(StubClient::replying(vec![
            Ok(PLAN_REPLY.to_string()),
            Ok("It was raining.".to_string()),
        ]));
        let (engine, storage) = engine_with(stub.clone())?;
        engine.generate_plan(clock_inputs()).await?;

        let index = engine.generate_chapter("").await?;

        let story = engine.story();
        assert_eq!(index, 0);
        assert_eq!(
            story.chapters[0],
            Chapter {
                id: "1".to_string(),
                title: "Chapter 1".to_string(),
                content: "It was raining.".to_string(),
                summary: "It was raining....".to_string(),
            }
        );
        assert_eq!(story.current_chapter_index, Some(0));
        assert_eq!(stored_story(&storage)?, story);

        let calls = stub.calls.lock();
        let prompt = &calls[1][1].content;
        assert!(prompt.contains("Task: Write Chapter 1."));
        assert!(prompt.contains("Follow the outline."));
        assert!(prompt.contains("1. Intro\n2. Clue 1"));
        assert!(prompt.contains("Outline for this chapter: Intro"));
        Ok(())
    }

    #[tokio::test]
    async fn test_generate_chapter_network_error_leaves_state() -> Result<()> {
        let stub = Arc::new(StubClient::replying(vec![Err(network_failure())]));
        let before = story_with_chapters(2, Some(1));
        let (engine, storage) = engine_with_story(&before, stub)?;

        let err = engine.generate_chapter("").await.unwrap_err();

        assert!(matches!(err, StoryError::Completion(CompletionError::Network { .. })));
        assert_eq!(engine.story(), before);
        assert_eq!(stored_story(&storage)?, before);
        assert!(!engine.is_generating());
        Ok(())
    }

    #[tokio::test]
    async fn test_generate_chapter_requires_plan() -> Result<()> {
        let (engine, _) = engine_with(Arc::new(StubClient::default()))?;
        assert!(matches!(engine.generate_chapter("").await, Err(StoryError::NoPlan)));
        assert!(!engine.is_generating());
        Ok(())
    }

    #[tokio::test]
    async fn test_generate_chapter_fills_selected_slot() -> Result<()> {
        let stub = Arc::new(StubClient::replying(vec![Ok("New middle.".to_string())]));
        let mut state = story_with_chapters(3, Some(1));
        state.chapters[1].content.clear();
        state.chapters[1].summary.clear();
        let (engine, _) = engine_with_story(&state, stub.clone())?;

        assert_eq!(engine.next_chapter_number(), 2);
        let index = engine.generate_chapter("make it tense").await?;

        let story = engine.story();
        assert_eq!(index, 1);
        assert_eq!(story.chapters.len(), 3);
        assert_eq!(story.chapters[1].content, "New middle.");
        assert_eq!(story.current_chapter_index, Some(1));

        let prompt = &stub.calls.lock()[0][1].content;
        assert!(prompt.contains("Chapter 1 Summary: Text 1..."));
        assert!(prompt.contains("make it tense"));
        Ok(())
    }

    #[tokio::test]
    async fn test_generate_chapter_appends_after_written_chapter() -> Result<()> {
        let stub = Arc::new(StubClient::replying(vec![Ok("Four.".to_string())]));
        let state = story_with_chapters(3, Some(0));
        let (engine, _) = engine_with_story(&state, stub.clone())?;

        let index = engine.generate_chapter("").await?;

        assert_eq!(index, 3);
        let story = engine.story();
        assert_eq!(story.chapters.len(), 4);
        assert_eq!(story.chapters[3].id, "4");
        assert_eq!(story.current_chapter_index, Some(3));

        // Only the two chapters right before the new one are used as context.
        let prompt = &stub.calls.lock()[0][1].content;
        assert!(!prompt.contains("Chapter 1 Summary"));
        assert!(prompt.contains("Chapter 2 Summary: Text 2..."));
        assert!(prompt.contains("Chapter 3 Summary: Text 3..."));
        Ok(())
    }

    #[tokio::test]
    async fn test_second_generation_is_rejected_while_busy() -> Result<()> {
        let stub = Arc::new(StubClient {
            replies: Mutex::new(vec![Ok("One.".to_string()), Ok("Two.".to_string())].into()),
            delay: Some(Duration::from_millis(50)),
            ..Default::default()
        });
        let state = story_with_chapters(0, None);
        let (engine, _) = engine_with_story(&state, stub.clone())?;

        let (first, second) = tokio::join!(engine.generate_chapter(""), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            assert!(engine.is_generating());
            assert!(matches!(engine.delete_chapter(0), Err(StoryError::Busy)));
            engine.generate_chapter("").await
        });

        assert_eq!(first?, 0);
        assert!(matches!(second, Err(StoryError::Busy)));
        assert_eq!(stub.calls.lock().len(), 1);
        assert_eq!(engine.story().chapters.len(), 1);
        assert!(!engine.is_generating());
        Ok(())
    }

    #[test]
    fn test_generation_waits_for_pending_mutation() -> Result<()> {
        let state = story_with_chapters(2, Some(1));
        let (engine, _) = engine_with_story(&state, Arc::new(StubClient::default()))?;

        // A mutation holding the story lock keeps a generation from starting.
        std::thread::scope(|scope| {
            let story = engine.story.lock();
            let starter = scope.spawn(|| engine.begin_generation().is_ok());
            std::thread::sleep(Duration::from_millis(20));
            assert!(!engine.is_generating());
            drop(story);
            assert!(starter.join().is_ok_and(|started| started));
        });
        assert!(!engine.is_generating());

        let guard = engine.begin_generation()?;
        assert!(matches!(engine.delete_chapter(0), Err(StoryError::Busy)));
        assert!(matches!(engine.begin_generation(), Err(StoryError::Busy)));
        drop(guard);

        engine.delete_chapter(1)?;
        assert_eq!(engine.story().chapters.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_rewrite_chapter_overwrites_without_moving_cursor() -> Result<()> {
        let stub = Arc::new(StubClient::replying(vec![Ok("Better prose.".to_string())]));
        let state = story_with_chapters(3, Some(2));
        let (engine, _) = engine_with_story(&state, stub.clone())?;

        engine.rewrite_chapter(0, "").await?;

        let story = engine.story();
        assert_eq!(story.chapters[0].content, "Better prose.");
        assert_eq!(story.chapters[0].summary, "Better prose....");
        assert_eq!(story.current_chapter_index, Some(2));

        let prompt = &stub.calls.lock()[0][1].content;
        assert!(prompt.contains("REWRITE Chapter 1"));
        assert!(prompt.contains("Current draft:\nText 1"));
        assert!(prompt.contains("faithful to the outline"));
        Ok(())
    }

    #[tokio::test]
    async fn test_rewrite_missing_chapter() -> Result<()> {
        let state = story_with_chapters(1, Some(0));
        let (engine, _) = engine_with_story(&state, Arc::new(StubClient::default()))?;
        assert!(matches!(engine.rewrite_chapter(4, "").await, Err(StoryError::ChapterNotFound(4))));
        Ok(())
    }

    #[test]
    fn test_edit_chapter_refreshes_summary() -> Result<()> {
        let state = story_with_chapters(2, Some(0));
        let (engine, storage) = engine_with_story(&state, Arc::new(StubClient::default()))?;

        engine.edit_chapter(0, "Edited by hand.")?;

        let story = engine.story();
        assert_eq!(story.chapters[0].content, "Edited by hand.");
        assert_eq!(story.chapters[0].summary, "Edited by hand....");
        assert_eq!(stored_story(&storage)?, story);
        assert!(matches!(engine.edit_chapter(5, "x"), Err(StoryError::ChapterNotFound(5))));
        Ok(())
    }

    #[test]
    fn test_delete_last_chapter_clamps_cursor() -> Result<()> {
        let state = story_with_chapters(3, Some(2));
        let (engine, _) = engine_with_story(&state, Arc::new(StubClient::default()))?;

        engine.delete_chapter(2)?;
        let story = engine.story();
        assert_eq!(story.chapters.len(), 2);
        assert_eq!(story.current_chapter_index, Some(1));

        engine.select_chapter(0)?;
        engine.delete_chapter(1)?;
        assert_eq!(engine.story().current_chapter_index, Some(0));

        engine.delete_chapter(0)?;
        let story = engine.story();
        assert!(story.chapters.is_empty());
        assert_eq!(story.current_chapter_index, None);
        Ok(())
    }

    #[test]
    fn test_delete_inner_chapter_leaves_slot() -> Result<()> {
        let state = story_with_chapters(3, Some(2));
        let (engine, _) = engine_with_story(&state, Arc::new(StubClient::default()))?;

        engine.delete_chapter(1)?;

        let story = engine.story();
        assert_eq!(story.chapters.len(), 3);
        assert_eq!(story.chapters[1].content, "");
        assert_eq!(story.chapters[1].summary, "");
        assert_eq!(story.chapters[1].id, "2");
        assert_eq!(story.chapters[2].content, "Text 3");
        assert_eq!(story.current_chapter_index, Some(2));
        assert!(matches!(engine.delete_chapter(3), Err(StoryError::ChapterNotFound(3))));
        Ok(())
    }

    #[test]
    fn test_navigation_is_clamped() -> Result<()> {
        let state = story_with_chapters(3, Some(2));
        let (engine, _) = engine_with_story(&state, Arc::new(StubClient::default()))?;

        assert_eq!(engine.navigate_chapter(Direction::Next)?, Some(2));
        assert_eq!(engine.navigate_chapter(Direction::Prev)?, Some(1));
        assert_eq!(engine.navigate_chapter(Direction::Prev)?, Some(0));
        assert_eq!(engine.navigate_chapter(Direction::Prev)?, Some(0));
        assert_eq!(engine.story().current_chapter_index, Some(0));

        let (empty, _) = engine_with(Arc::new(StubClient::default()))?;
        assert_eq!(empty.navigate_chapter(Direction::Next)?, None);
        Ok(())
    }

    #[test]
    fn test_reset_requires_confirmation() -> Result<()> {
        let state = story_with_chapters(2, Some(1));
        let (engine, storage) = engine_with_story(&state, Arc::new(StubClient::default()))?;

        assert!(!engine.reset_story(|| false)?);
        assert_eq!(engine.story(), state);

        assert!(engine.reset_story(|| true)?);
        assert_eq!(engine.story(), StoryState::default());
        assert_eq!(stored_story(&storage)?, StoryState::default());
        Ok(())
    }

    #[test]
    fn test_clear_chapters_keeps_plan() -> Result<()> {
        let state = story_with_chapters(2, Some(1));
        let (engine, _) = engine_with_story(&state, Arc::new(StubClient::default()))?;

        engine.clear_chapters()?;

        let story = engine.story();
        assert!(story.has_plan);
        assert_eq!(story.plan.title, "Tick");
        assert!(story.chapters.is_empty());
        assert_eq!(story.current_chapter_index, None);
        Ok(())
    }

    #[test]
    fn test_open_migrates_legacy_outline() -> Result<()> {
        let mut state = story_with_chapters(0, None);
        state.plan.outline = Outline::Legacy("Chapter 1: Intro\nChapter 2: Clue".to_string());
        let (engine, storage) = engine_with_story(&state, Arc::new(StubClient::default()))?;

        let story = engine.story();
        assert!(!story.plan.outline.is_legacy());
        assert_eq!(story.plan.outline.len(), 2);
        assert!(!stored_story(&storage)?.plan.outline.is_legacy());
        assert_eq!(engine.suggested_instructions(), "Intro");
        Ok(())
    }

    #[test]
    fn test_update_plan_assigns_ids() -> Result<()> {
        let state = story_with_chapters(0, None);
        let (engine, _) = engine_with_story(&state, Arc::new(StubClient::default()))?;

        let mut plan = engine.story().plan;
        plan.outline = Outline::Structured(vec![OutlineItem {
            id: String::new(),
            title: "Opening".to_string(),
            description: String::new(),
        }]);
        engine.update_plan(plan)?;

        match engine.story().plan.outline {
            Outline::Structured(items) => assert!(!items[0].id.is_empty()),
            Outline::Legacy(_) => panic!("expected structured outline"),
        }
        Ok(())
    }

    #[test]
    fn test_language_switch_replaces_prompts() -> Result<()> {
        let (engine, storage) = engine_with(Arc::new(StubClient::default()))?;
        let mut config = engine.config();
        config.ui_language = "es".to_string();

        engine.update_config(config)?;

        assert_eq!(engine.prompts(), prompts_for_language("es"));
        let saved: SystemPrompts = load_json(storage.as_ref(), KEY_PROMPTS)?.context("prompts were not saved")?;
        assert_eq!(saved, prompts_for_language("es"));

        let mut prompts = engine.prompts();
        prompts.writing = "custom".to_string();
        engine.update_prompts(prompts)?;
        engine.reset_prompt(PromptKind::Writing)?;
        assert_eq!(engine.prompts().writing, prompts_for_language("es").writing);
        Ok(())
    }

    #[test]
    fn test_export_import_round_trip() -> Result<()> {
        let state = story_with_chapters(2, Some(1));
        let (engine, _) = engine_with_story(&state, Arc::new(StubClient::default()))?;
        let mut config = engine.config();
        config.api_key = "sk-secret".to_string();
        engine.update_config(config)?;

        let exported = engine.export();
        assert!(exported.config.api_key.is_empty());

        let json = export::story_to_json(&exported)?;
        let (other, _) = engine_with(Arc::new(StubClient::default()))?;
        other.import_story(export::parse_story_json(&json, &other.config())?)?;

        assert_eq!(other.story(), state);
        assert!(other.config().api_key.is_empty());
        Ok(())
    }

    #[test]
    fn test_extract_json_object() {
        assert_eq!(extract_json_object("x {\"a\": {\"b\": 1}} y {}"), Some("{\"a\": {\"b\": 1}}"));
        assert_eq!(extract_json_object(r#"{"a": "} \" {"}"#), Some(r#"{"a": "} \" {"}"#));
        assert_eq!(extract_json_object("no json"), None);
        assert_eq!(extract_json_object("{ unterminated"), None);
    }
}
