use crate::setup;
use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use inkwell::core::config::{Settings, Theme};
use inkwell::core::prompts::LANGUAGES;
use inkwell::core::state::{Outline, PromptKind, SystemPrompts};
use inkwell::services::export;
use inkwell::services::genres::{CUSTOM_GENRE, GENRES};
use inkwell::services::outline::{outline_to_text, MoveDirection};
use inkwell::services::story::{Direction, PlanInputs, StoryEngine, StoryError};
use inquire::{Confirm, CustomType, Editor, Select, Text};
use std::fmt;
use std::fs;
use std::future::Future;
use std::time::Duration;

#[derive(Clone, Copy)]
enum Action {
    PlanStory,
    WriteChapter(usize),
    RewriteChapter,
    ReadChapter,
    EditChapter,
    DeleteChapter,
    PrevChapter,
    NextChapter,
    JumpToChapter,
    ShowPlan,
    EditOutline,
    RegeneratePlan,
    ExportMarkdown,
    ClearChapters,
    ResetStory,
    Settings,
    Quit,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::PlanStory => write!(f, "Plan a new story"),
            Action::WriteChapter(n) => write!(f, "Write chapter {}", n),
            Action::RewriteChapter => write!(f, "Rewrite this chapter"),
            Action::ReadChapter => write!(f, "Read this chapter"),
            Action::EditChapter => write!(f, "Edit this chapter"),
            Action::DeleteChapter => write!(f, "Delete this chapter"),
            Action::PrevChapter => write!(f, "Previous chapter"),
            Action::NextChapter => write!(f, "Next chapter"),
            Action::JumpToChapter => write!(f, "Jump to chapter..."),
            Action::ShowPlan => write!(f, "Show plan"),
            Action::EditOutline => write!(f, "Edit outline"),
            Action::RegeneratePlan => write!(f, "Regenerate plan"),
            Action::ExportMarkdown => write!(f, "Export as Markdown"),
            Action::ClearChapters => write!(f, "Clear all chapters"),
            Action::ResetStory => write!(f, "Start over"),
            Action::Settings => write!(f, "Settings"),
            Action::Quit => write!(f, "Quit"),
        }
    }
}

pub async fn run(engine: &StoryEngine, settings: &Settings) -> Result<()> {
    loop {
        let story = engine.story();
        if story.has_plan {
            let position = match story.current_chapter_index {
                Some(i) => format!("chapter {} of {}", i + 1, story.chapters.len()),
                None => "no chapters yet".to_string(),
            };
            println!("\n{} ({})", story.plan.title, position);
        }

        let actions = available_actions(engine);
        let action = Select::new("What next?", actions).with_page_size(12).prompt()?;

        let result = match action {
            Action::Quit => return Ok(()),
            Action::PlanStory => plan_story(engine).await,
            Action::WriteChapter(_) => write_chapter(engine).await,
            Action::RewriteChapter => rewrite_chapter(engine).await,
            Action::ReadChapter => {
                print_current_chapter(engine);
                Ok(())
            }
            Action::EditChapter => edit_chapter(engine),
            Action::DeleteChapter => delete_chapter(engine, settings),
            Action::PrevChapter => navigate(engine, Direction::Prev),
            Action::NextChapter => navigate(engine, Direction::Next),
            Action::JumpToChapter => jump_to_chapter(engine),
            Action::ShowPlan => {
                print_plan(engine);
                Ok(())
            }
            Action::EditOutline => edit_outline(engine),
            Action::RegeneratePlan => {
                with_spinner("Regenerating plan...", engine.regenerate_plan())
                    .await
                    .map_err(Into::into)
            }
            Action::ExportMarkdown => export_markdown(engine),
            Action::ClearChapters => clear_chapters(engine, settings),
            Action::ResetStory => reset_story(engine, settings),
            Action::Settings => settings_menu(engine, settings),
        };

        if let Err(e) = result {
            eprintln!("Error: {}", e);
        }
    }
}

fn available_actions(engine: &StoryEngine) -> Vec<Action> {
    let story = engine.story();
    if !story.has_plan {
        return vec![Action::PlanStory, Action::Settings, Action::Quit];
    }

    let mut actions = vec![Action::WriteChapter(engine.next_chapter_number())];
    if story.current_chapter().is_some() {
        actions.extend([
            Action::ReadChapter,
            Action::RewriteChapter,
            Action::EditChapter,
            Action::DeleteChapter,
        ]);
    }
    if story.chapters.len() > 1 {
        actions.extend([Action::PrevChapter, Action::NextChapter, Action::JumpToChapter]);
    }
    actions.extend([
        Action::ShowPlan,
        Action::EditOutline,
        Action::RegeneratePlan,
        Action::ExportMarkdown,
    ]);
    if !story.chapters.is_empty() {
        actions.push(Action::ClearChapters);
    }
    actions.extend([Action::ResetStory, Action::Settings, Action::Quit]);
    actions
}

async fn with_spinner<T>(message: &str, task: impl Future<Output = Result<T, StoryError>>) -> Result<T, StoryError> {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}") {
        pb.set_style(style);
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(120));

    let result = task.await;
    pb.finish_and_clear();
    result
}

fn confirm(settings: &Settings, question: &str) -> Result<bool> {
    if settings.unattended {
        return Ok(true);
    }
    Ok(Confirm::new(question).with_default(false).prompt()?)
}

async fn plan_story(engine: &StoryEngine) -> Result<()> {
    let premise = Text::new("Premise:").prompt()?;
    let characters = Text::new("Characters (optional):").prompt()?;
    let total_chapters = CustomType::<u32>::new("Approximate number of chapters:")
        .with_default(12)
        .prompt()?;

    let mut genre_labels: Vec<&str> = vec!["Any"];
    genre_labels.extend(GENRES.iter().map(|g| g.label));
    let label = Select::new("Genre:", genre_labels).prompt()?;
    let genre_value = GENRES.iter().find(|g| g.label == label).map(|g| g.value.to_string());

    let custom_prompts = if genre_value.as_deref() == Some(CUSTOM_GENRE) {
        let base = engine.prompts();
        Some(SystemPrompts {
            planning: Editor::new("Planning prompt for this story:")
                .with_predefined_text(&base.planning)
                .prompt()?,
            writing: Editor::new("Writing prompt for this story:")
                .with_predefined_text(&base.writing)
                .prompt()?,
        })
    } else {
        None
    };

    let inputs = PlanInputs {
        premise,
        characters,
        total_chapters,
        genre_value,
        custom_prompts,
    };
    with_spinner("Planning your story...", engine.generate_plan(inputs)).await?;

    println!("Story plan generated!");
    print_plan(engine);
    Ok(())
}

async fn write_chapter(engine: &StoryEngine) -> Result<()> {
    let number = engine.next_chapter_number();
    let instructions = Text::new(&format!("Instructions for chapter {}:", number))
        .with_initial_value(&engine.suggested_instructions())
        .with_help_message("Leave empty to follow the outline")
        .prompt()?;

    with_spinner(&format!("Writing chapter {}...", number), engine.generate_chapter(&instructions)).await?;
    println!("Chapter {} written!", number);
    print_current_chapter(engine);
    Ok(())
}

async fn rewrite_chapter(engine: &StoryEngine) -> Result<()> {
    let Some(index) = engine.story().current_chapter_index else {
        return Ok(());
    };
    let instructions = Text::new("What should change?")
        .with_help_message("Leave empty to polish while staying faithful to the outline")
        .prompt()?;

    with_spinner(
        &format!("Rewriting chapter {}...", index + 1),
        engine.rewrite_chapter(index, &instructions),
    )
    .await?;
    println!("Chapter {} rewritten!", index + 1);
    Ok(())
}

fn edit_chapter(engine: &StoryEngine) -> Result<()> {
    let story = engine.story();
    let (Some(index), Some(chapter)) = (story.current_chapter_index, story.current_chapter()) else {
        return Ok(());
    };
    let content = Editor::new(&format!("Edit {}:", chapter.title))
        .with_predefined_text(&chapter.content)
        .prompt()?;
    engine.edit_chapter(index, &content)?;
    println!("Chapter saved.");
    Ok(())
}

fn delete_chapter(engine: &StoryEngine, settings: &Settings) -> Result<()> {
    let Some(index) = engine.story().current_chapter_index else {
        return Ok(());
    };
    if confirm(settings, &format!("Delete chapter {}?", index + 1))? {
        engine.delete_chapter(index)?;
        println!("Chapter deleted.");
    }
    Ok(())
}

fn navigate(engine: &StoryEngine, direction: Direction) -> Result<()> {
    engine.navigate_chapter(direction)?;
    print_current_chapter(engine);
    Ok(())
}

fn jump_to_chapter(engine: &StoryEngine) -> Result<()> {
    let story = engine.story();
    let options: Vec<String> = story
        .chapters
        .iter()
        .map(|c| if c.is_slot() { format!("{} (empty)", c.title) } else { c.title.clone() })
        .collect();
    let choice = Select::new("Chapter:", options).raw_prompt()?;
    engine.select_chapter(choice.index)?;
    print_current_chapter(engine);
    Ok(())
}

fn print_current_chapter(engine: &StoryEngine) {
    let story = engine.story();
    match story.current_chapter() {
        Some(chapter) if chapter.is_slot() => println!("\n## {}\n\n(empty)\n", chapter.title),
        Some(chapter) => println!("\n## {}\n\n{}\n", chapter.title, chapter.content),
        None => println!("No chapter selected."),
    }
}

fn print_plan(engine: &StoryEngine) {
    let plan = engine.story().plan;
    println!("\n# {}", plan.title);
    if !plan.genre.is_empty() {
        println!("Genre: {}", plan.genre);
    }
    println!("\n## Characters\n{}", plan.characters);
    println!("\n## Outline\n{}\n", outline_to_text(&plan.outline));
}

fn export_markdown(engine: &StoryEngine) -> Result<()> {
    let story = engine.story();
    let path = export::markdown_file_name(&story.plan.title);
    fs::write(&path, export::to_markdown(&story))?;
    println!("Story downloaded to {}", path);
    Ok(())
}

fn clear_chapters(engine: &StoryEngine, settings: &Settings) -> Result<()> {
    if confirm(settings, "Clear all chapters? The plan is kept.")? {
        engine.clear_chapters()?;
        println!("Chapters cleared. Ready to start writing from scratch.");
    }
    Ok(())
}

fn reset_story(engine: &StoryEngine, settings: &Settings) -> Result<()> {
    let mut answer = Ok(true);
    let reset = engine.reset_story(|| {
        answer = confirm(settings, "Discard this story and start over?");
        matches!(answer, Ok(true))
    })?;
    answer?;
    if reset {
        println!("Story reset.");
    }
    Ok(())
}

// --- Outline editing ---

#[derive(Clone)]
enum OutlineChoice {
    Item(usize, String),
    Add,
    Done,
}

impl fmt::Display for OutlineChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutlineChoice::Item(i, title) => write!(f, "{}. {}", i + 1, title),
            OutlineChoice::Add => write!(f, "+ Add chapter"),
            OutlineChoice::Done => write!(f, "Done"),
        }
    }
}

fn edit_outline(engine: &StoryEngine) -> Result<()> {
    let mut plan = engine.story().plan;
    if plan.outline.is_legacy() {
        engine.migrate_outline()?;
        plan = engine.story().plan;
    }

    loop {
        let items = match &plan.outline {
            Outline::Structured(items) => items.clone(),
            Outline::Legacy(_) => Vec::new(),
        };
        let mut choices: Vec<OutlineChoice> = items
            .iter()
            .enumerate()
            .map(|(i, item)| OutlineChoice::Item(i, item.title.clone()))
            .collect();
        choices.extend([OutlineChoice::Add, OutlineChoice::Done]);

        match Select::new("Outline:", choices).with_page_size(15).prompt()? {
            OutlineChoice::Done => break,
            OutlineChoice::Add => {
                let title = Text::new("Title:").prompt()?;
                let description = Text::new("Description:").prompt()?;
                plan.outline.add_item(&title, &description);
            }
            OutlineChoice::Item(i, _) => {
                let item = &items[i];
                let op = Select::new(
                    "Change:",
                    vec!["Edit title", "Edit description", "Move up", "Move down", "Remove", "Back"],
                )
                .prompt()?;
                match op {
                    "Edit title" => {
                        let title = Text::new("Title:").with_initial_value(&item.title).prompt()?;
                        plan.outline.update_item(&item.id, Some(&title), None);
                    }
                    "Edit description" => {
                        let description = Editor::new("Description:")
                            .with_predefined_text(&item.description)
                            .prompt()?;
                        plan.outline.update_item(&item.id, None, Some(description.trim()));
                    }
                    "Move up" => {
                        plan.outline.move_item(&item.id, MoveDirection::Up);
                    }
                    "Move down" => {
                        plan.outline.move_item(&item.id, MoveDirection::Down);
                    }
                    "Remove" => {
                        plan.outline.remove_item(&item.id);
                    }
                    _ => continue,
                }
            }
        }
        engine.update_plan(plan.clone())?;
    }
    Ok(())
}

// --- Settings ---

fn settings_menu(engine: &StoryEngine, settings: &Settings) -> Result<()> {
    const CONNECTION: &str = "Model connection";
    const LANGUAGE: &str = "Language";
    const THEME: &str = "Theme";
    const PLANNING: &str = "Edit planning prompt";
    const WRITING: &str = "Edit writing prompt";
    const RESET_PLANNING: &str = "Reset planning prompt";
    const RESET_WRITING: &str = "Reset writing prompt";
    const BACK: &str = "Back";

    loop {
        let choice = Select::new(
            "Settings:",
            vec![CONNECTION, LANGUAGE, THEME, PLANNING, WRITING, RESET_PLANNING, RESET_WRITING, BACK],
        )
        .prompt()?;

        match choice {
            CONNECTION => setup::configure_connection(engine)?,
            LANGUAGE => {
                let labels: Vec<&str> = LANGUAGES.iter().map(|l| l.label).collect();
                let choice = Select::new("Language:", labels).raw_prompt()?;
                let mut config = engine.config();
                config.ui_language = LANGUAGES[choice.index].code.to_string();
                engine.update_config(config)?;
            }
            THEME => {
                let mut config = engine.config();
                config.theme = match config.theme {
                    Theme::Light => Theme::Dark,
                    Theme::Dark => Theme::Light,
                };
                println!("Theme set to {:?}", config.theme);
                engine.update_config(config)?;
            }
            PLANNING | WRITING => {
                let kind = if choice == PLANNING { PromptKind::Planning } else { PromptKind::Writing };
                let mut prompts = engine.prompts();
                let text = Editor::new(choice).with_predefined_text(prompts.get(kind)).prompt()?;
                prompts.set(kind, text);
                engine.update_prompts(prompts)?;
            }
            RESET_PLANNING | RESET_WRITING => {
                let kind = if choice == RESET_PLANNING { PromptKind::Planning } else { PromptKind::Writing };
                if confirm(settings, "Reset this prompt to the default for the current language?")? {
                    engine.reset_prompt(kind)?;
                    println!("Prompt reset to default.");
                }
            }
            _ => return Ok(()),
        }
    }
}
