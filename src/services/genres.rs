use crate::core::state::{StoryPlan, SystemPrompts};

pub const CUSTOM_GENRE: &str = "custom";

pub struct Genre {
    pub value: &'static str,
    pub label: &'static str,
    pub planning: &'static str,
    pub writing: &'static str,
}

pub const GENRES: &[Genre] = &[
    Genre {
        value: "fantasy",
        label: "Fantasy",
        planning: "Focus on world-building, magic systems, and epic mythos.",
        writing: "Use rich, atmospheric descriptions. Employ archaic or elevated diction where appropriate. Focus on the magical and supernatural elements.",
    },
    Genre {
        value: "scifi",
        label: "Science Fiction",
        planning: "Focus on speculative technology, future societies, and scientific plausibility.",
        writing: "Maintain a tone of analytical wonder or dystopic tension. Use precise terminology for technology and setting.",
    },
    Genre {
        value: "mystery",
        label: "Mystery",
        planning: "Focus on clues, red herrings, and the central puzzle. Ensure the plot is tight.",
        writing: "Build suspense and suspicion. Reveal details gradually. Focus on the detective's observations.",
    },
    Genre {
        value: "thriller",
        label: "Thriller",
        planning: "Focus on high stakes, pacing, and ticking clocks.",
        writing: "Use short, punchy sentences. Keep the tension high and the pacing fast. Focus on action and immediate danger.",
    },
    Genre {
        value: "romance",
        label: "Romance",
        planning: "Focus on emotional arcs, chemistry, and relationship tropes.",
        writing: "Focus on internal monologues, emotional reactions, and sensory details of attraction. Prioritize the relationship dynamics.",
    },
    Genre {
        value: "horror",
        label: "Horror",
        planning: "Focus on fear, dread, and the uncanny.",
        writing: "Build dread through atmosphere and sensory details. Focus on the psychological impact of fear and the grotesque.",
    },
    Genre {
        value: "literary",
        label: "Literary Fiction",
        planning: "Focus on themes, character depth, and symbolism over plot mechanics.",
        writing: "Use sophisticated prose, metaphor, and deep character introspection. Prioritize style and subtext.",
    },
    Genre {
        value: "comedy",
        label: "Comedy",
        planning: "Focus on absurd situations, irony, and humorous misunderstandings.",
        writing: "Keep the tone light and witty. Focus on comedic timing, dialogue, and humorous observations.",
    },
    Genre {
        value: "historical",
        label: "Historical Fiction",
        planning: "Focus on period accuracy, historical events, and setting.",
        writing: "Use period-appropriate language and details. Immerse the reader in the specific time and place.",
    },
    Genre {
        value: CUSTOM_GENRE,
        label: "Custom - BYO Prompts",
        planning: "",
        writing: "",
    },
];

pub fn find_genre(value: &str) -> Option<&'static Genre> {
    GENRES.iter().find(|g| g.value == value)
}

/// Base prompts with the genre's instructions appended. `custom` and unknown
/// genres return the base prompts unchanged.
pub fn get_genre_prompts(genre_value: &str, base: &SystemPrompts) -> SystemPrompts {
    let Some(genre) = find_genre(genre_value).filter(|g| g.value != CUSTOM_GENRE) else {
        return base.clone();
    };

    SystemPrompts {
        planning: format!("{}\n\n{}", base.planning, genre_block(genre, genre.planning)),
        writing: format!("{}\n\n{}", base.writing, genre_block(genre, genre.writing)),
    }
}

fn genre_block(genre: &Genre, instructions: &str) -> String {
    format!("STORY GENRE/STYLE: {}\nINSTRUCTIONS: {}", genre.label, instructions)
}

/// Prompts in effect for a story: its own override when set, otherwise the
/// global prompts composed with the story's genre.
pub fn effective_prompts(plan: &StoryPlan, global: &SystemPrompts) -> SystemPrompts {
    match &plan.custom_prompts {
        Some(custom) => custom.clone(),
        None => get_genre_prompts(&plan.genre_value, global),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> SystemPrompts {
        SystemPrompts {
            planning: "Plan it.".to_string(),
            writing: "Write it.".to_string(),
        }
    }

    #[test]
    fn test_custom_and_unknown_return_base() {
        assert_eq!(get_genre_prompts("custom", &base()), base());
        assert_eq!(get_genre_prompts("not-a-genre", &base()), base());
        assert_eq!(get_genre_prompts("", &base()), base());
    }

    #[test]
    fn test_genre_is_appended_to_base() {
        let prompts = get_genre_prompts("mystery", &base());

        assert!(prompts.planning.starts_with("Plan it.\n\n"));
        assert!(prompts.planning.contains("STORY GENRE/STYLE: Mystery"));
        assert!(prompts.planning.contains("red herrings"));
        assert!(prompts.writing.starts_with("Write it.\n\n"));
        assert!(prompts.writing.contains("Build suspense"));
    }

    #[test]
    fn test_story_override_wins() {
        let custom = SystemPrompts {
            planning: "Mine".to_string(),
            writing: "Also mine".to_string(),
        };
        let plan = StoryPlan {
            genre_value: "horror".to_string(),
            custom_prompts: Some(custom.clone()),
            ..Default::default()
        };
        assert_eq!(effective_prompts(&plan, &base()), custom);

        let plan = StoryPlan {
            genre_value: "horror".to_string(),
            ..Default::default()
        };
        assert!(effective_prompts(&plan, &base()).writing.contains("Horror"));
    }

    #[test]
    fn test_catalog_values_are_unique() {
        for (i, g) in GENRES.iter().enumerate() {
            assert!(GENRES[i + 1..].iter().all(|o| o.value != g.value), "{}", g.value);
        }
        assert!(find_genre("scifi").is_some());
    }
}
