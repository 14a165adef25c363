use serde::{Deserialize, Serialize};

/// Number of leading characters of a chapter kept as its summary.
pub const SUMMARY_LENGTH: usize = 300;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct SystemPrompts {
    pub planning: String,
    pub writing: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    Planning,
    Writing,
}

impl SystemPrompts {
    pub fn get(&self, kind: PromptKind) -> &str {
        match kind {
            PromptKind::Planning => &self.planning,
            PromptKind::Writing => &self.writing,
        }
    }

    pub fn set(&mut self, kind: PromptKind, text: String) {
        match kind {
            PromptKind::Planning => self.planning = text,
            PromptKind::Writing => self.writing = text,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct OutlineItem {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
}

/// A plan's outline. Older saved stories hold it as one block of text; the
/// structured list is the current form. Order of items is chapter order.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(untagged)]
pub enum Outline {
    Legacy(String),
    Structured(Vec<OutlineItem>),
}

impl Default for Outline {
    fn default() -> Self {
        Outline::Structured(Vec::new())
    }
}

impl Outline {
    pub fn is_empty(&self) -> bool {
        match self {
            Outline::Legacy(text) => text.trim().is_empty(),
            Outline::Structured(items) => items.is_empty(),
        }
    }

    pub fn is_legacy(&self) -> bool {
        matches!(self, Outline::Legacy(_))
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoryPlan {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub genre: String,
    #[serde(default)]
    pub genre_value: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub premise: String,
    #[serde(default)]
    pub characters: String,
    #[serde(default)]
    pub outline: Outline,
    #[serde(default = "default_total_chapters")]
    pub total_chapters: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_prompts: Option<SystemPrompts>,
}

impl Default for StoryPlan {
    fn default() -> Self {
        Self {
            title: String::new(),
            genre: String::new(),
            genre_value: String::new(),
            language: default_language(),
            premise: String::new(),
            characters: String::new(),
            outline: Outline::default(),
            total_chapters: default_total_chapters(),
            custom_prompts: None,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Chapter {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub summary: String,
}

impl Chapter {
    /// A freshly written chapter at 1-based position `number`.
    pub fn written(number: usize, content: String) -> Self {
        let summary = summarize(&content);
        Self {
            id: number.to_string(),
            title: format!("Chapter {}", number),
            content,
            summary,
        }
    }

    /// A reserved position that has not been written yet.
    pub fn slot(number: usize) -> Self {
        Self {
            id: number.to_string(),
            title: format!("Chapter {}", number),
            content: String::new(),
            summary: String::new(),
        }
    }

    pub fn is_slot(&self) -> bool {
        self.content.is_empty()
    }
}

/// Leading `SUMMARY_LENGTH` characters of `content` followed by `...`.
pub fn summarize(content: &str) -> String {
    let prefix: String = content.chars().take(SUMMARY_LENGTH).collect();
    format!("{}...", prefix)
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct StoryState {
    #[serde(default)]
    pub has_plan: bool,
    #[serde(default)]
    pub plan: StoryPlan,
    #[serde(default)]
    pub chapters: Vec<Chapter>,
    #[serde(default, with = "cursor")]
    pub current_chapter_index: Option<usize>,
}

impl StoryState {
    pub fn current_chapter(&self) -> Option<&Chapter> {
        self.current_chapter_index.and_then(|i| self.chapters.get(i))
    }
}

/// Persists the cursor as a plain index where `-1` means "no chapter".
mod cursor {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<usize>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(i) => serializer.serialize_i64(*i as i64),
            None => serializer.serialize_i64(-1),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<usize>, D::Error> {
        let raw = i64::deserialize(deserializer)?;
        Ok(usize::try_from(raw).ok())
    }
}

fn default_language() -> String {
    "English".to_string()
}
fn default_total_chapters() -> u32 {
    12
}
