//! Outline helpers: matching outline entries to chapter numbers, converting
//! the legacy free-text form, and editing the structured list.

use crate::core::state::{Outline, OutlineItem};
use regex::{Captures, Regex};
use serde_json::Value;
use std::sync::LazyLock;

const CJK_NUMERALS: [char; 10] = ['一', '二', '三', '四', '五', '六', '七', '八', '九', '十'];

static CHAPTER_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:Chapter|Capítulo|Chapitre|Kapitel)\s+(\d+)[:.]").expect("valid regex")
});
static CHAPTER_BOUNDARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:Chapter|Capítulo|Chapitre|Kapitel)\s+\d+").expect("valid regex")
});
static LIST_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^(\d+)\.").expect("valid regex"));
static LINE_END: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)$").expect("valid regex"));
static CJK_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"第\s*(\d+)\s*章[:：]").expect("valid regex"));
static CJK_BOUNDARY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"第\s*\d+\s*章").expect("valid regex"));
static CJK_NUMERAL_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"第\s*([一二三四五六七八九十])\s*章[:：]").expect("valid regex"));
static CJK_NUMERAL_BOUNDARY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"第\s*[一二三四五六七八九十]\s*章").expect("valid regex"));
static NUMBER_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^\s*(?:(?:chapter|capítulo|capitulo|chapitre|kapitel)\s*\d+\s*[:：.\-–—]?|第\s*[\d一二三四五六七八九十百]+\s*[章回]\s*[:：.]?|\d+\s*[.)、])\s*",
    )
    .expect("valid regex")
});

/// Outline text for the 1-based `chapter_number`, or an empty string when
/// the outline has nothing for it.
pub fn extract_chapter_plan(outline: &Outline, chapter_number: usize) -> String {
    match outline {
        Outline::Structured(items) => chapter_number
            .checked_sub(1)
            .and_then(|i| items.get(i))
            .map(describe_item)
            .unwrap_or_default(),
        Outline::Legacy(text) => extract_from_text(text, chapter_number),
    }
}

fn describe_item(item: &OutlineItem) -> String {
    let title = item.title.trim();
    let description = item.description.trim();
    if description.is_empty() {
        title.to_string()
    } else {
        format!("{}: {}", title, description)
    }
}

fn extract_from_text(text: &str, chapter_number: usize) -> String {
    if text.trim().is_empty() || chapter_number == 0 {
        return String::new();
    }

    let is_number = |caps: &Captures| caps[1].parse::<usize>().ok() == Some(chapter_number);

    let numeral = CJK_NUMERALS.get(chapter_number - 1).copied();
    let is_numeral = |caps: &Captures| numeral.is_some_and(|n| caps[1].starts_with(n));

    capture_section(text, &CHAPTER_MARKER, &CHAPTER_BOUNDARY, is_number)
        .or_else(|| capture_section(text, &LIST_MARKER, &LINE_END, is_number))
        .or_else(|| capture_section(text, &CJK_MARKER, &CJK_BOUNDARY, is_number))
        .or_else(|| capture_section(text, &CJK_NUMERAL_MARKER, &CJK_NUMERAL_BOUNDARY, is_numeral))
        .unwrap_or_default()
}

/// Text following the first `marker` accepted by `accept`, up to the next
/// `boundary` or the end of the input. `None` when that text is blank.
fn capture_section<F>(text: &str, marker: &Regex, boundary: &Regex, accept: F) -> Option<String>
where
    F: Fn(&Captures) -> bool,
{
    let caps = marker.captures_iter(text).find(|c| accept(c))?;
    let start = caps.get(0)?.end();
    let end = boundary
        .find_at(text, start)
        .map(|m| m.start())
        .unwrap_or(text.len());

    let section = text[start..end].trim();
    if section.is_empty() {
        None
    } else {
        Some(section.to_string())
    }
}

/// Removes a leading "Chapter 3:", "3.", "第三章：" style number. A title that
/// is nothing but a number is kept as written.
pub fn strip_chapter_prefix(title: &str) -> String {
    let stripped = NUMBER_PREFIX.replace(title, "");
    let stripped = stripped.trim();
    if stripped.is_empty() {
        title.trim().to_string()
    } else {
        stripped.to_string()
    }
}

/// Converts a legacy free-text outline into one item per non-empty line.
pub fn migrate_legacy(text: &str) -> Vec<OutlineItem> {
    let mut items = Vec::new();
    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let id = new_item_id(&items);
        items.push(OutlineItem {
            id,
            title: strip_chapter_prefix(line),
            description: String::new(),
        });
    }
    items
}

/// Normalizes the `outline` field of a model reply into structured items.
/// Returns `None` when the value has no usable outline.
pub fn normalize_outline(value: &Value) -> Option<Vec<OutlineItem>> {
    match value {
        Value::String(text) if !text.trim().is_empty() => Some(migrate_legacy(text)),
        Value::Array(entries) => {
            let mut items: Vec<OutlineItem> = Vec::with_capacity(entries.len());
            for (i, entry) in entries.iter().enumerate() {
                let (title, description) = match entry {
                    Value::String(s) => (s.clone(), String::new()),
                    Value::Object(map) => {
                        let field = |key: &str| map.get(key).and_then(Value::as_str).map(str::to_string);
                        (
                            field("title").or_else(|| field("name")).unwrap_or_default(),
                            field("description").or_else(|| field("summary")).unwrap_or_default(),
                        )
                    }
                    _ => continue,
                };

                let title = if title.trim().is_empty() {
                    format!("Chapter {}", i + 1)
                } else {
                    strip_chapter_prefix(&title)
                };
                let id = new_item_id(&items);
                items.push(OutlineItem {
                    id,
                    title,
                    description: description.trim().to_string(),
                });
            }
            if items.is_empty() {
                None
            } else {
                Some(items)
            }
        }
        _ => None,
    }
}

/// Outline as a numbered list, the form used in prompts and exports.
pub fn outline_to_text(outline: &Outline) -> String {
    match outline {
        Outline::Legacy(text) => text.trim().to_string(),
        Outline::Structured(items) => items
            .iter()
            .enumerate()
            .map(|(i, item)| format!("{}. {}", i + 1, describe_item(item)))
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

/// Suggested instructions for writing chapter `chapter_number`: its outline
/// entry, or nothing when the outline has no entry for it.
pub fn suggested_instructions(outline: &Outline, chapter_number: usize) -> String {
    extract_chapter_plan(outline, chapter_number)
}

fn new_item_id(existing: &[OutlineItem]) -> String {
    loop {
        let id = format!("{:016x}", rand::random::<u64>());
        if !existing.iter().any(|item| item.id == id) {
            return id;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveDirection {
    Up,
    Down,
}

impl Outline {
    /// Structured items, converting a legacy outline in place first.
    pub fn items_mut(&mut self) -> &mut Vec<OutlineItem> {
        if let Outline::Legacy(text) = self {
            *self = Outline::Structured(migrate_legacy(text));
        }
        match self {
            Outline::Structured(items) => items,
            Outline::Legacy(_) => unreachable!("legacy outline was just migrated"),
        }
    }

    /// Returns a structured copy of this outline.
    pub fn migrated(&self) -> Outline {
        match self {
            Outline::Legacy(text) => Outline::Structured(migrate_legacy(text)),
            Outline::Structured(_) => self.clone(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Outline::Legacy(text) => text.lines().filter(|l| !l.trim().is_empty()).count(),
            Outline::Structured(items) => items.len(),
        }
    }

    pub fn add_item(&mut self, title: &str, description: &str) -> String {
        let items = self.items_mut();
        let id = new_item_id(items);
        items.push(OutlineItem {
            id: id.clone(),
            title: title.to_string(),
            description: description.to_string(),
        });
        id
    }

    pub fn update_item(&mut self, id: &str, title: Option<&str>, description: Option<&str>) -> bool {
        let Some(item) = self.items_mut().iter_mut().find(|i| i.id == id) else {
            return false;
        };
        if let Some(title) = title {
            item.title = title.to_string();
        }
        if let Some(description) = description {
            item.description = description.to_string();
        }
        true
    }

    pub fn remove_item(&mut self, id: &str) -> bool {
        let items = self.items_mut();
        let before = items.len();
        items.retain(|i| i.id != id);
        items.len() != before
    }

    /// Swaps the item with its neighbour. No-op at either end.
    pub fn move_item(&mut self, id: &str, direction: MoveDirection) -> bool {
        let items = self.items_mut();
        let Some(index) = items.iter().position(|i| i.id == id) else {
            return false;
        };
        let target = match direction {
            MoveDirection::Up if index > 0 => index - 1,
            MoveDirection::Down if index + 1 < items.len() => index + 1,
            _ => return false,
        };
        items.swap(index, target);
        true
    }

    /// Gives every item without an id a fresh one.
    pub fn assign_missing_ids(&mut self) {
        let items = self.items_mut();
        for i in 0..items.len() {
            if items[i].id.is_empty() {
                let id = new_item_id(items);
                items[i].id = id;
            }
        }
    }
}
