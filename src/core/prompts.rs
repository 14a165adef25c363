use crate::core::state::SystemPrompts;

pub struct Language {
    pub code: &'static str,
    pub label: &'static str,
}

pub const LANGUAGES: &[Language] = &[
    Language { code: "en", label: "English" },
    Language { code: "es", label: "Español" },
    Language { code: "fr", label: "Français" },
    Language { code: "de", label: "Deutsch" },
    Language { code: "zh", label: "中文" },
    Language { code: "ja", label: "日本語" },
];

/// Display name for a UI language code; unknown codes are returned as-is.
pub fn language_label(code: &str) -> &str {
    LANGUAGES
        .iter()
        .find(|l| l.code == code)
        .map(|l| l.label)
        .unwrap_or(code)
}

const EN_PLANNING: &str = r#"You are an expert novelist. Create a detailed, chapter-by-chapter outline for a novel based on the user's premise.

IMPORTANT: Return ONLY a valid JSON object. Do NOT wrap it in markdown code blocks.

Output JSON structure:
{
  "title": "Novel Title",
  "genre": "Genre",
  "outline": [
    { "title": "Chapter title", "description": "What happens in this chapter..." }
  ],
  "characters": "refined character list"
}

Do not number the chapter titles. Make the outline detailed enough to guide the writing process."#;

const EN_WRITING: &str = r#"You are a creative fiction writer. Write the requested chapter based on the story plan and previous context.

Focus on showing, not telling, detailed sensory descriptions, and realistic dialogue.
Output only the story content (Markdown formatted). Do not include "Here is the chapter" or conversational filler."#;

const ES_PLANNING: &str = r#"Eres un novelista experto. Crea un esquema detallado, capítulo por capítulo.
IMPORTANTE: Devuelve SOLO un objeto JSON válido.

Estructura JSON:
{
  "title": "Título",
  "genre": "Género",
  "outline": [ { "title": "Título del capítulo", "description": "..." } ],
  "characters": "lista de personajes"
}"#;

const FR_PLANNING: &str = r#"Vous êtes un romancier expert. Créez un plan détaillé, chapitre par chapitre.
IMPORTANT : Renvoyez UNIQUEMENT un objet JSON valide.

Structure JSON :
{
  "title": "Titre",
  "genre": "Genre",
  "outline": [ { "title": "Titre du chapitre", "description": "..." } ],
  "characters": "liste des personnages"
}"#;

const DE_PLANNING: &str = r#"Du bist ein erfahrener Romanautor. Erstelle eine detaillierte Gliederung, Kapitel für Kapitel.
WICHTIG: Gib NUR ein gültiges JSON-Objekt zurück.

JSON-Struktur:
{
  "title": "Titel",
  "genre": "Genre",
  "outline": [ { "title": "Kapiteltitel", "description": "..." } ],
  "characters": "Charakterliste"
}"#;

const ZH_PLANNING: &str = r#"你是一位专家小说家。请根据用户的设定创建逐章的详细大纲。
重要：只返回有效的 JSON 对象。

JSON结构：
{
  "title": "标题",
  "genre": "类型",
  "outline": [ { "title": "章节标题", "description": "..." } ],
  "characters": "角色列表"
}"#;

const JA_PLANNING: &str = r#"あなたは熟練した小説家です。章ごとの詳細なアウトラインを作成してください。
重要：有効なJSONオブジェクトのみを返してください。

JSON構造：
{
  "title": "タイトル",
  "genre": "ジャンル",
  "outline": [ { "title": "章のタイトル", "description": "..." } ],
  "characters": "キャラクターリスト"
}"#;

pub fn default_prompts() -> SystemPrompts {
    prompts_for_language("en")
}

/// Default prompt set for a UI language, English when unknown.
pub fn prompts_for_language(code: &str) -> SystemPrompts {
    let (planning, writing) = match code {
        "es" => (
            ES_PLANNING,
            "Eres un escritor de ficción creativa. Escribe el capítulo solicitado según el plan y el contexto previo. Devuelve solo el contenido de la historia (Markdown).",
        ),
        "fr" => (
            FR_PLANNING,
            "Vous êtes un écrivain de fiction créative. Écrivez le chapitre demandé selon le plan et le contexte précédent. Renvoyez uniquement le contenu de l'histoire (Markdown).",
        ),
        "de" => (
            DE_PLANNING,
            "Du bist ein kreativer Schriftsteller. Schreibe das angeforderte Kapitel basierend auf dem Plan und dem bisherigen Kontext. Gib nur den Inhalt der Geschichte aus (Markdown).",
        ),
        "zh" => (
            ZH_PLANNING,
            "你是一位创意小说作家。请根据故事大纲和前文撰写所要求的章节。只输出故事正文（Markdown 格式）。",
        ),
        "ja" => (
            JA_PLANNING,
            "あなたは創造的な小説家です。ストーリープランとこれまでの文脈に基づいて、依頼された章を書いてください。物語の本文のみを出力してください（Markdown形式）。",
        ),
        _ => (EN_PLANNING, EN_WRITING),
    };

    SystemPrompts {
        planning: planning.to_string(),
        writing: writing.to_string(),
    }
}
