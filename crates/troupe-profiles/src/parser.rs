//! Best-effort markdown extraction of bot metadata.
//!
//! Two file shapes are understood: SOUL.md (prose with section headings)
//! and IDENTITY.md (explicit `**Field:**` markers). Explicit markers win
//! over heading-derived values when both are present.

use std::collections::HashMap;

use regex::Regex;

/// Extracted metadata fields. All optional; absent keys fall back to the
/// layer below.
pub type Metadata = HashMap<String, String>;

/// Parse a SOUL.md document.
///
/// Recognised shapes:
/// - header line `<emoji> **Title (SHORT)**`
/// - `I am <Name>, the <Title>` introduction
/// - `## Vibe` / `## Personality Traits` sections
/// - `## Greeting` blockquote
/// - `## Communication Style` section
pub fn parse_soul_file(content: &str) -> Metadata {
    let mut metadata = Metadata::new();

    let header_re = Regex::new(r"(?m)^(\S)\s*\*\*(.+?)\s*\((.+?)\)\*\*").expect("valid regex");
    if let Some(caps) = header_re.captures(content) {
        metadata.insert("emoji".to_string(), caps[1].to_string());
        metadata.insert("title".to_string(), caps[2].to_string());
        metadata.insert("short_title".to_string(), caps[3].to_string());
    }

    let name_re = Regex::new(r"I am ([^,]+), the ([^.]+)").expect("valid regex");
    if let Some(caps) = name_re.captures(content) {
        metadata.insert("name".to_string(), caps[1].trim().to_string());
    }

    if let Some(section) = extract_section(content, "Vibe") {
        if let Some(first_line) = section.lines().next() {
            metadata.insert("personality".to_string(), first_line.trim().to_string());
        }
    }
    if !metadata.contains_key("personality") {
        if let Some(section) = extract_section(content, "Personality Traits") {
            metadata.insert("personality".to_string(), section.trim().to_string());
        }
    }

    let greeting_re =
        Regex::new(r"##\s*Greeting\s*\n+>\s*((?s).+?)(?:\n##|\z)").expect("valid regex");
    if let Some(caps) = greeting_re.captures(content) {
        metadata.insert(
            "greeting".to_string(),
            caps[1].trim().replace('\n', " "),
        );
    }

    if let Some(section) = extract_section(content, "Communication Style") {
        metadata.insert("voice_directive".to_string(), section.trim().to_string());
    }

    metadata
}

/// Parse an IDENTITY.md document with explicit `**Field:**` markers.
pub fn parse_identity_file(content: &str) -> Metadata {
    let mut metadata = Metadata::new();

    let field = |marker: &str| -> Option<String> {
        let re = Regex::new(&format!(r"\*\*{marker}:\*\*\s*(.+)")).ok()?;
        re.captures(content).map(|c| c[1].trim().to_string())
    };

    if let Some(name) = field("Name") {
        metadata.insert("name".to_string(), name);
    }
    if let Some(creature) = field("Creature") {
        // short title lives in parentheses, when present
        if let Some(caps) = Regex::new(r"\((.+?)\)")
            .expect("valid regex")
            .captures(&creature)
        {
            metadata.insert("short_title".to_string(), caps[1].to_string());
        }
        metadata.insert("title".to_string(), creature);
    }
    if let Some(emoji_line) = field("Emoji") {
        if let Some(first) = emoji_line.chars().next() {
            metadata.insert("emoji".to_string(), first.to_string());
        }
    }
    if let Some(vibe) = field("Vibe") {
        metadata.insert("personality".to_string(), vibe);
    }
    if let Some(greeting) = field("Greeting") {
        metadata.insert("greeting".to_string(), greeting);
    }

    metadata
}

/// Text of a `## <heading>` section up to the next heading.
fn extract_section(content: &str, heading: &str) -> Option<String> {
    let re = Regex::new(&format!(
        r"##\s*{}\s*\n+((?s).+?)(?:\n##|\z)",
        regex::escape(heading)
    ))
    .ok()?;
    re.captures(content).map(|c| c[1].to_string())
}
