//! Fixed instructions and user-message builders for each gateway call.

use super::{DraftMessage, HistoryMessage, RewriteGuidance, SpeakerProfile};
use serde_json::Value;

/// Messages kept from the conversation history when rewriting.
pub const HISTORY_LIMIT: usize = 10;
/// Characters kept from each history message.
pub const HISTORY_CHARS: usize = 400;

pub const RESHAPE_SYSTEM: &str = r#"You are a precise JSON transformation assistant.

Convert the input JSON into an object with exactly two top-level fields:
1. "users": a list of objects describing every unique speaker.
2. "tree": the conversation as a tree following the schema below.

Output schema:
{
  "users": [
    {
      "speaker": "string",
      "description": "this is a telegram user"
    }
  ],
  "tree": {
    "id": "string",
    "speaker": "string",
    "text": "string",
    "children": "list"
  }
}

Rules:
- Return only a valid JSON object. No markdown, explanations or comments.
- List every unique speaker from the input in "users".
- Each user object has "speaker" (the speaker's name) and "description" (always "this is a telegram user").
- Place the whole conversation structure inside "tree".
- Every node in "tree" follows the node schema exactly.
- A node without replies has "children": [].
- Do not add empty or placeholder nodes.
- The root is a single JSON object, not a list.
- If a field is missing in the input, skip it instead of inventing a value."#;

pub const BIO_SYSTEM: &str = r#"Write a user biography that captures the user's argumentative style, written voice, emotional tone and clearly expressed opinions. Use both the existing biographical description and the chat messages as evidence. Keep traits from the existing biography only when the messages show, support or are consistent with them. The biography should read naturally, as if introducing the user to others. Avoid vague, generic or speculative statements: every point must be traceable to the provided material.

Do not simply summarize or repeat the existing biography, and do not add background details unless the inputs reflect them.

# Input Format

1. The existing biographical description of the user, as a string.
2. A JSON list of the user's chat messages.

# Output Format

A single concise third-person paragraph about the user's style and predominant viewpoints. No explanations, meta-commentary, bullet points or directives.

# Notes
- If the existing description names the platform the user writes on, keep it.
- If the two sources conflict, prefer what the chat messages show.
- Length should be proportional to the amount of evidence in the inputs."#;

pub const REWRITE_SYSTEM: &str = r#"You rewrite a single chat message so that it sounds like it was written by its speaker.

Keep the meaning and the addressees of the original message. Match the speaker's voice as described in their profile and as shown in the recent conversation. Follow any temperament, style or length directive you are given.

Return only the rewritten message text, with no quotes, labels or commentary."#;

pub const HEALTH_PROMPT: &str = "Reply with the single word: ok";

pub fn reshape_user(items: &Value) -> String {
    let pretty = serde_json::to_string_pretty(items).unwrap_or_else(|_| items.to_string());
    format!(
        "Transform the following JSON into the target schema.\n\n\
         ### Input JSON\n\n{}\n\n\n\
         Make sure that the output ends **immediately** after the last valid closing bracket.\n\
         If you produce an empty node or any content after the valid JSON tree, delete it before returning.\n\n\
         ### Output JSON",
        pretty
    )
}

pub fn bio_user(existing_bio: &str, messages: &[String]) -> String {
    let messages_json =
        serde_json::to_string_pretty(messages).unwrap_or_else(|_| format!("{:?}", messages));
    format!("# Input\n1. {}\n2.{}\n\n# Output", existing_bio, messages_json)
}

fn clip(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

pub fn rewrite_user(
    draft: &DraftMessage,
    profile: Option<&SpeakerProfile>,
    history: &[HistoryMessage],
    guidance: &RewriteGuidance,
) -> String {
    let mut out = String::new();

    out.push_str(&format!("# Speaker\n{}\n", draft.speaker));
    if !draft.addressees.is_empty() {
        out.push_str(&format!("\n# Addressees\n{}\n", draft.addressees.join(", ")));
    }

    if let Some(description) = profile
        .map(|p| p.description.trim())
        .filter(|d| !d.is_empty())
    {
        out.push_str(&format!("\n# Speaker profile\n{}\n", description));
    }

    if !history.is_empty() {
        out.push_str("\n# Recent conversation\n");
        let skip = history.len().saturating_sub(HISTORY_LIMIT);
        for message in &history[skip..] {
            out.push_str(&format!(
                "- {}: {}\n",
                message.speaker,
                clip(&message.text, HISTORY_CHARS)
            ));
        }
    }

    let directives: Vec<String> = [
        ("Temperament", &guidance.temperament),
        ("Style", &guidance.style),
        ("Length", &guidance.length),
    ]
    .into_iter()
    .filter_map(|(label, value)| {
        value
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| format!("- {}: {}", label, v))
    })
    .collect();
    if !directives.is_empty() {
        out.push_str("\n# Directives\n");
        out.push_str(&directives.join("\n"));
        out.push('\n');
    }

    out.push_str(&format!("\n# Message to rewrite\n{}\n\n# Rewritten message", draft.text));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn draft() -> DraftMessage {
        DraftMessage {
            text: "we should ship it".into(),
            speaker: "Alice".into(),
            addressees: vec!["Bob".into()],
        }
    }

    #[test]
    fn bio_input_keeps_the_numbered_layout() {
        let input = bio_user("Likes Rust.", &["first".into()]);
        assert!(input.starts_with("# Input\n1. Likes Rust.\n2.["));
        assert!(input.ends_with("]\n\n# Output"));
    }

    #[test]
    fn reshape_input_embeds_pretty_items() {
        let input = reshape_user(&json!([{"id": "1"}]));
        assert!(input.contains("\"id\": \"1\""));
        assert!(input.ends_with("### Output JSON"));
    }

    #[test]
    fn history_is_limited_and_clipped() {
        let history: Vec<HistoryMessage> = (0..15)
            .map(|i| HistoryMessage {
                speaker: format!("S{}", i),
                text: "x".repeat(500),
            })
            .collect();
        let input = rewrite_user(&draft(), None, &history, &RewriteGuidance::default());
        assert!(!input.contains("- S4:"));
        assert!(input.contains("- S5:"));
        assert!(input.contains("- S14:"));
        assert!(!input.contains(&"x".repeat(401)));
    }

    #[test]
    fn empty_directives_are_omitted() {
        let guidance = RewriteGuidance {
            temperament: Some("calm".into()),
            style: Some("  ".into()),
            length: None,
        };
        let profile = SpeakerProfile {
            speaker: "Alice".into(),
            description: "Blunt engineer".into(),
        };
        let input = rewrite_user(&draft(), Some(&profile), &[], &guidance);
        assert!(input.contains("- Temperament: calm"));
        assert!(!input.contains("Style"));
        assert!(input.contains("Blunt engineer"));
        assert!(input.contains("# Addressees\nBob"));
    }

    #[test]
    fn clip_respects_char_boundaries() {
        assert_eq!(clip("héllo", 2), "hé...");
        assert_eq!(clip("hi", 5), "hi");
    }
}
