//! Instruction-wrap protocol and turn-boundary scanning.
//!
//! Prompt assembly and stop detection share one marker vocabulary: what the
//! renderer writes around a turn is exactly what the scanner looks for in
//! generated text, so runaway generations that start a new logical turn are
//! truncated at the first marker.

use crate::engine::{Role, Turn};

pub const TURN_START: &str = "<s>";
pub const TURN_END: &str = "</s>";
pub const INST_OPEN: &str = "[INST]";
pub const INST_CLOSE: &str = "[/INST]";

/// Markers that signal the model has begun a new logical turn. Scanned in
/// the accumulated generation text after every token.
pub const STOP_MARKERS: &[&str] = &[
    TURN_END,
    INST_OPEN,
    INST_CLOSE,
    "User:",
    "Assistant:",
    "System:",
];

const SUMMARIZE_INSTRUCTION: &str = "Summarize the following conversation in a short paragraph. \
Keep names, decisions, and open questions. Reply with the summary only.";

/// Wraps one instruction (system prompt or user message) in the protocol.
pub fn wrap_instruction(text: &str) -> String {
    format!("{TURN_START}{INST_OPEN} {text} {INST_CLOSE}")
}

/// Renders committed history into prompt text.
pub fn render_history(history: &[Turn]) -> String {
    let mut prompt = String::new();
    for turn in history {
        match turn.role {
            Role::System | Role::User => prompt.push_str(&wrap_instruction(&turn.text)),
            Role::Assistant => {
                prompt.push(' ');
                prompt.push_str(&turn.text);
                prompt.push_str(TURN_END);
            }
        }
    }
    prompt
}

/// Assembles the full prompt for one turn: history so far, then the wrapped
/// context block (if any) and user message.
pub fn assemble(history: &[Turn], context: &str, user_message: &str) -> String {
    let mut prompt = render_history(history);
    if context.is_empty() {
        prompt.push_str(&wrap_instruction(user_message));
    } else {
        prompt.push_str(&wrap_instruction(&format!("{context}\n{user_message}")));
    }
    prompt
}

/// Prompt for one-shot conversation summarization.
pub fn summarize_prompt(history_text: &str) -> String {
    wrap_instruction(&format!("{SUMMARIZE_INSTRUCTION}\n\n{history_text}"))
}

/// Earliest starting offset of any stop marker in `text`.
pub fn earliest_stop_offset(text: &str) -> Option<usize> {
    STOP_MARKERS
        .iter()
        .filter_map(|marker| text.find(marker))
        .min()
}

/// Removes every stop marker from `text`. Used on summarization output,
/// which is never streamed and so never truncated mid-flight.
pub fn strip_markers(text: &str) -> String {
    let mut cleaned = text.to_string();
    for marker in STOP_MARKERS.iter().chain([TURN_START].iter()) {
        cleaned = cleaned.replace(marker, "");
    }
    cleaned
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_and_scan_are_symmetric() {
        // every marker the renderer writes is found by the scanner
        let wrapped = wrap_instruction("hello");
        assert!(earliest_stop_offset(&wrapped).is_some());
    }

    #[test]
    fn test_earliest_offset_across_markers() {
        let text = "some text Assistant: more </s> tail";
        assert_eq!(earliest_stop_offset(text), Some(text.find("Assistant:").unwrap()));

        assert_eq!(earliest_stop_offset("clean generated text"), None);
    }

    #[test]
    fn test_truncation_example() {
        let text = "Hello there</s> extra";
        let offset = earliest_stop_offset(text).unwrap();
        assert_eq!(&text[..offset], "Hello there");
    }

    #[test]
    fn test_strip_markers() {
        let text = "<s>[INST] summary [/INST] body</s>";
        assert_eq!(strip_markers(text).trim(), "summary  body".trim());
        assert!(!strip_markers(text).contains("[INST]"));
    }

    #[test]
    fn test_assemble_includes_context_and_history() {
        let history = vec![
            Turn::system("be brief"),
            Turn::user("hi"),
            Turn::assistant("hello"),
        ];
        let prompt = assemble(&history, "Relevant context:\nfacts", "question?");
        assert!(prompt.starts_with("<s>[INST] be brief [/INST]"));
        assert!(prompt.contains(" hello</s>"));
        assert!(prompt.contains("Relevant context:\nfacts\nquestion?"));
    }
}
