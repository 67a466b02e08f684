use crate::models::{ChatMessage, Role};
use crate::persona::{GROUNDING_RULE, NO_CONTEXT_RULE, PERSONA, STYLE_RULE};

pub const CONTEXT_BEGIN: &str = "<<<MANUAL EXCERPTS>>>";
pub const CONTEXT_END: &str = "<<<END MANUAL EXCERPTS>>>";

pub fn normalize_text(input: &str) -> String {
    input
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim()
        .to_string()
}

/// Builds the message sequence for one chat-completion request.
///
/// The system message carries the persona, the retrieved context verbatim and
/// the grounding rule. Only the trailing `window` entries of `history` are
/// forwarded, followed by the new user message.
pub fn build_prompt(
    history: &[ChatMessage],
    context: &str,
    user_text: &str,
    window: usize,
) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(window.min(history.len()) + 2);
    messages.push(ChatMessage::system(system_prompt(context)));

    let skip = history.len().saturating_sub(window);
    messages.extend(
        history
            .iter()
            .skip(skip)
            .filter(|message| message.role != Role::System)
            .cloned(),
    );

    messages.push(ChatMessage::user(user_text));
    messages
}

pub fn system_prompt(context: &str) -> String {
    if context.is_empty() {
        return format!("{PERSONA}\n\n{NO_CONTEXT_RULE}\n\n{STYLE_RULE}");
    }

    format!("{PERSONA}\n\n{CONTEXT_BEGIN}\n{context}\n{CONTEXT_END}\n\n{GROUNDING_RULE}\n\n{STYLE_RULE}")
}

/// Recovers the context block embedded by [`system_prompt`], if any.
pub fn extract_context(system_content: &str) -> Option<&str> {
    let start = system_content.find(CONTEXT_BEGIN)? + CONTEXT_BEGIN.len();
    let end = system_content[start..].find(CONTEXT_END)? + start;
    Some(system_content[start..end].trim_matches('\n'))
}

/// Folds one streamed fragment into the answer accumulated so far.
pub fn accumulate(mut prior: String, fragment: &str) -> String {
    prior.push_str(fragment);
    prior
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persona::GREETING;

    #[test]
    fn embeds_context_verbatim() {
        let context = "GPA below 1.70 triggers probation.\n\nAttendance must be 80 percent.";
        let messages = build_prompt(&[], context, "What is probation?", 6);

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
        assert!(messages[0].content.contains(context));
        assert!(messages[0].content.contains(GROUNDING_RULE));
        assert_eq!(messages[1], ChatMessage::user("What is probation?"));
        assert_eq!(extract_context(&messages[0].content), Some(context));
    }

    #[test]
    fn empty_context_drops_the_excerpt_block() {
        let messages = build_prompt(&[], "", "hello", 6);
        let system = &messages[0].content;

        assert!(!system.contains(CONTEXT_BEGIN));
        assert!(!system.contains(GROUNDING_RULE));
        assert!(system.contains(NO_CONTEXT_RULE));
        assert_eq!(extract_context(system), None);
    }

    #[test]
    fn forwards_only_the_trailing_window() {
        let mut history = vec![ChatMessage::assistant(GREETING)];
        for idx in 0..10 {
            history.push(ChatMessage::user(format!("question {idx}")));
            history.push(ChatMessage::assistant(format!("answer {idx}")));
        }

        let messages = build_prompt(&history, "ctx", "latest", 4);

        assert_eq!(messages.len(), 6);
        assert_eq!(messages[1].content, "question 8");
        assert_eq!(messages[4].content, "answer 9");
        assert_eq!(messages[5], ChatMessage::user("latest"));
    }

    #[test]
    fn streamed_fragments_match_complete_answer() {
        let fragments = ["Attendance ", "must be ", "80 percent."];
        let streamed = fragments
            .iter()
            .fold(String::new(), |acc, fragment| accumulate(acc, fragment));
        assert_eq!(streamed, "Attendance must be 80 percent.");
    }

    #[test]
    fn normalizes_whitespace() {
        assert_eq!(normalize_text("  what   is\tGPA \n"), "what is GPA");
    }
}
