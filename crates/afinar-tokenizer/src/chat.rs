//! Chat template rendering
//!
//! The pipeline uses one fixed role-delimited template, both for formatting
//! training records and for building inference prompts. Role blocks are
//! delimited by header markers and terminated by an end-of-turn marker.

/// Document start marker
pub const BEGIN_OF_TEXT: &str = "<|begin_of_text|>";
/// Role header opening marker
pub const START_HEADER: &str = "<|start_header_id|>";
/// Role header closing marker
pub const END_HEADER: &str = "<|end_header_id|>";
/// End-of-turn marker
pub const EOT: &str = "<|eot_id|>";

/// One chat turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Role name (`system`, `user`, `assistant`)
    pub role: String,
    /// Turn text
    pub content: String,
}

impl Message {
    /// Create a user-role message
    pub fn user(content: &str) -> Self {
        Self {
            role: "user".to_string(),
            content: content.to_string(),
        }
    }
}

/// Render one role block: header, blank line, content, end-of-turn
fn render_turn(role: &str, content: &str) -> String {
    format!("{START_HEADER}{role}{END_HEADER}\n\n{content}{EOT}")
}

/// Render the fixed three-slot training template
///
/// Produces the system/user/assistant sequence with the three values
/// substituted verbatim, in that order.
pub fn render_example(system: &str, user: &str, assistant: &str) -> String {
    let mut text = String::from(BEGIN_OF_TEXT);
    text.push_str(&render_turn("system", system));
    text.push_str(&render_turn("user", user));
    text.push_str(&render_turn("assistant", assistant));
    text
}

/// Render a chat history
///
/// With `add_generation_prompt` the rendered text ends in an open assistant
/// header, so generation continues as the assistant turn.
pub fn apply_chat_template(messages: &[Message], add_generation_prompt: bool) -> String {
    let mut text = String::from(BEGIN_OF_TEXT);
    for message in messages {
        text.push_str(&render_turn(&message.role, &message.content));
    }
    if add_generation_prompt {
        text.push_str(&format!("{START_HEADER}assistant{END_HEADER}\n\n"));
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_example_contains_values_in_order() {
        let text = render_example("be brief", "what is rust", "a language");

        let sys = text.find("be brief").unwrap();
        let user = text.find("what is rust").unwrap();
        let asst = text.find("a language").unwrap();
        assert!(sys < user && user < asst);
    }

    #[test]
    fn test_render_example_role_markers() {
        let text = render_example("s", "u", "a");
        assert!(text.starts_with(BEGIN_OF_TEXT));
        assert!(text.contains(&format!("{START_HEADER}system{END_HEADER}")));
        assert!(text.contains(&format!("{START_HEADER}user{END_HEADER}")));
        assert!(text.contains(&format!("{START_HEADER}assistant{END_HEADER}")));
        assert_eq!(text.matches(EOT).count(), 3);
    }

    #[test]
    fn test_generation_prompt_opens_assistant_turn() {
        let messages = [Message::user("hello")];
        let text = apply_chat_template(&messages, true);
        assert!(text.ends_with(&format!("{START_HEADER}assistant{END_HEADER}\n\n")));
        // Only the user turn is closed
        assert_eq!(text.matches(EOT).count(), 1);
    }

    #[test]
    fn test_no_generation_prompt() {
        let messages = [Message::user("hello")];
        let text = apply_chat_template(&messages, false);
        assert!(text.ends_with(EOT));
    }
}
