use crate::models::ChatMessage;

pub const PREAMBLE: &str = "You are a helpful assistant. You do not respond as 'User' or pretend to be 'User'. You only respond once as 'Assistant'.";

/// Flatten the conversation into the single text prompt the Llama 2 chat
/// models expect.
///
/// `history` is the conversation as it stood before `new_prompt` was sent;
/// every message is replayed in order behind its role label.
pub fn build_prompt(history: &[ChatMessage], new_prompt: &str) -> String {
    let mut dialogue = String::from(PREAMBLE);

    for msg in history {
        dialogue.push_str(msg.role.label());
        dialogue.push_str(": ");
        dialogue.push_str(&msg.content);
        dialogue.push_str("\n\n");
    }

    format!("{} {} Assistant: ", dialogue, new_prompt)
}
