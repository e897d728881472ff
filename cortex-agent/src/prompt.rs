//! Prompt assembly under an approximate token budget.
//!
//! The budget is enforced by dropping the least valuable context first:
//! memory lines in ascending importance, then history messages oldest
//! first. The system prompt and the triggering user message are never
//! dropped.

use cortex_gateway::ChatMessage;
use cortex_memory::MemoryItem;
use cortex_types::approx_tokens;

/// Inputs to prompt assembly.
pub struct PromptParts<'a> {
    /// The agent's base system prompt.
    pub system_prompt: &'a str,
    /// Retrieved memories, most relevant first.
    pub memories: Vec<MemoryItem>,
    /// Session history, oldest first.
    pub history: Vec<ChatMessage>,
    /// The triggering prompt.
    pub user_prompt: &'a str,
    /// Approximate token budget for the assembled conversation.
    pub budget_tokens: u32,
}

/// Assemble the message list for the first model turn.
pub fn assemble(parts: PromptParts<'_>) -> Vec<ChatMessage> {
    let mut memories = parts.memories;
    let mut history = parts.history;

    let fixed = approx_tokens(parts.system_prompt) + approx_tokens(parts.user_prompt);
    let mut used = fixed
        + memories.iter().map(|m| approx_tokens(&m.content)).sum::<u32>()
        + history.iter().map(|m| approx_tokens(&m.content)).sum::<u32>();

    // Memory lines go first, least important first.
    while used > parts.budget_tokens {
        let Some((idx, _)) = memories.iter().enumerate().min_by(|(_, a), (_, b)| {
            a.importance
                .partial_cmp(&b.importance)
                .unwrap_or(std::cmp::Ordering::Equal)
        }) else {
            break;
        };
        let dropped = memories.remove(idx);
        used = used.saturating_sub(approx_tokens(&dropped.content));
    }

    // Then history, oldest first.
    while used > parts.budget_tokens && !history.is_empty() {
        let dropped = history.remove(0);
        used = used.saturating_sub(approx_tokens(&dropped.content));
    }

    let mut messages = Vec::with_capacity(2 + history.len());
    let system = if memories.is_empty() {
        parts.system_prompt.to_string()
    } else {
        let mut s = String::from(parts.system_prompt);
        s.push_str("\n\nRelevant memory:");
        for memory in &memories {
            s.push_str("\n- ");
            s.push_str(&memory.content);
        }
        s
    };
    messages.push(ChatMessage::system(system));
    messages.extend(history);
    messages.push(ChatMessage::user(parts.user_prompt));
    messages
}
