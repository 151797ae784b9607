use crate::services::session_store::{ConversationTurn, TurnRole};

/// Collapses a session's history plus the new user turn into the single
/// prompt string the upstream understands, one `<label>: <content>` line per
/// turn. The labels are the upstream's own (Chinese) role names.
#[must_use]
pub fn build_contextual_prompt(history: &[ConversationTurn], new_user_content: &str) -> String {
    let mut lines: Vec<String> = history
        .iter()
        .map(|turn| match turn.role {
            TurnRole::User => format!("用户: {}", turn.content),
            TurnRole::Assistant => format!("模型: {}", turn.content),
        })
        .collect();
    lines.push(format!("用户: {new_user_content}"));
    lines.join("\n").trim().to_string()
}
