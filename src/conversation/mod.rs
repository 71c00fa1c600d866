pub mod prompt;
pub mod repair;

use crate::models::chat::{ Role, Turn };

/// Marker of the document section inside a composite user turn.
pub const DOCUMENT_CONTEXT_MARKER: &str = "[Document Context]";

/// The single running dialogue shared across requests.
///
/// Appends are not validated; ordering problems are fixed on a snapshot by
/// [`repair::repair`] before the model sees the conversation. The first turn
/// is always the system turn.
#[derive(Debug, Clone)]
pub struct ConversationLog {
    system_prompt: String,
    turns: Vec<Turn>,
}

impl ConversationLog {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        let system_prompt = system_prompt.into();
        Self {
            turns: vec![Turn::system(system_prompt.clone())],
            system_prompt,
        }
    }

    pub fn append(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    /// Marks the conversation as awaiting generation.
    pub fn open_placeholder(&mut self) {
        self.turns.push(Turn::placeholder());
    }

    /// Fills the trailing placeholder with the generated reply, or appends the
    /// reply when no placeholder is pending.
    pub fn commit_reply(&mut self, content: impl Into<String>) {
        match self.turns.last_mut() {
            Some(last) if last.is_placeholder() => {
                last.content = content.into();
            }
            _ => self.turns.push(Turn::assistant(content)),
        }
    }

    pub fn reset(&mut self) {
        self.turns = vec![Turn::system(self.system_prompt.clone())];
    }

    pub fn snapshot(&self) -> Vec<Turn> {
        self.turns.clone()
    }

    /// Drops every non-system turn matching `predicate`.
    pub fn purge<F>(&mut self, predicate: F) -> usize where F: Fn(&Turn) -> bool {
        let before = self.turns.len();
        self.turns.retain(|turn| turn.role == Role::System || !predicate(turn));
        before - self.turns.len()
    }
}

/// Copy of `turns` without any turn carrying document context.
pub fn without_document_context(turns: &[Turn]) -> Vec<Turn> {
    turns
        .iter()
        .filter(|turn| turn.role == Role::System || !turn.content.contains(DOCUMENT_CONTEXT_MARKER))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roles(log: &ConversationLog) -> Vec<Role> {
        log.snapshot().iter().map(|t| t.role).collect()
    }

    #[test]
    fn new_log_holds_only_the_system_turn() {
        let log = ConversationLog::new("sys");
        assert_eq!(log.snapshot().len(), 1);
        assert_eq!(log.snapshot()[0].role, Role::System);
        assert_eq!(log.snapshot()[0].content, "sys");
    }

    #[test]
    fn reset_is_idempotent() {
        let mut log = ConversationLog::new("sys");
        log.append(Turn::user("a"));
        log.append(Turn::assistant("b"));
        log.append(Turn::user("c"));
        log.reset();
        log.reset();
        assert_eq!(log.snapshot().len(), 1);
        assert_eq!(log.snapshot()[0].role, Role::System);
        assert_eq!(log.snapshot()[0].content, "sys");
    }

    #[test]
    fn commit_fills_pending_placeholder() {
        let mut log = ConversationLog::new("sys");
        log.append(Turn::user("hello"));
        log.open_placeholder();
        log.commit_reply("hi there");
        assert_eq!(roles(&log), vec![Role::System, Role::User, Role::Assistant]);
        assert_eq!(log.snapshot().last().unwrap().content, "hi there");
    }

    #[test]
    fn commit_without_placeholder_appends() {
        let mut log = ConversationLog::new("sys");
        log.append(Turn::user("hello"));
        log.commit_reply("hi");
        assert_eq!(roles(&log), vec![Role::System, Role::User, Role::Assistant]);
    }

    #[test]
    fn snapshot_does_not_alias_live_log() {
        let mut log = ConversationLog::new("sys");
        log.append(Turn::user("hello"));
        let snapshot = log.snapshot();
        log.append(Turn::assistant("later"));
        assert_eq!(snapshot.len(), 2);
        assert_eq!(log.snapshot().len(), 3);
    }

    #[test]
    fn purge_keeps_system_turn() {
        let mut log = ConversationLog::new("sys [Document Context]");
        log.append(Turn::user("[Document Context]\nbody"));
        log.open_placeholder();
        log.append(Turn::user("plain"));
        let removed = log.purge(|t| t.content.contains(DOCUMENT_CONTEXT_MARKER) || t.is_placeholder());
        assert_eq!(removed, 2);
        assert_eq!(roles(&log), vec![Role::System, Role::User]);
        assert_eq!(log.snapshot().last().unwrap().content, "plain");
    }

    #[test]
    fn document_context_filter_skips_marked_turns() {
        let turns = vec![
            Turn::system("sys"),
            Turn::user("User question: q\n[Document Context]\ntext"),
            Turn::assistant("a"),
            Turn::user("second"),
        ];
        let filtered = without_document_context(&turns);
        assert_eq!(filtered.len(), 3);
        assert!(filtered.iter().all(|t| !t.content.contains(DOCUMENT_CONTEXT_MARKER)));
    }
}
