use openbase_api::{ChatMessage, ChatSession};

/// Catalog of known sessions plus the active-session pointer.
///
/// The roster mirrors backend state; it is replaced on refresh and only
/// locally extended when a session is created through this client.
#[derive(Debug, Default)]
pub struct SessionRoster {
    sessions: Vec<ChatSession>,
    active_id: Option<String>,
}

impl SessionRoster {
    pub fn sessions(&self) -> &[ChatSession] {
        &self.sessions
    }

    pub fn active(&self) -> Option<&ChatSession> {
        let active_id = self.active_id.as_deref()?;
        self.find(active_id)
    }

    pub fn active_id(&self) -> Option<&str> {
        self.active_id.as_deref()
    }

    pub fn find(&self, session_id: &str) -> Option<&ChatSession> {
        self.sessions.iter().find(|session| session.id == session_id)
    }

    /// Replaces the catalog wholesale, keeping the active pointer when the
    /// session still exists in the new listing.
    pub fn replace(&mut self, sessions: Vec<ChatSession>) {
        self.sessions = sessions;
        if let Some(active_id) = self.active_id.clone()
            && self.find(&active_id).is_none()
        {
            self.active_id = None;
        }
    }

    /// Inserts a freshly created session at the head and makes it active.
    pub fn adopt(&mut self, session: ChatSession) {
        self.active_id = Some(session.id.clone());
        self.sessions.insert(0, session);
    }

    pub fn set_active(&mut self, session: ChatSession) {
        self.active_id = Some(session.id.clone());
        if self.find(&session.id).is_none() {
            self.sessions.push(session);
        }
    }
}

/// Ordered transcript for the active session.
///
/// Messages are append-only; the whole transcript is replaced when the
/// active session changes.
#[derive(Debug, Default)]
pub struct Transcript {
    messages: Vec<ChatMessage>,
}

impl Transcript {
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    pub fn replace(&mut self, messages: Vec<ChatMessage>) {
        self.messages = messages;
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use openbase_api::ChatRole;

    use super::*;

    fn session(id: &str) -> ChatSession {
        ChatSession {
            id: id.to_string(),
            name: format!("session-{id}"),
            metadata: serde_json::json!({}),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn message(id: &str, session_id: &str) -> ChatMessage {
        ChatMessage {
            id: id.to_string(),
            session_id: session_id.to_string(),
            content: String::new(),
            role: ChatRole::User,
            metadata: serde_json::json!({}),
            claude_response: serde_json::json!({}),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn adopt_inserts_at_the_head_and_activates() {
        let mut roster = SessionRoster::default();
        roster.replace(vec![session("old")]);
        roster.adopt(session("new"));

        assert_eq!(roster.sessions()[0].id, "new");
        assert_eq!(roster.active().map(|s| s.id.as_str()), Some("new"));
    }

    #[test]
    fn replace_drops_a_vanished_active_pointer() {
        let mut roster = SessionRoster::default();
        roster.adopt(session("a"));
        roster.replace(vec![session("b")]);

        assert!(roster.active().is_none());
        assert_eq!(roster.sessions().len(), 1);
    }

    #[test]
    fn transcript_is_append_only_until_replaced() {
        let mut transcript = Transcript::default();
        transcript.push(message("1", "s"));
        transcript.push(message("2", "s"));
        assert_eq!(transcript.len(), 2);

        transcript.replace(vec![message("3", "t")]);
        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript.messages()[0].id, "3");
    }
}
