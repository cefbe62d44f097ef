//! Core data model: conversation messages and the response contract.

use serde::{Deserialize, Serialize};

/// Author of a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// A single turn of conversation history.
///
/// Messages are caller-owned and immutable; this crate never mutates them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Create an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    /// Create a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// A suggested next action attached to a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suggestion {
    pub text: String,

    /// Navigation target, or `None` for a non-navigational suggestion.
    pub path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Suggestion {
    /// Create a navigational suggestion.
    pub fn navigate(text: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            path: Some(path.into()),
            description: None,
        }
    }

    /// Create a suggestion with no navigation target.
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            path: None,
            description: None,
        }
    }

    /// Attach a longer description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// The canonical response contract.
///
/// Invariant: `response` is a non-empty plain string after normalization,
/// never a nested object. The wire format uses camelCase field names
/// (`followUpQuestions`); see `spec/response.schema.json` for the schema
/// of record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiResponse {
    pub response: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentiment: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestions: Option<Vec<Suggestion>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub follow_up_questions: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub personality: Option<String>,
}

impl AiResponse {
    /// Create a bare response with only the reply text set.
    pub fn text(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            sentiment: None,
            suggestions: None,
            follow_up_questions: None,
            personality: None,
        }
    }

    /// Set the sentiment signal.
    pub fn with_sentiment(mut self, sentiment: impl Into<String>) -> Self {
        self.sentiment = Some(sentiment.into());
        self
    }

    /// Attach suggested next actions.
    pub fn with_suggestions(mut self, suggestions: Vec<Suggestion>) -> Self {
        self.suggestions = Some(suggestions);
        self
    }

    /// Attach follow-up questions.
    pub fn with_follow_ups(mut self, questions: Vec<String>) -> Self {
        self.follow_up_questions = Some(questions);
        self
    }

    /// Set the personality label.
    pub fn with_personality(mut self, personality: impl Into<String>) -> Self {
        self.personality = Some(personality.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_constructors() {
        assert_eq!(Message::user("hi").role, Role::User);
        assert_eq!(Message::assistant("hello").role, Role::Assistant);
        assert_eq!(Message::system("be brief").role, Role::System);
    }

    #[test]
    fn test_role_serializes_lowercase() {
        let msg = Message::user("hi");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "user");
    }

    #[test]
    fn test_response_wire_names_are_camel_case() {
        let response = AiResponse::text("Paying on time helps your score.")
            .with_sentiment("positive")
            .with_follow_ups(vec!["Want a breakdown by factor?".to_string()]);

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["response"], "Paying on time helps your score.");
        assert_eq!(json["followUpQuestions"][0], "Want a breakdown by factor?");
        // Unset optionals are omitted entirely, not serialized as null.
        assert!(json.get("suggestions").is_none());
        assert!(json.get("personality").is_none());
    }

    #[test]
    fn test_suggestion_path_serializes_null_when_absent() {
        let json = serde_json::to_value(Suggestion::plain("Try again")).unwrap();
        assert!(json["path"].is_null());
        assert!(json.get("description").is_none());
    }

    #[test]
    fn test_response_round_trip() {
        let original = AiResponse::text("ok")
            .with_suggestions(vec![
                Suggestion::navigate("Open dashboard", "/dashboard")
                    .with_description("Your latest activity"),
            ])
            .with_personality("supportive");

        let json = serde_json::to_string(&original).unwrap();
        let decoded: AiResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, original);
    }
}
