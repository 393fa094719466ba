use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Id of the synthetic greeting every session starts with.
pub const GREETING_ID: &str = "1";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Bot,
}

/// Normalized statement result, ready for a table or chart.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TabularResult {
    pub column_names: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    /// Rows actually present in `rows`.
    pub row_count: usize,
    /// Rows the warehouse reports as matching; at least `row_count`.
    pub total_row_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub sender: Sender,
    pub text: String,
    pub loading: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extracted_content: Option<String>,
    pub is_query_response: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql_chart_data: Option<TabularResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql_error: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl ChatMessage {
    fn base(id: String, sender: Sender, text: String, loading: bool) -> Self {
        Self {
            id,
            sender,
            text,
            loading,
            raw_response: None,
            extracted_content: None,
            is_query_response: false,
            sql_chart_data: None,
            sql_error: None,
            created_at: chrono::Utc::now(),
        }
    }

    pub fn greeting(text: &str) -> Self {
        Self::base(GREETING_ID.to_string(), Sender::Bot, text.to_string(), false)
    }

    pub fn user(id: String, text: &str) -> Self {
        Self::base(id, Sender::User, text.to_string(), false)
    }

    pub fn placeholder(id: String, label: &str) -> Self {
        Self::base(id, Sender::Bot, label.to_string(), true)
    }

    pub fn bot_error(id: String, reason: &str) -> Self {
        Self::base(id, Sender::Bot, format!("Error: {}", reason), false)
    }

    /// Text the presentation layer should show.
    pub fn display_text(&self) -> &str {
        match (self.sender, self.extracted_content.as_deref()) {
            (Sender::Bot, Some(content)) => content,
            _ => &self.text,
        }
    }

    /// A bot answer that can be regenerated: settled, and not the greeting.
    pub fn is_settled_answer(&self) -> bool {
        self.sender == Sender::Bot && !self.loading && self.id != GREETING_ID
    }
}
