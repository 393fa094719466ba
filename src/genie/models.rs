use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const STATUS_COMPLETED: &str = "COMPLETED";
pub const STATUS_FAILED: &str = "FAILED";

// Request bodies

#[derive(Debug, Serialize)]
pub struct ContentRequest<'a> {
    pub content: &'a str,
}

#[derive(Debug, Serialize)]
pub struct StatementRequest<'a> {
    pub statement: &'a str,
    pub warehouse_id: &'a str,
    pub wait_timeout: &'static str,
    pub disposition: &'static str,
    pub format: &'static str,
    pub row_limit: u32,
}

impl<'a> StatementRequest<'a> {
    pub fn inline(statement: &'a str, warehouse_id: &'a str) -> Self {
        Self {
            statement,
            warehouse_id,
            wait_timeout: "30s",
            disposition: "INLINE",
            format: "JSON_ARRAY",
            row_limit: 10_000,
        }
    }
}

// Genie conversation payloads

#[derive(Debug, Deserialize)]
pub struct StartConversationResponse {
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub conversation: Option<IdOnly>,
    #[serde(default)]
    pub message: Option<IdOnly>,
}

#[derive(Debug, Deserialize)]
pub struct IdOnly {
    pub id: String,
}

/// Identifiers of a freshly started conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct StartedConversation {
    pub conversation_id: String,
    pub message_id: String,
}

#[derive(Debug, Deserialize)]
pub struct PostMessageResponse {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub message_id: Option<String>,
}

/// A Genie message as returned by the poll endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RemoteMessage {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// Older API revisions return a single attachment object.
    #[serde(default)]
    pub attachment: Option<Attachment>,
    #[serde(default)]
    pub error: Option<Value>,
}

impl RemoteMessage {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status.as_deref(),
            Some(STATUS_COMPLETED) | Some(STATUS_FAILED)
        )
    }

    pub fn primary_attachment(&self) -> Option<&Attachment> {
        self.attachments.first().or(self.attachment.as_ref())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Attachment {
    #[serde(default)]
    pub attachment_id: Option<String>,
    #[serde(default)]
    pub query: Option<QueryAttachment>,
    #[serde(default)]
    pub text: Option<TextAttachment>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct QueryAttachment {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub query: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TextAttachment {
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct QueryResultEnvelope {
    #[serde(default)]
    pub statement_response: Option<StatementResponse>,
}

// SQL statement execution payloads

/// Raw statement result from either the statements API or Genie's query-result endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StatementResponse {
    #[serde(default)]
    pub statement_id: Option<String>,
    #[serde(default)]
    pub status: Option<StatementStatus>,
    #[serde(default)]
    pub manifest: Option<ResultManifest>,
    #[serde(default)]
    pub result: Option<ResultData>,
}

impl StatementResponse {
    pub fn state(&self) -> Option<&str> {
        self.status.as_ref().and_then(|s| s.state.as_deref())
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.state(), Some("RUNNING") | Some("PENDING"))
    }

    pub fn error_message(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.error.as_ref())
            .and_then(|e| e.message.as_deref())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StatementStatus {
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub error: Option<StatementError>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StatementError {
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ResultManifest {
    #[serde(default)]
    pub schema: Option<ResultSchema>,
    #[serde(default)]
    pub total_row_count: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ResultSchema {
    #[serde(default)]
    pub columns: Vec<ColumnInfo>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ColumnInfo {
    pub name: String,
    #[serde(default)]
    pub type_name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ResultData {
    #[serde(default)]
    pub data_array: Option<Vec<Vec<Value>>>,
    #[serde(default)]
    pub row_count: Option<u64>,
}
