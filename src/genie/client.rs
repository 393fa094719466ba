use crate::genie::models::{
    ContentRequest, PostMessageResponse, QueryResultEnvelope, RemoteMessage,
    StartConversationResponse, StartedConversation, StatementRequest, StatementResponse,
    STATUS_FAILED,
};
use crate::genie::retry::RetryPolicy;
use crate::genie::{require_token, GenieError, HttpRequest, HttpResponse, HttpTransport};
use reqwest::{Method, StatusCode};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of polling a Genie message.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// The message reached COMPLETED or FAILED.
    Settled(RemoteMessage),
    /// The attempt budget ran out while the status was still non-terminal.
    /// Carries the last payload seen.
    Exhausted { message: RemoteMessage, attempts: u32 },
}

impl PollOutcome {
    pub fn message(&self) -> &RemoteMessage {
        match self {
            PollOutcome::Settled(message) => message,
            PollOutcome::Exhausted { message, .. } => message,
        }
    }

    pub fn into_message(self) -> RemoteMessage {
        match self {
            PollOutcome::Settled(message) => message,
            PollOutcome::Exhausted { message, .. } => message,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, PollOutcome::Exhausted { .. })
    }
}

/// Stateless wrapper over the Genie conversation API and the SQL statements API.
/// The bearer token is passed into every call rather than held here.
pub struct GenieClient {
    transport: Arc<dyn HttpTransport>,
    space_id: String,
    retry: RetryPolicy,
}

impl GenieClient {
    pub fn new(transport: Arc<dyn HttpTransport>, space_id: impl Into<String>, retry: RetryPolicy) -> Self {
        Self {
            transport,
            space_id: space_id.into(),
            retry,
        }
    }

    fn space_path(&self) -> String {
        format!("/api/2.0/genie/spaces/{}", self.space_id)
    }

    fn message_path(&self, conversation_id: &str, message_id: &str) -> String {
        format!(
            "{}/conversations/{}/messages/{}",
            self.space_path(),
            conversation_id,
            message_id
        )
    }

    async fn call(
        &self,
        method: Method,
        path: String,
        token: &str,
        body: Option<serde_json::Value>,
    ) -> Result<HttpResponse, GenieError> {
        self.transport
            .send(HttpRequest {
                method,
                path,
                bearer_token: token.to_string(),
                body,
            })
            .await
    }

    pub async fn start_conversation(
        &self,
        text: &str,
        token: &str,
    ) -> Result<StartedConversation, GenieError> {
        let token = require_token(token)?;
        let path = format!("{}/start-conversation", self.space_path());
        let body = serde_json::to_value(ContentRequest { content: text })
            .map_err(|e| GenieError::DecodeError(e.to_string()))?;

        let response = ensure_success(self.call(Method::POST, path, token, Some(body)).await?, "start-conversation")?;
        let started: StartConversationResponse = response.decode()?;

        let conversation_id = started
            .conversation_id
            .or(started.conversation.map(|c| c.id))
            .ok_or_else(|| GenieError::DecodeError("start-conversation returned no conversation id".to_string()))?;
        let message_id = started
            .message_id
            .or(started.message.map(|m| m.id))
            .ok_or_else(|| GenieError::DecodeError("start-conversation returned no message id".to_string()))?;

        info!("Started Genie conversation {}", conversation_id);
        Ok(StartedConversation {
            conversation_id,
            message_id,
        })
    }

    pub async fn post_message(
        &self,
        conversation_id: &str,
        text: &str,
        token: &str,
    ) -> Result<String, GenieError> {
        let token = require_token(token)?;
        let path = format!("{}/conversations/{}/messages", self.space_path(), conversation_id);
        let body = serde_json::to_value(ContentRequest { content: text })
            .map_err(|e| GenieError::DecodeError(e.to_string()))?;

        let response = ensure_success(self.call(Method::POST, path, token, Some(body)).await?, "messages")?;
        let posted: PostMessageResponse = response.decode()?;

        posted
            .message_id
            .or(posted.id)
            .ok_or_else(|| GenieError::DecodeError("post message returned no message id".to_string()))
    }

    /// Polls until the message is COMPLETED or FAILED.
    ///
    /// A 409 means the message is not pollable yet and is retried up to
    /// `max_conflict_retries` times. A non-terminal status is retried until
    /// `max_status_attempts` responses have been seen, after which the last
    /// payload is handed back as `PollOutcome::Exhausted`. Both share one
    /// backoff schedule.
    pub async fn poll_message(
        &self,
        conversation_id: &str,
        message_id: &str,
        token: &str,
    ) -> Result<PollOutcome, GenieError> {
        let token = require_token(token)?;
        let path = self.message_path(conversation_id, message_id);

        let mut retry = 0u32;
        let mut conflicts = 0u32;
        let mut attempts = 0u32;

        loop {
            let response = self.call(Method::GET, path.clone(), token, None).await?;

            if response.status == StatusCode::CONFLICT {
                if conflicts >= self.retry.max_conflict_retries {
                    warn!(
                        "Message {} still not pollable after {} conflict retries",
                        message_id, conflicts
                    );
                    return Err(GenieError::ProtocolError {
                        status: StatusCode::CONFLICT.as_u16(),
                        endpoint: "poll message".to_string(),
                    });
                }
                conflicts += 1;
            } else {
                let message: RemoteMessage = ensure_success(response, "poll message")?.decode()?;
                attempts += 1;

                if message.is_terminal() {
                    debug!(
                        "Message {} settled with status {:?} after {} attempts",
                        message_id, message.status, attempts
                    );
                    return Ok(PollOutcome::Settled(message));
                }

                if attempts >= self.retry.max_status_attempts {
                    warn!(
                        "Message {} still {:?} after {} attempts, giving up",
                        message_id, message.status, attempts
                    );
                    return Ok(PollOutcome::Exhausted { message, attempts });
                }
            }

            let delay = self.retry.delay_for(retry);
            retry += 1;
            debug!("Polling message {} again in {:?}", message_id, delay);
            tokio::time::sleep(delay).await;
        }
    }

    /// Fetches the statement result Genie produced for a query attachment.
    /// Uses the attachment-scoped endpoint when an attachment id is known.
    pub async fn fetch_sql_result(
        &self,
        conversation_id: &str,
        message_id: &str,
        attachment_id: Option<&str>,
        token: &str,
    ) -> Result<StatementResponse, GenieError> {
        let token = require_token(token)?;
        let base = self.message_path(conversation_id, message_id);
        let path = match attachment_id {
            Some(attachment_id) => format!("{}/attachments/{}/query-result", base, attachment_id),
            None => format!("{}/query-result", base),
        };

        let mut attempts = 0u32;
        loop {
            let response = ensure_success(
                self.call(Method::GET, path.clone(), token, None).await?,
                "query-result",
            )?;
            let envelope: QueryResultEnvelope = response.decode()?;
            let statement = envelope.statement_response.unwrap_or_default();
            attempts += 1;

            if !statement.is_pending() {
                return Ok(statement);
            }
            if attempts >= self.retry.max_sql_result_attempts {
                warn!(
                    "Query result for message {} still {:?} after {} attempts",
                    message_id,
                    statement.state(),
                    attempts
                );
                return Ok(statement);
            }

            let delay = self.retry.delay_for(attempts - 1);
            debug!("Query result still {:?}, retrying in {:?}", statement.state(), delay);
            tokio::time::sleep(delay).await;
        }
    }

    /// Runs a statement on the warehouse and waits up to 30s server-side for inline results.
    pub async fn execute_sql(
        &self,
        statement: &str,
        warehouse_id: &str,
        token: &str,
    ) -> Result<StatementResponse, GenieError> {
        let token = require_token(token)?;
        let body = serde_json::to_value(StatementRequest::inline(statement, warehouse_id))
            .map_err(|e| GenieError::DecodeError(e.to_string()))?;

        debug!("Executing SQL on warehouse {}: {}", warehouse_id, statement);
        let response = ensure_success(
            self.call(Method::POST, "/api/2.0/sql/statements/".to_string(), token, Some(body))
                .await?,
            "sql/statements",
        )?;
        let result: StatementResponse = response.decode()?;

        if result.state() == Some(STATUS_FAILED) {
            let message = result
                .error_message()
                .unwrap_or("Query execution failed")
                .to_string();
            return Err(GenieError::QueryExecutionError(message));
        }

        Ok(result)
    }
}

fn ensure_success(response: HttpResponse, endpoint: &str) -> Result<HttpResponse, GenieError> {
    if !response.status.is_success() {
        return Err(GenieError::ProtocolError {
            status: response.status.as_u16(),
            endpoint: endpoint.to_string(),
        });
    }
    Ok(response)
}
