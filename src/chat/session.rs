use crate::chat::classify::{classify, Classification};
use crate::chat::models::{ChatMessage, Sender, TabularResult, GREETING_ID};
use crate::chat::transform::to_tabular_result;
use crate::genie::credentials::CredentialProvider;
use crate::genie::models::{RemoteMessage, StatementResponse};
use crate::genie::{GenieClient, GenieError, PollOutcome};
use serde::Serialize;
use std::error::Error;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

const THINKING_LABEL: &str = "Thinking...";
const REGENERATING_LABEL: &str = "Regenerating response...";

#[derive(Debug, Clone, PartialEq)]
pub enum SessionError {
    EmptyMessage,
    NothingToRegenerate,
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::EmptyMessage => write!(f, "Message text is empty"),
            SessionError::NothingToRegenerate => {
                write!(f, "There is no previous answer to regenerate")
            }
        }
    }
}

impl Error for SessionError {}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub warehouse_id: String,
    pub greeting: String,
    pub fallback_text: String,
}

/// What the presentation layer reads.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub messages: Vec<ChatMessage>,
    pub loading: bool,
    pub error: Option<String>,
    pub conversation_id: Option<String>,
}

/// Decrements the outstanding-operation count when dropped.
struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A send whose synchronous half has run: the placeholder (or the message being
/// regenerated) is in the list and flagged as loading.
pub struct PendingSend {
    pub message_id: String,
    pub text: String,
    pub regeneration: bool,
    generation: u64,
    _in_flight: InFlight,
}

/// Outcome of the remote half of a send, before it is written back.
struct Answer {
    remote: RemoteMessage,
    classification: Classification,
    chart: Option<TabularResult>,
    sql_error: Option<String>,
    genie_result: Option<StatementResponse>,
}

/// Owns one conversation with a Genie space and its message history.
///
/// The message list is replaced wholesale on every write so readers holding
/// an earlier snapshot never observe a half-applied update.
pub struct ChatSession {
    client: Arc<GenieClient>,
    credentials: Arc<dyn CredentialProvider>,
    settings: SessionSettings,
    conversation_id: RwLock<Option<String>>,
    messages: RwLock<Arc<Vec<ChatMessage>>>,
    last_user_input: RwLock<Option<String>>,
    error: RwLock<Option<String>>,
    in_flight: Arc<AtomicUsize>,
    next_id: AtomicU64,
    /// Bumped by `clear_chat` so late results from before the clear are ignored.
    generation: AtomicU64,
}

impl ChatSession {
    pub fn new(
        client: Arc<GenieClient>,
        credentials: Arc<dyn CredentialProvider>,
        settings: SessionSettings,
    ) -> Self {
        let greeting = ChatMessage::greeting(&settings.greeting);
        Self {
            client,
            credentials,
            settings,
            conversation_id: RwLock::new(None),
            messages: RwLock::new(Arc::new(vec![greeting])),
            last_user_input: RwLock::new(None),
            error: RwLock::new(None),
            in_flight: Arc::new(AtomicUsize::new(0)),
            // "1" belongs to the greeting
            next_id: AtomicU64::new(2),
            generation: AtomicU64::new(0),
        }
    }

    fn allocate_id(&self) -> String {
        self.next_id.fetch_add(1, Ordering::SeqCst).to_string()
    }

    pub async fn messages(&self) -> Arc<Vec<ChatMessage>> {
        Arc::clone(&*self.messages.read().await)
    }

    pub fn loading(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst) > 0
    }

    pub async fn error(&self) -> Option<String> {
        self.error.read().await.clone()
    }

    pub async fn conversation_id(&self) -> Option<String> {
        self.conversation_id.read().await.clone()
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            messages: (*self.messages().await).clone(),
            loading: self.loading(),
            error: self.error().await,
            conversation_id: self.conversation_id().await,
        }
    }

    /// Restores the greeting-only history and forgets the conversation.
    /// Operations still in flight will find no message to write back to.
    pub async fn clear_chat(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        *self.messages.write().await = Arc::new(vec![ChatMessage::greeting(&self.settings.greeting)]);
        *self.conversation_id.write().await = None;
        *self.last_user_input.write().await = None;
        *self.error.write().await = None;
        info!("Chat cleared");
    }

    /// Sends `text` and waits for the answer to be written back.
    pub async fn send_message(&self, text: &str, regeneration: bool) -> Result<ChatMessage, SessionError> {
        let pending = self.begin_send(text, regeneration).await?;
        Ok(self.complete(pending).await)
    }

    /// Re-asks the last question, rewriting the latest answer in place.
    pub async fn regenerate(&self) -> Result<ChatMessage, SessionError> {
        self.send_message("", true).await
    }

    /// Runs the synchronous half of a send.
    ///
    /// A normal send appends the user message and a loading placeholder. A
    /// regeneration appends nothing; it flags the most recent settled bot
    /// answer (never the greeting) as loading and targets its id.
    ///
    /// Every lock is taken before the list changes, so dropping this future
    /// can never leave a loading message without a `PendingSend` to settle it.
    pub async fn begin_send(&self, text: &str, regeneration: bool) -> Result<PendingSend, SessionError> {
        if regeneration {
            return self.begin_regeneration(text).await;
        }

        let text = text.trim();
        if text.is_empty() {
            return Err(SessionError::EmptyMessage);
        }

        let mut last_user_input = self.last_user_input.write().await;
        let mut error = self.error.write().await;
        let mut messages = self.messages.write().await;

        // No awaits past this point.
        let generation = self.generation.load(Ordering::SeqCst);
        let in_flight = InFlight::enter(&self.in_flight);
        let user = ChatMessage::user(self.allocate_id(), text);
        let placeholder = ChatMessage::placeholder(self.allocate_id(), THINKING_LABEL);
        let message_id = placeholder.id.clone();

        let mut next = (**messages).clone();
        next.push(user);
        next.push(placeholder);
        *last_user_input = Some(text.to_string());
        *error = None;
        *messages = Arc::new(next);

        Ok(PendingSend {
            message_id,
            text: text.to_string(),
            regeneration: false,
            generation,
            _in_flight: in_flight,
        })
    }

    /// Non-empty `text` replaces the remembered input, so a later plain
    /// regeneration re-asks the same question.
    async fn begin_regeneration(&self, text: &str) -> Result<PendingSend, SessionError> {
        let mut last_user_input = self.last_user_input.write().await;
        let mut error = self.error.write().await;
        let mut messages = self.messages.write().await;

        // No awaits past this point.
        let text = match text.trim() {
            "" => last_user_input.clone().ok_or(SessionError::NothingToRegenerate)?,
            given => given.to_string(),
        };
        let position = messages
            .iter()
            .rposition(ChatMessage::is_settled_answer)
            .ok_or(SessionError::NothingToRegenerate)?;

        let generation = self.generation.load(Ordering::SeqCst);
        let in_flight = InFlight::enter(&self.in_flight);

        let mut next = (**messages).clone();
        let target = &mut next[position];
        target.loading = true;
        target.text = REGENERATING_LABEL.to_string();
        target.extracted_content = None;
        let message_id = target.id.clone();

        *last_user_input = Some(text.clone());
        *error = None;
        *messages = Arc::new(next);

        info!("Regenerating answer {}", message_id);
        Ok(PendingSend {
            message_id,
            text,
            regeneration: true,
            generation,
            _in_flight: in_flight,
        })
    }

    /// Runs the remote half of a send and writes the result back onto the
    /// pending message id. The message always leaves the loading state.
    pub async fn complete(&self, pending: PendingSend) -> ChatMessage {
        let settled = match self.resolve(&pending.text, pending.generation).await {
            Ok(answer) => self.answer_message(pending.message_id.clone(), answer),
            Err(e) => {
                error!("Failed to get an answer for message {}: {}", pending.message_id, e);
                if self.is_current(pending.generation) {
                    *self.error.write().await = Some(e.to_string());
                }
                ChatMessage::bot_error(pending.message_id.clone(), &e.to_string())
            }
        };

        debug!("Message {} settled: {}", pending.message_id, settled.display_text());
        if !self.replace_message(&pending.message_id, settled.clone()).await {
            debug!(
                "Message {} is gone (chat cleared?), dropping its result",
                pending.message_id
            );
        }
        settled
    }

    /// Swaps in `message` at `id` by building a new list. Returns false when no
    /// entry has that id.
    async fn replace_message(&self, id: &str, message: ChatMessage) -> bool {
        let mut messages = self.messages.write().await;
        let Some(position) = messages.iter().position(|m| m.id == id) else {
            return false;
        };
        let mut next = (**messages).clone();
        next[position] = message;
        *messages = Arc::new(next);
        true
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    /// Keeps the first conversation id stored since the last clear; later ones
    /// are only used by the request that created them.
    async fn adopt_conversation(&self, conversation_id: &str, generation: u64) {
        let mut current = self.conversation_id.write().await;
        if !self.is_current(generation) {
            return;
        }
        if current.is_none() {
            *current = Some(conversation_id.to_string());
        } else if current.as_deref() != Some(conversation_id) {
            warn!(
                "Conversation {:?} already active, not replacing it with {}",
                current, conversation_id
            );
        }
    }

    async fn resolve(&self, text: &str, generation: u64) -> Result<Answer, GenieError> {
        let token = self
            .credentials
            .bearer_token()
            .ok_or(GenieError::CredentialError)?;

        let existing = self.conversation_id().await;
        let (conversation_id, message_id) = match existing {
            Some(conversation_id) => {
                let message_id = self.client.post_message(&conversation_id, text, &token).await?;
                (conversation_id, message_id)
            }
            None => {
                let started = self.client.start_conversation(text, &token).await?;
                self.adopt_conversation(&started.conversation_id, generation).await;
                (started.conversation_id, started.message_id)
            }
        };

        let outcome = self.client.poll_message(&conversation_id, &message_id, &token).await?;
        if let (PollOutcome::Exhausted { attempts, .. }, true) = (&outcome, self.is_current(generation)) {
            *self.error.write().await = Some(format!(
                "Genie was still working on this question after {} status checks; showing the latest response",
                attempts
            ));
        }
        let remote = outcome.into_message();
        let classification = classify(&remote, &self.settings.fallback_text);

        let execute = async {
            match (&classification.sql, classification.is_query_response) {
                (Some(sql), true) => Some(self.run_sql(sql, &token).await),
                _ => None,
            }
        };
        let diagnostics = async {
            if !classification.is_query_response {
                return None;
            }
            match self
                .client
                .fetch_sql_result(
                    &conversation_id,
                    &message_id,
                    classification.attachment_id.as_deref(),
                    &token,
                )
                .await
            {
                Ok(result) => Some(result),
                Err(e) => {
                    warn!("Could not fetch Genie query result for {}: {}", message_id, e);
                    None
                }
            }
        };
        let (executed, genie_result) = tokio::join!(execute, diagnostics);

        let (chart, sql_error) = match executed {
            Some(Ok(chart)) => (Some(chart), None),
            Some(Err(reason)) => (None, Some(reason)),
            None => (None, None),
        };

        Ok(Answer {
            remote,
            classification,
            chart,
            sql_error,
            genie_result,
        })
    }

    /// Executes the attachment's SQL; failures come back as display strings.
    async fn run_sql(&self, sql: &str, token: &str) -> Result<TabularResult, String> {
        if self.settings.warehouse_id.trim().is_empty() {
            return Err("No SQL warehouse is configured".to_string());
        }

        match self.client.execute_sql(sql, &self.settings.warehouse_id, token).await {
            Ok(raw) => to_tabular_result(&raw).ok_or_else(|| {
                warn!("Statement result had nothing to tabulate");
                "The query returned no data to display".to_string()
            }),
            Err(e) => {
                warn!("SQL execution failed: {}", e);
                Err(e.to_string())
            }
        }
    }

    fn answer_message(&self, id: String, answer: Answer) -> ChatMessage {
        let raw_response = serde_json::to_value(&answer.remote).ok().map(|message| {
            serde_json::json!({
                "message": message,
                "queryResult": answer.genie_result,
            })
        });

        ChatMessage {
            id,
            sender: Sender::Bot,
            text: answer.classification.extracted_content.clone(),
            loading: false,
            raw_response,
            extracted_content: Some(answer.classification.extracted_content),
            is_query_response: answer.classification.is_query_response,
            sql_chart_data: answer.chart,
            sql_error: answer.sql_error,
            created_at: chrono::Utc::now(),
        }
    }

    /// Number of messages excluding the greeting.
    pub async fn message_count(&self) -> usize {
        self.messages
            .read()
            .await
            .iter()
            .filter(|m| m.id != GREETING_ID)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genie::credentials::StaticCredential;
    use crate::genie::retry::RetryPolicy;
    use crate::genie::testing::ScriptedTransport;
    use serde_json::json;
    use std::time::Duration;

    const FALLBACK: &str = "No response content was returned for this question.";

    fn session_with(transport: &Arc<ScriptedTransport>, token: &str) -> ChatSession {
        let client = GenieClient::new(transport.clone(), "space-1", RetryPolicy::default());
        ChatSession::new(
            Arc::new(client),
            Arc::new(StaticCredential::new(token)),
            SessionSettings {
                warehouse_id: "wh-1".to_string(),
                greeting: "Hello!".to_string(),
                fallback_text: FALLBACK.to_string(),
            },
        )
    }

    fn script_first_answer(transport: &ScriptedTransport, attachment: serde_json::Value) {
        transport.push("start-conversation", 200, json!({"conversation_id": "c1", "message_id": "m1"}));
        transport.push(
            "conversations/c1/messages/m1",
            200,
            json!({"id": "m1", "status": "COMPLETED", "attachments": [attachment]}),
        );
    }

    #[tokio::test]
    async fn test_first_send_starts_conversation() {
        let transport = Arc::new(ScriptedTransport::new());
        script_first_answer(&transport, json!({"text": {"content": "hi there"}}));
        let session = session_with(&transport, "token");

        let pending = session.begin_send("hello", false).await.unwrap();
        let placeholder_id = pending.message_id.clone();
        {
            let messages = session.messages().await;
            assert_eq!(messages.len(), 3);
            assert_eq!(messages[1].sender, Sender::User);
            assert_eq!(messages[2].id, placeholder_id);
            assert!(messages[2].loading);
            assert!(session.loading());
        }

        let settled = session.complete(pending).await;
        assert_eq!(settled.id, placeholder_id);

        let messages = session.messages().await;
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[2].id, placeholder_id);
        assert!(!messages[2].loading);
        assert_eq!(messages[2].extracted_content.as_deref(), Some("hi there"));
        assert!(!messages[2].is_query_response);
        assert!(messages.iter().all(|m| !m.loading));
        assert!(!session.loading());
        assert_eq!(session.conversation_id().await.as_deref(), Some("c1"));
    }

    #[tokio::test]
    async fn test_follow_up_posts_to_existing_conversation() {
        let transport = Arc::new(ScriptedTransport::new());
        script_first_answer(&transport, json!({"text": {"content": "first"}}));
        transport.push("conversations/c1/messages", 200, json!({"message_id": "m2"}));
        transport.push(
            "conversations/c1/messages/m2",
            200,
            json!({"status": "COMPLETED", "attachments": [{"text": {"content": "second"}}]}),
        );
        let session = session_with(&transport, "token");

        session.send_message("one", false).await.unwrap();
        let second = session.send_message("two", false).await.unwrap();

        assert_eq!(second.extracted_content.as_deref(), Some("second"));
        let starts = transport
            .paths()
            .iter()
            .filter(|p| p.ends_with("start-conversation"))
            .count();
        assert_eq!(starts, 1);
        assert_eq!(session.messages().await.len(), 5);
        assert_eq!(session.conversation_id().await.as_deref(), Some("c1"));
    }

    #[tokio::test]
    async fn test_query_answer_gets_chart_data() {
        let transport = Arc::new(ScriptedTransport::new());
        script_first_answer(
            &transport,
            json!({"attachment_id": "a1", "query": {"description": "Sales by region", "query": "SELECT region, sales FROM t"}}),
        );
        transport.push(
            "sql/statements/",
            200,
            json!({
                "status": {"state": "SUCCEEDED"},
                "manifest": {"schema": {"columns": [{"name": "region"}, {"name": "sales"}]}, "total_row_count": 2},
                "result": {"data_array": [["East", "10"], ["West", "20"]]}
            }),
        );
        // The attachment query-result endpoint is left unscripted (404): best-effort only.
        let session = session_with(&transport, "token");

        let answer = session.send_message("sales?", false).await.unwrap();

        assert!(answer.is_query_response);
        assert_eq!(answer.extracted_content.as_deref(), Some("Sales by region"));
        let chart = answer.sql_chart_data.as_ref().unwrap();
        assert_eq!(chart.column_names, vec!["region".to_string(), "sales".to_string()]);
        assert_eq!(chart.row_count, 2);
        assert!(answer.sql_error.is_none());
        assert!(session.error().await.is_none());

        let executed = transport.calls.lock().unwrap().iter().find(|c| c.1.ends_with("sql/statements/")).cloned();
        let body = executed.unwrap().3.unwrap();
        assert_eq!(body["statement"], "SELECT region, sales FROM t");
        assert_eq!(body["warehouse_id"], "wh-1");
        assert!(transport.paths().iter().any(|p| p.ends_with("attachments/a1/query-result")));
    }

    #[tokio::test]
    async fn test_sql_failure_keeps_description() {
        let transport = Arc::new(ScriptedTransport::new());
        script_first_answer(&transport, json!({"query": {"description": "d", "query": "SELEC 1"}}));
        transport.push(
            "sql/statements/",
            200,
            json!({"status": {"state": "FAILED", "error": {"message": "syntax error"}}}),
        );
        let session = session_with(&transport, "token");

        let answer = session.send_message("broken", false).await.unwrap();

        assert_eq!(answer.extracted_content.as_deref(), Some("d"));
        assert!(answer.is_query_response);
        assert!(answer.sql_chart_data.is_none());
        assert!(answer.sql_error.as_deref().unwrap().contains("syntax error"));
        assert!(session.error().await.is_none());
    }

    #[tokio::test]
    async fn test_start_failure_becomes_error_message() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push("start-conversation", 500, json!({}));
        let session = session_with(&transport, "token");

        let answer = session.send_message("hello", false).await.unwrap();

        assert!(answer.text.starts_with("Error: "));
        assert!(answer.text.contains("500"));
        assert!(!answer.loading);
        assert!(!answer.is_query_response);
        assert!(answer.sql_chart_data.is_none());
        assert!(session.error().await.unwrap().contains("500"));
        assert!(session.conversation_id().await.is_none());
        assert!(!session.loading());
        assert!(session.messages().await.iter().all(|m| !m.loading));
    }

    #[tokio::test]
    async fn test_missing_credential_makes_no_calls() {
        let transport = Arc::new(ScriptedTransport::new());
        let session = session_with(&transport, "");

        let answer = session.send_message("hello", false).await.unwrap();

        assert!(answer.text.starts_with("Error: Not authenticated"));
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test]
    async fn test_regeneration_rewrites_latest_answer_in_place() {
        let transport = Arc::new(ScriptedTransport::new());
        script_first_answer(&transport, json!({"text": {"content": "first try"}}));
        transport.push("conversations/c1/messages", 200, json!({"message_id": "m2"}));
        transport.push(
            "conversations/c1/messages/m2",
            200,
            json!({"status": "COMPLETED", "attachments": [{"text": {"content": "second try"}}]}),
        );
        let session = session_with(&transport, "token");

        let first = session.send_message("question", false).await.unwrap();
        let before = session.messages().await;

        let pending = session.begin_send("", true).await.unwrap();
        assert_eq!(pending.message_id, first.id);
        assert_eq!(pending.text, "question");
        {
            let messages = session.messages().await;
            assert_eq!(messages.len(), before.len());
            let target = messages.iter().find(|m| m.id == first.id).unwrap();
            assert!(target.loading);
            assert_eq!(target.text, REGENERATING_LABEL);
        }

        let regenerated = session.complete(pending).await;
        let after = session.messages().await;

        assert_eq!(regenerated.id, first.id);
        assert_eq!(after.len(), before.len());
        assert_eq!(after[0], before[0]);
        assert_eq!(after[1], before[1]);
        assert_eq!(after[2].extracted_content.as_deref(), Some("second try"));
        assert!(!after[2].loading);
    }

    #[tokio::test]
    async fn test_regenerate_needs_a_previous_answer() {
        let transport = Arc::new(ScriptedTransport::new());
        let session = session_with(&transport, "token");

        assert_eq!(session.regenerate().await.unwrap_err(), SessionError::NothingToRegenerate);
        assert_eq!(
            session.begin_send("question", true).await.err(),
            Some(SessionError::NothingToRegenerate)
        );

        let messages = session.messages().await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, GREETING_ID);
        assert!(!messages[0].loading);
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_message_rejected() {
        let transport = Arc::new(ScriptedTransport::new());
        let session = session_with(&transport, "token");

        assert_eq!(session.send_message("   ", false).await.unwrap_err(), SessionError::EmptyMessage);
        assert_eq!(session.messages().await.len(), 1);
        assert!(!session.loading());
    }

    #[tokio::test]
    async fn test_clear_chat_resets_and_drops_late_results() {
        let transport = Arc::new(ScriptedTransport::new());
        script_first_answer(&transport, json!({"text": {"content": "answer"}}));
        let session = session_with(&transport, "token");

        let pending = session.begin_send("hello", false).await.unwrap();
        session.clear_chat().await;
        session.complete(pending).await;

        let messages = session.messages().await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, GREETING_ID);
        assert_eq!(messages[0].text, "Hello!");
        assert_eq!(session.message_count().await, 0);
        assert!(session.conversation_id().await.is_none());
    }

    #[tokio::test]
    async fn test_clear_chat_starts_new_conversation() {
        let transport = Arc::new(ScriptedTransport::new());
        script_first_answer(&transport, json!({"text": {"content": "one"}}));
        transport.push("start-conversation", 200, json!({"conversation_id": "c2", "message_id": "m1"}));
        transport.push(
            "conversations/c2/messages/m1",
            200,
            json!({"status": "COMPLETED", "attachments": [{"text": {"content": "two"}}]}),
        );
        let session = session_with(&transport, "token");

        let first = session.send_message("hello", false).await.unwrap();
        session.clear_chat().await;
        assert!(session.conversation_id().await.is_none());

        let second = session.send_message("hello again", false).await.unwrap();
        assert_eq!(second.extracted_content.as_deref(), Some("two"));
        assert_eq!(session.conversation_id().await.as_deref(), Some("c2"));
        // Ids keep counting after a clear.
        assert_ne!(first.id, second.id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_begin_send_leaves_history_untouched() {
        let transport = Arc::new(ScriptedTransport::new());
        let session = session_with(&transport, "token");

        // Each lock in turn keeps begin_send waiting until the timeout drops it.
        {
            let _held = session.last_user_input.read().await;
            let cancelled = tokio::time::timeout(Duration::from_millis(50), session.begin_send("hello", false)).await;
            assert!(cancelled.is_err());
        }
        {
            let _held = session.messages.read().await;
            let cancelled = tokio::time::timeout(Duration::from_millis(50), session.begin_send("hello", false)).await;
            assert!(cancelled.is_err());
        }

        let messages = session.messages().await;
        assert_eq!(messages.len(), 1);
        assert!(messages.iter().all(|m| !m.loading));
        assert!(!session.loading());
        assert!(session.last_user_input.read().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_regeneration_leaves_answer_settled() {
        let transport = Arc::new(ScriptedTransport::new());
        script_first_answer(&transport, json!({"text": {"content": "first try"}}));
        let session = session_with(&transport, "token");
        session.send_message("question", false).await.unwrap();
        let before = session.messages().await;

        {
            let _held = session.error.read().await;
            let cancelled = tokio::time::timeout(Duration::from_millis(50), session.begin_send("", true)).await;
            assert!(cancelled.is_err());
        }

        let after = session.messages().await;
        assert_eq!(*after, *before);
        assert!(after.iter().all(|m| !m.loading));
        assert!(!session.loading());
    }

    #[tokio::test]
    async fn test_overlapping_sends_settle_their_own_placeholders() {
        let transport = Arc::new(ScriptedTransport::new());
        script_first_answer(&transport, json!({"text": {"content": "first"}}));
        transport.push("conversations/c1/messages", 200, json!({"message_id": "m2"}));
        transport.push("conversations/c1/messages", 200, json!({"message_id": "m3"}));
        transport.push(
            "conversations/c1/messages/m2",
            200,
            json!({"status": "COMPLETED", "attachments": [{"text": {"content": "A"}}]}),
        );
        transport.push(
            "conversations/c1/messages/m3",
            200,
            json!({"status": "COMPLETED", "attachments": [{"text": {"content": "B"}}]}),
        );
        let session = session_with(&transport, "token");
        session.send_message("one", false).await.unwrap();

        let a = session.begin_send("two", false).await.unwrap();
        let b = session.begin_send("three", false).await.unwrap();
        let (a_id, b_id) = (a.message_id.clone(), b.message_id.clone());
        assert!(session.loading());

        let (a_settled, b_settled) = tokio::join!(session.complete(a), session.complete(b));

        let messages = session.messages().await;
        let ids: Vec<&str> = messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3", "4", a_id.as_str(), "6", b_id.as_str()]);
        assert_eq!(messages[3].text, "two");
        assert_eq!(messages[5].text, "three");
        assert_eq!(messages[4], a_settled);
        assert_eq!(messages[6], b_settled);

        let mut answers = vec![
            a_settled.extracted_content.clone().unwrap(),
            b_settled.extracted_content.clone().unwrap(),
        ];
        answers.sort();
        assert_eq!(answers, vec!["A".to_string(), "B".to_string()]);
        assert!(messages.iter().all(|m| !m.loading));
        assert!(!session.loading());
    }

    #[tokio::test]
    async fn test_regeneration_alongside_new_send() {
        let transport = Arc::new(ScriptedTransport::new());
        script_first_answer(&transport, json!({"text": {"content": "first"}}));
        transport.push("conversations/c1/messages", 200, json!({"message_id": "m2"}));
        transport.push("conversations/c1/messages", 200, json!({"message_id": "m3"}));
        transport.push(
            "conversations/c1/messages/m2",
            200,
            json!({"status": "COMPLETED", "attachments": [{"text": {"content": "A"}}]}),
        );
        transport.push(
            "conversations/c1/messages/m3",
            200,
            json!({"status": "COMPLETED", "attachments": [{"text": {"content": "B"}}]}),
        );
        let session = session_with(&transport, "token");
        let first = session.send_message("question", false).await.unwrap();

        let regeneration = session.begin_send("", true).await.unwrap();
        let send = session.begin_send("next", false).await.unwrap();
        assert_eq!(regeneration.message_id, first.id);

        let (regenerated, answered) = tokio::join!(session.complete(regeneration), session.complete(send));

        let messages = session.messages().await;
        assert_eq!(messages.len(), 5);
        assert_eq!(messages[2], regenerated);
        assert_eq!(messages[3].text, "next");
        assert_eq!(messages[4], answered);
        assert_ne!(regenerated.extracted_content, answered.extracted_content);
        assert!(messages.iter().all(|m| !m.loading));
        assert!(!session.loading());
    }

    #[tokio::test]
    async fn test_regeneration_override_becomes_remembered_input() {
        let transport = Arc::new(ScriptedTransport::new());
        script_first_answer(&transport, json!({"text": {"content": "first"}}));
        let session = session_with(&transport, "token");
        session.send_message("question", false).await.unwrap();

        let overridden = session.begin_send("  better question ", true).await.unwrap();
        assert_eq!(overridden.text, "better question");
        session.complete(overridden).await;

        let again = session.begin_send("", true).await.unwrap();
        assert_eq!(again.text, "better question");
        session.complete(again).await;
        assert!(!session.loading());
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_exhaustion_still_resolves_placeholder() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push("start-conversation", 200, json!({"conversation_id": "c1", "message_id": "m1"}));
        for _ in 0..25 {
            transport.push("conversations/c1/messages/m1", 200, json!({"status": "EXECUTING_QUERY"}));
        }
        let session = session_with(&transport, "token");

        let answer = session.send_message("slow question", false).await.unwrap();

        assert!(!answer.loading);
        assert_eq!(answer.extracted_content.as_deref(), Some(FALLBACK));
        assert!(session.error().await.unwrap().contains("20"));
        assert!(session.messages().await.iter().all(|m| !m.loading));
    }
}
