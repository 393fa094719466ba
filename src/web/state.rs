use crate::chat::ChatSession;
use crate::config::AppConfig;

/// Shared application state for the web server
pub struct AppState {
    pub config: AppConfig,
    /// The single chat session this process serves
    pub session: ChatSession,
    pub startup_time: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    pub fn new(config: AppConfig, session: ChatSession) -> Self {
        Self {
            config,
            session,
            startup_time: chrono::Utc::now(),
        }
    }
}
