use crate::genie::models::RemoteMessage;

/// What the session needs to know about a settled Genie message.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub extracted_content: String,
    pub is_query_response: bool,
    /// Literal SQL from a query attachment, if any.
    pub sql: Option<String>,
    pub attachment_id: Option<String>,
}

/// Query attachment wins over text attachment; anything else gets `fallback`.
pub fn classify(message: &RemoteMessage, fallback: &str) -> Classification {
    let attachment = message.primary_attachment();
    let attachment_id = attachment.and_then(|a| a.attachment_id.clone());

    if let Some(query) = attachment.and_then(|a| a.query.as_ref()) {
        return Classification {
            extracted_content: query.description.clone().unwrap_or_else(|| fallback.to_string()),
            is_query_response: true,
            sql: query.query.clone().filter(|sql| !sql.trim().is_empty()),
            attachment_id,
        };
    }

    if let Some(content) = attachment
        .and_then(|a| a.text.as_ref())
        .and_then(|t| t.content.clone())
    {
        return Classification {
            extracted_content: content,
            is_query_response: false,
            sql: None,
            attachment_id,
        };
    }

    Classification {
        extracted_content: fallback.to_string(),
        is_query_response: false,
        sql: None,
        attachment_id,
    }
}
