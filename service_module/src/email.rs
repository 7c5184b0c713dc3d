use chrono::{DateTime, Utc};

/// One inbound webhook delivery, normalized. Immutable and never persisted;
/// everything durable lives in the personalization store.
#[derive(Debug, Clone)]
pub struct IncomingEmail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
    pub message_id: Option<String>,
    pub in_reply_to: Option<String>,
    pub references: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl IncomingEmail {
    /// Stable identity for logging and correlation. Falls back to a hash of
    /// the delivery when the sending client omitted a Message-ID.
    pub fn delivery_key(&self) -> String {
        match self.message_id.as_deref() {
            Some(id) => id.to_string(),
            None => format!(
                "{:x}",
                md5::compute(format!("{}\n{}\n{}", self.from, self.subject, self.body))
            ),
        }
    }
}

/// An outbound reply, derived from an [`IncomingEmail`] plus generated
/// content by the thread formatter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
    pub in_reply_to: Option<String>,
    pub references: Vec<String>,
}
