//! Inbound address classification.
//!
//! Every recognized mailbox belongs to one of two products: the direct
//! assistant mailbox, or a per-user `reply+<token>` mailbox for newsletter
//! feedback. Decoding is purely syntactic; whether a decoded token names a
//! real user is the store's call, so that malformed and unknown tokens
//! surface as distinct failures.

/// Routing identity, constructed once from configuration and passed into
/// the router and the thread formatter. Nothing here reads ambient state.
#[derive(Debug, Clone)]
pub struct RouteConfig {
    pub service_domain: String,
    pub assistant_local_parts: Vec<String>,
    pub reply_prefix: String,
}

impl RouteConfig {
    pub fn new(
        service_domain: &str,
        assistant_local_parts: impl IntoIterator<Item = String>,
        reply_prefix: &str,
    ) -> Self {
        Self {
            service_domain: service_domain.trim().to_ascii_lowercase(),
            assistant_local_parts: assistant_local_parts
                .into_iter()
                .map(|part| part.trim().to_ascii_lowercase())
                .filter(|part| !part.is_empty())
                .collect(),
            reply_prefix: reply_prefix.trim().to_ascii_lowercase(),
        }
    }

    /// The mailbox the assistant answers from when the inbound recipient
    /// field carried no recognizable service address.
    pub fn primary_assistant_address(&self) -> String {
        let local = self
            .assistant_local_parts
            .first()
            .map(String::as_str)
            .unwrap_or("assistant");
        format!("{}@{}", local, self.service_domain)
    }

    /// Encode a user id into its feedback reply address. The decode side
    /// lives in [`AddressRouter::classify`]; the two round-trip.
    pub fn encode_reply_address(&self, user_id: &str) -> String {
        format!("{}+{}@{}", self.reply_prefix, user_id, self.service_domain)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecipientRoute {
    /// The direct Q&A assistant mailbox.
    Assistant,
    /// A newsletter feedback mailbox; the token is handed to the store as-is.
    FeedReply { user_id: String },
    /// Not one of our mailboxes.
    Unrecognized,
}

#[derive(Debug, Clone)]
pub struct AddressRouter {
    config: RouteConfig,
}

impl AddressRouter {
    pub fn new(config: RouteConfig) -> Self {
        Self { config }
    }

    /// Classify the raw `to` field of an inbound email. The field may carry
    /// display names, angle brackets, and several recipients; the first
    /// address on the service domain decides.
    pub fn classify(&self, to_field: &str) -> RecipientRoute {
        for address in extract_addresses(to_field) {
            let Some((local, domain)) = address.split_once('@') else {
                continue;
            };
            if !domain.eq_ignore_ascii_case(&self.config.service_domain) {
                continue;
            }
            if let Some(token) = self.decode_reply_local(local) {
                return RecipientRoute::FeedReply { user_id: token };
            }
            if self.is_assistant_local(local) {
                return RecipientRoute::Assistant;
            }
        }
        RecipientRoute::Unrecognized
    }

    fn is_assistant_local(&self, local: &str) -> bool {
        self.config
            .assistant_local_parts
            .iter()
            .any(|part| part.eq_ignore_ascii_case(local))
    }

    /// `reply+<token>` → `<token>`, verbatim. Only non-emptiness is checked
    /// here; existence is a store lookup.
    fn decode_reply_local(&self, local: &str) -> Option<String> {
        let prefix = &self.config.reply_prefix;
        let head = local.get(..prefix.len())?;
        if !head.eq_ignore_ascii_case(prefix) {
            return None;
        }
        let token = local[prefix.len()..].strip_prefix('+')?;
        if token.is_empty() {
            return None;
        }
        Some(token.to_string())
    }
}

/// Pull bare addresses out of a raw recipient field. Angle-bracketed
/// addresses win over loose tokens, mirroring how display names are
/// written; local-part case is preserved because reply tokens are
/// case-sensitive.
pub fn extract_addresses(raw: &str) -> Vec<String> {
    let mut addresses = Vec::new();
    let mut seen = std::collections::HashSet::new();

    let mut remainder = raw;
    while let Some(start) = remainder.find('<') {
        let after_start = &remainder[start + 1..];
        let Some(end) = after_start.find('>') else {
            break;
        };
        let inside = after_start[..end].trim();
        if inside.contains('@') && seen.insert(inside.to_string()) {
            addresses.push(inside.to_string());
        }
        remainder = &after_start[end + 1..];
    }

    for token in raw.split(|ch| matches!(ch, ',' | ';' | ' ' | '\t' | '\n' | '\r')) {
        let token = token.trim_matches(|ch: char| matches!(ch, '<' | '>' | '"' | '\''));
        if token.contains('@') && !token.is_empty() && seen.insert(token.to_string()) {
            addresses.push(token.to_string());
        }
    }

    addresses
}

/// Light syntax check and canonical form for stored addresses. The `+` tag
/// is kept: it is part of the registered identity here, never folded away.
pub fn normalize_email(raw: &str) -> Option<String> {
    let mut value = raw.trim();
    if let Some(stripped) = value.strip_prefix("mailto:") {
        value = stripped.trim();
    }
    value = value.trim_matches(|ch: char| matches!(ch, '<' | '>' | '"' | '\'' | ',' | ';'));
    if value.is_empty() || value.chars().any(char::is_whitespace) {
        return None;
    }
    let (local, domain) = value.split_once('@')?;
    if local.is_empty() || domain.is_empty() || domain.contains('@') {
        return None;
    }
    Some(value.to_ascii_lowercase())
}
