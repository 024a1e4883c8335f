//! Classification key derivation for scanned messages

use crate::models::{Address, Envelope, GroupField};

/// Key used when the grouped address list is empty
pub const NO_ADDRESS: &str = "(none)";

/// Marker appended to truncated keys
pub const ELLIPSIS: char = '…';

/// Derives the grouping key of a message for one header field
#[derive(Debug, Clone)]
pub struct Classifier {
    field: GroupField,
    subject_max_chars: usize,
}

impl Classifier {
    pub fn new(field: GroupField, subject_max_chars: usize) -> Self {
        Self {
            field,
            subject_max_chars,
        }
    }

    /// Classification key: `mailbox@host` of the first address, `(none)`,
    /// or the (possibly truncated) subject.
    pub fn classify(&self, envelope: &Envelope) -> String {
        match self.field {
            GroupField::From => first_address_key(&envelope.from),
            GroupField::To => first_address_key(&envelope.to),
            GroupField::Subject => {
                let subject = envelope
                    .subject
                    .as_deref()
                    .map(decode_header_value)
                    .unwrap_or_default();
                truncate_with_ellipsis(&subject, self.subject_max_chars)
            }
        }
    }

    /// Case-insensitive containment test against the classification key.
    /// `needle_lower` must already be lower-cased.
    pub fn matches(&self, envelope: &Envelope, needle_lower: &str) -> bool {
        self.classify(envelope).to_lowercase().contains(needle_lower)
    }
}

fn first_address_key(addresses: &[Address]) -> String {
    addresses
        .first()
        .and_then(render_address)
        .unwrap_or_else(|| NO_ADDRESS.to_string())
}

/// Render an address as `mailbox@host`
pub fn render_address(address: &Address) -> Option<String> {
    match (address.mailbox.as_deref(), address.host.as_deref()) {
        (Some(mailbox), Some(host)) if !mailbox.is_empty() && !host.is_empty() => {
            Some(format!("{}@{}", mailbox, host))
        }
        (Some(mailbox), _) if !mailbox.is_empty() => Some(mailbox.to_string()),
        _ => None,
    }
}

/// Keep strings of up to `max_chars` characters as they are; longer ones keep
/// `max_chars - 3` characters followed by an ellipsis.
pub fn truncate_with_ellipsis(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(max_chars.saturating_sub(3)).collect();
        out.push(ELLIPSIS);
        out
    }
}

/// Decode RFC 2047 encoded words in any charset mailparse knows. Non-ASCII
/// input and input that does not parse as a header value come back unchanged.
pub fn decode_header_value(raw: &str) -> String {
    // mailparse reads unencoded bytes as Latin-1, which would mangle raw UTF-8
    if !raw.contains("=?") || !raw.is_ascii() {
        return raw.to_string();
    }

    let fake_header = format!("X: {}", raw);
    match mailparse::parse_header(fake_header.as_bytes()) {
        Ok((header, _)) => header.get_value(),
        Err(_) => raw.to_string(),
    }
}
