//! Transport header parsing for thread continuity

use serde::{Deserialize, Serialize};

/// Normalised `In-Reply-To` / `References` headers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadHeaders {
    pub in_reply_to: Option<String>,
    pub references: Vec<String>,
}

impl ThreadHeaders {
    /// The id that starts the conversation, if the headers name one
    pub fn root_id(&self) -> Option<&str> {
        self.references
            .first()
            .or(self.in_reply_to.as_ref())
            .map(String::as_str)
    }
}

/// Strip angle brackets and surrounding whitespace from a message id
pub fn parse_message_id(raw: &str) -> Option<String> {
    let id = raw.trim().trim_start_matches('<').trim_end_matches('>').trim();
    if id.is_empty() {
        None
    } else {
        Some(id.to_string())
    }
}

/// Parse raw header values. Missing headers yield `None` / an empty list.
pub fn parse_headers(in_reply_to: Option<&str>, references: Option<&str>) -> ThreadHeaders {
    let in_reply_to = in_reply_to
        .and_then(|value| value.split_whitespace().next())
        .and_then(parse_message_id);

    let references = references
        .map(|value| value.split_whitespace().filter_map(parse_message_id).collect())
        .unwrap_or_default();

    ThreadHeaders {
        in_reply_to,
        references,
    }
}
