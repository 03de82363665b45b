//! Provider message normalisation

use super::provider::ProviderMessage;
use crate::threads::{parse_headers, parse_message_id};
use casemail_common::types::{normalize_address, Importance, MailboxRef};
use casemail_storage::models::NewMessage;

fn addresses(raw: &[String]) -> Vec<String> {
    raw.iter()
        .map(|a| normalize_address(a))
        .filter(|a| !a.is_empty())
        .collect()
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Turn a provider message into a storable record.
///
/// Returns `None` for removed messages and messages without a provider id.
pub fn normalize_message(mailbox: MailboxRef, message: ProviderMessage) -> Option<NewMessage> {
    if message.removed {
        return None;
    }
    let provider_message_id = non_blank(Some(message.id.as_str()))?;

    let headers = parse_headers(message.in_reply_to.as_deref(), message.references.as_deref());
    let internet_message_id = message
        .internet_message_id
        .as_deref()
        .and_then(parse_message_id);

    // fall back to header continuity when the provider sends no thread key
    let conversation_id = non_blank(message.conversation_id.as_deref())
        .or_else(|| headers.root_id().map(str::to_string))
        .or_else(|| internet_message_id.clone())
        .unwrap_or_else(|| provider_message_id.clone());

    Some(NewMessage {
        firm_id: mailbox.firm_id,
        user_id: mailbox.user_id,
        provider_message_id,
        conversation_id,
        internet_message_id,
        in_reply_to: headers.in_reply_to,
        reference_ids: headers.references,
        subject: message.subject,
        body_preview: message.body_preview,
        from_address: message
            .from
            .as_deref()
            .map(normalize_address)
            .filter(|a| !a.is_empty()),
        to_addresses: addresses(&message.to),
        cc_addresses: addresses(&message.cc),
        bcc_addresses: addresses(&message.bcc),
        received_at: message.received_at,
        sent_at: message.sent_at,
        has_attachments: message.has_attachments,
        importance: message
            .importance
            .as_deref()
            .map(Importance::parse)
            .unwrap_or_default(),
        is_read: message.is_read,
    })
}

/// Normalise a page, dropping removed messages
pub fn normalize_page(mailbox: MailboxRef, messages: Vec<ProviderMessage>) -> Vec<NewMessage> {
    messages
        .into_iter()
        .filter_map(|m| normalize_message(mailbox, m))
        .collect()
}
