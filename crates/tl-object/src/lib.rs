// SPDX-License-Identifier: MIT OR Apache-2.0
//! Integrated-object builder.
//!
//! Turns raw platform records into canonical [`IntegratedObject`]s: strips
//! HTML, normalises whitespace, drops repeated signatures and quoted
//! blocks, merges conversations chronologically, computes the content
//! hash, and detects the content language from Unicode block ratios.

#![deny(unsafe_code)]

mod language;
mod text;

pub use language::detect_language;
pub use text::{normalize_whitespace, strip_html, strip_reply_noise};

use tl_core::{
    Attachment, IntegratedObject, ObjectType, Priority, TenantContext, TicketStatus,
    content_hash,
};
use tl_error::{ErrorCode, ServiceError};
use tl_platform::{RawArticle, TicketBundle};
use tracing::debug;

/// Separator placed between merged conversation messages.
const MESSAGE_SEPARATOR: &str = "\n---\n";

/// Build an integrated object from a fetched ticket bundle.
///
/// Conversations are ordered chronologically (stable on ties), cleaned,
/// deduplicated, and joined with `---` separators after the ticket
/// description.  Rejects the object with `ValidationFailure` when both the
/// subject and the merged body normalise to empty.
pub fn build_ticket(
    ctx: &TenantContext,
    bundle: &TicketBundle,
) -> Result<IntegratedObject, ServiceError> {
    let ticket = &bundle.ticket;
    let subject = normalize_whitespace(&strip_html(&ticket.subject));

    let mut conversations: Vec<_> = bundle.conversations.iter().collect();
    conversations.sort_by_key(|c| c.created_at);

    let mut messages: Vec<String> = Vec::with_capacity(conversations.len() + 1);
    let description = clean_message(&ticket.description);
    if !description.is_empty() {
        messages.push(description);
    }
    for conv in conversations {
        let cleaned = clean_message(&conv.body);
        // Platforms echo the same body on edits; keep the first occurrence.
        if !cleaned.is_empty() && !messages.contains(&cleaned) {
            messages.push(cleaned);
        }
    }

    let body_text = messages.join(MESSAGE_SEPARATOR);
    if subject.is_empty() && body_text.is_empty() {
        return Err(ServiceError::new(
            ErrorCode::ValidationFailure,
            "object has neither subject nor body after normalisation",
        )
        .with_context("original_id", &ticket.original_id));
    }

    let attachments: Vec<Attachment> = bundle
        .attachments
        .iter()
        .map(|a| Attachment {
            name: a.name.clone(),
            mime: a.mime.clone(),
            size: a.size,
            external_url: a.external_url.clone(),
            extracted_text: None,
        })
        .collect();
    let attachment_names: Vec<&str> = attachments.iter().map(|a| a.name.as_str()).collect();
    let message_refs: Vec<&str> = messages.iter().map(|m| m.as_str()).collect();
    let hash = content_hash(&subject, &message_refs, &attachment_names);

    let language = detect_language(&format!("{subject}\n{body_text}"));
    debug!(
        original_id = %ticket.original_id,
        language = language.as_str(),
        messages = messages.len(),
        "built integrated ticket"
    );

    Ok(IntegratedObject {
        tenant_id: ctx.tenant_id.clone(),
        platform: ctx.platform.clone(),
        object_type: ObjectType::Ticket,
        original_id: ticket.original_id.clone(),
        subject,
        body_text,
        attachments,
        status: ticket.status,
        priority: ticket.priority,
        created_at: ticket.created_at,
        updated_at: ticket.updated_at,
        tags: ticket.tags.clone(),
        category: ticket.category.clone(),
        assignee_id: ticket.assignee_id.clone(),
        requester_id: ticket.requester_id.clone(),
        language,
        content_hash: hash,
    })
}

/// Build an integrated object from a KB article.
pub fn build_article(
    ctx: &TenantContext,
    article: &RawArticle,
) -> Result<IntegratedObject, ServiceError> {
    let subject = normalize_whitespace(&strip_html(&article.title));
    let body_text = normalize_whitespace(&strip_html(&article.body));

    if subject.is_empty() && body_text.is_empty() {
        return Err(ServiceError::new(
            ErrorCode::ValidationFailure,
            "article has neither title nor body after normalisation",
        )
        .with_context("original_id", &article.original_id));
    }

    let messages: Vec<&str> = if body_text.is_empty() {
        vec![]
    } else {
        vec![body_text.as_str()]
    };
    let hash = content_hash(&subject, &messages, &[]);
    let language = detect_language(&format!("{subject}\n{body_text}"));

    Ok(IntegratedObject {
        tenant_id: ctx.tenant_id.clone(),
        platform: ctx.platform.clone(),
        object_type: ObjectType::KbArticle,
        original_id: article.original_id.clone(),
        subject,
        body_text,
        attachments: Vec::new(),
        status: TicketStatus::Resolved,
        priority: Priority::new(1),
        created_at: article.created_at,
        updated_at: article.updated_at,
        tags: article.tags.clone(),
        category: article.category.clone(),
        assignee_id: None,
        requester_id: None,
        language,
        content_hash: hash,
    })
}

/// Strip HTML, drop reply noise, and normalise one message body.
fn clean_message(raw: &str) -> String {
    normalize_whitespace(&strip_reply_noise(&strip_html(raw)))
}
