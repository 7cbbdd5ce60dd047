// SPDX-License-Identifier: MIT OR Apache-2.0
//! Scripted in-process adapter for tests and offline runs.
//!
//! Holds a fixed set of ticket bundles and KB articles, pages them out in
//! `updated_at` order, and can inject a bounded run of typed failures
//! before succeeding (for retry-path tests).

use crate::{
    DescriptorPage, ObjectDescriptor, PlatformAdapter, RateLimits, RawArticle, TicketBundle,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use tl_core::ObjectType;
use tl_error::{ErrorCode, ServiceError};

/// In-memory adapter with scripted content.
pub struct MockAdapter {
    tickets: BTreeMap<String, TicketBundle>,
    articles: BTreeMap<String, RawArticle>,
    page_size: usize,
    limits: RateLimits,
    /// Errors injected before list/fetch calls succeed.
    inject: Mutex<Vec<ErrorCode>>,
    list_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
    injected_count: AtomicU32,
}

impl MockAdapter {
    /// Empty adapter with a page size of 100.
    pub fn new() -> Self {
        Self {
            tickets: BTreeMap::new(),
            articles: BTreeMap::new(),
            page_size: 100,
            limits: RateLimits {
                requests_per_minute: 1_000,
                burst: 100,
                concurrent_max: 5,
            },
            inject: Mutex::new(Vec::new()),
            list_calls: AtomicUsize::new(0),
            fetch_calls: AtomicUsize::new(0),
            injected_count: AtomicU32::new(0),
        }
    }

    /// Add a ticket bundle.
    pub fn with_ticket(mut self, bundle: TicketBundle) -> Self {
        self.tickets
            .insert(bundle.ticket.original_id.clone(), bundle);
        self
    }

    /// Add a KB article.
    pub fn with_article(mut self, article: RawArticle) -> Self {
        self.articles.insert(article.original_id.clone(), article);
        self
    }

    /// Shrink the listing page size (to exercise paging).
    pub fn with_page_size(mut self, size: usize) -> Self {
        self.page_size = size.max(1);
        self
    }

    /// Queue typed errors returned (in order) by upcoming calls before any
    /// succeed.
    pub fn inject_errors(&self, codes: impl IntoIterator<Item = ErrorCode>) {
        let mut guard = self.inject.lock().expect("inject lock poisoned");
        guard.extend(codes);
    }

    /// Number of list calls observed.
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Number of fetch calls observed.
    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    /// How many injected errors have fired so far.
    pub fn injected_errors_fired(&self) -> u32 {
        self.injected_count.load(Ordering::SeqCst)
    }

    fn next_injected(&self) -> Option<ServiceError> {
        let mut guard = self.inject.lock().expect("inject lock poisoned");
        if guard.is_empty() {
            return None;
        }
        let code = guard.remove(0);
        self.injected_count.fetch_add(1, Ordering::SeqCst);
        Some(ServiceError::new(code, "injected test failure"))
    }

    fn ticket_descriptors(&self, since: i64) -> Vec<ObjectDescriptor> {
        let mut items: Vec<ObjectDescriptor> = self
            .tickets
            .values()
            .filter(|b| b.ticket.updated_at >= since)
            .map(|b| ObjectDescriptor {
                original_id: b.ticket.original_id.clone(),
                object_type: ObjectType::Ticket,
                updated_at: b.ticket.updated_at,
            })
            .collect();
        items.sort_by(|a, b| {
            a.updated_at
                .cmp(&b.updated_at)
                .then_with(|| a.original_id.cmp(&b.original_id))
        });
        items
    }

    fn article_descriptors(&self) -> Vec<ObjectDescriptor> {
        let mut items: Vec<ObjectDescriptor> = self
            .articles
            .values()
            .map(|a| ObjectDescriptor {
                original_id: a.original_id.clone(),
                object_type: ObjectType::KbArticle,
                updated_at: a.updated_at,
            })
            .collect();
        items.sort_by(|a, b| {
            a.updated_at
                .cmp(&b.updated_at)
                .then_with(|| a.original_id.cmp(&b.original_id))
        });
        items
    }

    fn slice_page(all: Vec<ObjectDescriptor>, cursor: Option<&str>, size: usize) -> DescriptorPage {
        let offset: usize = cursor.and_then(|c| c.parse().ok()).unwrap_or(0);
        let items: Vec<ObjectDescriptor> = all.iter().skip(offset).take(size).cloned().collect();
        let next = offset + items.len();
        DescriptorPage {
            items,
            next_cursor: (next < all.len()).then(|| next.to_string()),
        }
    }
}

impl Default for MockAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PlatformAdapter for MockAdapter {
    async fn list_updated(
        &self,
        since: DateTime<Utc>,
        page_cursor: Option<&str>,
    ) -> Result<DescriptorPage, ServiceError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.next_injected() {
            return Err(err);
        }
        Ok(Self::slice_page(
            self.ticket_descriptors(since.timestamp()),
            page_cursor,
            self.page_size,
        ))
    }

    async fn list_kb(&self, page_cursor: Option<&str>) -> Result<DescriptorPage, ServiceError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.next_injected() {
            return Err(err);
        }
        Ok(Self::slice_page(
            self.article_descriptors(),
            page_cursor,
            self.page_size,
        ))
    }

    async fn fetch_ticket(&self, id: &str) -> Result<TicketBundle, ServiceError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.next_injected() {
            return Err(err);
        }
        self.tickets.get(id).cloned().ok_or_else(|| {
            ServiceError::new(ErrorCode::PermanentClientError, "no such ticket")
                .with_context("id", id)
        })
    }

    async fn fetch_kb(&self, id: &str) -> Result<RawArticle, ServiceError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.next_injected() {
            return Err(err);
        }
        self.articles.get(id).cloned().ok_or_else(|| {
            ServiceError::new(ErrorCode::PermanentClientError, "no such article")
                .with_context("id", id)
        })
    }

    fn rate_limits(&self) -> RateLimits {
        self.limits
    }

    fn platform(&self) -> &str {
        "freshdesk"
    }
}

/// Shorthand for a minimal ticket bundle used across test suites.
pub fn ticket_fixture(id: &str, subject: &str, body: &str, updated_at: i64) -> TicketBundle {
    use crate::{RawConversation, RawTicket};
    use tl_core::{Priority, TicketStatus};
    TicketBundle {
        ticket: RawTicket {
            original_id: id.to_string(),
            subject: subject.to_string(),
            description: body.to_string(),
            status: TicketStatus::Open,
            priority: Priority::new(2),
            created_at: updated_at - 3600,
            updated_at,
            tags: Vec::new(),
            category: None,
            assignee_id: None,
            requester_id: None,
        },
        conversations: vec![RawConversation {
            body: body.to_string(),
            author_id: Some("7".into()),
            created_at: updated_at - 1800,
            public: true,
        }],
        attachments: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[tokio::test]
    async fn pages_in_updated_at_order() {
        let adapter = MockAdapter::new()
            .with_ticket(ticket_fixture("b", "late", "x", 300))
            .with_ticket(ticket_fixture("a", "early", "x", 100))
            .with_ticket(ticket_fixture("c", "middle", "x", 200))
            .with_page_size(2);

        let since = Utc.timestamp_opt(0, 0).unwrap();
        let first = adapter.list_updated(since, None).await.unwrap();
        assert_eq!(first.items.len(), 2);
        assert_eq!(first.items[0].original_id, "a");
        assert_eq!(first.items[1].original_id, "c");

        let second = adapter
            .list_updated(since, first.next_cursor.as_deref())
            .await
            .unwrap();
        assert_eq!(second.items.len(), 1);
        assert_eq!(second.items[0].original_id, "b");
        assert!(second.next_cursor.is_none());
    }

    #[tokio::test]
    async fn since_filters_old_objects() {
        let adapter = MockAdapter::new()
            .with_ticket(ticket_fixture("old", "old", "x", 100))
            .with_ticket(ticket_fixture("new", "new", "x", 500));
        let since = Utc.timestamp_opt(200, 0).unwrap();
        let page = adapter.list_updated(since, None).await.unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].original_id, "new");
    }

    #[tokio::test]
    async fn ties_break_on_original_id() {
        let adapter = MockAdapter::new()
            .with_ticket(ticket_fixture("z", "z", "x", 100))
            .with_ticket(ticket_fixture("a", "a", "x", 100));
        let since = Utc.timestamp_opt(0, 0).unwrap();
        let page = adapter.list_updated(since, None).await.unwrap();
        assert_eq!(page.items[0].original_id, "a");
        assert_eq!(page.items[1].original_id, "z");
    }

    #[tokio::test]
    async fn kb_articles_are_listed_separately() {
        use crate::RawArticle;
        let adapter = MockAdapter::new()
            .with_ticket(ticket_fixture("t1", "ticket", "x", 100))
            .with_article(RawArticle {
                original_id: "kb1".into(),
                title: "Refund how-to".into(),
                body: "steps".into(),
                category: Some("billing".into()),
                tags: vec![],
                created_at: 10,
                updated_at: 20,
            });

        let since = Utc.timestamp_opt(0, 0).unwrap();
        let tickets = adapter.list_updated(since, None).await.unwrap();
        assert!(tickets.items.iter().all(|d| d.object_type == ObjectType::Ticket));

        let kb = adapter.list_kb(None).await.unwrap();
        assert_eq!(kb.items.len(), 1);
        assert_eq!(kb.items[0].object_type, ObjectType::KbArticle);
    }

    #[tokio::test]
    async fn injected_errors_fire_in_order() {
        let adapter = MockAdapter::new().with_ticket(ticket_fixture("1", "s", "b", 100));
        adapter.inject_errors([ErrorCode::RateLimited, ErrorCode::TransientNetwork]);

        let e1 = adapter.fetch_ticket("1").await.unwrap_err();
        assert_eq!(e1.code, ErrorCode::RateLimited);
        let e2 = adapter.fetch_ticket("1").await.unwrap_err();
        assert_eq!(e2.code, ErrorCode::TransientNetwork);
        adapter.fetch_ticket("1").await.unwrap();
        assert_eq!(adapter.injected_errors_fired(), 2);
        assert_eq!(adapter.fetch_calls(), 3);
    }

    #[tokio::test]
    async fn unknown_ticket_is_a_client_error() {
        let adapter = MockAdapter::new();
        let err = adapter.fetch_ticket("missing").await.unwrap_err();
        assert_eq!(err.code, ErrorCode::PermanentClientError);
    }
}
