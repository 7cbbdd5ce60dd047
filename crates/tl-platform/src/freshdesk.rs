// SPDX-License-Identifier: MIT OR Apache-2.0
//! Freshdesk REST adapter.
//!
//! Wire types model the subset of the Freshdesk v2 API the pipeline needs:
//! paged ticket listings with `updated_since`, single tickets with
//! conversations, and solution (KB) articles.  Rate limits are observed
//! from response headers; 429s are retried in-adapter with the
//! server-indicated `Retry-After` or jittered exponential backoff.

use crate::{
    AdapterCredentials, DescriptorPage, ObjectDescriptor, PlatformAdapter, RateLimits,
    RawArticle, RawAttachment, RawConversation, RawTicket, TicketBundle, backoff_delay,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tl_core::{ObjectType, Priority, TicketStatus};
use tl_error::{ErrorCode, ServiceError};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Default Retry-After when the server sends a bare 429.
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(5);
/// Backoff cap for retried requests.
const BACKOFF_CAP_MS: u64 = 60_000;
/// Retries spent on 429/5xx before surfacing the error.
const RETRY_BUDGET: u32 = 3;
/// Page size requested from listings.
const PER_PAGE: usize = 100;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct WireTicket {
    id: u64,
    #[serde(default)]
    subject: Option<String>,
    #[serde(default)]
    description_text: Option<String>,
    #[serde(default)]
    description: Option<String>,
    status: i64,
    priority: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(rename = "type", default)]
    ticket_type: Option<String>,
    #[serde(default)]
    responder_id: Option<u64>,
    #[serde(default)]
    requester_id: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct WireConversation {
    #[serde(default)]
    body_text: Option<String>,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    user_id: Option<u64>,
    created_at: DateTime<Utc>,
    #[serde(default)]
    private: bool,
    #[serde(default)]
    attachments: Vec<WireAttachment>,
}

#[derive(Debug, Deserialize)]
struct WireAttachment {
    name: String,
    #[serde(default)]
    content_type: Option<String>,
    #[serde(default)]
    size: u64,
    attachment_url: String,
}

#[derive(Debug, Deserialize)]
struct WireArticle {
    id: u64,
    title: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    category_name: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

fn map_status(raw: i64) -> TicketStatus {
    // Freshdesk status codes: 2 open, 3 pending, 4 resolved, 5 closed.
    match raw {
        3 => TicketStatus::Pending,
        4 => TicketStatus::Resolved,
        5 => TicketStatus::Closed,
        _ => TicketStatus::Open,
    }
}

impl WireTicket {
    fn into_raw(self) -> RawTicket {
        RawTicket {
            original_id: self.id.to_string(),
            subject: self.subject.unwrap_or_default(),
            description: self
                .description_text
                .or(self.description)
                .unwrap_or_default(),
            status: map_status(self.status),
            priority: Priority::new(self.priority),
            created_at: self.created_at.timestamp(),
            updated_at: self.updated_at.timestamp(),
            tags: self.tags,
            category: self.ticket_type,
            assignee_id: self.responder_id.map(|v| v.to_string()),
            requester_id: self.requester_id.map(|v| v.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

/// Freshdesk v2 API client.
pub struct FreshdeskAdapter {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    limits: RateLimits,
    semaphore: Arc<Semaphore>,
}

impl FreshdeskAdapter {
    /// Build an adapter from credentials.
    pub fn new(credentials: AdapterCredentials) -> Result<Self, ServiceError> {
        let limits = RateLimits {
            requests_per_minute: 50,
            burst: 10,
            concurrent_max: 5,
        };
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| {
                ServiceError::new(ErrorCode::Internal, "failed to build http client")
                    .with_source(e)
            })?;
        Ok(Self {
            client,
            base_url: credentials.base_url.trim_end_matches('/').to_string(),
            api_key: credentials.api_key,
            limits,
            semaphore: Arc::new(Semaphore::new(limits.concurrent_max)),
        })
    }

    /// GET `path` with auth, concurrency limiting, and 429/5xx retries.
    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<T, ServiceError> {
        let _permit = self.semaphore.acquire().await.map_err(|_| {
            ServiceError::new(ErrorCode::Internal, "adapter semaphore closed")
        })?;

        let url = format!("{}{path}", self.base_url);
        let mut attempt: u32 = 0;
        loop {
            let response = self
                .client
                .get(&url)
                .basic_auth(&self.api_key, Some("X"))
                .send()
                .await;

            let response = match response {
                Ok(r) => r,
                Err(e) => {
                    if attempt < RETRY_BUDGET {
                        let delay = backoff_delay(attempt, 500, BACKOFF_CAP_MS);
                        warn!(url = %url, attempt, "network error, retrying");
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }
                    let code = if e.is_timeout() {
                        ErrorCode::UpstreamTimeout
                    } else {
                        ErrorCode::TransientNetwork
                    };
                    return Err(ServiceError::new(code, "freshdesk request failed")
                        .with_context("url", &url)
                        .with_source(e));
                }
            };

            let status = response.status();
            if status.is_success() {
                return response.json::<T>().await.map_err(|e| {
                    ServiceError::new(ErrorCode::TransientNetwork, "freshdesk body decode failed")
                        .with_context("url", &url)
                        .with_source(e)
                });
            }

            match status.as_u16() {
                429 => {
                    if attempt >= RETRY_BUDGET {
                        return Err(ServiceError::new(
                            ErrorCode::RateLimited,
                            "freshdesk rate limit held past the retry budget",
                        )
                        .with_context("url", &url)
                        .with_context("attempts", attempt + 1));
                    }
                    let wait = retry_after(&response).unwrap_or(DEFAULT_RETRY_AFTER);
                    debug!(url = %url, wait_secs = wait.as_secs(), attempt, "429, backing off");
                    tokio::time::sleep(wait + backoff_delay(attempt, 250, BACKOFF_CAP_MS)).await;
                    attempt += 1;
                }
                401 | 403 => {
                    return Err(ServiceError::new(
                        ErrorCode::AuthFailure,
                        "freshdesk rejected the api key",
                    )
                    .with_context("status", status.as_u16()));
                }
                s if (500..600).contains(&s) => {
                    if attempt >= RETRY_BUDGET {
                        return Err(ServiceError::new(
                            ErrorCode::PermanentServerError,
                            "freshdesk 5xx past the retry budget",
                        )
                        .with_context("status", s)
                        .with_context("url", &url));
                    }
                    let delay = backoff_delay(attempt, 500, BACKOFF_CAP_MS);
                    warn!(url = %url, status = s, attempt, "5xx, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                s => {
                    return Err(ServiceError::new(
                        ErrorCode::PermanentClientError,
                        "freshdesk rejected the request",
                    )
                    .with_context("status", s)
                    .with_context("url", &url));
                }
            }
        }
    }
}

fn retry_after(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[async_trait]
impl PlatformAdapter for FreshdeskAdapter {
    async fn list_updated(
        &self,
        since: DateTime<Utc>,
        page_cursor: Option<&str>,
    ) -> Result<DescriptorPage, ServiceError> {
        let page: usize = page_cursor.and_then(|c| c.parse().ok()).unwrap_or(1);
        let path = format!(
            "/api/v2/tickets?updated_since={}&order_by=updated_at&order_type=asc&page={page}&per_page={PER_PAGE}",
            since.to_rfc3339()
        );
        let tickets: Vec<WireTicket> = self.get_json(&path).await?;
        let exhausted = tickets.len() < PER_PAGE;
        let items = tickets
            .into_iter()
            .map(|t| ObjectDescriptor {
                original_id: t.id.to_string(),
                object_type: ObjectType::Ticket,
                updated_at: t.updated_at.timestamp(),
            })
            .collect();
        Ok(DescriptorPage {
            items,
            next_cursor: (!exhausted).then(|| (page + 1).to_string()),
        })
    }

    async fn list_kb(&self, page_cursor: Option<&str>) -> Result<DescriptorPage, ServiceError> {
        let page: usize = page_cursor.and_then(|c| c.parse().ok()).unwrap_or(1);
        let path = format!("/api/v2/solutions/articles?page={page}&per_page={PER_PAGE}");
        let articles: Vec<WireArticle> = self.get_json(&path).await?;
        let exhausted = articles.len() < PER_PAGE;
        let items = articles
            .into_iter()
            .map(|a| ObjectDescriptor {
                original_id: a.id.to_string(),
                object_type: ObjectType::KbArticle,
                updated_at: a.updated_at.timestamp(),
            })
            .collect();
        Ok(DescriptorPage {
            items,
            next_cursor: (!exhausted).then(|| (page + 1).to_string()),
        })
    }

    async fn fetch_ticket(&self, id: &str) -> Result<TicketBundle, ServiceError> {
        let ticket: WireTicket = self.get_json(&format!("/api/v2/tickets/{id}")).await?;
        let conversations: Vec<WireConversation> = self
            .get_json(&format!("/api/v2/tickets/{id}/conversations"))
            .await?;

        let mut attachments = Vec::new();
        let conversations = conversations
            .into_iter()
            .map(|c| {
                for a in &c.attachments {
                    attachments.push(RawAttachment {
                        name: a.name.clone(),
                        mime: a
                            .content_type
                            .clone()
                            .unwrap_or_else(|| "application/octet-stream".into()),
                        size: a.size,
                        external_url: a.attachment_url.clone(),
                    });
                }
                RawConversation {
                    body: c.body_text.or(c.body).unwrap_or_default(),
                    author_id: c.user_id.map(|v| v.to_string()),
                    created_at: c.created_at.timestamp(),
                    public: !c.private,
                }
            })
            .collect();

        Ok(TicketBundle {
            ticket: ticket.into_raw(),
            conversations,
            attachments,
        })
    }

    async fn fetch_kb(&self, id: &str) -> Result<RawArticle, ServiceError> {
        let article: WireArticle = self
            .get_json(&format!("/api/v2/solutions/articles/{id}"))
            .await?;
        Ok(RawArticle {
            original_id: article.id.to_string(),
            title: article.title,
            body: article.description.unwrap_or_default(),
            category: article.category_name,
            tags: article.tags,
            created_at: article.created_at.timestamp(),
            updated_at: article.updated_at.timestamp(),
        })
    }

    fn rate_limits(&self) -> RateLimits {
        self.limits
    }

    fn platform(&self) -> &str {
        "freshdesk"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, path_regex, query_param};
    use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

    fn adapter(server: &MockServer) -> FreshdeskAdapter {
        FreshdeskAdapter::new(AdapterCredentials {
            base_url: server.uri(),
            api_key: "key".into(),
        })
        .unwrap()
    }

    fn ticket_json(id: u64, updated: &str) -> serde_json::Value {
        serde_json::json!({
            "id": id,
            "subject": format!("Ticket {id}"),
            "description_text": "Printer on fire",
            "status": 2,
            "priority": 3,
            "created_at": "2025-05-01T10:00:00Z",
            "updated_at": updated,
            "tags": ["hardware"],
            "type": "incident",
            "responder_id": 9,
            "requester_id": 7
        })
    }

    #[tokio::test]
    async fn lists_tickets_and_pages() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v2/tickets"))
            .and(query_param("page", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                ticket_json(1, "2025-06-01T00:00:00Z"),
                ticket_json(2, "2025-06-02T00:00:00Z"),
            ])))
            .mount(&server)
            .await;

        let page = adapter(&server)
            .list_updated(Utc::now(), None)
            .await
            .unwrap();
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].original_id, "1");
        assert_eq!(page.items[0].object_type, ObjectType::Ticket);
        // Short page → listing exhausted.
        assert!(page.next_cursor.is_none());
    }

    #[tokio::test]
    async fn fetches_ticket_with_conversations_and_attachments() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v2/tickets/42"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(ticket_json(42, "2025-06-01T00:00:00Z")),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v2/tickets/42/conversations"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {
                    "body_text": "We tried turning it off",
                    "user_id": 7,
                    "created_at": "2025-05-01T11:00:00Z",
                    "private": false,
                    "attachments": [{
                        "name": "log.txt",
                        "content_type": "text/plain",
                        "size": 128,
                        "attachment_url": "https://cdn.example.com/log.txt"
                    }]
                }
            ])))
            .mount(&server)
            .await;

        let bundle = adapter(&server).fetch_ticket("42").await.unwrap();
        assert_eq!(bundle.ticket.original_id, "42");
        assert_eq!(bundle.ticket.status, TicketStatus::Open);
        assert_eq!(bundle.ticket.priority, Priority::new(3));
        assert_eq!(bundle.conversations.len(), 1);
        assert!(bundle.conversations[0].public);
        assert_eq!(bundle.attachments.len(), 1);
        assert_eq!(bundle.attachments[0].name, "log.txt");
    }

    #[tokio::test]
    async fn lists_kb_articles() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v2/solutions/articles"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([{
                "id": 5,
                "title": "How to request a refund",
                "created_at": "2025-01-01T00:00:00Z",
                "updated_at": "2025-02-01T00:00:00Z"
            }])))
            .mount(&server)
            .await;

        let page = adapter(&server).list_kb(None).await.unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].object_type, ObjectType::KbArticle);
        assert!(page.next_cursor.is_none());
    }

    #[tokio::test]
    async fn fetches_kb_article() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v2/solutions/articles/5"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": 5,
                "title": "How to request a refund",
                "description": "<p>Open billing…</p>",
                "category_name": "billing",
                "tags": ["refund"],
                "created_at": "2025-01-01T00:00:00Z",
                "updated_at": "2025-02-01T00:00:00Z"
            })))
            .mount(&server)
            .await;

        let article = adapter(&server).fetch_kb("5").await.unwrap();
        assert_eq!(article.original_id, "5");
        assert_eq!(article.category.as_deref(), Some("billing"));
    }

    /// Responds 429 with Retry-After for the first `fail` calls, then 200.
    struct FlakyRateLimit {
        remaining: std::sync::atomic::AtomicU32,
    }

    impl Respond for FlakyRateLimit {
        fn respond(&self, _: &Request) -> ResponseTemplate {
            use std::sync::atomic::Ordering;
            if self
                .remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_sub(1))
                .is_ok()
            {
                ResponseTemplate::new(429).insert_header("Retry-After", "1")
            } else {
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!([ticket_json(1, "2025-06-01T00:00:00Z")]))
            }
        }
    }

    #[tokio::test]
    async fn retries_through_rate_limits() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/api/v2/tickets$"))
            .respond_with(FlakyRateLimit {
                remaining: std::sync::atomic::AtomicU32::new(2),
            })
            .mount(&server)
            .await;

        let started = std::time::Instant::now();
        let page = adapter(&server)
            .list_updated(Utc::now(), None)
            .await
            .unwrap();
        assert_eq!(page.items.len(), 1);
        // Two 429s with Retry-After: 1 each → at least ~2s of waiting.
        assert!(started.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test]
    async fn auth_failure_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v2/tickets/1"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let err = adapter(&server).fetch_ticket("1").await.unwrap_err();
        assert_eq!(err.code, ErrorCode::AuthFailure);
    }

    #[tokio::test]
    async fn persistent_5xx_becomes_permanent_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v2/tickets/1"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = adapter(&server).fetch_ticket("1").await.unwrap_err();
        assert_eq!(err.code, ErrorCode::PermanentServerError);
    }

    #[tokio::test]
    async fn other_4xx_is_permanent_client_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v2/tickets/1"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let err = adapter(&server).fetch_ticket("1").await.unwrap_err();
        assert_eq!(err.code, ErrorCode::PermanentClientError);
    }

    #[test]
    fn status_mapping() {
        assert_eq!(map_status(2), TicketStatus::Open);
        assert_eq!(map_status(3), TicketStatus::Pending);
        assert_eq!(map_status(4), TicketStatus::Resolved);
        assert_eq!(map_status(5), TicketStatus::Closed);
        assert_eq!(map_status(99), TicketStatus::Open);
    }
}
