// SPDX-License-Identifier: MIT OR Apache-2.0
//! Cross-tenant isolation: one tenant's ingest is invisible to another
//! tenant's searches, and unscoped filters never reach the store.

mod support;

use support::{good_summary, stack, tenant};
use tl_core::job::IngestScope;
use tl_core::query::{AnalyzedQuery, QueryConditions, QueryIntent, SearchStrategy};
use tl_error::ErrorCode;
use tl_llm::CancellationToken;
use tl_platform::MockAdapter;
use tl_platform::mock::ticket_fixture;
use tl_vector::{Filter, SearchQuery};

fn semantic_query(text: &str) -> AnalyzedQuery {
    AnalyzedQuery {
        intent: QueryIntent::SimpleSemantic,
        conditions: QueryConditions::default(),
        search_text: text.into(),
        strategy: SearchStrategy::SemanticFirst,
        confidence: 0.9,
    }
}

#[tokio::test]
async fn tenant_b_cannot_see_tenant_a_documents() {
    let adapter = MockAdapter::new().with_ticket(ticket_fixture(
        "77",
        "Billing duplicate charge",
        "Charged twice on Visa",
        100,
    ));
    let s = stack(adapter);
    s.generator.push_text(good_summary("a duplicate charge"));

    let acme = tenant("acme");
    let job = s
        .orchestrator
        .create_job(&acme, IngestScope::Full, None)
        .await
        .unwrap();
    s.orchestrator
        .run(job.job_id, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(s.vectors.len().await, 1);

    // Tenant A finds its own document.
    let outcome = s
        .engine
        .search(&acme, &semantic_query("duplicate charge refund"), 5, &CancellationToken::new())
        .await
        .unwrap();
    assert!(!outcome.hits.is_empty());

    // Tenant B, asking for semantically identical content, gets nothing:
    // the mandatory tenant filter keeps the shared collection partitioned.
    let globex = tenant("globex");
    let outcome = s
        .engine
        .search(&globex, &semantic_query("duplicate charge refund"), 5, &CancellationToken::new())
        .await
        .unwrap();
    // prevent_empty never resurrects a cross-tenant hit, because the
    // filtered candidate set itself is empty.
    assert!(outcome.hits.is_empty());
}

#[tokio::test]
async fn unscoped_filters_are_rejected_at_the_gateway() {
    let s = stack(MockAdapter::new());
    let acme = tenant("acme");

    let err = s
        .gateway
        .search(
            &acme,
            &SearchQuery::dense(vec![1.0, 0.0], Filter::default(), 5),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::MissingTenantFilter);

    let err = s
        .gateway
        .delete(&acme, &Filter::default())
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::MissingTenantFilter);
}

#[tokio::test]
async fn purge_removes_only_the_callers_tenant() {
    let adapter = MockAdapter::new().with_ticket(ticket_fixture("1", "Subject", "Body", 100));
    let s = stack(adapter);
    s.generator.push_text(good_summary("one"));

    let acme = tenant("acme");
    let job = s
        .orchestrator
        .create_job(&acme, IngestScope::Full, None)
        .await
        .unwrap();
    s.orchestrator
        .run(job.job_id, CancellationToken::new())
        .await
        .unwrap();

    // A purge scoped to another tenant deletes nothing.
    let globex = tenant("globex");
    let deleted = s
        .gateway
        .delete(&globex, &Filter::for_tenant(&globex))
        .await
        .unwrap();
    assert_eq!(deleted, 0);
    assert_eq!(s.vectors.len().await, 1);

    // The owner's purge removes the derived points.
    let deleted = s
        .gateway
        .delete(&acme, &Filter::for_tenant(&acme))
        .await
        .unwrap();
    assert_eq!(deleted, 1);
    assert_eq!(s.vectors.len().await, 0);
}
