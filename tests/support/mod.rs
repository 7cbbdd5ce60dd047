// SPDX-License-Identifier: MIT OR Apache-2.0
//! Shared fixtures for the cross-crate integration suites.
#![allow(dead_code)]

use std::sync::Arc;
use tl_config::SearchTuning;
use tl_core::{TenantContext, TenantId};
use tl_embed::Embedder;
use tl_ingest::{MemoryJobStore, Orchestrator};
use tl_llm::TextGenerator;
use tl_llm::mock::{HashEmbedder, ScriptedGenerator};
use tl_platform::MockAdapter;
use tl_search::{LexicalReranker, SearchEngine};
use tl_summarize::{Summarizer, TemplateStore};
use tl_vector::{MemoryStore, VectorGateway};

/// A full in-process stack over mocks: scripted LLM, hash embeddings,
/// memory vector store, memory job store.
pub struct Stack {
    pub orchestrator: Orchestrator,
    pub engine: SearchEngine,
    pub gateway: VectorGateway,
    pub generator: Arc<ScriptedGenerator>,
    pub vectors: Arc<MemoryStore>,
}

pub fn tenant(id: &str) -> TenantContext {
    TenantContext::new(TenantId::new(id).unwrap(), "freshdesk")
}

/// A summary that passes the four-section validator.
pub fn good_summary(tag: &str) -> String {
    format!(
        "## Problem\nCustomer reported {tag}; the account at wedosoft.com was affected on \
         2025-06-01 and order 8841 is attached for reference in the thread.\n\
         ## Root Cause\nA billing worker treated a gateway timeout as a hard failure and \
         retried the charge, duplicating it.\n\
         ## Resolution\nThe duplicate was refunded and idempotency keys now guard every \
         charge request before retries run.\n\
         ## Insights\nReconcile gateway timeouts against transaction ids before retrying."
    )
}

pub fn stack(adapter: MockAdapter) -> Stack {
    let generator = Arc::new(ScriptedGenerator::new());
    let vectors = Arc::new(MemoryStore::new());
    let gateway = VectorGateway::new(vectors.clone());
    let embedder = Arc::new(Embedder::new(Arc::new(HashEmbedder::new(32)), "test-embed"));
    let summarizer = Arc::new(Summarizer::new(
        generator.clone() as Arc<dyn TextGenerator>,
        TemplateStore::builtin(),
    ));

    let orchestrator = Orchestrator::new(
        Arc::new(MemoryJobStore::new()),
        Arc::new(adapter),
        summarizer,
        embedder.clone(),
        gateway.clone(),
    );
    let engine = SearchEngine::new(
        gateway.clone(),
        embedder,
        None,
        Arc::new(LexicalReranker),
        SearchTuning::default(),
    );

    Stack {
        orchestrator,
        engine,
        gateway,
        generator,
        vectors,
    }
}
