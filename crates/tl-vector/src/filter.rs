// SPDX-License-Identifier: MIT OR Apache-2.0
//! Payload filter language.
//!
//! A structured predicate mirroring what payload-filtering vector stores
//! evaluate: a mandatory conjunction (`must`), soft preferences
//! (`should`), and negations (`must_not`) over match / match-any / range
//! conditions.

use serde::{Deserialize, Serialize};
use tl_core::TenantContext;

/// One filter condition over an indexed payload field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Condition {
    /// Field equals value.
    Match {
        /// Payload field.
        key: String,
        /// Expected value.
        value: serde_json::Value,
    },
    /// Field equals any of the values (`MatchAny` on keyword arrays).
    MatchAny {
        /// Payload field.
        key: String,
        /// Accepted values.
        values: Vec<serde_json::Value>,
    },
    /// Numeric range over an integer field.
    Range {
        /// Payload field.
        key: String,
        /// Inclusive lower bound.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        gte: Option<i64>,
        /// Inclusive upper bound.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        lte: Option<i64>,
    },
}

impl Condition {
    /// Equality shorthand.
    pub fn matches(key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Self::Match {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Match-any shorthand.
    pub fn any<V: Into<serde_json::Value>>(
        key: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Self::MatchAny {
            key: key.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Range shorthand.
    pub fn range(key: impl Into<String>, gte: Option<i64>, lte: Option<i64>) -> Self {
        Self::Range {
            key: key.into(),
            gte,
            lte,
        }
    }
}

/// A structured payload filter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    /// Mandatory conjunction.  Tenant and platform equality live here.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub must: Vec<Condition>,
    /// Soft preferences (affect scoring, not membership).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub should: Vec<Condition>,
    /// Negations.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub must_not: Vec<Condition>,
}

impl Filter {
    /// A filter pre-seeded with the mandatory tenant + platform conjunction.
    pub fn for_tenant(ctx: &TenantContext) -> Self {
        Self {
            must: vec![
                Condition::matches("tenant_id", ctx.tenant_id.as_str()),
                Condition::matches("platform", ctx.platform.as_str()),
            ],
            should: Vec::new(),
            must_not: Vec::new(),
        }
    }

    /// Append a `must` condition.
    pub fn must(mut self, condition: Condition) -> Self {
        self.must.push(condition);
        self
    }

    /// Append a `should` condition.
    pub fn should(mut self, condition: Condition) -> Self {
        self.should.push(condition);
        self
    }

    /// Append a `must_not` condition.
    pub fn must_not(mut self, condition: Condition) -> Self {
        self.must_not.push(condition);
        self
    }

    /// True when the mandatory conjunction pins both `tenant_id` and
    /// `platform` to single values.
    pub fn has_tenant_scope(&self) -> bool {
        let pinned = |field: &str| {
            self.must.iter().any(|c| {
                matches!(c, Condition::Match { key, value } if key == field && value.is_string())
            })
        };
        pinned("tenant_id") && pinned("platform")
    }

    /// The pinned tenant id, when present.
    pub fn tenant_id(&self) -> Option<&str> {
        self.must.iter().find_map(|c| match c {
            Condition::Match { key, value } if key == "tenant_id" => value.as_str(),
            _ => None,
        })
    }
}
