// SPDX-License-Identifier: MIT OR Apache-2.0
//! YAML prompt templates.
//!
//! Templates live under `<dir>/system/<use_case>_<object_type>.yaml` and
//! are loaded once at startup; editing a template takes effect on restart.
//! Each declares its required output sections, per-language system
//! prompts (with bilingual-preservation and anti-hallucination clauses in
//! the prompt text itself), and generation parameters.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tl_core::{Language, ObjectType};
use tl_error::{ErrorCode, ServiceError};
use tracing::{debug, warn};

/// Generation parameters declared by a template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateParams {
    /// Completion cap.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f64,
    /// Whether the daemon may stream this template's output.
    #[serde(default)]
    pub stream: bool,
}

/// One prompt template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptTemplate {
    /// Template name.
    pub name: String,
    /// Template version, bumped on prompt edits.
    pub version: String,
    /// Routing use-case tag (`realtime`, `summary`, …).
    pub use_case: String,
    /// Object type this template covers (`ticket` / `kb_article`).
    pub object_type: String,
    /// Required output section headings, in order.
    pub sections: Vec<String>,
    /// System prompt per content language; `en` is the fallback.
    pub system: HashMap<String, String>,
    /// User prompt with `{{subject}}` / `{{body}}` placeholders.
    pub user_template: String,
    /// Generation parameters.
    pub params: TemplateParams,
}

impl PromptTemplate {
    /// The system prompt for `language`, falling back to English.
    pub fn system_for(&self, language: Language) -> &str {
        self.system
            .get(language.as_str())
            .or_else(|| self.system.get("en"))
            .map(|s| s.as_str())
            .unwrap_or_default()
    }

    /// Render the user prompt for an object.
    pub fn render_user(&self, subject: &str, body: &str) -> String {
        self.user_template
            .replace("{{subject}}", subject)
            .replace("{{body}}", body)
    }
}

/// Template lookup key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct TemplateKey {
    use_case: String,
    object_type: String,
}

/// Loaded template set, keyed by `(use_case, object_type)`.
#[derive(Debug)]
pub struct TemplateStore {
    templates: HashMap<TemplateKey, PromptTemplate>,
}

impl TemplateStore {
    /// Load every `system/*.yaml` under `dir`.
    ///
    /// Unparsable files are skipped with a warning so one bad template
    /// cannot take the service down.
    pub fn load_dir(dir: &Path) -> Result<Self, ServiceError> {
        let system_dir = dir.join("system");
        let entries = std::fs::read_dir(&system_dir).map_err(|e| {
            ServiceError::new(
                ErrorCode::ConfigInvalid,
                format!("template dir {} unreadable", system_dir.display()),
            )
            .with_source(e)
        })?;

        let mut templates = HashMap::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("yaml") {
                continue;
            }
            let raw = match std::fs::read_to_string(&path) {
                Ok(raw) => raw,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "skipping unreadable template");
                    continue;
                }
            };
            match serde_yaml::from_str::<PromptTemplate>(&raw) {
                Ok(template) => {
                    debug!(name = %template.name, version = %template.version, "loaded template");
                    templates.insert(
                        TemplateKey {
                            use_case: template.use_case.clone(),
                            object_type: template.object_type.clone(),
                        },
                        template,
                    );
                }
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "skipping invalid template");
                }
            }
        }

        if templates.is_empty() {
            return Err(ServiceError::new(
                ErrorCode::ConfigInvalid,
                "no usable templates found",
            ));
        }
        Ok(Self { templates })
    }

    /// Built-in templates, used when no template directory is configured.
    pub fn builtin() -> Self {
        let mut templates = HashMap::new();
        for raw in [
            BUILTIN_SUMMARY_TICKET,
            BUILTIN_SUMMARY_KB,
            BUILTIN_REALTIME_TICKET,
        ] {
            let template: PromptTemplate =
                serde_yaml::from_str(raw).expect("builtin template is valid");
            templates.insert(
                TemplateKey {
                    use_case: template.use_case.clone(),
                    object_type: template.object_type.clone(),
                },
                template,
            );
        }
        Self { templates }
    }

    /// Look up a template, falling back from `realtime` to `summary` for
    /// the same object type.
    pub fn get(&self, use_case: &str, object_type: ObjectType) -> Option<&PromptTemplate> {
        let key = TemplateKey {
            use_case: use_case.to_string(),
            object_type: object_type.as_str().to_string(),
        };
        self.templates.get(&key).or_else(|| {
            self.templates.get(&TemplateKey {
                use_case: "summary".into(),
                object_type: object_type.as_str().to_string(),
            })
        })
    }

    /// Number of loaded templates.
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    /// True when no templates are loaded.
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

// Built-in copies of the shipped templates; the files under `templates/`
// are the editable source of truth for deployments.

const BUILTIN_SUMMARY_TICKET: &str = r###"
name: summary_ticket
version: "3"
use_case: summary
object_type: ticket
sections: [Problem, Root Cause, Resolution, Insights]
system:
  en: |
    You summarize support tickets into exactly four markdown sections, in
    this order: "## Problem", "## Root Cause", "## Resolution",
    "## Insights". State only facts present in the ticket. Never omit
    company names, product names, dates, domain names, or URLs that appear
    in the ticket; reproduce them verbatim. If a section is unknown, write
    "Not determined yet." rather than guessing.
  ko: |
    지원 티켓을 정확히 네 개의 마크다운 섹션으로 요약하세요. 순서는
    "## Problem", "## Root Cause", "## Resolution", "## Insights"입니다.
    티켓에 있는 사실만 기술하세요. 회사명, 제품명, 날짜, 도메인, URL은
    절대 생략하지 말고 원문 그대로 유지하세요. 영어 고유명사는 괄호와
    함께 원문을 보존하세요. 알 수 없는 섹션에는 추측하지 말고 "아직
    파악되지 않음."이라고 쓰세요.
user_template: |
  Subject: {{subject}}

  Conversation:
  {{body}}
params:
  max_tokens: 1024
  temperature: 0.2
  stream: false
"###;

const BUILTIN_SUMMARY_KB: &str = r###"
name: summary_kb_article
version: "2"
use_case: summary
object_type: kb_article
sections: [Problem, Root Cause, Resolution, Insights]
system:
  en: |
    You summarize knowledge-base articles into exactly four markdown
    sections, in this order: "## Problem", "## Root Cause",
    "## Resolution", "## Insights". "Problem" covers what the article
    addresses, "Resolution" the procedure it teaches. State only facts
    present in the article and keep every product name, version, and URL
    verbatim.
  ko: |
    지식베이스 문서를 정확히 네 개의 마크다운 섹션으로 요약하세요:
    "## Problem", "## Root Cause", "## Resolution", "## Insights".
    문서에 있는 사실만 기술하고 제품명, 버전, URL은 원문 그대로
    유지하세요.
user_template: |
  Title: {{subject}}

  Article:
  {{body}}
params:
  max_tokens: 1024
  temperature: 0.2
  stream: false
"###;

const BUILTIN_REALTIME_TICKET: &str = r###"
name: realtime_ticket
version: "3"
use_case: realtime
object_type: ticket
sections: [Problem, Root Cause, Resolution, Insights]
system:
  en: |
    An agent has this ticket open right now. Summarize it into exactly
    four markdown sections, in this order: "## Problem", "## Root Cause",
    "## Resolution", "## Insights". Be specific and quote identifiers
    (order numbers, account emails, error codes) verbatim. Never omit
    company names, dates, domain names, or URLs. If the ticket is
    unresolved, "Resolution" describes the current plan or next step.
  ko: |
    상담원이 지금 이 티켓을 보고 있습니다. 정확히 네 개의 마크다운
    섹션으로 요약하세요: "## Problem", "## Root Cause", "## Resolution",
    "## Insights". 주문번호, 계정 이메일, 오류 코드 등 식별자는 원문
    그대로 인용하세요. 회사명, 날짜, 도메인, URL은 절대 생략하지
    마세요. 영어 고유명사는 괄호와 함께 원문을 보존하세요. 미해결
    티켓이면 "Resolution"에 현재 계획이나 다음 단계를 적으세요.
user_template: |
  Subject: {{subject}}

  Conversation:
  {{body}}
params:
  max_tokens: 1024
  temperature: 0.3
  stream: true
"###;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn builtin_templates_parse_and_cover_both_object_types() {
        let store = TemplateStore::builtin();
        assert!(store.get("summary", ObjectType::Ticket).is_some());
        assert!(store.get("summary", ObjectType::KbArticle).is_some());
        assert!(store.get("realtime", ObjectType::Ticket).is_some());
    }

    #[test]
    fn realtime_kb_falls_back_to_summary_template() {
        let store = TemplateStore::builtin();
        let t = store.get("realtime", ObjectType::KbArticle).unwrap();
        assert_eq!(t.use_case, "summary");
    }

    #[test]
    fn sections_are_the_canonical_four() {
        let store = TemplateStore::builtin();
        let t = store.get("summary", ObjectType::Ticket).unwrap();
        assert_eq!(
            t.sections,
            vec!["Problem", "Root Cause", "Resolution", "Insights"]
        );
    }

    #[test]
    fn system_prompt_falls_back_to_english() {
        let store = TemplateStore::builtin();
        let t = store.get("summary", ObjectType::Ticket).unwrap();
        assert!(!t.system_for(Language::Ja).is_empty());
        assert_eq!(t.system_for(Language::Ja), t.system_for(Language::En));
        assert_ne!(t.system_for(Language::Ko), t.system_for(Language::En));
    }

    #[test]
    fn render_replaces_placeholders() {
        let store = TemplateStore::builtin();
        let t = store.get("summary", ObjectType::Ticket).unwrap();
        let rendered = t.render_user("Printer", "It broke");
        assert!(rendered.contains("Subject: Printer"));
        assert!(rendered.contains("It broke"));
        assert!(!rendered.contains("{{"));
    }

    #[test]
    fn loads_templates_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("system")).unwrap();
        let mut f =
            std::fs::File::create(dir.path().join("system/summary_ticket.yaml")).unwrap();
        f.write_all(BUILTIN_SUMMARY_TICKET.as_bytes()).unwrap();

        let store = TemplateStore::load_dir(dir.path()).unwrap();
        assert_eq!(store.len(), 1);
        assert!(store.get("summary", ObjectType::Ticket).is_some());
    }

    #[test]
    fn invalid_template_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("system")).unwrap();
        std::fs::write(dir.path().join("system/bad.yaml"), "not: [valid").unwrap();
        std::fs::write(
            dir.path().join("system/summary_ticket.yaml"),
            BUILTIN_SUMMARY_TICKET,
        )
        .unwrap();

        let store = TemplateStore::load_dir(dir.path()).unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn empty_directory_is_config_invalid() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("system")).unwrap();
        let err = TemplateStore::load_dir(dir.path()).unwrap_err();
        assert_eq!(err.code, ErrorCode::ConfigInvalid);
    }
}
