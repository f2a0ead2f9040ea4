//! Model-backed fix proposer.
//!
//! Sends the current manifest, the failure text and a short fix history to
//! an OpenAI-compatible chat endpoint and parses the reply back into a
//! candidate spec. Anything that goes wrong — network, malformed reply,
//! no actual change — falls back to the deterministic rule-based proposer,
//! so the repair loop keeps its guarantees with or without the service.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use envfix_core::{
    manifest, EnvironmentSpec, ErrorReport, FixProposal, FixProposer, RepairHistory,
    RuleBasedProposer, StrategyId,
};

const DEFAULT_MODEL: &str = "gpt-4-turbo-preview";
const CHAT_COMPLETIONS_URL: &str = "https://api.openai.com/v1/chat/completions";

const SYSTEM_PROMPT: &str = "You are a Python dependency expert. When you see build \
errors, your priority is to pin python to a stable version (usually 3.10) to fix ABI \
compatibility. Reply with the fixed environment.yml only: no markdown fences, no prose.";

/// Fix proposer backed by a chat-completion model.
pub struct OpenAiProposer {
    client: reqwest::Client,
    api_key: String,
    model: String,
    fallback: RuleBasedProposer,
}

impl OpenAiProposer {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            fallback: RuleBasedProposer::new(),
        }
    }

    /// Build from `OPENAI_API_KEY`, or `None` when it is not set.
    pub fn from_env() -> Option<Self> {
        std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty())
            .map(Self::new)
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    async fn request_fix(
        &self,
        spec: &EnvironmentSpec,
        report: &ErrorReport,
        history: &RepairHistory,
    ) -> Result<String, reqwest::Error> {
        let body = json!({
            "model": self.model,
            "temperature": 0.3,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": build_prompt(spec, report, history) },
            ],
        });

        let response: ChatResponse = self
            .client
            .post(CHAT_COMPLETIONS_URL)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default())
    }
}

#[async_trait]
impl FixProposer for OpenAiProposer {
    async fn propose(
        &self,
        spec: &EnvironmentSpec,
        report: &ErrorReport,
        history: &RepairHistory,
    ) -> Option<FixProposal> {
        let reply = match self.request_fix(spec, report, history).await {
            Ok(reply) => reply,
            Err(err) => {
                warn!(error = %err, "model request failed, using rule-based fallback");
                return self.fallback.propose(spec, report, history).await;
            }
        };

        match parse_candidate(&reply, spec) {
            Some(candidate) => {
                debug!(name = %candidate.name, "model produced a candidate spec");
                Some(FixProposal {
                    strategy: StrategyId::ModelSuggested,
                    spec: candidate,
                })
            }
            None => {
                warn!("model reply unusable, using rule-based fallback");
                self.fallback.propose(spec, report, history).await
            }
        }
    }
}

fn build_prompt(spec: &EnvironmentSpec, report: &ErrorReport, history: &RepairHistory) -> String {
    let mut history_text = String::new();
    if history.is_empty() {
        history_text.push_str("None - this is the first attempt");
    } else {
        for entry in history.entries() {
            let strategy = entry
                .strategy
                .map(|s| format!("{s:?}"))
                .unwrap_or_else(|| "no fix applied".to_string());
            let snippet: String = entry.report.raw.chars().take(300).collect();
            history_text.push_str(&format!(
                "[Attempt {}] Fix: {strategy}\n[Attempt {}] Error: {snippet}\n",
                entry.attempt, entry.attempt
            ));
        }
    }

    format!(
        "A conda environment creation FAILED.\n\n\
         ## CURRENT environment.yml:\n{}\n\
         ## ERROR LOG:\n{}\n\n\
         ## FIX HISTORY:\n{}\n\
         Fix the environment.yml. Return ONLY the fixed YAML content.",
        manifest::render(spec),
        report.raw,
        history_text
    )
}

/// Turn the model reply into a validated candidate, or `None` when the
/// reply does not parse, fails the spec invariants, or changes nothing.
fn parse_candidate(reply: &str, current: &EnvironmentSpec) -> Option<EnvironmentSpec> {
    let cleaned = strip_markdown_fences(reply);
    let mut candidate = manifest::parse(cleaned).ok()?;

    // The manifest does not carry the analysis hints; keep the current ones
    // so compat rules stay meaningful on later passes.
    candidate.gpu_required = current.gpu_required;
    candidate.cuda_version = current.cuda_version.clone();
    candidate.cudnn_version = current.cudnn_version.clone();
    candidate.python_version = current.python_version.clone();

    if candidate == *current {
        return None;
    }
    Some(candidate)
}

/// Models wrap replies in ``` fences despite instructions; strip them.
fn strip_markdown_fences(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string ("yaml", "yml") on the opening fence.
    let rest = rest.split_once('\n').map(|(_, body)| body).unwrap_or(rest);
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    content: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use envfix_core::{DependencyEntry, DependencySource};

    fn current() -> EnvironmentSpec {
        let mut spec = EnvironmentSpec::new("demo");
        spec.dependencies
            .push(DependencyEntry::parse("python=3.11", DependencySource::Native).unwrap());
        spec
    }

    #[test]
    fn test_strip_markdown_fences() {
        let fenced = "```yaml\nname: demo\nchannels:\n  - defaults\ndependencies:\n```";
        assert!(strip_markdown_fences(fenced).starts_with("name: demo"));

        let bare = "name: demo\n";
        assert_eq!(strip_markdown_fences(bare), "name: demo");
    }

    #[test]
    fn test_parse_candidate_rejects_identical_reply() {
        let spec = current();
        let reply = manifest::render(&spec);
        assert!(parse_candidate(&reply, &spec).is_none());
    }

    #[test]
    fn test_parse_candidate_accepts_changed_manifest() {
        let spec = current();
        let reply = "name: demo\nchannels:\n  - conda-forge\n  - defaults\n\
                     dependencies:\n  - python=3.10\n";
        let candidate = parse_candidate(reply, &spec).expect("candidate");
        assert_eq!(
            candidate.find_dependency("python").unwrap().render(),
            "python=3.10"
        );
    }

    #[test]
    fn test_parse_candidate_rejects_garbage() {
        assert!(parse_candidate("I am sorry, I cannot help.", &current()).is_none());
    }

    #[test]
    fn test_prompt_includes_history() {
        let spec = current();
        let report = ErrorReport {
            raw: "UnsatisfiableError".to_string(),
            kind: envfix_core::ErrorKind::UnsatisfiableDependencies,
            package: None,
            attempt: 2,
        };
        let prompt = build_prompt(&spec, &report, &RepairHistory::new());
        assert!(prompt.contains("first attempt"));
        assert!(prompt.contains("UnsatisfiableError"));
    }
}
