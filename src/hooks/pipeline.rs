//! Hook pipeline
//!
//! Receives normalized hook inputs and turns them into durable sessions,
//! prompts, observations, and summaries. Handler errors never propagate
//! to the host: they are logged and the standard response is emitted.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use uuid::Uuid;

use crate::error::Result;
use crate::service::MemoryService;
use crate::types::{Observation, Session};

use super::classify;
use super::envelope::{HookInput, HookResponse};
use super::summarizer;

/// Caps applied to oracle output
const MAX_FACTS: usize = 5;
const MAX_FACT_CHARS: usize = 200;
const MAX_CONCEPTS: usize = 5;
const MAX_CONCEPT_CHARS: usize = 50;

/// Structured enrichment for one observation
#[derive(Debug, Clone, Default)]
pub struct Enrichment {
    pub subtitle: String,
    pub narrative: String,
    pub facts: Vec<String>,
    pub concepts: Vec<String>,
}

impl Enrichment {
    fn clip(s: &str, max: usize) -> String {
        if s.chars().count() <= max {
            s.to_string()
        } else {
            s.chars().take(max).collect()
        }
    }

    /// Enforce the fact/concept caps regardless of what the oracle returned
    pub fn clamped(mut self) -> Self {
        self.facts.truncate(MAX_FACTS);
        for fact in &mut self.facts {
            *fact = Self::clip(fact, MAX_FACT_CHARS);
        }
        self.concepts.truncate(MAX_CONCEPTS);
        for concept in &mut self.concepts {
            *concept = Self::clip(concept, MAX_CONCEPT_CHARS);
        }
        self
    }
}

/// Optional collaborator that turns a tool invocation into a subtitle,
/// narrative, facts, and concepts. Returning `None` means "refused";
/// the pipeline then keeps its deterministic templates.
pub trait EnrichmentOracle: Send + Sync {
    fn enrich<'a>(
        &'a self,
        tool_name: &'a str,
        tool_input: &'a str,
        tool_response: &'a str,
    ) -> BoxFuture<'a, Option<Enrichment>>;
}

/// The bounded ingestion path from host hooks into the store
pub struct HookPipeline {
    service: Arc<MemoryService>,
    oracle: Option<Arc<dyn EnrichmentOracle>>,
    oracle_timeout: Duration,
    response_cap: usize,
}

impl HookPipeline {
    pub fn new(service: Arc<MemoryService>) -> Self {
        let oracle_timeout = service.config().oracle_timeout();
        let response_cap = service.config().response_byte_cap;
        Self {
            service,
            oracle: None,
            oracle_timeout,
            response_cap,
        }
    }

    pub fn with_oracle(mut self, oracle: Arc<dyn EnrichmentOracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    fn recover(operation: &str, result: Result<HookResponse>) -> HookResponse {
        match result {
            Ok(response) => response,
            Err(err) => {
                tracing::error!(operation, %err, "hook handler failed; continuing");
                HookResponse::ok()
            }
        }
    }

    async fn ensure_session(&self, input: &HookInput) -> Result<Session> {
        let session = self.service.storage().ensure_session(
            &input.session_id,
            &input.project,
            input.prompt.as_deref(),
        )?;
        self.service.adopt_session(session.clone());
        Ok(session)
    }

    /// *Session start*: emit a Markdown context payload with the recent
    /// history of this project; empty payload when there is none.
    pub async fn handle_session_start(&self, input: &HookInput) -> HookResponse {
        let result = async {
            self.ensure_session(input).await?;
            let context = self.render_context(&input.project)?;
            if context.is_empty() {
                Ok(HookResponse::ok())
            } else {
                Ok(HookResponse::with_context("SessionStart", context))
            }
        }
        .await;
        Self::recover("session_start", result)
    }

    fn render_context(&self, project: &str) -> Result<String> {
        let storage = self.service.storage();
        let sessions = storage.recent_sessions(Some(project), 3)?;
        let summaries = storage.summaries_for_project(project, 3)?;
        let prompts = storage.recent_prompts(project, 5)?;
        let observations = storage.recent_observations(project, 10)?;

        if sessions.is_empty() && summaries.is_empty() && prompts.is_empty() && observations.is_empty()
        {
            return Ok(String::new());
        }

        let mut out = format!("## Recent memory for {}\n", project);
        if !summaries.is_empty() {
            out.push_str("\n### Previous sessions\n");
            for summary in &summaries {
                out.push_str(&format!("- {}\n", summarizer::render_one_line(summary)));
            }
        } else if !sessions.is_empty() {
            out.push_str("\n### Previous sessions\n");
            for session in &sessions {
                out.push_str(&format!(
                    "- {} ({} observation(s), {})\n",
                    session.prompt.as_deref().unwrap_or("untitled session"),
                    session.observation_count,
                    session.status.as_str()
                ));
            }
        }
        if !prompts.is_empty() {
            out.push_str("\n### Recent prompts\n");
            for prompt in &prompts {
                let mut text = prompt.prompt_text.replace('\n', " ");
                if text.chars().count() > 120 {
                    text = text.chars().take(120).collect();
                }
                out.push_str(&format!("- {}\n", text));
            }
        }
        if !observations.is_empty() {
            out.push_str("\n### Recent activity\n");
            for observation in &observations {
                out.push_str(&format!("- {}\n", observation.title));
            }
        }
        Ok(out)
    }

    /// *Prompt submit*: ensure the session and append the next prompt
    pub async fn handle_user_prompt(&self, input: &HookInput) -> HookResponse {
        let result = async {
            let Some(ref prompt) = input.prompt else {
                return Ok(HookResponse::ok());
            };
            self.ensure_session(input).await?;
            let recorded = self
                .service
                .storage()
                .record_prompt(&input.session_id, prompt)?;
            tracing::debug!(
                session = %input.session_id,
                number = recorded.prompt_number,
                "prompt recorded"
            );
            Ok(HookResponse::ok())
        }
        .await;
        Self::recover("user_prompt", result)
    }

    /// *Tool use*: skip internal tools, classify, enrich, persist
    pub async fn handle_tool_use(&self, input: &HookInput) -> HookResponse {
        let result = async {
            let Some(ref tool_name) = input.tool_name else {
                return Ok(HookResponse::ok());
            };
            if classify::is_internal_tool(tool_name) {
                return Ok(HookResponse::ok());
            }
            self.ensure_session(input).await?;

            let mut observation = self.build_observation(input, tool_name)?;
            if let Some(enrichment) = self.consult_oracle(&observation).await {
                let enrichment = enrichment.clamped();
                observation.subtitle = enrichment.subtitle;
                observation.narrative = enrichment.narrative;
                observation.facts = enrichment.facts;
                observation.concepts = enrichment.concepts;
            }
            self.service.storage().record_observation(&observation)?;
            Ok(HookResponse::ok())
        }
        .await;
        Self::recover("tool_use", result)
    }

    fn build_observation(&self, input: &HookInput, tool_name: &str) -> Result<Observation> {
        let kind = classify::classify_tool(tool_name);
        let title = classify::title_for(tool_name, input.tool_input.as_ref());
        let serialized_input = classify::serialize_payload(input.tool_input.as_ref());
        let serialized_response = classify::truncate_response(
            &classify::serialize_payload(input.tool_response.as_ref()),
            self.response_cap,
        );
        let paths = classify::extract_file_paths(kind, input.tool_input.as_ref());
        let (files_read, files_modified) = match kind {
            crate::types::ObservationKind::Read => (paths, Vec::new()),
            crate::types::ObservationKind::Write => (Vec::new(), paths),
            _ => (Vec::new(), Vec::new()),
        };

        let prompt_count = self
            .service
            .storage()
            .prompts_for_session(&input.session_id)?
            .len() as i64;

        Ok(Observation {
            id: Uuid::new_v4().to_string(),
            session_id: input.session_id.clone(),
            project: input.project.clone(),
            tool_name: tool_name.to_string(),
            tool_input: serialized_input,
            tool_response: serialized_response,
            cwd: input.cwd.clone(),
            timestamp: input.timestamp,
            kind,
            narrative: title.clone(),
            title,
            subtitle: String::new(),
            files_read,
            files_modified,
            facts: Vec::new(),
            concepts: Vec::new(),
            prompt_number: (prompt_count > 0).then_some(prompt_count),
        })
    }

    /// Ask the oracle, bounded by the configured timeout. Refusals and
    /// timeouts both fall back to the deterministic templates.
    async fn consult_oracle(&self, observation: &Observation) -> Option<Enrichment> {
        let oracle = self.oracle.as_ref()?;
        match tokio::time::timeout(
            self.oracle_timeout,
            oracle.enrich(
                &observation.tool_name,
                &observation.tool_input,
                &observation.tool_response,
            ),
        )
        .await
        {
            Ok(enrichment) => enrichment,
            Err(_) => {
                tracing::warn!(tool = %observation.tool_name, "enrichment oracle timed out");
                None
            }
        }
    }

    /// *Session end*: fold the session into a summary and mark it completed
    pub async fn handle_session_end(&self, input: &HookInput) -> HookResponse {
        let result = async {
            self.ensure_session(input).await?;
            let storage = self.service.storage();
            let prompts = storage.prompts_for_session(&input.session_id)?;
            let observations = storage.observations_for_session(&input.session_id)?;

            let summary = summarizer::summarize(
                &input.session_id,
                &input.project,
                &prompts,
                &observations,
            );
            storage.record_summary(&summary)?;
            storage.end_session(
                &input.session_id,
                Some(&summarizer::render_one_line(&summary)),
                crate::types::SessionStatus::Completed,
            )?;
            Ok(HookResponse::ok())
        }
        .await;
        Self::recover("session_end", result)
    }

    /// Re-run enrichment for a stored observation (the `enrich` CLI verb)
    pub async fn enrich_observation(&self, observation_id: &str) -> HookResponse {
        let result = async {
            let storage = self.service.storage();
            let Some(mut observation) = storage.get_observation(observation_id)? else {
                tracing::warn!(observation_id, "enrich: observation not found");
                return Ok(HookResponse::ok());
            };
            if let Some(enrichment) = self.consult_oracle(&observation).await {
                let enrichment = enrichment.clamped();
                observation.subtitle = enrichment.subtitle;
                observation.narrative = enrichment.narrative;
                observation.facts = enrichment.facts;
                observation.concepts = enrichment.concepts;
                storage.update_observation(&observation)?;
            }
            Ok(HookResponse::ok())
        }
        .await;
        Self::recover("enrich", result)
    }
}
