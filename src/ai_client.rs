//! Text-model clients and the model-backed decision port.
//!
//! Three HTTP backends (OpenAI chat completions, Anthropic messages, Ollama
//! generate) behind one [`TextModel`] trait. Requests are blocking: the
//! engine processes one candidate at a time and waits for each answer.

use crate::decision::{
    parse_decision_reply, parse_label_proposal, Decision, DecisionPort, LabelContext, LabelProposal,
    MergeLabelRequest, RulePort,
};
use crate::error::{Result, TaxonomyError};
use crate::prompt_cache::PromptCache;
use crate::prompts;
use crate::settings::Settings;
use crate::utils::{clean_label, manual_merge_label};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Prompt in, reply text out.
pub trait TextModel {
    fn complete(&self, prompt: &str) -> Result<String>;

    fn name(&self) -> String;
}

impl TextModel for Box<dyn TextModel> {
    fn complete(&self, prompt: &str) -> Result<String> {
        (**self).complete(prompt)
    }

    fn name(&self) -> String {
        (**self).name()
    }
}

fn http_client(timeout_secs: u64) -> Result<reqwest::blocking::Client> {
    Ok(reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}

fn check_status(response: reqwest::blocking::Response, provider: &str) -> Result<reqwest::blocking::Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().unwrap_or_default();
    Err(TaxonomyError::Http(format!("{} API error {}: {}", provider, status, body)))
}

/// Chat message format shared by OpenAI and Anthropic
#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

impl Message {
    fn user(content: &str) -> Self {
        Self {
            role: "user".to_string(),
            content: content.to_string(),
        }
    }
}

// ============================================================================
// OpenAI
// ============================================================================

#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<Message>,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessageContent,
}

#[derive(Debug, Deserialize)]
struct OpenAiMessageContent {
    content: String,
}

pub struct OpenAiModel {
    client: reqwest::blocking::Client,
    api_key: String,
    model: String,
}

impl OpenAiModel {
    pub fn new(api_key: String, model: String, timeout_secs: u64) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout_secs)?,
            api_key,
            model,
        })
    }
}

impl TextModel for OpenAiModel {
    fn complete(&self, prompt: &str) -> Result<String> {
        let request = OpenAiRequest {
            model: self.model.clone(),
            messages: vec![Message::user(prompt)],
            max_tokens: 300,
        };
        let response = self
            .client
            .post("https://api.openai.com/v1/chat/completions")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()?;
        let api_response: OpenAiResponse = check_status(response, "OpenAI")?.json()?;

        api_response
            .choices
            .first()
            .map(|c| c.message.content.trim().to_string())
            .ok_or_else(|| TaxonomyError::Http("No response from OpenAI".to_string()))
    }

    fn name(&self) -> String {
        format!("openai:{}", self.model)
    }
}

// ============================================================================
// Anthropic
// ============================================================================

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<Message>,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: String,
}

pub struct AnthropicModel {
    client: reqwest::blocking::Client,
    api_key: String,
    model: String,
}

impl AnthropicModel {
    pub fn new(api_key: String, model: String, timeout_secs: u64) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout_secs)?,
            api_key,
            model,
        })
    }
}

impl TextModel for AnthropicModel {
    fn complete(&self, prompt: &str) -> Result<String> {
        let request = AnthropicRequest {
            model: self.model.clone(),
            max_tokens: 300,
            messages: vec![Message::user(prompt)],
        };
        let response = self
            .client
            .post("https://api.anthropic.com/v1/messages")
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&request)
            .send()?;
        let api_response: AnthropicResponse = check_status(response, "Anthropic")?.json()?;

        api_response
            .content
            .first()
            .map(|c| c.text.trim().to_string())
            .ok_or_else(|| TaxonomyError::Http("No response from Anthropic".to_string()))
    }

    fn name(&self) -> String {
        format!("anthropic:{}", self.model)
    }
}

// ============================================================================
// Ollama
// ============================================================================

#[derive(Debug, Serialize)]
struct OllamaRequest {
    model: String,
    prompt: String,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
}

pub struct OllamaModel {
    client: reqwest::blocking::Client,
    base_url: String,
    model: String,
}

impl OllamaModel {
    pub fn new(base_url: String, model: String, timeout_secs: u64) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout_secs)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
        })
    }
}

impl TextModel for OllamaModel {
    fn complete(&self, prompt: &str) -> Result<String> {
        let request = OllamaRequest {
            model: self.model.clone(),
            prompt: prompt.to_string(),
            stream: false,
        };
        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&request)
            .send()?;
        let api_response: OllamaResponse = check_status(response, "Ollama")?.json()?;
        Ok(api_response.response.trim().to_string())
    }

    fn name(&self) -> String {
        format!("ollama:{}", self.model)
    }
}

/// The text model configured in `settings`, or `None` for the rule backend.
pub fn model_from_settings(settings: &Settings) -> Result<Option<Box<dyn TextModel>>> {
    let timeout = settings.request_timeout_secs;
    let model: Box<dyn TextModel> = match settings.llm_backend.as_str() {
        "rule" => return Ok(None),
        "openai" => {
            let key = settings
                .openai_key()
                .ok_or_else(|| TaxonomyError::Config("OpenAI API key not set".to_string()))?;
            Box::new(OpenAiModel::new(key, settings.openai_model.clone(), timeout)?)
        }
        "anthropic" => {
            let key = settings
                .anthropic_key()
                .ok_or_else(|| TaxonomyError::Config("Anthropic API key not set".to_string()))?;
            Box::new(AnthropicModel::new(key, settings.anthropic_model.clone(), timeout)?)
        }
        "ollama" => Box::new(OllamaModel::new(
            settings.ollama_url.clone(),
            settings.ollama_model.clone(),
            timeout,
        )?),
        other => return Err(TaxonomyError::Config(format!("Unknown LLM backend: {}", other))),
    };
    Ok(Some(model))
}

/// Decision port for the configured backend.
pub fn port_from_settings(settings: &Settings) -> Result<Box<dyn DecisionPort>> {
    match model_from_settings(settings)? {
        None => Ok(Box::new(RulePort::new(settings.rule_min_overlap))),
        Some(model) => {
            let cache = match &settings.cache_dir {
                Some(dir) => PromptCache::open(dir),
                None => PromptCache::in_memory(),
            };
            log::info!("Using {} for decisions", model.name());
            Ok(Box::new(LlmDecisionPort::new(model, cache)))
        }
    }
}

// ============================================================================
// Model-backed decision port
// ============================================================================

/// Renders prompts, consults the cache, asks the model, parses the reply.
///
/// Model failures and unparseable replies degrade to "no action" (or to the
/// manual `a; b` label for merge names); they never abort a pass.
pub struct LlmDecisionPort<M: TextModel> {
    model: M,
    cache: PromptCache,
}

impl<M: TextModel> LlmDecisionPort<M> {
    pub fn new(model: M, cache: PromptCache) -> Self {
        Self { model, cache }
    }

    pub fn cache(&self) -> &PromptCache {
        &self.cache
    }

    fn ask(&mut self, namespace: &str, prompt: &str) -> Option<String> {
        if let Some(reply) = self.cache.get(namespace, prompt) {
            return Some(reply);
        }
        match self.model.complete(prompt) {
            Ok(reply) => {
                self.cache.insert(namespace, prompt, &reply);
                Some(reply)
            }
            Err(e) => {
                log::warn!("[{}] {} request failed: {}", namespace, self.model.name(), e);
                None
            }
        }
    }

    fn decide(&mut self, namespace: &str, prompt: String, candidate: &str) -> Decision {
        let Some(reply) = self.ask(namespace, &prompt) else {
            return Decision::NoAction;
        };
        match parse_decision_reply(&reply) {
            Ok(decision) => decision,
            Err(e) => {
                log::warn!("{} for {}", e, candidate);
                Decision::NoAction
            }
        }
    }
}

impl<M: TextModel> DecisionPort for LlmDecisionPort<M> {
    fn decide_merge(&mut self, ctx: &LabelContext) -> Decision {
        self.decide(prompts::MERGE_DECISION, prompts::merge_decision(ctx), &ctx.candidate_code)
    }

    fn decide_relevance(&mut self, ctx: &LabelContext) -> Decision {
        self.decide(prompts::RELEVANCE_DECISION, prompts::relevance_decision(ctx), &ctx.candidate_code)
    }

    fn merged_label(&mut self, request: &MergeLabelRequest) -> String {
        let label = self
            .ask(prompts::MERGE_LABEL, &prompts::merge_label(request))
            .map(|reply| clean_label(&reply))
            .unwrap_or_default();
        if label.is_empty() {
            manual_merge_label(&request.candidate_label, &request.sibling_label)
        } else {
            label
        }
    }

    fn propose_label(&mut self, ctx: &LabelContext) -> Option<LabelProposal> {
        let reply = self.ask(prompts::LABEL_PROPOSAL, &prompts::label_proposal(ctx))?;
        parse_label_proposal(&reply)
            .map_err(|e| log::warn!("{} for {}", e, ctx.candidate_code))
            .ok()
    }

    fn flush(&mut self) -> Result<()> {
        self.cache.save()
    }
}
