//! Layer-2 assisted classification.
//!
//! Invoked only when Layer 1 is below the tier threshold. Attempts, in
//! order: on-device model, primary remote model, secondary remote model.
//! Every attempt runs under a hard deadline; the chain is bounded at three
//! attempts and the terminal fallback is a medium-tier default with the
//! error preserved in metadata.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use troupe_core::RoutingTier;

use crate::error::{Result, RouterError};
use crate::models::{
    ActionType, ClassificationScores, Layer, QuestionType, RoutingDecision,
};

/// Chat request message for the external model provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// External language-model provider. The coordination core never talks
/// HTTP itself; callers inject an implementation.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        model: &str,
        max_tokens: u32,
        temperature: f64,
    ) -> Result<String>;
}

/// Optional on-device model binding. Absence forces the remote path.
#[async_trait]
pub trait OnDeviceModel: Send + Sync {
    /// (available, reason-if-not)
    fn availability(&self) -> (bool, String);
    async fn respond(&self, prompt: &str) -> Result<String>;
}

/// Compact Layer-1 context forwarded into the Layer-2 prompt.
#[derive(Debug, Clone, Default)]
pub struct ClassificationContext {
    pub action_type: ActionType,
    pub has_negations: bool,
    pub negation_details: Vec<String>,
    pub has_code_blocks: bool,
    pub question_type: Option<QuestionType>,
    pub urgency: Vec<String>,
}

impl ClassificationContext {
    pub fn from_scores(scores: &ClassificationScores) -> Self {
        Self {
            action_type: scores.action_type,
            has_negations: scores.has_negations(),
            negation_details: scores.negations.clone(),
            has_code_blocks: scores.code_presence > 0.7,
            question_type: scores.question_type,
            urgency: scores.urgency.clone(),
        }
    }
}

const CLASSIFICATION_PROMPT: &str = r#"You are a routing classifier for a team assistant.

Classify the user message into ONE of five tiers:

TIER 1 - SIMPLE: quick facts, greetings, thanks, simple questions. <50 tokens, no tools.
TIER 2 - MEDIUM: explanations, searches, comparisons, simple commands. 50-200 tokens.
TIER 3 - CODING: writing/implementing/debugging code, queries, deploy ops. 200-800 tokens.
TIER 4 - COMPLEX: architecture, multi-step analysis, tricky debugging. 200-1000 tokens.
TIER 5 - REASONING: proofs, formal logic, mathematics. >1000 tokens.

NOTES:
- "explain"/"describe" about code is MEDIUM, not CODING.
- "write"/"implement" code is CODING.
- Social interactions are always SIMPLE.

Respond ONLY with a JSON object:
{"tier": "SIMPLE|MEDIUM|CODING|COMPLEX|REASONING", "confidence": 0.0-1.0, "reasoning": "one sentence", "estimated_tokens": 50|200|800|1000|2000, "needs_tools": true|false}

User message to classify:
"#;

const LOCAL_CLASSIFICATION_PROMPT: &str = r#"Classify this message into one tier:
- SIMPLE: quick facts, greetings, thanks
- MEDIUM: explanations, searches, simple tasks
- CODING: code writing, debugging, implementations
- COMPLEX: multi-step tasks, architecture
- REASONING: proofs, logic, math

Respond with only JSON:
{"tier": "SIMPLE|MEDIUM|CODING|COMPLEX|REASONING", "reasoning": "why", "needs_tools": true|false}

Message: "#;

/// Assisted router with the on-device -> primary -> secondary chain.
pub struct AssistedRouter {
    provider: Arc<dyn ModelProvider>,
    on_device: Option<Arc<dyn OnDeviceModel>>,
    model: String,
    secondary_model: Option<String>,
    timeout: Duration,
}

impl AssistedRouter {
    pub fn new(provider: Arc<dyn ModelProvider>, model: &str) -> Self {
        Self {
            provider,
            on_device: None,
            model: model.to_string(),
            secondary_model: None,
            timeout: Duration::from_millis(500),
        }
    }

    pub fn with_on_device(mut self, model: Arc<dyn OnDeviceModel>) -> Self {
        self.on_device = Some(model);
        self
    }

    pub fn with_secondary_model(mut self, model: &str) -> Self {
        self.secondary_model = Some(model.to_string());
        self
    }

    pub fn with_timeout_ms(mut self, ms: u64) -> Self {
        self.timeout = Duration::from_millis(ms);
        self
    }

    /// Run the fallback chain. Never fails: the terminal fallback is a
    /// medium-tier default carrying the last error.
    pub async fn classify(
        &self,
        content: &str,
        context: &ClassificationContext,
    ) -> RoutingDecision {
        // Attempt 1: on-device, when available.
        if let Some(local) = &self.on_device {
            let (ok, reason) = local.availability();
            if ok {
                match self.classify_local(local.as_ref(), content).await {
                    Ok(mut decision) => {
                        apply_context_rules(&mut decision, context);
                        return decision;
                    }
                    Err(e) => {
                        warn!(error = %e, "on-device classification failed, falling back to remote");
                    }
                }
            } else {
                debug!(reason, "on-device model unavailable");
            }
        }

        // Attempt 2: primary remote model.
        let primary = self.classify_remote(content, context, &self.model).await;
        let last_err = match primary {
            Ok(mut decision) => {
                apply_context_rules(&mut decision, context);
                return decision;
            }
            Err(e) => {
                warn!(model = %self.model, error = %e, "primary classifier failed");
                e
            }
        };

        // Attempt 3: secondary remote model.
        if let Some(secondary) = &self.secondary_model {
            match self.classify_remote(content, context, secondary).await {
                Ok(mut decision) => {
                    apply_context_rules(&mut decision, context);
                    decision.tag("llm_secondary", serde_json::json!(secondary));
                    return decision;
                }
                Err(e) => {
                    warn!(model = %secondary, error = %e, "secondary classifier failed");
                    return fallback_decision(&e);
                }
            }
        }

        fallback_decision(&last_err)
    }

    async fn classify_local(
        &self,
        local: &dyn OnDeviceModel,
        content: &str,
    ) -> Result<RoutingDecision> {
        let prompt = format!("{LOCAL_CLASSIFICATION_PROMPT}{content}");
        let response = tokio::time::timeout(self.timeout, local.respond(&prompt))
            .await
            .map_err(|_| RouterError::Timeout {
                ms: self.timeout.as_millis() as u64,
            })??;

        let verdict = parse_verdict(&response).unwrap_or_else(|_| loose_parse(&response));
        let mut decision = RoutingDecision::new(
            verdict.tier,
            verdict.confidence,
            Layer::Local,
            &verdict.reasoning,
        );
        decision.estimated_tokens = verdict.estimated_tokens;
        decision.needs_tools = verdict.needs_tools;
        decision.tag("local_model", serde_json::json!("on-device"));
        Ok(decision)
    }

    async fn classify_remote(
        &self,
        content: &str,
        context: &ClassificationContext,
        model: &str,
    ) -> Result<RoutingDecision> {
        let messages = vec![
            ChatMessage {
                role: "system".to_string(),
                content: "You are a routing classifier. Respond ONLY with valid JSON.".to_string(),
            },
            ChatMessage {
                role: "user".to_string(),
                content: build_prompt(content, context),
            },
        ];

        let response = tokio::time::timeout(
            self.timeout,
            self.provider.chat(&messages, model, 200, 0.1),
        )
        .await
        .map_err(|_| RouterError::Timeout {
            ms: self.timeout.as_millis() as u64,
        })??;

        let verdict = parse_verdict(&response)?;
        let mut decision = RoutingDecision::new(
            verdict.tier,
            verdict.confidence,
            Layer::Llm,
            &verdict.reasoning,
        );
        decision.estimated_tokens = verdict.estimated_tokens;
        decision.needs_tools = verdict.needs_tools;
        decision.tag("llm_model", serde_json::json!(model));
        Ok(decision)
    }
}

fn build_prompt(content: &str, context: &ClassificationContext) -> String {
    let mut prompt = format!("{CLASSIFICATION_PROMPT}{content}");

    let mut hints = Vec::new();
    match context.action_type {
        ActionType::Explain => hints.push(
            "\nContext: user asks for EXPLANATION, not implementation. If code is involved, consider MEDIUM (not CODING).".to_string(),
        ),
        ActionType::Write => hints.push(
            "\nContext: user wants IMPLEMENTATION. If code is involved, consider CODING.".to_string(),
        ),
        ActionType::Analyze => {
            hints.push("\nContext: user wants ANALYSIS/DEBUGGING.".to_string())
        }
        ActionType::Fix => hints.push(
            "\nContext: user wants something FIXED. Consider COMPLEX for debugging, CODING for a code fix.".to_string(),
        ),
        ActionType::General => {}
    }
    if context.has_negations && !context.negation_details.is_empty() {
        let sample: Vec<&str> = context
            .negation_details
            .iter()
            .take(3)
            .map(|s| s.as_str())
            .collect();
        hints.push(format!(
            "\nContext: message contains negations: '{}'. The user may be rejecting an approach.",
            sample.join(", ")
        ));
    }
    if context.has_code_blocks {
        hints.push("\nContext: code blocks are present in the message.".to_string());
    }
    if context.question_type == Some(QuestionType::YesNo) {
        hints.push("\nContext: yes/no question detected. Likely SIMPLE.".to_string());
    }
    if !context.urgency.is_empty() {
        hints.push(format!(
            "\nContext: urgency detected: '{}'.",
            context.urgency.join(", ")
        ));
    }

    if !hints.is_empty() {
        prompt.push('\n');
        prompt.push_str(&hints.join("\n"));
    }
    prompt
}

/// Context-consistency rules applied to every Layer-2 verdict.
fn apply_context_rules(decision: &mut RoutingDecision, context: &ClassificationContext) {
    if context.action_type == ActionType::Explain && decision.tier == RoutingTier::Coding {
        decision.tier = RoutingTier::Medium;
        decision.confidence = (decision.confidence + 0.1).min(0.95);
        decision.estimated_tokens = 200;
        decision
            .reasoning
            .push_str(" (adjusted: explanation mode, not implementation)");
    }

    if context.action_type == ActionType::Write
        && decision.tier == RoutingTier::Medium
        && context.has_code_blocks
    {
        decision.tier = RoutingTier::Coding;
        decision.confidence = (decision.confidence + 0.1).min(0.95);
        decision.estimated_tokens = 800;
        decision.reasoning.push_str(" (adjusted: implementation mode)");
    }

    if context.has_negations && decision.confidence > 0.9 {
        decision.confidence *= 0.95;
        decision.reasoning.push_str(" (note: negations present)");
    }
}

/// Terminal fallback when every attempt failed.
fn fallback_decision(error: &RouterError) -> RoutingDecision {
    let mut decision = RoutingDecision::new(
        RoutingTier::Medium,
        0.5,
        Layer::Llm,
        "defaulted on error",
    );
    decision.tag("error", serde_json::json!(error.to_string()));
    decision
}

struct Verdict {
    tier: RoutingTier,
    confidence: f64,
    reasoning: String,
    estimated_tokens: u32,
    needs_tools: bool,
}

/// Parse a strict JSON verdict, tolerating markdown code fences around it.
fn parse_verdict(raw: &str) -> Result<Verdict> {
    let mut content = raw.trim();
    if let Some(idx) = content.find("```json") {
        content = &content[idx + 7..];
        content = content.split("```").next().unwrap_or(content).trim();
    } else if content.starts_with("```") {
        content = content.trim_start_matches("```").trim();
        content = content.split("```").next().unwrap_or(content).trim();
    }

    let value: serde_json::Value = serde_json::from_str(content)
        .map_err(|e| RouterError::Parse(format!("invalid JSON: {e}")))?;

    let tier_raw = value
        .get("tier")
        .and_then(|v| v.as_str())
        .ok_or_else(|| RouterError::Parse("missing field: tier".to_string()))?;
    let tier: RoutingTier = tier_raw
        .parse()
        .map_err(|e: String| RouterError::Parse(e))?;

    let confidence = value
        .get("confidence")
        .and_then(|v| v.as_f64())
        .ok_or_else(|| RouterError::Parse("missing field: confidence".to_string()))?
        .clamp(0.0, 1.0);

    let reasoning = value
        .get("reasoning")
        .and_then(|v| v.as_str())
        .ok_or_else(|| RouterError::Parse("missing field: reasoning".to_string()))?
        .to_string();

    let tokens_raw = value
        .get("estimated_tokens")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| RouterError::Parse("missing field: estimated_tokens".to_string()))?;

    let needs_tools = match value.get("needs_tools") {
        Some(serde_json::Value::Bool(b)) => *b,
        Some(serde_json::Value::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => return Err(RouterError::Parse("missing field: needs_tools".to_string())),
    };

    Ok(Verdict {
        tier,
        confidence,
        reasoning,
        estimated_tokens: quantize_tokens(tokens_raw),
        needs_tools,
    })
}

/// Quantise a free-form token estimate onto the standard buckets.
fn quantize_tokens(tokens: i64) -> u32 {
    match tokens {
        i64::MIN..=100 => 50,
        101..=500 => 200,
        501..=900 => 800,
        901..=1500 => 1000,
        _ => 2000,
    }
}

/// Fallback parse for non-JSON on-device responses: look for a tier word.
fn loose_parse(response: &str) -> Verdict {
    let lower = response.to_lowercase();
    let tier = if lower.contains("simple") {
        RoutingTier::Simple
    } else if lower.contains("coding") || lower.contains("code") {
        RoutingTier::Coding
    } else if lower.contains("complex") {
        RoutingTier::Complex
    } else if lower.contains("reasoning") || lower.contains("proof") {
        RoutingTier::Reasoning
    } else {
        RoutingTier::Medium
    };
    Verdict {
        tier,
        confidence: 0.6,
        reasoning: "parsed from non-JSON response".to_string(),
        estimated_tokens: tier.estimated_tokens(),
        needs_tools: tier != RoutingTier::Simple,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedProvider(String);

    #[async_trait]
    impl ModelProvider for FixedProvider {
        async fn chat(
            &self,
            _messages: &[ChatMessage],
            _model: &str,
            _max_tokens: u32,
            _temperature: f64,
        ) -> Result<String> {
            Ok(self.0.clone())
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl ModelProvider for FailingProvider {
        async fn chat(
            &self,
            _messages: &[ChatMessage],
            _model: &str,
            _max_tokens: u32,
            _temperature: f64,
        ) -> Result<String> {
            Err(RouterError::Provider("upstream down".to_string()))
        }
    }

    struct SlowProvider;

    #[async_trait]
    impl ModelProvider for SlowProvider {
        async fn chat(
            &self,
            _messages: &[ChatMessage],
            _model: &str,
            _max_tokens: u32,
            _temperature: f64,
        ) -> Result<String> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok("{}".to_string())
        }
    }

    const GOOD_VERDICT: &str = r#"{"tier": "CODING", "confidence": 0.88, "reasoning": "implementation request", "estimated_tokens": 800, "needs_tools": true}"#;

    #[tokio::test]
    async fn parses_remote_verdict() {
        let router = AssistedRouter::new(
            Arc::new(FixedProvider(GOOD_VERDICT.to_string())),
            "primary-model",
        );
        let decision = router
            .classify("write a function", &ClassificationContext::default())
            .await;
        assert_eq!(decision.tier, RoutingTier::Coding);
        assert_eq!(decision.layer, Layer::Llm);
        assert!((decision.confidence - 0.88).abs() < 1e-9);
        assert_eq!(decision.estimated_tokens, 800);
    }

    #[tokio::test]
    async fn fenced_verdict_is_accepted() {
        let fenced = format!("```json\n{GOOD_VERDICT}\n```");
        let router = AssistedRouter::new(Arc::new(FixedProvider(fenced)), "m");
        let decision = router
            .classify("write a function", &ClassificationContext::default())
            .await;
        assert_eq!(decision.tier, RoutingTier::Coding);
    }

    #[tokio::test]
    async fn timeout_falls_back_to_medium_default() {
        let router = AssistedRouter::new(Arc::new(SlowProvider), "m").with_timeout_ms(20);
        let decision = router
            .classify("anything", &ClassificationContext::default())
            .await;
        assert_eq!(decision.tier, RoutingTier::Medium);
        assert!((decision.confidence - 0.5).abs() < 1e-9);
        assert_eq!(decision.reasoning, "defaulted on error");
        assert!(decision.metadata.contains_key("error"));
    }

    #[tokio::test]
    async fn explain_coding_verdict_downgrades_to_medium() {
        let verdict = r#"{"tier": "CODING", "confidence": 0.8, "reasoning": "code involved", "estimated_tokens": 800, "needs_tools": true}"#;
        let router = AssistedRouter::new(Arc::new(FixedProvider(verdict.to_string())), "m");
        let ctx = ClassificationContext {
            action_type: ActionType::Explain,
            ..Default::default()
        };
        let decision = router.classify("explain this code", &ctx).await;
        assert_eq!(decision.tier, RoutingTier::Medium);
        assert!((decision.confidence - 0.9).abs() < 1e-9);
        assert_eq!(decision.estimated_tokens, 200);
        assert!(decision.reasoning.contains("explanation mode"));
    }

    #[tokio::test]
    async fn negations_damp_overconfident_verdicts() {
        let verdict = r#"{"tier": "MEDIUM", "confidence": 0.95, "reasoning": "sure", "estimated_tokens": 200, "needs_tools": true}"#;
        let router = AssistedRouter::new(Arc::new(FixedProvider(verdict.to_string())), "m");
        let ctx = ClassificationContext {
            has_negations: true,
            negation_details: vec!["don't write code".to_string()],
            ..Default::default()
        };
        let decision = router.classify("don't write code", &ctx).await;
        assert!((decision.confidence - 0.95 * 0.95).abs() < 1e-9);
    }

    #[tokio::test]
    async fn secondary_model_rescues_primary_failure() {
        // Provider fails for primary model name, succeeds for secondary.
        struct Selective;

        #[async_trait]
        impl ModelProvider for Selective {
            async fn chat(
                &self,
                _messages: &[ChatMessage],
                model: &str,
                _max_tokens: u32,
                _temperature: f64,
            ) -> Result<String> {
                if model == "primary" {
                    Err(RouterError::Provider("primary down".to_string()))
                } else {
                    Ok(GOOD_VERDICT.to_string())
                }
            }
        }

        let router =
            AssistedRouter::new(Arc::new(Selective), "primary").with_secondary_model("backup");
        let decision = router
            .classify("write a function", &ClassificationContext::default())
            .await;
        assert_eq!(decision.tier, RoutingTier::Coding);
        assert_eq!(
            decision.metadata.get("llm_secondary"),
            Some(&serde_json::json!("backup"))
        );
    }

    #[tokio::test]
    async fn all_failures_yield_fallback() {
        let router =
            AssistedRouter::new(Arc::new(FailingProvider), "primary").with_secondary_model("backup");
        let decision = router
            .classify("whatever", &ClassificationContext::default())
            .await;
        assert_eq!(decision.tier, RoutingTier::Medium);
        assert_eq!(decision.reasoning, "defaulted on error");
    }

    #[test]
    fn token_quantisation_buckets() {
        assert_eq!(quantize_tokens(10), 50);
        assert_eq!(quantize_tokens(300), 200);
        assert_eq!(quantize_tokens(850), 800);
        assert_eq!(quantize_tokens(1200), 1000);
        assert_eq!(quantize_tokens(5000), 2000);
    }
}
