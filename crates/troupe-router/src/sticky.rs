//! The top-level tier router: Layer 1, optional Layer 2, sticky
//! conversation state, and the calibration entry point.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use troupe_core::config::{CalibrationConfig, RoutingConfig};
use troupe_core::{Conversation, RoutingTier};

use crate::analytics::{ClassificationRecord, RoutingAnalytics};
use crate::assisted::{AssistedRouter, ClassificationContext};
use crate::calibration::{CalibrationOutcome, Calibrator};
use crate::classifier::{ClientClassifier, SIMPLE_MARKERS};
use crate::error::Result;
use crate::models::{ClassificationScores, RoutingDecision};

/// Router with sticky routing: a conversation holds its highest recent
/// tier, and only explicitly-simple messages may pull it back down.
pub struct TierRouter {
    classifier: Mutex<ClientClassifier>,
    assisted: Option<AssistedRouter>,
    analytics: Arc<RoutingAnalytics>,
    calibrator: Calibrator,
    thresholds: Mutex<BTreeMap<RoutingTier, f64>>,
    calibration_config: CalibrationConfig,
    context_window: usize,
    downgrade_confidence: f64,
}

impl TierRouter {
    pub fn new(
        config: &RoutingConfig,
        analytics: Arc<RoutingAnalytics>,
        calibrator: Calibrator,
        assisted: Option<AssistedRouter>,
    ) -> Self {
        let classifier = ClientClassifier::new(calibrator.load_patterns());
        Self {
            classifier: Mutex::new(classifier),
            assisted,
            analytics,
            calibrator,
            thresholds: Mutex::new(
                RoutingTier::all()
                    .into_iter()
                    .map(|t| (t, t.default_threshold()))
                    .collect(),
            ),
            calibration_config: config.calibration.clone(),
            context_window: config.context_window,
            downgrade_confidence: config.downgrade_confidence,
        }
    }

    pub fn threshold(&self, tier: RoutingTier) -> f64 {
        self.thresholds
            .lock()
            .unwrap()
            .get(&tier)
            .copied()
            .unwrap_or_else(|| tier.default_threshold())
    }

    /// Classify a message in the context of its conversation.
    ///
    /// Layer 1 always runs; Layer 2 only when Layer 1 lands under its
    /// tier's threshold and an assisted router is configured. The sticky
    /// rules then reconcile the decision with the conversation state, and
    /// a feedback record is captured either way.
    pub async fn classify(&self, content: &str, conversation: &mut Conversation) -> RoutingDecision {
        let (client_decision, scores) = self.classifier.lock().unwrap().classify(content);

        let threshold = self.threshold(client_decision.tier);
        let mut assisted_decision = None;

        let chosen = if client_decision.confidence >= threshold {
            client_decision.clone()
        } else if let Some(assisted) = &self.assisted {
            let context = ClassificationContext::from_scores(&scores);
            let decision = assisted.classify(content, &context).await;
            assisted_decision = Some(decision.clone());
            decision
        } else {
            // No assisted layer configured: the client decision stands even
            // under threshold.
            client_decision.clone()
        };

        let final_decision = self.apply_sticky(content, conversation, chosen, &scores);

        self.analytics.record(ClassificationRecord::capture(
            content,
            &client_decision,
            assisted_decision.as_ref(),
            &final_decision,
            &scores,
        ));

        final_decision
    }

    /// Sticky rules:
    /// 1. Unambiguously simple messages always route simple, without
    ///    touching the conversation's sticky tier (cost interrupt).
    /// 2. No recent elevated messages: the current decision stands and
    ///    becomes the sticky tier.
    /// 3. Recent elevation: a simple decision downgrades only when at
    ///    least two downgrade conditions hold; anything else keeps the
    ///    elevated tier.
    fn apply_sticky(
        &self,
        content: &str,
        conversation: &mut Conversation,
        mut decision: RoutingDecision,
        scores: &ClassificationScores,
    ) -> RoutingDecision {
        if decision.tier == RoutingTier::Simple
            && decision.confidence >= self.downgrade_confidence
        {
            decision.tag("sticky_override", serde_json::json!("always_simple"));
            decision.tag(
                "session_tier_preserved",
                serde_json::json!(conversation
                    .sticky_tier
                    .map(|t| t.to_string())
                    .unwrap_or_else(|| "unknown".to_string())),
            );
            return decision;
        }

        let recent = self.recent_tiers(conversation);
        let has_recent_elevated = recent.iter().any(|t| t.is_elevated())
            || conversation.sticky_tier.is_some_and(|t| t.is_elevated());

        if !has_recent_elevated {
            conversation.sticky_tier = Some(decision.tier);
            return decision;
        }

        if decision.tier == RoutingTier::Simple && self.should_downgrade(content, scores) {
            conversation.sticky_tier = Some(RoutingTier::Simple);
            decision.tag("sticky_override", serde_json::json!("downgrade_allowed"));
            return decision;
        }

        if let Some(held) = conversation.sticky_tier.filter(|t| t.is_elevated()) {
            if decision.tier != held {
                debug!(from = %decision.tier, to = %held, "sticky routing holds elevated tier");
                decision.tag("original_tier", serde_json::json!(decision.tier.to_string()));
                decision.tier = held;
                decision.estimated_tokens = held.estimated_tokens();
            }
            decision.tag("sticky_maintained", serde_json::json!(true));
        }
        decision
    }

    /// Tiers of the last N messages in the conversation, read from the
    /// `routing_tier` context tag stamped at delivery time.
    fn recent_tiers(&self, conversation: &Conversation) -> Vec<RoutingTier> {
        let start = conversation
            .messages
            .len()
            .saturating_sub(self.context_window);
        conversation.messages[start..]
            .iter()
            .filter_map(|m| {
                m.context
                    .get("routing_tier")
                    .and_then(|v| v.as_str())
                    .and_then(|s| s.parse().ok())
            })
            .collect()
    }

    /// At least two of: explicit simple marker; very short without
    /// technical terms; high simple-indicator score without technical
    /// terms.
    fn should_downgrade(&self, content: &str, scores: &ClassificationScores) -> bool {
        let lower = content.to_lowercase();
        let has_marker = SIMPLE_MARKERS.iter().any(|m| lower.contains(m));
        let no_technical = scores.technical_terms < 0.2;
        let very_short = scores.word_count < 20;
        let high_simple = scores.simple_indicators > 0.7;

        let conditions = [
            has_marker,
            very_short && no_technical,
            high_simple && no_technical,
        ];
        conditions.iter().filter(|c| **c).count() >= 2
    }

    /// Run calibration if the gate permits. On success, swaps in the new
    /// pattern set and adopts threshold adjustments.
    pub fn calibrate_if_due(&self) -> Result<Option<CalibrationOutcome>> {
        if !self.analytics.should_calibrate(&self.calibration_config) {
            debug!("calibration gate closed (insufficient data or too soon)");
            return Ok(None);
        }

        let records = self.analytics.records();
        let current = self.thresholds.lock().unwrap().clone();
        let outcome = self.calibrator.calibrate(&records, &current)?;

        {
            let mut thresholds = self.thresholds.lock().unwrap();
            for (tier_name, adjustment) in &outcome.threshold_adjustments {
                if let Ok(tier) = tier_name.parse::<RoutingTier>() {
                    info!(
                        tier = %tier,
                        old = adjustment.old_threshold,
                        new = adjustment.new_threshold,
                        improvement = adjustment.improvement,
                        "adopting calibrated threshold"
                    );
                    thresholds.insert(tier, adjustment.new_threshold);
                }
            }
        }

        self.classifier
            .lock()
            .unwrap()
            .replace_patterns(outcome.patterns.clone());

        self.analytics.mark_calibrated(outcome.timestamp);
        self.analytics.save();
        Ok(Some(outcome))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use troupe_core::{AgentId, AgentMessage, ConversationId, MessageType};

    fn router(dir: &TempDir) -> TierRouter {
        let analytics = Arc::new(RoutingAnalytics::load(dir.path().join("routing_stats.json")));
        let calibrator = Calibrator::new(
            dir.path().join("routing_patterns.json"),
            CalibrationConfig::default(),
        );
        TierRouter::new(&RoutingConfig::default(), analytics, calibrator, None)
    }

    fn elevated_conversation(prior: usize) -> Conversation {
        let conv_id = ConversationId::new();
        let mut conv = Conversation::new(conv_id.clone(), AgentId::new("user"), "deep work");
        conv.sticky_tier = Some(RoutingTier::Complex);
        for i in 0..prior {
            let msg = AgentMessage::new(
                AgentId::new("user"),
                AgentId::new("leader"),
                MessageType::Request,
                &format!("complex step {i}"),
            )
            .in_conversation(conv_id.clone())
            .with_context("routing_tier", serde_json::json!("complex"));
            conv.push(msg);
        }
        conv
    }

    #[tokio::test]
    async fn simple_interrupt_leaves_sticky_state_untouched() {
        let dir = TempDir::new().unwrap();
        let router = router(&dir);
        let mut conv = elevated_conversation(4);

        let decision = router
            .classify("thanks, by the way what time is it?", &mut conv)
            .await;

        assert_eq!(decision.tier, RoutingTier::Simple);
        assert_eq!(
            decision.metadata.get("sticky_override"),
            Some(&serde_json::json!("always_simple"))
        );
        // interrupt: the conversation keeps its elevated tier
        assert_eq!(conv.sticky_tier, Some(RoutingTier::Complex));
    }

    #[tokio::test]
    async fn elevated_tier_is_held_for_nonsimple_messages() {
        let dir = TempDir::new().unwrap();
        let router = router(&dir);
        let mut conv = elevated_conversation(3);

        let decision = router
            .classify("explain the trade-offs we discussed", &mut conv)
            .await;

        assert_eq!(decision.tier, RoutingTier::Complex);
        assert_eq!(
            decision.metadata.get("sticky_maintained"),
            Some(&serde_json::json!(true))
        );
        assert_eq!(conv.sticky_tier, Some(RoutingTier::Complex));
    }

    #[tokio::test]
    async fn downgrade_allowed_when_two_conditions_hold() {
        let dir = TempDir::new().unwrap();
        let router = router(&dir);
        let mut conv = elevated_conversation(3);

        // simple marker + very short without technical terms, but not
        // confident enough for the interrupt path
        let decision = router
            .classify("by the way, just wondering about lunch", &mut conv)
            .await;

        assert_eq!(decision.tier, RoutingTier::Simple);
        assert_eq!(
            decision.metadata.get("sticky_override"),
            Some(&serde_json::json!("downgrade_allowed"))
        );
        assert_eq!(conv.sticky_tier, Some(RoutingTier::Simple));
    }

    #[tokio::test]
    async fn fresh_conversation_adopts_decision_tier() {
        let dir = TempDir::new().unwrap();
        let router = router(&dir);
        let mut conv = Conversation::new(
            ConversationId::new(),
            AgentId::new("user"),
            "new thread",
        );

        let decision = router
            .classify("write a function to sort an array", &mut conv)
            .await;
        assert_eq!(decision.tier, RoutingTier::Coding);
        assert_eq!(conv.sticky_tier, Some(RoutingTier::Coding));
    }

    #[tokio::test]
    async fn every_classification_is_recorded() {
        let dir = TempDir::new().unwrap();
        let router = router(&dir);
        let mut conv = Conversation::new(
            ConversationId::new(),
            AgentId::new("user"),
            "thread",
        );
        router.classify("hello there", &mut conv).await;
        router.classify("write a function please", &mut conv).await;
        assert_eq!(router.analytics.record_count(), 2);
    }

    #[tokio::test]
    async fn calibration_gate_blocks_empty_history() {
        let dir = TempDir::new().unwrap();
        let router = router(&dir);
        assert!(router.calibrate_if_due().unwrap().is_none());
    }
}
