//! `troupe-router` — two-layer tier classification with sticky conversation
//! state, feedback capture, and periodic auto-calibration.
//!
//! Layer 1 is a deterministic classifier: score extraction plus an ordered
//! regex pattern list. Layer 2 is assisted: an optional on-device model,
//! then a primary and secondary remote model, each under a hard deadline.
//! Every decision is recorded for the calibration pass, which regrows the
//! pattern set and re-tunes per-tier confidence thresholds from accumulated
//! agreement data.

pub mod analytics;
pub mod assisted;
pub mod calibration;
pub mod classifier;
pub mod error;
pub mod models;
pub mod sticky;

pub use analytics::{ClassificationRecord, RoutingAnalytics};
pub use assisted::{AssistedRouter, ChatMessage, ClassificationContext, ModelProvider, OnDeviceModel};
pub use calibration::{CalibrationOutcome, Calibrator, ThresholdAdjustment};
pub use classifier::ClientClassifier;
pub use error::{Result, RouterError};
pub use models::{
    ActionType, ClassificationScores, Layer, PatternSource, QuestionType, RoutingDecision,
    RoutingPattern,
};
pub use sticky::TierRouter;
