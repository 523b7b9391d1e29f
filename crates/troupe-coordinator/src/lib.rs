//! `troupe-coordinator` — task lifecycle, liveness, decision-making,
//! disputes, audit and explanation for the agent team.
//!
//! The coordinator depends on the bus and store crates; neither holds a
//! reference back. Expertise scoring is an external collaborator behind
//! the [`expertise::ExpertiseSource`] trait.

pub mod audit;
pub mod autonomous;
pub mod coordinator;
pub mod decisions;
pub mod error;
pub mod expertise;
pub mod explain;
pub mod liveness;

pub use audit::{
    AuditEvent, AuditEventType, AuditSeverity, AuditStats, AuditTrail, DecisionAuditRecord,
    ExportFilter,
};
pub use autonomous::{AutonomousTeam, Bottleneck, TeamProgress};
pub use coordinator::{Complexity, Coordinator, RequestAnalysis};
pub use decisions::{
    BotPosition, Decision, DecisionMaker, DecisionType, Disagreement, DisagreementType,
    DisputeResolver, VotingStrategy,
};
pub use error::{CoordinatorError, Result};
pub use expertise::{ExpertiseSource, StaticExpertise};
pub use explain::{DetailLevel, Explanation, ExplanationEngine};
pub use liveness::{LivenessConfig, TaskBoard};
