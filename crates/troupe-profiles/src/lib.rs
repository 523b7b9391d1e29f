//! `troupe-profiles` — aggregated bot profiles from layered markdown
//! sources.
//!
//! Each bot role composes, in increasing precedence: built-in defaults,
//! the packaged team template (SOUL + IDENTITY + AGENTS), and workspace
//! overrides. Field extraction is explicitly best-effort markdown parsing
//! with defined fallbacks; tool permissions are parsed from the same file
//! set and merged across layers.

pub mod parser;
pub mod permissions;
pub mod profile;
pub mod reasoning;

pub use parser::{parse_identity_file, parse_soul_file, Metadata};
pub use permissions::{merge_permissions, parse_tool_permissions, ToolPermissions};
pub use profile::{ProfileSources, TeamProfile, TeamProfiles, BOT_ROLES};
pub use reasoning::{get_reasoning_config, CoTLevel, ReasoningConfig};
