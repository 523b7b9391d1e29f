//! Aggregated, read-only team profiles.
//!
//! Layer precedence, lowest to highest: built-in defaults, packaged team
//! template files, workspace overrides. A field set by a higher layer
//! shadows the layers below; empty values never shadow.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::parser::{parse_identity_file, parse_soul_file, Metadata};
use crate::permissions::{merge_permissions, parse_tool_permissions, ToolPermissions};
use crate::reasoning::{get_reasoning_config, ReasoningConfig};

/// The specialist roles a team ships with.
pub const BOT_ROLES: [&str; 6] = [
    "leader",
    "researcher",
    "coder",
    "social",
    "creative",
    "auditor",
];

/// Where each part of a profile came from: "builtin", "template",
/// "workspace", or "missing".
pub type ProfileSources = HashMap<String, String>;

/// Aggregated, immutable profile for one bot.
#[derive(Debug, Clone)]
pub struct TeamProfile {
    pub bot_role: String,
    pub team_name: String,
    pub bot_name: String,
    pub bot_title: String,
    pub emoji: String,
    pub personality: String,
    pub greeting: String,
    pub voice: String,
    pub reasoning: ReasoningConfig,
    pub permissions: ToolPermissions,
    pub sources: ProfileSources,
    pub soul_content: Option<String>,
    pub identity_content: Option<String>,
    pub agents_content: Option<String>,
}

impl TeamProfile {
    /// Preferred display name.
    pub fn display_name(&self) -> &str {
        if !self.bot_name.is_empty() {
            &self.bot_name
        } else if !self.bot_title.is_empty() {
            &self.bot_title
        } else {
            &self.bot_role
        }
    }
}

/// Profile builder over a packaged template directory and an optional
/// workspace directory.
///
/// Template layout: `<templates>/<team>/<role>_SOUL.md`,
/// `<templates>/<team>/<role>_IDENTITY.md`, `<templates>/<role>_AGENTS.md`.
/// Workspace layout: `<workspace>/bots/<role>/{SOUL,IDENTITY,AGENTS}.md`.
pub struct TeamProfiles {
    templates_dir: Option<PathBuf>,
    workspace_dir: Option<PathBuf>,
}

impl TeamProfiles {
    pub fn new(templates_dir: Option<&Path>, workspace_dir: Option<&Path>) -> Self {
        Self {
            templates_dir: templates_dir.map(Path::to_path_buf),
            workspace_dir: workspace_dir.map(Path::to_path_buf),
        }
    }

    /// Build the aggregated profile for one role.
    pub fn get(&self, bot_role: &str, team_name: &str) -> TeamProfile {
        let template_soul = self.read_template(team_name, &format!("{bot_role}_SOUL.md"));
        let template_identity = self.read_template(team_name, &format!("{bot_role}_IDENTITY.md"));
        let template_agents = self.read_template("", &format!("{bot_role}_AGENTS.md"));

        let workspace_soul = self.read_workspace(bot_role, "SOUL.md");
        let workspace_identity = self.read_workspace(bot_role, "IDENTITY.md");
        let workspace_agents = self.read_workspace(bot_role, "AGENTS.md");

        let mut sources = ProfileSources::new();
        sources.insert(
            "soul".to_string(),
            layer_name(&workspace_soul, &template_soul),
        );
        sources.insert(
            "identity".to_string(),
            layer_name(&workspace_identity, &template_identity),
        );
        sources.insert(
            "agents".to_string(),
            layer_name(&workspace_agents, &template_agents),
        );

        // template metadata first, workspace overrides merged on top
        let mut merged = Metadata::new();
        if let Some(content) = &template_identity {
            merge_nonempty(&mut merged, parse_identity_file(content));
        }
        if let Some(content) = &template_soul {
            merge_nonempty(&mut merged, parse_soul_file(content));
        }
        if let Some(content) = &workspace_identity {
            merge_nonempty(&mut merged, parse_identity_file(content));
        }
        if let Some(content) = &workspace_soul {
            merge_nonempty(&mut merged, parse_soul_file(content));
        }

        let (default_title, default_emoji) = builtin_defaults(bot_role);
        let bot_title = merged
            .get("title")
            .or(merged.get("short_title"))
            .cloned()
            .unwrap_or_else(|| default_title.to_string());
        let bot_name = merged
            .get("name")
            .cloned()
            .unwrap_or_else(|| bot_title.clone());

        let permissions = merge_permissions(&[
            template_soul
                .as_deref()
                .map(parse_tool_permissions)
                .unwrap_or_default(),
            template_agents
                .as_deref()
                .map(parse_tool_permissions)
                .unwrap_or_default(),
            workspace_soul
                .as_deref()
                .map(parse_tool_permissions)
                .unwrap_or_default(),
            workspace_agents
                .as_deref()
                .map(parse_tool_permissions)
                .unwrap_or_default(),
        ]);

        debug!(role = bot_role, team = team_name, "profile aggregated");

        TeamProfile {
            bot_role: bot_role.to_string(),
            team_name: team_name.to_string(),
            bot_name,
            bot_title,
            emoji: merged
                .get("emoji")
                .cloned()
                .unwrap_or_else(|| default_emoji.to_string()),
            personality: merged.get("personality").cloned().unwrap_or_default(),
            greeting: merged.get("greeting").cloned().unwrap_or_default(),
            voice: merged.get("voice_directive").cloned().unwrap_or_default(),
            reasoning: get_reasoning_config(bot_role),
            permissions,
            sources,
            soul_content: workspace_soul.or(template_soul),
            identity_content: workspace_identity.or(template_identity),
            agents_content: workspace_agents.or(template_agents),
        }
    }

    /// Profiles for every shipped role.
    pub fn all(&self, team_name: &str) -> HashMap<String, TeamProfile> {
        BOT_ROLES
            .iter()
            .map(|role| (role.to_string(), self.get(role, team_name)))
            .collect()
    }

    fn read_template(&self, team: &str, file: &str) -> Option<String> {
        let dir = self.templates_dir.as_ref()?;
        let path = if team.is_empty() {
            dir.join(file)
        } else {
            dir.join(team).join(file)
        };
        std::fs::read_to_string(path).ok()
    }

    fn read_workspace(&self, bot_role: &str, file: &str) -> Option<String> {
        let dir = self.workspace_dir.as_ref()?;
        std::fs::read_to_string(dir.join("bots").join(bot_role).join(file)).ok()
    }
}

fn layer_name(workspace: &Option<String>, template: &Option<String>) -> String {
    if workspace.is_some() {
        "workspace".to_string()
    } else if template.is_some() {
        "template".to_string()
    } else {
        "missing".to_string()
    }
}

fn merge_nonempty(base: &mut Metadata, overlay: Metadata) {
    for (key, value) in overlay {
        if !value.is_empty() {
            base.insert(key, value);
        }
    }
}

fn builtin_defaults(bot_role: &str) -> (&'static str, &'static str) {
    match bot_role {
        "leader" => ("Team Leader", "🧭"),
        "researcher" => ("Researcher", "🔎"),
        "coder" => ("Engineer", "💻"),
        "social" => ("Community Manager", "💬"),
        "creative" => ("Creative Director", "🎨"),
        "auditor" => ("Quality Auditor", "🧐"),
        _ => ("Specialist", "👤"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn builtin_defaults_apply_without_any_files() {
        let profiles = TeamProfiles::new(None, None);
        let profile = profiles.get("coder", "default");
        assert_eq!(profile.bot_title, "Engineer");
        assert_eq!(profile.emoji, "💻");
        assert_eq!(profile.sources["soul"], "missing");
        assert_eq!(profile.display_name(), "Engineer");
    }

    #[test]
    fn template_layer_fills_fields() {
        let templates = TempDir::new().unwrap();
        write(
            templates.path(),
            "pirate_team/coder_SOUL.md",
            "⚓ **Ship Engineer (ENG)**\n\nI am Flint, the Ship Engineer.\n\n## Vibe\nGruff but reliable.\n",
        );
        let profiles = TeamProfiles::new(Some(templates.path()), None);
        let profile = profiles.get("coder", "pirate_team");

        assert_eq!(profile.bot_name, "Flint");
        assert_eq!(profile.emoji, "⚓");
        assert_eq!(profile.personality, "Gruff but reliable.");
        assert_eq!(profile.sources["soul"], "template");
    }

    #[test]
    fn workspace_overrides_template() {
        let templates = TempDir::new().unwrap();
        let workspace = TempDir::new().unwrap();
        write(
            templates.path(),
            "crew/coder_SOUL.md",
            "I am Flint, the Engineer.\n",
        );
        write(
            workspace.path(),
            "bots/coder/IDENTITY.md",
            "**Name:** Ada\n**Emoji:** 🦉\n",
        );
        let profiles = TeamProfiles::new(Some(templates.path()), Some(workspace.path()));
        let profile = profiles.get("coder", "crew");

        assert_eq!(profile.bot_name, "Ada");
        assert_eq!(profile.emoji, "🦉");
        assert_eq!(profile.sources["identity"], "workspace");
        assert_eq!(profile.sources["soul"], "template");
    }

    #[test]
    fn permissions_merge_across_layers() {
        let templates = TempDir::new().unwrap();
        let workspace = TempDir::new().unwrap();
        write(
            templates.path(),
            "crew/coder_SOUL.md",
            "**Allowed Tools:** exec, search\n",
        );
        write(
            workspace.path(),
            "bots/coder/AGENTS.md",
            "**Denied Tools:** exec\n",
        );
        let profiles = TeamProfiles::new(Some(templates.path()), Some(workspace.path()));
        let profile = profiles.get("coder", "crew");

        assert!(!profile.permissions.permits("exec"));
        assert!(profile.permissions.permits("search"));
    }

    #[test]
    fn all_covers_every_role() {
        let profiles = TeamProfiles::new(None, None);
        let all = profiles.all("default");
        assert_eq!(all.len(), BOT_ROLES.len());
        assert!(all.contains_key("auditor"));
    }
}
