//! Tool-output compaction — keeps large tool results out of the context
//! window.
//!
//! Outputs above the context budget are stored in full in the
//! `tool_outputs` table and replaced in context by a short summary ending
//! with a `[Full output: ref://<uuid>]` token. Fetching by that token
//! returns the full text and bumps the access counter.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::Result;
use crate::store::CoordinatorStore;
use crate::types::ToolOutputEntry;

/// Default context budget per tool result, in characters.
const MAX_CONTEXT_CHARS: usize = 2000;
/// Above this size the context version is a summary rather than a prefix.
const SUMMARIZE_THRESHOLD: usize = 5000;
/// Stored outputs older than this are eligible for cleanup.
const DEFAULT_MAX_AGE_HOURS: i64 = 24;

/// Stores full tool outputs for reference-based access.
pub struct ToolOutputStore {
    store: Arc<CoordinatorStore>,
}

impl ToolOutputStore {
    pub fn new(store: Arc<CoordinatorStore>) -> Self {
        Self { store }
    }

    /// Store a full output; returns its reference id.
    pub fn store_output(
        &self,
        tool_name: &str,
        full_output: &str,
        context_summary: &str,
        session_key: &str,
    ) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        self.store.with_conn(|conn| {
            conn.execute(
                "INSERT INTO tool_outputs
                 (id, tool_name, full_output, context_summary, created_at,
                  session_key, accessed_count, char_count)
                 VALUES (?1,?2,?3,?4,?5,?6,0,?7)",
                rusqlite::params![
                    id,
                    tool_name,
                    full_output,
                    context_summary,
                    Utc::now().to_rfc3339(),
                    session_key,
                    full_output.len() as i64,
                ],
            )?;
            Ok(())
        })?;
        debug!(output_id = %id, tool = tool_name, chars = full_output.len(), "tool output stored");
        Ok(id)
    }

    /// Fetch a stored output and increment its access counter.
    pub fn get_output(&self, output_id: &str) -> Result<Option<ToolOutputEntry>> {
        self.store.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, tool_name, full_output, context_summary, created_at,
                        session_key, accessed_count, char_count
                 FROM tool_outputs WHERE id = ?1",
            )?;
            let entry = stmt
                .query_map([output_id], |row| {
                    let created: String = row.get(4)?;
                    Ok(ToolOutputEntry {
                        id: row.get(0)?,
                        tool_name: row.get(1)?,
                        full_output: row.get(2)?,
                        context_summary: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                        created_at: chrono::DateTime::parse_from_rfc3339(&created)
                            .map(|dt| dt.with_timezone(&Utc))
                            .unwrap_or_else(|_| Utc::now()),
                        session_key: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
                        accessed_count: row.get(6)?,
                        char_count: row.get(7)?,
                    })
                })?
                .filter_map(|r| r.ok())
                .next();
            drop(stmt);

            if let Some(mut entry) = entry {
                conn.execute(
                    "UPDATE tool_outputs SET accessed_count = accessed_count + 1 WHERE id = ?1",
                    [output_id],
                )?;
                entry.accessed_count += 1;
                Ok(Some(entry))
            } else {
                Ok(None)
            }
        })
    }

    /// Delete stored outputs older than `max_age_hours`. Returns the number
    /// deleted.
    pub fn cleanup_old_outputs(&self, max_age_hours: Option<i64>) -> Result<usize> {
        let cutoff =
            Utc::now() - chrono::Duration::hours(max_age_hours.unwrap_or(DEFAULT_MAX_AGE_HOURS));
        let deleted = self.store.with_conn(|conn| {
            Ok(conn.execute(
                "DELETE FROM tool_outputs WHERE created_at < ?1",
                [cutoff.to_rfc3339()],
            )?)
        })?;
        if deleted > 0 {
            info!(deleted, "cleaned up old tool outputs");
        }
        Ok(deleted)
    }
}

/// Result of compacting one tool output.
#[derive(Debug, Clone)]
pub struct CompactedResult {
    /// What goes into the context window.
    pub context_version: String,
    /// Set when the full output was stored for reference.
    pub full_output_id: Option<String>,
    pub truncated: bool,
}

/// Compacts tool outputs against a per-result context budget.
pub struct ToolOutputCompactor {
    output_store: ToolOutputStore,
    max_context_chars: usize,
    summarize_threshold: usize,
}

impl ToolOutputCompactor {
    pub fn new(store: Arc<CoordinatorStore>) -> Self {
        Self {
            output_store: ToolOutputStore::new(store),
            max_context_chars: MAX_CONTEXT_CHARS,
            summarize_threshold: SUMMARIZE_THRESHOLD,
        }
    }

    pub fn with_budget(mut self, max_context_chars: usize) -> Self {
        self.max_context_chars = max_context_chars;
        self
    }

    pub fn output_store(&self) -> &ToolOutputStore {
        &self.output_store
    }

    /// Process a tool result for context storage. Small results pass
    /// through untouched.
    pub fn process_tool_result(
        &self,
        tool_name: &str,
        result: &str,
        session_key: &str,
    ) -> Result<CompactedResult> {
        if result.len() <= self.max_context_chars {
            return Ok(CompactedResult {
                context_version: result.to_string(),
                full_output_id: None,
                truncated: false,
            });
        }

        debug!(
            tool = tool_name,
            chars = result.len(),
            "tool output too large, compacting"
        );

        let summary = summarize(result, 500);
        let full_output_id =
            self.output_store
                .store_output(tool_name, result, &summary, session_key)?;

        let ref_line = format!("\n[Full output: ref://{full_output_id}]");
        let budget = self.max_context_chars.saturating_sub(ref_line.len());

        let mut context_version = if result.len() > self.summarize_threshold {
            summarize(result, budget)
        } else {
            let cut = floor_char_boundary(result, budget.saturating_sub(40));
            format!(
                "{}\n...[truncated {} chars]",
                &result[..cut],
                result.len() - cut
            )
        };
        context_version.push_str(&ref_line);

        Ok(CompactedResult {
            context_version,
            full_output_id: Some(full_output_id),
            truncated: true,
        })
    }

    /// Collapse consecutive identical tool invocations into one entry with
    /// a repeat marker. Operates on (tool_name, args_json, output) triples.
    pub fn collapse_redundant_calls(
        &self,
        calls: Vec<(String, String, String)>,
    ) -> Vec<(String, String, String)> {
        let mut out: Vec<(String, String, String)> = Vec::new();
        let mut repeats = 1usize;

        for call in calls {
            match out.last() {
                Some(prev) if prev.0 == call.0 && prev.1 == call.1 => {
                    repeats += 1;
                }
                _ => {
                    if repeats > 1 {
                        if let Some(prev) = out.last_mut() {
                            prev.2.push_str(&format!("\n[Repeated {repeats} times]"));
                        }
                        repeats = 1;
                    }
                    out.push(call);
                }
            }
        }
        if repeats > 1 {
            if let Some(prev) = out.last_mut() {
                prev.2.push_str(&format!("\n[Repeated {repeats} times]"));
            }
        }
        out
    }
}

/// Key-line extraction summary: size header plus up to five lines carrying
/// counts, errors or results.
fn summarize(text: &str, max_chars: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();

    let mut important = Vec::new();
    for line in lines.iter().take(50) {
        let stripped = line.trim();
        if stripped.is_empty() || stripped.starts_with('#') {
            continue;
        }
        let lower = stripped.to_lowercase();
        if ["total:", "count:", "error:", "found:", "result:", "success", "failed"]
            .iter()
            .any(|ind| lower.contains(ind))
        {
            important.push(stripped);
        }
    }

    let mut parts = vec![format!("Output ({} chars, {} lines)", text.len(), lines.len())];
    if !important.is_empty() {
        parts.push("Key points:".to_string());
        for line in important.iter().take(5) {
            let cut = floor_char_boundary(line, 80);
            let ellipsis = if line.len() > 80 { "..." } else { "" };
            parts.push(format!("  - {}{}", &line[..cut], ellipsis));
        }
    }

    let mut summary = parts.join("\n");
    if summary.len() > max_chars {
        let cut = floor_char_boundary(&summary, max_chars.saturating_sub(3));
        summary = format!("{}...", &summary[..cut]);
    }
    summary
}

/// Largest index <= `at` that lands on a UTF-8 char boundary.
fn floor_char_boundary(s: &str, at: usize) -> usize {
    if at >= s.len() {
        return s.len();
    }
    let mut idx = at;
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn compactor() -> ToolOutputCompactor {
        let store = Arc::new(CoordinatorStore::new(Connection::open_in_memory().unwrap()).unwrap());
        ToolOutputCompactor::new(store)
    }

    #[test]
    fn small_output_passes_through() {
        let c = compactor();
        let result = c.process_tool_result("search", "short answer", "sess").unwrap();
        assert!(!result.truncated);
        assert!(result.full_output_id.is_none());
        assert_eq!(result.context_version, "short answer");
    }

    #[test]
    fn large_output_is_stored_and_referenced() {
        let c = compactor();
        let big = "x".repeat(50_000);
        let result = c.process_tool_result("fetch", &big, "sess-1").unwrap();

        assert!(result.truncated);
        assert!(result.context_version.len() <= 2000);
        let id = result.full_output_id.clone().unwrap();
        assert!(result
            .context_version
            .ends_with(&format!("[Full output: ref://{id}]")));

        let entry = c.output_store().get_output(&id).unwrap().unwrap();
        assert_eq!(entry.full_output.len(), 50_000);
        assert_eq!(entry.accessed_count, 1);
        assert_eq!(entry.char_count, 50_000);
        assert_eq!(entry.session_key, "sess-1");
    }

    #[test]
    fn access_counter_increments_per_fetch() {
        let c = compactor();
        let big = "y".repeat(10_000);
        let id = c
            .process_tool_result("fetch", &big, "s")
            .unwrap()
            .full_output_id
            .unwrap();
        c.output_store().get_output(&id).unwrap();
        let entry = c.output_store().get_output(&id).unwrap().unwrap();
        assert_eq!(entry.accessed_count, 2);
    }

    #[test]
    fn medium_output_is_truncated_not_summarized() {
        let c = compactor();
        let mid = "line one\n".repeat(400); // ~3600 chars, under summarize threshold
        let result = c.process_tool_result("grep", &mid, "s").unwrap();
        assert!(result.truncated);
        assert!(result.context_version.contains("...[truncated"));
    }

    #[test]
    fn cleanup_removes_only_old_rows() {
        let c = compactor();
        let id = c
            .process_tool_result("fetch", &"z".repeat(3000), "s")
            .unwrap()
            .full_output_id
            .unwrap();
        // nothing is older than 24h
        assert_eq!(c.output_store().cleanup_old_outputs(None).unwrap(), 0);
        // everything is older than -1h
        assert_eq!(c.output_store().cleanup_old_outputs(Some(-1)).unwrap(), 1);
        assert!(c.output_store().get_output(&id).unwrap().is_none());
    }

    #[test]
    fn redundant_calls_collapse() {
        let c = compactor();
        let calls = vec![
            ("ls".into(), "{}".into(), "a".into()),
            ("ls".into(), "{}".into(), "a".into()),
            ("ls".into(), "{}".into(), "a".into()),
            ("cat".into(), "{\"f\":1}".into(), "b".into()),
        ];
        let collapsed = c.collapse_redundant_calls(calls);
        assert_eq!(collapsed.len(), 2);
        assert!(collapsed[0].2.contains("[Repeated 3 times]"));
    }
}
