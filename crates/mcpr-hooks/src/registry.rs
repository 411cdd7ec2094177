//! Hook registration and execution.

use mcpr_core::{Result, RouterError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use crate::expr::{self, Expr};

/// Wall-clock ceiling per hook run; the step budget inside the evaluator
/// makes this nearly unreachable, but it backstops pathological payloads.
const HOOK_WALL_BUDGET: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookEvent {
    BeforeToolCall,
    AfterToolCall,
}

/// Registration input.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookDef {
    pub name: String,
    pub event: HookEvent,
    /// Restrict to one project; `None` matches all.
    #[serde(default)]
    pub project_id: Option<String>,
    /// Restrict to one server; `None` matches all.
    #[serde(default)]
    pub server_id: Option<String>,
    /// The restricted expression program.
    pub program: String,
    /// A modifying hook may replace the call arguments with the object it
    /// evaluates to. Advisory hooks only observe.
    #[serde(default)]
    pub can_modify: bool,
}

struct RegisteredHook {
    def: HookDef,
    compiled: Expr,
}

/// What a hook run produced, after the fail-open rules are applied.
#[derive(Debug, Clone, PartialEq)]
pub enum HookOutcome {
    /// No matching modifying hook changed anything.
    Unchanged,
    /// A `can_modify` hook returned an object to use as new arguments.
    Replaced(Value),
}

#[derive(Default)]
pub struct HookRegistry {
    hooks: RwLock<Vec<RegisteredHook>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and register. Programs that fail the static checks are
    /// rejected here and never run.
    pub fn register(&self, def: HookDef) -> Result<()> {
        let compiled = expr::parse(&def.program)
            .map_err(|error| RouterError::validation(format!(
                "hook '{}' rejected: {error}",
                def.name
            )))?;
        self.lock_write().push(RegisteredHook { def, compiled });
        Ok(())
    }

    pub fn remove(&self, name: &str) -> bool {
        let mut hooks = self.lock_write();
        let before = hooks.len();
        hooks.retain(|hook| hook.def.name != name);
        hooks.len() != before
    }

    pub fn names(&self, event: HookEvent) -> Vec<String> {
        self.lock_read()
            .iter()
            .filter(|hook| hook.def.event == event)
            .map(|hook| hook.def.name.clone())
            .collect()
    }

    /// Run every hook registered for `event` that matches the project and
    /// server. Failures are logged and skipped; the last modifying hook
    /// to return an object wins.
    pub fn run(
        &self,
        event: HookEvent,
        project_id: Option<&str>,
        server_id: &str,
        payload: &Value,
    ) -> HookOutcome {
        let hooks = self.lock_read();
        let mut outcome = HookOutcome::Unchanged;

        for hook in hooks.iter() {
            if hook.def.event != event {
                continue;
            }
            if let Some(hook_project) = &hook.def.project_id {
                if project_id != Some(hook_project.as_str()) {
                    continue;
                }
            }
            if let Some(hook_server) = &hook.def.server_id {
                if hook_server != server_id {
                    continue;
                }
            }

            let started = Instant::now();
            match expr::eval(&hook.compiled, payload) {
                Ok(value) => {
                    if started.elapsed() > HOOK_WALL_BUDGET {
                        tracing::warn!(hook = %hook.def.name, "hook exceeded wall budget");
                        continue;
                    }
                    tracing::debug!(hook = %hook.def.name, result = %value, "hook ran");
                    if hook.def.can_modify && value.is_object() {
                        outcome = HookOutcome::Replaced(value);
                    }
                }
                Err(error) => {
                    tracing::warn!(hook = %hook.def.name, error = %error, "hook failed");
                }
            }
        }
        outcome
    }

    fn lock_read(&self) -> std::sync::RwLockReadGuard<'_, Vec<RegisteredHook>> {
        self.hooks
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn lock_write(&self) -> std::sync::RwLockWriteGuard<'_, Vec<RegisteredHook>> {
        self.hooks
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookRegistry")
            .field("hooks", &self.lock_read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn def(name: &str, event: HookEvent, program: &str, can_modify: bool) -> HookDef {
        HookDef {
            name: name.to_string(),
            event,
            project_id: None,
            server_id: None,
            program: program.to_string(),
            can_modify,
        }
    }

    #[test]
    fn test_register_rejects_invalid_program() {
        let registry = HookRegistry::new();
        let err = registry
            .register(def("bad", HookEvent::BeforeToolCall, "tool.eval_code()", false))
            .unwrap_err();
        assert_eq!(err.kind(), mcpr_core::ErrorKind::Validation);
        assert!(registry.names(HookEvent::BeforeToolCall).is_empty());
    }

    #[test]
    fn test_advisory_hook_never_modifies() {
        let registry = HookRegistry::new();
        registry
            .register(def(
                "observer",
                HookEvent::BeforeToolCall,
                "{flagged: true}",
                false,
            ))
            .unwrap();

        let outcome = registry.run(
            HookEvent::BeforeToolCall,
            None,
            "server-1",
            &json!({"arguments": {}}),
        );
        assert_eq!(outcome, HookOutcome::Unchanged);
    }

    #[test]
    fn test_modifying_hook_replaces_arguments() {
        let registry = HookRegistry::new();
        registry
            .register(def(
                "sandbox-path",
                HookEvent::BeforeToolCall,
                "{path: '/tmp/safe'}",
                true,
            ))
            .unwrap();

        let outcome = registry.run(
            HookEvent::BeforeToolCall,
            None,
            "server-1",
            &json!({"arguments": {"path": "/etc/passwd"}}),
        );
        assert_eq!(outcome, HookOutcome::Replaced(json!({"path": "/tmp/safe"})));
    }

    #[test]
    fn test_modifying_hook_with_non_object_result_is_advisory() {
        let registry = HookRegistry::new();
        registry
            .register(def("bool-hook", HookEvent::BeforeToolCall, "1 < 2", true))
            .unwrap();

        let outcome = registry.run(HookEvent::BeforeToolCall, None, "server-1", &json!({}));
        assert_eq!(outcome, HookOutcome::Unchanged);
    }

    #[test]
    fn test_scope_filters() {
        let registry = HookRegistry::new();
        let mut scoped = def("scoped", HookEvent::BeforeToolCall, "{x: 1}", true);
        scoped.project_id = Some("project-a".to_string());
        scoped.server_id = Some("server-1".to_string());
        registry.register(scoped).unwrap();

        // Wrong project.
        let outcome = registry.run(
            HookEvent::BeforeToolCall,
            Some("project-b"),
            "server-1",
            &json!({}),
        );
        assert_eq!(outcome, HookOutcome::Unchanged);

        // Wrong server.
        let outcome = registry.run(
            HookEvent::BeforeToolCall,
            Some("project-a"),
            "server-2",
            &json!({}),
        );
        assert_eq!(outcome, HookOutcome::Unchanged);

        // Both match.
        let outcome = registry.run(
            HookEvent::BeforeToolCall,
            Some("project-a"),
            "server-1",
            &json!({}),
        );
        assert!(matches!(outcome, HookOutcome::Replaced(_)));
    }

    #[test]
    fn test_runtime_failure_is_swallowed() {
        let registry = HookRegistry::new();
        registry
            .register(def(
                "crashy",
                HookEvent::AfterToolCall,
                "response - 1",
                true,
            ))
            .unwrap();

        // Arithmetic on a string fails; the run still returns cleanly.
        let outcome = registry.run(
            HookEvent::AfterToolCall,
            None,
            "server-1",
            &json!({"response": "text"}),
        );
        assert_eq!(outcome, HookOutcome::Unchanged);
    }

    #[test]
    fn test_events_are_independent() {
        let registry = HookRegistry::new();
        registry
            .register(def("before", HookEvent::BeforeToolCall, "{a: 1}", true))
            .unwrap();

        let outcome = registry.run(HookEvent::AfterToolCall, None, "server-1", &json!({}));
        assert_eq!(outcome, HookOutcome::Unchanged);
        assert_eq!(registry.names(HookEvent::BeforeToolCall), vec!["before"]);
    }

    #[test]
    fn test_remove() {
        let registry = HookRegistry::new();
        registry
            .register(def("h", HookEvent::BeforeToolCall, "true", false))
            .unwrap();
        assert!(registry.remove("h"));
        assert!(!registry.remove("h"));
    }
}
