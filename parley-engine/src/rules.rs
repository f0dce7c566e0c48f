//! Ordered pattern rules and the per-user session state they work against.

use parley_common::{Error, Result};
use parley_core::{Engine, SessionSnapshot};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One response rule.
///
/// A rule fires when its pattern matches the input and its required
/// predicate, if any, is present in the user's session. The template may
/// reference capture groups as `${1}`..`${9}` and remembered predicates as
/// `{name}`.
pub struct Rule {
    pattern: Regex,
    template: String,
    require: Option<String>,
    remember: Option<(String, usize)>,
}

impl Rule {
    pub fn new(pattern: &str, template: &str) -> Result<Self> {
        let pattern = Regex::new(pattern)
            .map_err(|e| Error::Engine(format!("invalid rule pattern: {e}")))?;
        Ok(Self {
            pattern,
            template: template.to_string(),
            require: None,
            remember: None,
        })
    }

    /// Only fire when this predicate is already remembered for the user.
    pub fn require_predicate(mut self, predicate: &str) -> Self {
        self.require = Some(predicate.to_string());
        self
    }

    /// On firing, store the given capture group under this predicate name.
    pub fn remember_capture(mut self, predicate: &str, group: usize) -> Self {
        self.remember = Some((predicate.to_string(), group));
        self
    }
}

/// What the engine knows about one user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct SessionState {
    predicates: HashMap<String, String>,
    exchanges: u64,
}

/// Rule-driven [`Engine`] implementation.
///
/// Rules are tried in order and the first hit produces the reply; when
/// nothing matches, the reply is empty and the conversation log records only
/// the client message.
pub struct RuleEngine {
    rules: Vec<Rule>,
    pred_ref: Regex,
    sessions: HashMap<String, SessionState>,
}

impl RuleEngine {
    /// Engine with the built-in rule set.
    pub fn new() -> Result<Self> {
        Self::with_rules(default_rules()?)
    }

    /// Engine with a custom rule set.
    pub fn with_rules(rules: Vec<Rule>) -> Result<Self> {
        let pred_ref = Regex::new(r"\{([a-z_]+)\}")
            .map_err(|e| Error::Engine(format!("invalid predicate pattern: {e}")))?;
        Ok(Self {
            rules,
            pred_ref,
            sessions: HashMap::new(),
        })
    }
}

impl Engine for RuleEngine {
    fn respond(&mut self, input: &str, user_id: &str) -> Result<String> {
        let state = self.sessions.entry(user_id.to_string()).or_default();
        state.exchanges += 1;

        let input = input.trim();
        for rule in &self.rules {
            if let Some(required) = &rule.require {
                if !state.predicates.contains_key(required) {
                    continue;
                }
            }
            let Some(caps) = rule.pattern.captures(input) else {
                continue;
            };
            if let Some((predicate, group)) = &rule.remember {
                if let Some(m) = caps.get(*group) {
                    state
                        .predicates
                        .insert(predicate.clone(), m.as_str().to_string());
                }
            }
            let mut reply = String::new();
            caps.expand(&rule.template, &mut reply);
            let reply = self
                .pred_ref
                .replace_all(&reply, |refs: &regex::Captures<'_>| {
                    state.predicates.get(&refs[1]).cloned().unwrap_or_default()
                });
            return Ok(reply.into_owned());
        }

        tracing::debug!(user_id = %user_id, "no rule matched");
        Ok(String::new())
    }

    fn get_session_data(&mut self, user_id: &str) -> Result<SessionSnapshot> {
        let state = self.sessions.get(user_id).cloned().unwrap_or_default();
        Ok(SessionSnapshot::from(serde_json::to_vec(&state)?))
    }

    fn set_session_data(&mut self, user_id: &str, snapshot: &SessionSnapshot) -> Result<()> {
        let state = if snapshot.is_empty() {
            SessionState::default()
        } else {
            serde_json::from_slice(snapshot.as_bytes())?
        };
        self.sessions.insert(user_id.to_string(), state);
        Ok(())
    }

    fn delete_session(&mut self, user_id: &str) -> Result<()> {
        self.sessions.remove(user_id);
        Ok(())
    }
}

fn default_rules() -> Result<Vec<Rule>> {
    Ok(vec![
        Rule::new(r"(?i)\bmy name is (\w+)", "Nice to meet you, ${1}.")?
            .remember_capture("name", 1),
        Rule::new(r"(?i)\bwhat('s| is) my name\b", "Your name is {name}.")?
            .require_predicate("name"),
        Rule::new(r"(?i)\bwhat('s| is) my name\b", "I do not know your name yet.")?,
        Rule::new(r"(?i)^(hello|hi|hey)\b", "Hello! How can I help you?")?,
        Rule::new(r"(?i)\b(bye|goodbye)\b", "Goodbye!")?,
        Rule::new(r"\?\s*$", "Good question.")?,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> RuleEngine {
        RuleEngine::new().unwrap()
    }

    #[test]
    fn test_greeting() {
        let mut engine = engine();
        let reply = engine.respond("hello there", "u1").unwrap();
        assert_eq!(reply, "Hello! How can I help you?");
    }

    #[test]
    fn test_matching_is_case_insensitive() {
        let mut engine = engine();
        let reply = engine.respond("MY NAME IS bob", "u1").unwrap();
        assert_eq!(reply, "Nice to meet you, bob.");
    }

    #[test]
    fn test_remembers_and_recalls_name() {
        let mut engine = engine();
        assert_eq!(
            engine.respond("My name is Alice", "u1").unwrap(),
            "Nice to meet you, Alice."
        );
        assert_eq!(
            engine.respond("What is my name?", "u1").unwrap(),
            "Your name is Alice."
        );
    }

    #[test]
    fn test_unknown_name_fallback() {
        let mut engine = engine();
        assert_eq!(
            engine.respond("what is my name", "u1").unwrap(),
            "I do not know your name yet."
        );
    }

    #[test]
    fn test_question_fallthrough() {
        let mut engine = engine();
        assert_eq!(
            engine.respond("are you alive?", "u1").unwrap(),
            "Good question."
        );
    }

    #[test]
    fn test_no_match_yields_empty_reply() {
        let mut engine = engine();
        assert_eq!(engine.respond("zzz", "u1").unwrap(), "");
    }

    #[test]
    fn test_sessions_are_isolated() {
        let mut engine = engine();
        engine.respond("my name is Alice", "u1").unwrap();
        assert_eq!(
            engine.respond("what is my name", "u2").unwrap(),
            "I do not know your name yet."
        );
    }

    #[test]
    fn test_exchanges_are_counted() {
        let mut engine = engine();
        engine.respond("hello", "u1").unwrap();
        engine.respond("zzz", "u1").unwrap();
        assert_eq!(engine.sessions["u1"].exchanges, 2);
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let mut engine = engine();
        engine.respond("my name is Alice", "u1").unwrap();
        let snapshot = engine.get_session_data("u1").unwrap();

        let mut restored = RuleEngine::new().unwrap();
        restored.set_session_data("u1", &snapshot).unwrap();
        assert_eq!(
            restored.respond("what is my name", "u1").unwrap(),
            "Your name is Alice."
        );
    }

    #[test]
    fn test_empty_snapshot_means_fresh_session() {
        let mut engine = engine();
        engine.respond("my name is Alice", "u1").unwrap();
        engine
            .set_session_data("u1", &SessionSnapshot::default())
            .unwrap();
        assert_eq!(
            engine.respond("what is my name", "u1").unwrap(),
            "I do not know your name yet."
        );
    }

    #[test]
    fn test_delete_session_forgets() {
        let mut engine = engine();
        engine.respond("my name is Alice", "u1").unwrap();
        engine.delete_session("u1").unwrap();
        assert_eq!(
            engine.respond("what is my name", "u1").unwrap(),
            "I do not know your name yet."
        );
    }

    #[test]
    fn test_get_session_for_unknown_user_is_fresh() {
        let mut engine = engine();
        let snapshot = engine.get_session_data("nobody").unwrap();
        let state: SessionState = serde_json::from_slice(snapshot.as_bytes()).unwrap();
        assert_eq!(state, SessionState::default());
    }
}
