//! Keyword filter for parlor.
//!
//! Evaluates outgoing messages against the active keyword rule set of
//! a room. A blocking match drops the message; mark matches wrap every
//! occurrence in a `<mark>` annotation and evaluation continues against
//! the annotated text.

use regex::{Regex, RegexBuilder};
use tracing::warn;

use crate::db::{KeywordRule, MatchType, RuleAction};
use crate::{ParlorError, Result};

/// Result of evaluating a message against the active rule set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterResult {
    /// Message passes; contains the fully annotated text.
    Pass(String),
    /// Message is blocked; the original text is discarded.
    Block,
}

/// How a compiled rule finds occurrences.
#[derive(Debug, Clone)]
enum Matcher {
    /// Case-sensitive substring.
    Substring(String),
    /// Compiled pattern; covers both case-insensitive substring rules
    /// (as escaped literals) and regex rules.
    Pattern(Regex),
}

/// A keyword rule with its matcher compiled up front.
///
/// Compilation happens once when the active set is loaded, so
/// evaluation can never fail at runtime.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    room: Option<String>,
    action: RuleAction,
    matcher: Matcher,
}

impl CompiledRule {
    /// Compile a stored rule.
    ///
    /// Returns `InvalidRule` for a malformed regex pattern; this is the
    /// single validation seam used both at rule creation and at load.
    pub fn compile(rule: &KeywordRule) -> Result<Self> {
        let matcher = match rule.match_type {
            MatchType::Exact => Matcher::Substring(rule.word.clone()),
            MatchType::CaseInsensitive => {
                let pattern = RegexBuilder::new(&regex::escape(&rule.word))
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| ParlorError::InvalidRule(e.to_string()))?;
                Matcher::Pattern(pattern)
            }
            MatchType::Regex => {
                let pattern = Regex::new(&rule.word)
                    .map_err(|e| ParlorError::InvalidRule(format!("{}: {e}", rule.word)))?;
                Matcher::Pattern(pattern)
            }
        };

        Ok(Self {
            room: rule.room.clone(),
            action: rule.action,
            matcher,
        })
    }

    /// Whether this rule applies to the given room.
    fn applies_to(&self, room: &str) -> bool {
        match &self.room {
            None => true,
            Some(scoped) => scoped == room,
        }
    }

    fn matches(&self, text: &str) -> bool {
        match &self.matcher {
            Matcher::Substring(word) => text.contains(word.as_str()),
            Matcher::Pattern(pattern) => pattern.is_match(text),
        }
    }

    /// Wrap every occurrence of the matched text in a highlight
    /// annotation, preserving the original casing of each occurrence.
    fn annotate(&self, text: &str) -> String {
        match &self.matcher {
            Matcher::Substring(word) => text.replace(word.as_str(), &format!("<mark>{word}</mark>")),
            Matcher::Pattern(pattern) => pattern.replace_all(text, "<mark>${0}</mark>").into_owned(),
        }
    }
}

/// The active, compiled rule set.
#[derive(Debug, Default)]
pub struct KeywordFilter {
    rules: Vec<CompiledRule>,
}

impl KeywordFilter {
    /// Build a filter from stored rules.
    ///
    /// Rules that fail to compile are excluded from the active set with
    /// a warning; they were flagged at creation time and must never
    /// turn into evaluation-time errors.
    pub fn from_rules(rules: &[KeywordRule]) -> Self {
        let compiled = rules
            .iter()
            .filter_map(|rule| match CompiledRule::compile(rule) {
                Ok(compiled) => Some(compiled),
                Err(e) => {
                    warn!("Skipping keyword rule {}: {e}", rule.id);
                    None
                }
            })
            .collect();

        Self { rules: compiled }
    }

    /// Number of active rules.
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Evaluate a message against the rules active in `room`.
    ///
    /// Rules are applied in insertion order: the first blocking match
    /// short-circuits, mark matches compound on the progressively
    /// annotated text.
    pub fn evaluate(&self, room: &str, text: &str) -> FilterResult {
        let mut annotated = text.to_string();

        for rule in self.rules.iter().filter(|r| r.applies_to(room)) {
            match rule.action {
                RuleAction::Block => {
                    if rule.matches(&annotated) {
                        return FilterResult::Block;
                    }
                }
                RuleAction::Mark => {
                    if rule.matches(&annotated) {
                        annotated = rule.annotate(&annotated);
                    }
                }
            }
        }

        FilterResult::Pass(annotated)
    }
}
