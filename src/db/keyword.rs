//! Keyword rule model and repository for parlor.
//!
//! Keyword rules are the moderation policy applied to outgoing
//! messages: a rule either blocks a message outright or marks the
//! matched text. Rules are global or scoped to a single room.

use std::fmt;
use std::str::FromStr;

use crate::Result;

use super::DbPool;

/// What a matching rule does to the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleAction {
    /// Drop the message entirely.
    Block,
    /// Wrap each occurrence in a highlight annotation.
    Mark,
}

impl RuleAction {
    /// Convert action to database string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleAction::Block => "block",
            RuleAction::Mark => "mark",
        }
    }
}

impl fmt::Display for RuleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RuleAction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "block" => Ok(RuleAction::Block),
            "mark" => Ok(RuleAction::Mark),
            _ => Err(format!("unknown rule action: {s}")),
        }
    }
}

/// How a rule's word is matched against message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchType {
    /// Case-sensitive substring match.
    Exact,
    /// Case-folded substring match.
    CaseInsensitive,
    /// Regular expression match.
    Regex,
}

impl MatchType {
    /// Convert match type to database string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchType::Exact => "exact",
            MatchType::CaseInsensitive => "case_insensitive",
            MatchType::Regex => "regex",
        }
    }
}

impl fmt::Display for MatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for MatchType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "exact" => Ok(MatchType::Exact),
            "case_insensitive" => Ok(MatchType::CaseInsensitive),
            "regex" => Ok(MatchType::Regex),
            _ => Err(format!("unknown match type: {s}")),
        }
    }
}

/// A stored keyword rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordRule {
    /// Rule ID.
    pub id: i64,
    /// Word or pattern to match.
    pub word: String,
    /// What to do on a match.
    pub action: RuleAction,
    /// How to match.
    pub match_type: MatchType,
    /// Room scope; None applies the rule to all rooms.
    pub room: Option<String>,
}

/// Database row type for KeywordRule.
#[derive(sqlx::FromRow)]
struct KeywordRow {
    id: i64,
    word: String,
    action: String,
    match_type: String,
    room: Option<String>,
}

impl From<KeywordRow> for KeywordRule {
    fn from(row: KeywordRow) -> Self {
        Self {
            id: row.id,
            word: row.word,
            // Unknown strings fall back to the safe defaults
            action: row.action.parse().unwrap_or(RuleAction::Mark),
            match_type: row.match_type.parse().unwrap_or(MatchType::Exact),
            room: row.room,
        }
    }
}

/// Repository for keyword rule operations.
pub struct KeywordRepository<'a> {
    pool: &'a DbPool,
}

impl<'a> KeywordRepository<'a> {
    /// Create a new KeywordRepository with the given pool reference.
    pub fn new(pool: &'a DbPool) -> Self {
        Self { pool }
    }

    /// Add a keyword rule.
    ///
    /// Pattern validation is the caller's responsibility; the engine
    /// rejects malformed regex patterns before they reach storage.
    pub async fn add(
        &self,
        word: &str,
        action: RuleAction,
        match_type: MatchType,
        room: Option<&str>,
    ) -> Result<KeywordRule> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO keywords (word, action, match_type, room)
            VALUES (?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(word)
        .bind(action.as_str())
        .bind(match_type.as_str())
        .bind(room)
        .fetch_one(self.pool)
        .await?;

        Ok(KeywordRule {
            id,
            word: word.to_string(),
            action,
            match_type,
            room: room.map(str::to_string),
        })
    }

    /// List all rules in insertion order.
    pub async fn list(&self) -> Result<Vec<KeywordRule>> {
        let rows = sqlx::query_as::<_, KeywordRow>(
            "SELECT id, word, action, match_type, room FROM keywords ORDER BY id",
        )
        .fetch_all(self.pool)
        .await?;

        Ok(rows.into_iter().map(KeywordRule::from).collect())
    }

    /// Delete a rule by ID.
    ///
    /// Returns false if the rule doesn't exist.
    pub async fn delete(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM keywords WHERE id = ?")
            .bind(id)
            .execute(self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
