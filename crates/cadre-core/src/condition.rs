use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{CadreError, Result};
use crate::types::ConversationContext;

/// A pure routing predicate over `(input, context)`.
///
/// Conditions are data so external loaders can declare them; evaluation is
/// side-effect-free. Composite conditions short-circuit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    /// True if the input contains any of the keywords, case-insensitively.
    Keywords { any_of: Vec<String> },
    /// True if the regex matches the input. The regex is compiled on
    /// first evaluation and cached for the lifetime of the condition.
    Pattern {
        pattern: String,
        #[serde(skip)]
        compiled: OnceLock<Option<Regex>>,
    },
    /// True if `context.metadata[key]` equals `value`.
    MetadataEquals {
        key: String,
        value: serde_json::Value,
    },
    /// True if every child condition is true.
    All { conditions: Vec<Condition> },
    /// True if any child condition is true.
    Any { conditions: Vec<Condition> },
}

impl Condition {
    pub fn keywords(words: Vec<impl Into<String>>) -> Self {
        Self::Keywords {
            any_of: words.into_iter().map(Into::into).collect(),
        }
    }

    pub fn pattern(pattern: impl Into<String>) -> Self {
        Self::Pattern {
            pattern: pattern.into(),
            compiled: OnceLock::new(),
        }
    }

    pub fn metadata_equals(key: impl Into<String>, value: serde_json::Value) -> Self {
        Self::MetadataEquals {
            key: key.into(),
            value,
        }
    }

    pub fn all(conditions: Vec<Condition>) -> Self {
        Self::All { conditions }
    }

    pub fn any(conditions: Vec<Condition>) -> Self {
        Self::Any { conditions }
    }

    /// Reject malformed conditions (bad regexes) at configuration time,
    /// so evaluation never has to report errors.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Pattern { pattern, .. } => {
                Regex::new(pattern)
                    .map_err(|e| CadreError::Config(format!("invalid pattern '{}': {}", pattern, e)))?;
                Ok(())
            }
            Self::All { conditions } | Self::Any { conditions } => {
                for c in conditions {
                    c.validate()?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Evaluate against an input string and optional conversation context.
    /// Unmatchable conditions (missing metadata, invalid regex) are false.
    pub fn matches(&self, input: &str, context: Option<&ConversationContext>) -> bool {
        match self {
            Self::Keywords { any_of } => {
                let lower = input.to_lowercase();
                any_of.iter().any(|kw| lower.contains(&kw.to_lowercase()))
            }
            Self::Pattern { pattern, compiled } => compiled
                .get_or_init(|| Regex::new(pattern).ok())
                .as_ref()
                .is_some_and(|re| re.is_match(input)),
            Self::MetadataEquals { key, value } => context
                .and_then(|ctx| ctx.metadata.get(key))
                .is_some_and(|v| v == value),
            Self::All { conditions } => conditions.iter().all(|c| c.matches(input, context)),
            Self::Any { conditions } => conditions.iter().any(|c| c.matches(input, context)),
        }
    }
}
