//! Recovery of structured directives from free-form decision-source replies.
//!
//! Replies are expected to hold one JSON object but routinely arrive wrapped in
//! prose or code fences, with trailing commas or unquoted keys. [`repair`] runs
//! an ordered list of parse attempts and stops at the first one that yields the
//! requested type:
//!
//! 1. the whole text,
//! 2. the span from the first `{` to the last `}`,
//! 3. that span after each textual repair in [`REPAIRS`], applied cumulatively.
//!
//! Nothing outside the detected object span is ever rewritten.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

/// Phase names that mean "no more work".
const DONE_SENTINELS: [&str; 2] = ["none", "done"];

static TRAILING_COMMA_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",\s*\}").expect("valid trailing comma pattern"));

static BARE_KEY_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([{,]\s*)(phase|module|params|reason|action)\s*:")
        .expect("valid bare key pattern")
});

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RepairError {
    #[error("No valid directive found in reply ({attempts} parse attempts)")]
    NoValidDirective { attempts: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairKind {
    TrailingCommas,
    BareKeys,
}

impl fmt::Display for RepairKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TrailingCommas => write!(f, "trailing commas"),
            Self::BareKeys => write!(f, "bare keys"),
        }
    }
}

/// Which attempt produced the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairStage {
    Whole,
    Extracted,
    Repaired(RepairKind),
}

type RepairFn = fn(&str) -> String;

/// Textual repairs, in the order they are applied.
pub const REPAIRS: &[(RepairKind, RepairFn)] = &[
    (RepairKind::TrailingCommas, strip_trailing_commas),
    (RepairKind::BareKeys, quote_bare_keys),
];

#[derive(Debug, Clone, PartialEq)]
pub struct Repaired<T> {
    pub value: T,
    pub stage: RepairStage,
}

/// Drop commas that directly precede a closing brace.
pub fn strip_trailing_commas(candidate: &str) -> String {
    TRAILING_COMMA_REGEX.replace_all(candidate, "}").into_owned()
}

/// Quote the known directive keys when they appear unquoted.
pub fn quote_bare_keys(candidate: &str) -> String {
    BARE_KEY_REGEX
        .replace_all(candidate, "$1\"$2\":")
        .into_owned()
}

/// Span from the first `{` to the last `}`, if there is one.
pub fn object_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Recover a `T` from `text`, trying progressively more invasive attempts.
pub fn repair<T: DeserializeOwned>(text: &str) -> Result<Repaired<T>, RepairError> {
    let mut attempts = 1;
    if let Ok(value) = serde_json::from_str::<T>(text) {
        return Ok(Repaired {
            value,
            stage: RepairStage::Whole,
        });
    }

    let Some(span) = object_span(text) else {
        return Err(RepairError::NoValidDirective { attempts });
    };

    attempts += 1;
    if let Ok(value) = serde_json::from_str::<T>(span) {
        return Ok(Repaired {
            value,
            stage: RepairStage::Extracted,
        });
    }

    let mut candidate = span.to_string();
    for (kind, apply) in REPAIRS {
        candidate = apply(&candidate);
        attempts += 1;
        if let Ok(value) = serde_json::from_str::<T>(&candidate) {
            return Ok(Repaired {
                value,
                stage: RepairStage::Repaired(*kind),
            });
        }
    }

    Err(RepairError::NoValidDirective { attempts })
}

/// `{phase, params, reason}` as sent back by the decision source.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Directive {
    #[serde(alias = "module")]
    pub phase: String,
    #[serde(default)]
    pub params: Option<Value>,
    #[serde(default)]
    pub reason: String,
}

impl Directive {
    pub fn is_done(&self) -> bool {
        let phase = self.phase.trim();
        DONE_SENTINELS
            .iter()
            .any(|sentinel| phase.eq_ignore_ascii_case(sentinel))
    }

    /// Params as a mapping; anything that is not an object becomes empty.
    pub fn params(&self) -> Map<String, Value> {
        match &self.params {
            Some(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryKind {
    Retry,
    Skip,
    Alternative,
    Unrecognized,
}

/// `{action, phase?, reason}` as sent back for a recovery request.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RecoveryReply {
    pub action: String,
    #[serde(default, alias = "module")]
    pub phase: Option<String>,
    #[serde(default)]
    pub reason: String,
}

impl RecoveryReply {
    pub fn kind(&self) -> RecoveryKind {
        match self.action.trim().to_ascii_lowercase().as_str() {
            "retry" => RecoveryKind::Retry,
            "skip" => RecoveryKind::Skip,
            "alternative" => RecoveryKind::Alternative,
            _ => RecoveryKind::Unrecognized,
        }
    }

    /// Named phase, ignoring blanks and the done sentinels.
    pub fn named_phase(&self) -> Option<&str> {
        self.phase
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .filter(|p| !DONE_SENTINELS.iter().any(|s| p.eq_ignore_ascii_case(s)))
    }
}
