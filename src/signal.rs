//! Feedback signals a user can give about a tag.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Binary feedback on one (content, label) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackSignal {
    /// The tag is correct.
    #[serde(alias = "positive")]
    Affirm,
    /// The tag is wrong.
    #[serde(alias = "negative")]
    Reject,
    /// The user added this label themselves.
    #[serde(alias = "custom")]
    Introduce,
}

/// A signal string that is not one of the known spellings.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid feedback signal: {0:?}")]
pub struct InvalidSignal(pub String);

impl FeedbackSignal {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedbackSignal::Affirm => "affirm",
            FeedbackSignal::Reject => "reject",
            FeedbackSignal::Introduce => "introduce",
        }
    }

    /// Also accepts `positive`, `negative` and `custom`, the spellings used by
    /// exports of older tagger versions.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "affirm" | "positive" => Some(FeedbackSignal::Affirm),
            "reject" | "negative" => Some(FeedbackSignal::Reject),
            "introduce" | "custom" => Some(FeedbackSignal::Introduce),
            _ => None,
        }
    }

    /// Logistic regression target for this signal.
    pub fn target(&self) -> f64 {
        match self {
            FeedbackSignal::Affirm | FeedbackSignal::Introduce => 1.0,
            FeedbackSignal::Reject => 0.0,
        }
    }
}

impl FromStr for FeedbackSignal {
    type Err = InvalidSignal;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| InvalidSignal(s.to_string()))
    }
}

impl fmt::Display for FeedbackSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
