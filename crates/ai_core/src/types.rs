//! Common data structures shared by training and serving

use crate::errors::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of disposition classes every model in the ensemble predicts.
pub const N_CLASSES: usize = 3;

/// Astrophysical disposition of a transit signal.
///
/// The integer encoding is part of the artifact contract: probability vectors are
/// always ordered by `index()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Disposition {
    FalsePositive = 0,
    Candidate = 1,
    Confirmed = 2,
}

impl Disposition {
    /// All dispositions in encoding order.
    pub const ALL: [Disposition; N_CLASSES] = [
        Disposition::FalsePositive,
        Disposition::Candidate,
        Disposition::Confirmed,
    ];

    /// Parse a catalog label. Surrounding whitespace is ignored, nothing else is.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim() {
            "CONFIRMED" => Some(Disposition::Confirmed),
            "CANDIDATE" => Some(Disposition::Candidate),
            "FALSE POSITIVE" => Some(Disposition::FalsePositive),
            _ => None,
        }
    }

    /// Catalog spelling of the label (what `from_label` accepts).
    pub fn label(self) -> &'static str {
        match self {
            Disposition::FalsePositive => "FALSE POSITIVE",
            Disposition::Candidate => "CANDIDATE",
            Disposition::Confirmed => "CONFIRMED",
        }
    }

    /// Class name used in artifacts and prediction responses.
    pub fn class_name(self) -> &'static str {
        match self {
            Disposition::FalsePositive => "FALSE_POSITIVE",
            Disposition::Candidate => "CANDIDATE",
            Disposition::Confirmed => "CONFIRMED",
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Result<Self> {
        Self::ALL
            .get(index)
            .copied()
            .ok_or_else(|| CoreError::InvalidLabel(index.to_string()))
    }
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.class_name())
    }
}

/// Ordered class names, matching the disposition encoding.
pub fn class_names() -> Vec<String> {
    Disposition::ALL
        .iter()
        .map(|d| d.class_name().to_string())
        .collect()
}

/// Survey mission a catalog row came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Source {
    K2 = 0,
    Kepler = 1,
    Tess = 2,
}

impl Source {
    pub fn name(self) -> &'static str {
        match self {
            Source::K2 => "K2",
            Source::Kepler => "KEPLER",
            Source::Tess => "TESS",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
