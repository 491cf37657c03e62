use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::LlmError;

/// The structured operations the gateway knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Detect,
    Parse,
    Hint,
    Normalize,
    Check,
    Analogue,
    Ocr,
}

impl Operation {
    pub const ALL: [Operation; 7] = [
        Operation::Detect,
        Operation::Parse,
        Operation::Hint,
        Operation::Normalize,
        Operation::Check,
        Operation::Analogue,
        Operation::Ocr,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Detect => "detect",
            Operation::Parse => "parse",
            Operation::Hint => "hint",
            Operation::Normalize => "normalize",
            Operation::Check => "check",
            Operation::Analogue => "analogue",
            Operation::Ocr => "ocr",
        }
    }

    /// Operations whose only input is a page image.
    pub fn requires_image(&self) -> bool {
        matches!(self, Operation::Detect | Operation::Parse | Operation::Ocr)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = LlmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_ascii_lowercase();
        Operation::ALL
            .into_iter()
            .find(|op| op.as_str() == name)
            .ok_or_else(|| LlmError::UnknownSchema(s.to_string()))
    }
}

/// Parallel API deployments. Each version has its own prompts, schemas and result types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ApiVersion {
    #[default]
    V1,
    V2,
}

impl ApiVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiVersion::V1 => "v1",
            ApiVersion::V2 => "v2",
        }
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hint depth. L1 is a gentle nudge, L3 spells out the method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum HintLevel {
    L1,
    L2,
    L3,
}

impl HintLevel {
    pub fn number(&self) -> u8 {
        match self {
            HintLevel::L1 => 1,
            HintLevel::L2 => 2,
            HintLevel::L3 => 3,
        }
    }

    pub fn from_number(n: u8) -> Option<Self> {
        match n {
            1 => Some(HintLevel::L1),
            2 => Some(HintLevel::L2),
            3 => Some(HintLevel::L3),
            _ => None,
        }
    }

    pub fn next(&self) -> Option<Self> {
        Self::from_number(self.number() + 1)
    }

    /// Vocabulary the hint may use when the caller did not ask for a specific one.
    pub fn default_terminology(&self) -> TerminologyLevel {
        match self {
            HintLevel::L1 => TerminologyLevel::None,
            HintLevel::L2 => TerminologyLevel::Light,
            HintLevel::L3 => TerminologyLevel::Teacher,
        }
    }
}

impl fmt::Display for HintLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.number())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminologyLevel {
    None,
    Light,
    Teacher,
}

/// Sampling parameters sent with a structured call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Sampling {
    pub temperature: f32,
    pub top_p: Option<f32>,
    pub presence_penalty: Option<f32>,
    pub frequency_penalty: Option<f32>,
}

impl Sampling {
    /// Deterministic decoding used by every operation except graded hints.
    pub const fn deterministic() -> Self {
        Self {
            temperature: 0.0,
            top_p: None,
            presence_penalty: None,
            frequency_penalty: None,
        }
    }

    pub fn is_deterministic(&self) -> bool {
        self.temperature == 0.0
            && self.top_p.is_none()
            && self.presence_penalty.is_none()
            && self.frequency_penalty.is_none()
    }
}

impl Default for Sampling {
    fn default() -> Self {
        Self::deterministic()
    }
}

/// Static description of a configured engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineDescriptor {
    pub name: String,
    pub model: String,
    pub vision: bool,
}
