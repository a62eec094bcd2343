//! Label spaces for the two classifiers
//!
//! The jump-type set is closed and versioned: adding or reordering a jump
//! element requires bumping [`JUMP_TYPE_LABEL_SET_VERSION`], and artifacts
//! trained against another version are rejected at load time.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Version of the [`JumpType`] label set
pub const JUMP_TYPE_LABEL_SET_VERSION: u32 = 1;

/// Version of the [`LandingOutcome`] label set
pub const LANDING_OUTCOME_LABEL_SET_VERSION: u32 = 1;

/// A closed, ordered label space usable by a classifier
pub trait LabelSpace: Copy + Eq + fmt::Debug + 'static {
    /// All labels in class-index order
    const ALL: &'static [Self];
    const LABEL_SET_VERSION: u32;
    /// Classifier that predicts this label space
    const MODEL_TYPE: ModelType;

    fn name(self) -> &'static str;

    fn class_index(self) -> usize {
        Self::ALL.iter().position(|&l| l == self).unwrap_or(0)
    }

    fn from_class_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|l| l.name().eq_ignore_ascii_case(name))
    }

    fn names() -> Vec<String> {
        Self::ALL.iter().map(|l| l.name().to_string()).collect()
    }
}

/// Figure-skating jump elements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JumpType {
    Toeloop,
    Salchow,
    Loop,
    Flip,
    Lutz,
    Axel,
}

impl LabelSpace for JumpType {
    const ALL: &'static [Self] = &[
        JumpType::Toeloop,
        JumpType::Salchow,
        JumpType::Loop,
        JumpType::Flip,
        JumpType::Lutz,
        JumpType::Axel,
    ];
    const LABEL_SET_VERSION: u32 = JUMP_TYPE_LABEL_SET_VERSION;
    const MODEL_TYPE: ModelType = ModelType::Type;

    fn name(self) -> &'static str {
        match self {
            JumpType::Toeloop => "toeloop",
            JumpType::Salchow => "salchow",
            JumpType::Loop => "loop",
            JumpType::Flip => "flip",
            JumpType::Lutz => "lutz",
            JumpType::Axel => "axel",
        }
    }
}

impl JumpType {
    /// Revolution count a coach would declare for this jump
    ///
    /// Axels take off forwards and carry an extra half revolution. Returns
    /// `None` when the measured rotation is too small to be a real jump.
    pub fn declared_revolutions(self, measured_revs: f64) -> Option<f64> {
        if !measured_revs.is_finite() {
            return None;
        }
        match self {
            JumpType::Axel if measured_revs > 0.8 => Some((measured_revs - 0.7).ceil() + 0.5),
            JumpType::Axel => None,
            _ if measured_revs > 0.5 => {
                let bias = if measured_revs < 2.0 { 0.3 } else { 0.15 };
                Some((measured_revs - bias).ceil())
            }
            _ => None,
        }
    }
}

impl fmt::Display for JumpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Landing outcome of a jump attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LandingOutcome {
    Landed,
    Fall,
}

impl LabelSpace for LandingOutcome {
    const ALL: &'static [Self] = &[LandingOutcome::Landed, LandingOutcome::Fall];
    const LABEL_SET_VERSION: u32 = LANDING_OUTCOME_LABEL_SET_VERSION;
    const MODEL_TYPE: ModelType = ModelType::Success;

    fn name(self) -> &'static str {
        match self {
            LandingOutcome::Landed => "landed",
            LandingOutcome::Fall => "fall",
        }
    }
}

impl fmt::Display for LandingOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Which classifier a model artifact belongs to
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum ModelType {
    /// Jump-type classifier
    Type,
    /// Landing-success classifier
    Success,
}

impl ModelType {
    pub const ALL: [ModelType; 2] = [ModelType::Type, ModelType::Success];

    pub fn as_str(self) -> &'static str {
        match self {
            ModelType::Type => "type",
            ModelType::Success => "success",
        }
    }

    /// Class names in class-index order
    pub fn label_names(self) -> Vec<String> {
        match self {
            ModelType::Type => JumpType::names(),
            ModelType::Success => LandingOutcome::names(),
        }
    }

    pub fn label_set_version(self) -> u32 {
        match self {
            ModelType::Type => JumpType::LABEL_SET_VERSION,
            ModelType::Success => LandingOutcome::LABEL_SET_VERSION,
        }
    }

    /// Class index of the label relevant to this model, if present
    pub fn class_of(self, labels: &JumpLabels) -> Option<usize> {
        match self {
            ModelType::Type => labels.jump_type.map(LabelSpace::class_index),
            ModelType::Success => labels.success.map(LabelSpace::class_index),
        }
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Model type selector other than `type` or `success`
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown model type '{0}' (expected 'type' or 'success')")]
pub struct ParseModelTypeError(pub String);

impl FromStr for ModelType {
    type Err = ParseModelTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "type" => Ok(ModelType::Type),
            "success" => Ok(ModelType::Success),
            other => Err(ParseModelTypeError(other.to_string())),
        }
    }
}

/// Human or model assigned labels of one segment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JumpLabels {
    #[serde(default)]
    pub jump_type: Option<JumpType>,
    #[serde(default)]
    pub success: Option<LandingOutcome>,
}

impl JumpLabels {
    pub fn new(jump_type: Option<JumpType>, success: Option<LandingOutcome>) -> Self {
        Self { jump_type, success }
    }

    pub fn is_empty(&self) -> bool {
        self.jump_type.is_none() && self.success.is_none()
    }
}
