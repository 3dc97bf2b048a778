use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumCount, EnumIter, EnumString, FromRepr, IntoStaticStr};

/// Diagnostic classes, in the classifier's output-index order.
///
/// The discriminants are the output indices the classifier was trained with,
/// so variants must never be reordered, renamed or added without retraining.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    AsRefStr,
    IntoStaticStr,
    EnumString,
    EnumIter,
    EnumCount,
    FromRepr,
)]
#[repr(usize)]
pub enum Category {
    #[serde(rename = "Acne")]
    #[strum(serialize = "Acne")]
    Acne = 0,
    #[serde(rename = "Eczema")]
    #[strum(serialize = "Eczema")]
    Eczema = 1,
    #[serde(rename = "Hair Loss, Alopecia")]
    #[strum(serialize = "Hair Loss, Alopecia")]
    HairLossAlopecia = 2,
    #[serde(rename = "Nail Fungus")]
    #[strum(serialize = "Nail Fungus")]
    NailFungus = 3,
    #[serde(rename = "Scabies")]
    #[strum(serialize = "Scabies")]
    Scabies = 4,
}

impl Category {
    pub fn from_index(index: usize) -> Option<Self> {
        Self::from_repr(index)
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn labels() -> Vec<&'static str> {
        use strum::IntoEnumIterator;
        Self::iter().map(|c| c.label()).collect()
    }

    pub fn label(self) -> &'static str {
        self.into()
    }
}

/// Body of a successful `POST /predict`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PredictionResponse {
    pub disease: Category,
    /// Percentage in [0, 100], rounded to two decimals.
    pub confidence: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct HealthResponse {
    pub status: String,
    pub labels: Vec<String>,
}
