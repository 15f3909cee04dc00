use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::Flags;

/// The kind of value a parameter holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    Bool,
    Int,
    Float,
    Str,
    Floats,
    Densities,
    Flags,
}

/// A parameter value.
///
/// [`Value::None`] is accepted by every parameter and means "not set".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum Value {
    #[default]
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Floats(Vec<f64>),
    /// Number densities keyed by nuclide name, in atoms/barn-cm.
    Densities(BTreeMap<String, f64>),
    Flags(Flags),
}

impl Value {
    /// Returns the kind of this value, or `None` for [`Value::None`].
    #[must_use]
    pub fn kind(&self) -> Option<ValueKind> {
        match self {
            Self::None => None,
            Self::Bool(_) => Some(ValueKind::Bool),
            Self::Int(_) => Some(ValueKind::Int),
            Self::Float(_) => Some(ValueKind::Float),
            Self::Str(_) => Some(ValueKind::Str),
            Self::Floats(_) => Some(ValueKind::Floats),
            Self::Densities(_) => Some(ValueKind::Densities),
            Self::Flags(_) => Some(ValueKind::Flags),
        }
    }

    #[must_use]
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Returns a numeric scalar as `f64`.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(x) => Some(*x),
            #[allow(clippy::cast_precision_loss)]
            Self::Int(n) => Some(*n as f64),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_floats(&self) -> Option<&[f64]> {
        match self {
            Self::Floats(values) => Some(values),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_densities(&self) -> Option<&BTreeMap<String, f64>> {
        match self {
            Self::Densities(densities) => Some(densities),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_flags(&self) -> Option<Flags> {
        match self {
            Self::Flags(flags) => Some(*flags),
            _ => None,
        }
    }

    /// Equality with floats compared by bit pattern, so NaN matches NaN and
    /// `0.0` differs from `-0.0`.
    #[must_use]
    pub fn bitwise_eq(&self, other: &Self) -> bool {
        fn same(a: f64, b: f64) -> bool {
            a.to_bits() == b.to_bits()
        }
        match (self, other) {
            (Self::Float(a), Self::Float(b)) => same(*a, *b),
            (Self::Floats(a), Self::Floats(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| same(*x, *y))
            }
            (Self::Densities(a), Self::Densities(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .zip(b)
                        .all(|((ka, va), (kb, vb))| ka == kb && same(*va, *vb))
            }
            _ => self == other,
        }
    }

    /// Multiplies every numeric entry by `factor`, returning `None` for
    /// non-numeric values.
    #[must_use]
    pub fn scaled(&self, factor: f64) -> Option<Self> {
        match self {
            Self::Float(x) => Some(Self::Float(x * factor)),
            Self::Floats(values) => Some(Self::Floats(values.iter().map(|v| v * factor).collect())),
            Self::None => Some(Self::None),
            _ => None,
        }
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Self::Float(x)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<Vec<f64>> for Value {
    fn from(values: Vec<f64>) -> Self {
        Self::Floats(values)
    }
}

impl From<BTreeMap<String, f64>> for Value {
    fn from(densities: BTreeMap<String, f64>) -> Self {
        Self::Densities(densities)
    }
}

impl From<Flags> for Value {
    fn from(flags: Flags) -> Self {
        Self::Flags(flags)
    }
}
