//! Values that may disagree across several targets.

use serde::{Deserialize, Serialize};

/// A value shared by every member of a set, or a marker that the members
/// disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Uniform<T> {
    Single(T),
    Heterogeneous,
}

impl<T: PartialEq + Copy> Uniform<T> {
    /// Combine two observations. Equal singles stay single.
    pub fn merge(self, other: Self) -> Self {
        match (self, other) {
            (Uniform::Single(a), Uniform::Single(b)) if a == b => Uniform::Single(a),
            _ => Uniform::Heterogeneous,
        }
    }

    /// Fold a sequence of values. `None` for an empty sequence.
    pub fn from_values(values: impl IntoIterator<Item = T>) -> Option<Self> {
        values
            .into_iter()
            .map(Uniform::Single)
            .reduce(Uniform::merge)
    }

    /// The shared value, if there is one.
    pub fn single(self) -> Option<T> {
        match self {
            Uniform::Single(v) => Some(v),
            Uniform::Heterogeneous => None,
        }
    }

    pub fn unwrap_or(self, default: T) -> T {
        self.single().unwrap_or(default)
    }

    pub fn is_heterogeneous(self) -> bool {
        matches!(self, Uniform::Heterogeneous)
    }
}

impl<T> From<T> for Uniform<T> {
    fn from(value: T) -> Self {
        Uniform::Single(value)
    }
}
