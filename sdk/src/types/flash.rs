//! Directional flash flags.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// Transient marker showing how a value moved since it was last observed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlashDirection {
    /// Value increased.
    Up,
    /// Value decreased.
    Down,
    /// Unchanged, first observation, or already cleared.
    #[default]
    None,
}

impl FlashDirection {
    /// Classifies a change from `previous` to `current`.
    ///
    /// A missing previous value never flashes.
    #[must_use]
    pub fn between<T: PartialOrd>(previous: Option<&T>, current: &T) -> Self {
        match previous.and_then(|prev| current.partial_cmp(prev)) {
            Some(Ordering::Greater) => Self::Up,
            Some(Ordering::Less) => Self::Down,
            _ => Self::None,
        }
    }

    /// Returns true if a flash is showing.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        !matches!(self, Self::None)
    }
}
