//! Field provenance — who created a schema field.

use crate::ids::DeviceId;
use serde::{Deserialize, Serialize};

/// Origin of a schema field.
///
/// Built-in fields are `System` rather than a zeroed device identifier, so
/// a legitimately generated `DeviceId` can never collide with the sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Provenance {
    /// Shipped with the app; attributable to no device.
    System,
    /// Created by a user on a specific device.
    Device { device_id: DeviceId },
}

impl Provenance {
    pub fn is_system(&self) -> bool {
        matches!(self, Self::System)
    }
}
