//! Areas.
//!
//! An area owns its primary objects (buses, links, relays, nested areas)
//! and fans residual/Jacobian/root calls out to them. Alerts travel the
//! other way: children alert the area, the area alerts its parent, and the
//! simulation at the root reacts.

use serde::{Deserialize, Serialize};

use crate::object::ObjectId;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Area {
    /// Owned primaries in insertion order.
    pub primaries: Vec<ObjectId>,
}

impl Area {
    pub fn new() -> Area {
        Area::default()
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.primaries.contains(&id)
    }
}
