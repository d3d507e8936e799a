//! Object identity.
//!
//! Every modeled entity carries a unique id (monotonic per network), a
//! user-assigned id, a name, and a weak parent handle. Arena handles are
//! generation-counted so a handle to a removed object is detected as stale
//! instead of silently pointing at a re-used slot.

use grid_base::{OpFlags, Time};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Generation-counted handle into the component arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}g{}", self.index, self.generation)
    }
}

/// Identity and lifecycle bookkeeping common to every component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectInfo {
    /// Unique id; never changes once assigned.
    pub uid: u64,
    /// User-assigned id for type-scoped lookup.
    pub user_id: u32,
    pub name: String,
    /// Weak back-reference; ownership is the arena slot.
    pub parent: Option<ObjectId>,
    pub flags: OpFlags,
    /// Last time this component was advanced.
    pub prev_time: Time,
    pub next_update_time: Time,
    pub last_update_time: Time,
    pub update_period: Time,
}

impl ObjectInfo {
    pub fn new(uid: u64, name: String) -> ObjectInfo {
        ObjectInfo {
            uid,
            user_id: 0,
            name,
            parent: None,
            flags: OpFlags::default(),
            prev_time: Time::NEG,
            next_update_time: Time::MAX,
            last_update_time: Time::NEG,
            update_period: Time::MAX,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.flags.contains(OpFlags::ENABLED)
    }

    pub fn is_disconnected(&self) -> bool {
        self.flags.contains(OpFlags::DISCONNECTED)
    }

    pub fn has_updates(&self) -> bool {
        self.flags.contains(OpFlags::UPDATES_ENABLED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn info_defaults() {
        let info = ObjectInfo::new(7, "bus_1".to_string());
        assert_eq!(info.uid, 7);
        assert!(info.is_enabled());
        assert!(!info.is_disconnected());
        assert_eq!(info.next_update_time, Time::MAX);
        assert!(info.parent.is_none());
    }
}
