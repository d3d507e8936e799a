//! Operational flag bitset shared by every component.

use bitflags::bitflags;

bitflags! {
    /// Named boolean state of a component.
    ///
    /// Flags are additive and survive mode changes; the named-flag string
    /// surface (`set_flag`/`get_flag`) maps onto this set.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
    pub struct OpFlags: u32 {
        const ENABLED               = 1 << 0;
        const DISCONNECTED          = 1 << 1;
        /// The component wants periodic update calls.
        const UPDATES_ENABLED       = 1 << 2;
        /// Continuous (root-finding) relay operation; cleared = sampled.
        const CONTINUOUS            = 1 << 3;
        /// Triggered conditions contribute reset roots.
        const RESETTABLE            = 1 << 4;
        /// Relay conditions participate in power-flow checks.
        const POWER_FLOW_CHECKS     = 1 << 5;
        const HAS_POWERFLOW_ADJUSTMENTS = 1 << 6;
        const HAS_ROOTS             = 1 << 7;
        const HAS_ALG_ROOTS         = 1 << 8;
        const HAS_DIFF_STATES       = 1 << 9;
        /// Bus is electrically merged under another bus.
        const SLAVE_BUS             = 1 << 10;
        /// Bus should expose frequency as an output.
        const COMPUTE_FREQUENCY     = 1 << 11;
        /// Enable the low-voltage checking pass.
        const LOW_VOLTAGE_CHECK     = 1 << 12;
        /// A very-low-voltage alert was raised on the previous pass.
        const PREV_LOW_VOLTAGE_ALERT = 1 << 13;
        /// Breaker-specific: the breaker is currently tripped open.
        const BREAKER_TRIPPED       = 1 << 14;
        /// Relay observed its limit exceeded and is timing an action.
        const OVERLIMIT             = 1 << 15;
        /// Relay source is not a link (bus/load/generator source).
        const NONLINK_SOURCE        = 1 << 16;
        /// Fuse-specific: the fuse has blown.
        const BLOWN                 = 1 << 17;
        /// Sensor lists every input directly as an output.
        const DIRECT_IO             = 1 << 18;
        /// The object is searchable by name from the root.
        const SEARCHABLE            = 1 << 19;
    }
}

impl Default for OpFlags {
    fn default() -> Self {
        OpFlags::ENABLED
    }
}

impl OpFlags {
    /// Map a user-facing flag name to its bit, for the `set_flag` surface.
    /// Names are matched case-insensitively by the caller.
    pub fn from_flag_name(name: &str) -> Option<OpFlags> {
        match name {
            "enabled" => Some(OpFlags::ENABLED),
            "disconnected" => Some(OpFlags::DISCONNECTED),
            "continuous" => Some(OpFlags::CONTINUOUS),
            "resettable" => Some(OpFlags::RESETTABLE),
            "powerflow_check" | "powerflow_checks" => Some(OpFlags::POWER_FLOW_CHECKS),
            "compute_frequency" | "computefrequency" => Some(OpFlags::COMPUTE_FREQUENCY),
            "low_voltage_check" => Some(OpFlags::LOW_VOLTAGE_CHECK),
            "direct_io" => Some(OpFlags::DIRECT_IO),
            "searchable" => Some(OpFlags::SEARCHABLE),
            _ => None,
        }
    }
}
