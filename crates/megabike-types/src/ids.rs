//! Type-safe identifier wrappers around [`Uuid`].
//!
//! Every entity in the simulation (agents, bikes, pickups, rules) has its own
//! strongly-typed ID so that an agent id can never be passed where a bike id
//! is expected. IDs are UUID v7, which makes them time-ordered: the `Ord`
//! implementation is what the voting code uses to break exact ties.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Generates a newtype wrapper around [`Uuid`] with standard derives.
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Create a new identifier using UUID v7 (time-ordered).
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            /// Return the inner [`Uuid`] value.
            pub const fn into_inner(self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

define_id! {
    /// Unique identifier for a biker agent.
    AgentId
}

define_id! {
    /// Unique identifier for a mega bike (the shared vehicle).
    BikeId
}

define_id! {
    /// Unique identifier for a resource pickup (loot box).
    PickupId
}

define_id! {
    /// Unique identifier for a governance rule.
    RuleId
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_distinct_types() {
        let agent = AgentId::new();
        let bike = BikeId::new();
        assert_ne!(agent.into_inner(), Uuid::nil());
        assert_ne!(bike.into_inner(), Uuid::nil());
    }

    #[test]
    fn ids_order_by_inner_uuid() {
        let low = PickupId::from(Uuid::from_u128(1));
        let high = PickupId::from(Uuid::from_u128(2));
        assert!(low < high);
    }

    #[test]
    fn id_roundtrip_serde() {
        let original = RuleId::new();
        let json = serde_json::to_string(&original).ok();
        assert!(json.is_some());
        let restored: Result<RuleId, _> = serde_json::from_str(json.as_deref().unwrap_or(""));
        assert_eq!(restored.ok(), Some(original));
    }

    #[test]
    fn id_display_matches_uuid() {
        let id = BikeId::new();
        assert_eq!(id.to_string(), id.into_inner().to_string());
    }
}
