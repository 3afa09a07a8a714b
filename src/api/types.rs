//! Remote resource records

use serde::{Deserialize, Serialize};

/// Summary of an owned resource, as returned by the listing endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSummary {
    /// Identity that owns the resource
    #[serde(default)]
    pub owner_id: u64,
    /// Resource id, the key for the detail lookup
    #[serde(alias = "planet_id")]
    pub resource_id: u64,
    /// Parent location id
    #[serde(alias = "solar_system_id")]
    pub location_id: u64,
    /// Upgrade level
    #[serde(default)]
    pub upgrade_level: u32,
    /// Number of pins placed on the resource
    #[serde(default)]
    pub num_pins: u32,
    /// Last time the owner touched the resource (RFC 3339)
    #[serde(default)]
    pub last_update: Option<String>,
    /// Resource type name
    #[serde(default, alias = "planet_type")]
    pub resource_type: Option<String>,
}

/// Cartesian position of a resource
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Detail record of a resource, looked up by id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDetail {
    /// Resource id, matches [`ResourceSummary::resource_id`]
    #[serde(alias = "planet_id")]
    pub id: u64,
    /// Display name
    pub name: String,
    /// Static type id
    pub type_id: u64,
    /// Position within the parent location
    #[serde(default)]
    pub position: Position,
    /// Parent location id
    #[serde(alias = "system_id")]
    pub location_id: u64,
}
