//! Cloud and device records.
//!
//! Only the fields the tool reads are typed; everything else the cloud returns is kept in
//! `extra` so that a cache rewrite does not lose data.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// =====================
// Cloud session
// =====================

/// Session returned by a successful login. Persisted as `user_data` in the cache file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserData {
    pub token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rruid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    pub rriot: RRiot,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// IoT credentials used to sign requests against the home API (Hawk scheme).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RRiot {
    /// Hawk id
    pub u: String,
    /// Session
    pub s: String,
    /// HMAC key
    pub h: String,
    pub k: String,
    pub r: RRiotReference,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RRiotReference {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r: Option<String>,
    /// Base URL of the home API.
    pub a: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub m: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub l: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// =====================
// Home snapshot
// =====================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HomeData {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub rooms: Vec<HomeRoom>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HomeRoom {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// =====================
// Cloud API envelopes
// =====================

/// Envelope of the account API (`/api/v1/...`).
#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse<T> {
    pub code: Option<i64>,
    #[serde(default)]
    pub msg: Option<String>,
    pub data: Option<T>,
}

/// Envelope of the home API (`/v3/user/homes/...`).
#[derive(Debug, Clone, Deserialize)]
pub struct IotResponse<T> {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub status: Option<String>,
    pub result: Option<T>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BaseUrl {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HomeDetail {
    pub rr_home_id: i64,
}

// =====================
// Local device
// =====================

/// One region of the vacuum's map and the cloud room it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomMapping {
    pub segment_id: i64,
    pub iot_id: String,
}

/// Everything needed to address a vacuum on the local network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub duid: String,
    pub name: String,
    pub local_key: String,
    pub product_id: String,
    pub model: String,
    pub host: std::net::Ipv4Addr,
}
