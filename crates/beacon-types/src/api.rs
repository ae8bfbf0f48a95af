use serde::{Deserialize, Serialize};

use crate::status::StatusRecord;

// -- Badge --

/// Shields.io endpoint badge payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BadgeResponse {
    pub schema_version: u8,
    pub label: String,
    pub message: String,
    pub color: String,
    pub is_error: bool,
    pub named_logo: String,
    pub logo_color: String,
    pub style: String,
}

impl From<&StatusRecord> for BadgeResponse {
    fn from(record: &StatusRecord) -> Self {
        Self {
            schema_version: 1,
            label: "Discord".into(),
            message: record.message().into(),
            color: record.color().as_str().into(),
            is_error: false,
            named_logo: "discord".into(),
            logo_color: "white".into(),
            style: "flat-square".into(),
        }
    }
}

// -- Refresh / introspection --

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum RefreshResponse {
    Success { record: StatusRecord },
    Error { message: String },
}
