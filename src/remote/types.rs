//! Request and response records for the publishing API.
//!
//! All structs derive `Serialize`/`Deserialize` matching the JSON the service
//! exchanges. The upload slot is stored verbatim on the work item so the
//! browser-style form upload can be replayed after a restart.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Body of the record-creation request (POST /things).
///
/// Everything but `name` comes from the configured record defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRecord {
    pub name: String,
    pub license: String,
    pub category: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub is_wip: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// Response from record creation. Only the assigned id matters downstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordCreated {
    pub id: u64,
    #[serde(default)]
    pub name: String,
}

/// An upload slot granted by the service: a storage endpoint URL plus the
/// signed form fields that must accompany the file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadSlot {
    /// Where to POST the multipart form.
    pub action: String,
    /// Signed fields, posted before the file part. Includes
    /// `success_action_redirect`, the URL that finalizes the upload.
    pub fields: BTreeMap<String, String>,
}

impl UploadSlot {
    /// The finalize URL embedded in the slot, if the service provided one.
    pub fn finalize_url(&self) -> Option<&str> {
        self.fields.get("success_action_redirect").map(String::as_str)
    }
}

/// Response from the connectivity probe (GET /users/me).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserInfo {
    pub name: String,
    #[serde(default)]
    pub id: Option<u64>,
}
