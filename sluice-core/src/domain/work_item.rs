//! Work item domain type

use serde::{Deserialize, Serialize};

use crate::domain::signing::SignedUrl;

/// One discovered input object, processed once per configured application
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Read-signed URL of the source object
    pub source: SignedUrl,

    /// Object name relative to its container, without leading separators
    pub relative_name: String,
}

impl WorkItem {
    pub fn new(source: SignedUrl, name: &str) -> Self {
        Self {
            source,
            relative_name: normalize_relative_name(name),
        }
    }
}

/// Strips leading path separators so the name composes with destination paths
pub fn normalize_relative_name(name: &str) -> String {
    name.trim_start_matches(['/', '\\']).to_string()
}
