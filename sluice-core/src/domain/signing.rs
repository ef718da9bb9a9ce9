//! Signed resource URLs
//!
//! A signed URL grants time-bounded, permission-scoped access to a container
//! or an object without a separate credential exchange.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Access rights embedded in a signature
///
/// Rendered in the fixed `r`, `w`, `l` order expected by the blob service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Permissions {
    pub read: bool,
    pub write: bool,
    pub list: bool,
}

impl Permissions {
    pub const READ: Permissions = Permissions {
        read: true,
        write: false,
        list: false,
    };

    pub const READ_LIST: Permissions = Permissions {
        read: true,
        write: false,
        list: true,
    };

    pub const READ_WRITE_LIST: Permissions = Permissions {
        read: true,
        write: true,
        list: true,
    };

    /// Returns true when no right is granted
    pub fn is_empty(&self) -> bool {
        !self.read && !self.write && !self.list
    }

    /// Returns true when every right in `other` is also granted here
    pub fn contains(&self, other: Permissions) -> bool {
        (!other.read || self.read) && (!other.write || self.write) && (!other.list || self.list)
    }

    /// Signed-permission string, e.g. `rl`
    pub fn as_signed_string(&self) -> String {
        let mut out = String::with_capacity(3);
        if self.read {
            out.push('r');
        }
        if self.write {
            out.push('w');
        }
        if self.list {
            out.push('l');
        }
        out
    }

    /// Parses a signed-permission string, rejecting unknown letters
    pub fn parse(value: &str) -> Option<Self> {
        let mut permissions = Permissions::default();
        for c in value.chars() {
            match c {
                'r' => permissions.read = true,
                'w' => permissions.write = true,
                'l' => permissions.list = true,
                _ => return None,
            }
        }
        Some(permissions)
    }
}

impl std::fmt::Display for Permissions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_signed_string())
    }
}

/// A container or an object inside a container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResourceRef {
    Container { container: String },
    Object { container: String, name: String },
}

impl ResourceRef {
    pub fn container(container: impl Into<String>) -> Self {
        ResourceRef::Container {
            container: container.into(),
        }
    }

    pub fn object(container: impl Into<String>, name: impl Into<String>) -> Self {
        ResourceRef::Object {
            container: container.into(),
            name: name.into(),
        }
    }

    /// Name of the container this resource lives in
    pub fn container_name(&self) -> &str {
        match self {
            ResourceRef::Container { container } | ResourceRef::Object { container, .. } => {
                container
            }
        }
    }

    /// Path of the resource relative to the service endpoint
    pub fn path(&self) -> String {
        match self {
            ResourceRef::Container { container } => container.clone(),
            ResourceRef::Object { container, name } => format!("{}/{}", container, name),
        }
    }

    /// Signed-resource code: `c` for containers, `b` for objects
    pub fn kind_code(&self) -> &'static str {
        match self {
            ResourceRef::Container { .. } => "c",
            ResourceRef::Object { .. } => "b",
        }
    }
}

/// A URL carrying its own time-bounded access signature
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedUrl {
    pub url: String,
    pub permissions: Permissions,
    pub starts_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SignedUrl {
    /// Returns true if the signature is usable at `at`
    pub fn is_valid_at(&self, at: DateTime<Utc>) -> bool {
        self.starts_at <= at && at < self.expires_at
    }

    /// The URL without its query string
    pub fn base(&self) -> &str {
        self.url.split('?').next().unwrap_or(&self.url)
    }
}

impl std::fmt::Display for SignedUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print the signature itself
        write!(f, "{} [{} until {}]", self.base(), self.permissions, self.expires_at)
    }
}
