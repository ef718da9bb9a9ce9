//! Application package domain types

use serde::{Deserialize, Serialize};

use crate::domain::pool::NodePlatform;

/// An application package installed on every pool node
///
/// Loaded once per submission and shared read-only by task generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationDescriptor {
    pub id: String,
    pub version: String,

    /// Executable path relative to the package root
    pub executable: String,
}

impl ApplicationDescriptor {
    /// Name of the environment variable the compute node exposes for the
    /// package install directory
    pub fn package_variable(&self, platform: NodePlatform) -> String {
        match platform {
            NodePlatform::Windows => {
                format!("AZ_BATCH_APP_PACKAGE_{}#{}", self.id, self.version)
            }
            NodePlatform::Linux => {
                let sanitize = |s: &str| -> String {
                    s.chars()
                        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
                        .collect()
                };
                format!(
                    "AZ_BATCH_APP_PACKAGE_{}_{}",
                    sanitize(&self.id),
                    sanitize(&self.version)
                )
            }
        }
    }
}

impl std::fmt::Display for ApplicationDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.id, self.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app() -> ApplicationDescriptor {
        ApplicationDescriptor {
            id: "stamp-app".to_string(),
            version: "1.0".to_string(),
            executable: "stamp.exe".to_string(),
        }
    }

    #[test]
    fn test_windows_package_variable() {
        assert_eq!(
            app().package_variable(NodePlatform::Windows),
            "AZ_BATCH_APP_PACKAGE_stamp-app#1.0"
        );
    }

    #[test]
    fn test_linux_package_variable_is_sanitized() {
        assert_eq!(
            app().package_variable(NodePlatform::Linux),
            "AZ_BATCH_APP_PACKAGE_stamp_app_1_0"
        );
    }
}
