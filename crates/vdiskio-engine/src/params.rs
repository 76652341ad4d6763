//! Connection and initialization parameters
//!
//! The connect call accepts one of three mutually exclusive credential
//! shapes. Upstream engines drive the selection with two boolean
//! discriminators over three positional string arguments; here the
//! result is a sum type, so a parameter block can never carry a mixture
//! of variants.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Credential shape consumed by the connect operation
///
/// Exactly one variant is populated per connection attempt.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Credentials {
    /// Username/password login
    UserPassword { username: String, password: String },
    /// A previously established session, carried as a cookie
    SessionCookie {
        cookie: String,
        username: String,
        key: String,
    },
    /// A managed object addressed by id within a datastore
    ManagedObject {
        id: String,
        datastore: String,
        /// Snapshot to attach to; `None` means the live object
        snapshot_id: Option<String>,
    },
}

impl Credentials {
    /// Select the credential variant from three positional arguments and
    /// two discriminator flags, the way the engine's native parameter
    /// helper does.
    ///
    /// `is_fcd` wins: `arg1` becomes the object id, `arg2` the datastore,
    /// and `arg3` the snapshot id only when non-empty (an empty snapshot
    /// id means "unset", not an empty string). Otherwise `is_session`
    /// selects the cookie shape (`arg1` cookie, `arg2` username, `arg3`
    /// key). In the remaining username/password shape `arg1` is unused;
    /// the variant carries only the two fields it reads.
    ///
    /// No well-formedness validation happens here; malformed identities
    /// surface when the connect call reaches the engine.
    #[must_use]
    pub fn from_args(arg1: &str, arg2: &str, arg3: &str, is_fcd: bool, is_session: bool) -> Self {
        if is_fcd {
            Self::ManagedObject {
                id: arg1.to_string(),
                datastore: arg2.to_string(),
                snapshot_id: if arg3.is_empty() {
                    None
                } else {
                    Some(arg3.to_string())
                },
            }
        } else if is_session {
            Self::SessionCookie {
                cookie: arg1.to_string(),
                username: arg2.to_string(),
                key: arg3.to_string(),
            }
        } else {
            Self::UserPassword {
                username: arg2.to_string(),
                password: arg3.to_string(),
            }
        }
    }

    /// Username/password credentials
    #[must_use]
    pub fn user_password(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::UserPassword {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Managed-object credentials without a snapshot
    #[must_use]
    pub fn managed_object(id: impl Into<String>, datastore: impl Into<String>) -> Self {
        Self::ManagedObject {
            id: id.into(),
            datastore: datastore.into(),
            snapshot_id: None,
        }
    }
}

/// Parameter block consumed (read-only) by the connect operation
///
/// Caller-owned; constructed once and read by a single connect attempt.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectSpec {
    /// Backend server name or address; empty for a local backend
    pub server: String,
    /// Certificate thumbprint pinned for the server; empty to skip pinning
    pub thumbprint: String,
    /// Credential variant for this attempt
    pub credentials: Credentials,
}

impl ConnectSpec {
    /// Parameter block for a local backend with the given credentials
    #[must_use]
    pub fn local(credentials: Credentials) -> Self {
        Self {
            server: String::new(),
            thumbprint: String::new(),
            credentials,
        }
    }
}

/// Library initialization parameters
///
/// Consumed once before any connection is attempted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitSpec {
    /// Expected engine major version
    pub major: u32,
    /// Expected engine minor version
    pub minor: u32,
    /// Directory the engine's support files are installed under
    pub lib_dir: String,
    /// Optional engine configuration file
    #[serde(default)]
    pub config_file: Option<String>,
}

impl InitSpec {
    /// Load init parameters from a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

impl Default for InitSpec {
    fn default() -> Self {
        Self {
            major: 1,
            minor: 0,
            lib_dir: String::new(),
            config_file: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fcd_discriminator_wins() {
        // is_session is ignored once is_fcd is set
        let creds = Credentials::from_args("vol-1", "ds-1", "snap-9", true, true);
        assert_eq!(
            creds,
            Credentials::ManagedObject {
                id: "vol-1".into(),
                datastore: "ds-1".into(),
                snapshot_id: Some("snap-9".into()),
            }
        );
    }

    #[test]
    fn test_empty_snapshot_stays_unset() {
        let creds = Credentials::from_args("vol-1", "ds-1", "", true, false);
        let Credentials::ManagedObject { snapshot_id, .. } = creds else {
            panic!("expected managed-object credentials");
        };
        assert_eq!(snapshot_id, None);
    }

    #[test]
    fn test_session_shape() {
        let creds = Credentials::from_args("c0ffee", "admin", "k", false, true);
        assert_eq!(
            creds,
            Credentials::SessionCookie {
                cookie: "c0ffee".into(),
                username: "admin".into(),
                key: "k".into(),
            }
        );
    }

    #[test]
    fn test_init_spec_from_json_file() {
        use std::io::Write as _;

        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(
            file,
            r#"{{"major": 8, "minor": 0, "lib_dir": "/opt/engine/lib64"}}"#
        )
        .expect("write");

        let spec = InitSpec::from_json_file(file.path()).expect("load");
        assert_eq!((spec.major, spec.minor), (8, 0));
        assert_eq!(spec.lib_dir, "/opt/engine/lib64");
        assert_eq!(spec.config_file, None);
    }

    #[test]
    fn test_uid_shape_ignores_arg1() {
        let creds = Credentials::from_args("ignored", "admin", "secret", false, false);
        assert_eq!(
            creds,
            Credentials::UserPassword {
                username: "admin".into(),
                password: "secret".into(),
            }
        );
    }
}
