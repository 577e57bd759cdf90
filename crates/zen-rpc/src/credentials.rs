//! RPC credentials, read from the node's own `zen.conf` when not configured.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::RpcError;

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    /// Pull `rpcuser=` and `rpcpassword=` out of zen.conf text. Later lines
    /// win; comments and unrelated keys are ignored.
    pub fn parse_zen_conf(text: &str) -> Result<Self, RpcError> {
        let mut user = None;
        let mut password = None;
        for line in text.lines() {
            let line = line.trim();
            if line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            match key.trim() {
                "rpcuser" => user = Some(value.trim().to_string()),
                "rpcpassword" => password = Some(value.trim().to_string()),
                _ => {}
            }
        }
        Ok(Self {
            user: user.ok_or(RpcError::MissingCredential("user"))?,
            password: password.ok_or(RpcError::MissingCredential("password"))?,
        })
    }

    pub fn from_zen_conf(path: &Path) -> Result<Self, RpcError> {
        let text = std::fs::read_to_string(path).map_err(|source| RpcError::CredentialsFile {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse_zen_conf(&text)
    }
}

/// `~/.zen/zen.conf`, where zend looks by default.
pub fn default_zen_conf() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".zen").join("zen.conf"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_user_and_password() {
        let text = "server=1\nrpcuser=OpenBazaar\nrpcpassword=s3cr=t\n";
        let c = Credentials::parse_zen_conf(text).unwrap();
        assert_eq!(c.user, "OpenBazaar");
        assert_eq!(c.password, "s3cr=t");
    }

    #[test]
    fn ignores_comments_and_whitespace() {
        let text = "# rpcuser=old\n  rpcuser = alice \nrpcpassword=pw\n";
        let c = Credentials::parse_zen_conf(text).unwrap();
        assert_eq!(c.user, "alice");
    }

    #[test]
    fn missing_password_is_an_error() {
        let err = Credentials::parse_zen_conf("rpcuser=alice\n").unwrap_err();
        assert!(matches!(err, RpcError::MissingCredential("password")));
        let err = Credentials::parse_zen_conf("").unwrap_err();
        assert!(matches!(err, RpcError::MissingCredential("user")));
    }

    #[test]
    fn reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "rpcuser=bob\nrpcpassword=hunter2").unwrap();
        let c = Credentials::from_zen_conf(file.path()).unwrap();
        assert_eq!(c.user, "bob");
        assert!(!format!("{c:?}").contains("hunter2"));
    }

    #[test]
    fn unreadable_file() {
        let err = Credentials::from_zen_conf(Path::new("/nonexistent/zen.conf")).unwrap_err();
        assert!(matches!(err, RpcError::CredentialsFile { .. }));
    }
}
