//! # GPG Key Material
//!
//! Generation of armored GPG key pairs and maintenance of the secrets holding them.
//!
//! - [`KeyPairProvider`] - generates a key pair for an identity
//! - [`GpgCliKeyPairProvider`] - drives the `gpg` binary in a throwaway home directory
//! - [`secret`] - builds, inspects and repairs GPG key secrets

pub mod secret;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tracing::{debug, info};
use zeroize::Zeroizing;

pub use secret::{
    create_new_gpg_secret, should_update, update_gpg_secret_with_recreated_gpg_key,
};

#[derive(Debug, Error)]
pub enum KeyPairError {
    #[error("gpg binary '{0}' not found")]
    BinaryNotFound(String),

    #[error("cannot prepare gpg home directory: {0}")]
    Workspace(#[source] std::io::Error),

    #[error("gpg {step} failed: {message}")]
    Command { step: &'static str, message: String },

    #[error("gpg produced no {0}")]
    EmptyOutput(&'static str),
}

/// Armored key pair. The private half is wiped from memory on drop.
pub struct ArmoredKeyPair {
    pub public_key: String,
    pub private_key: Zeroizing<String>,
}

impl std::fmt::Debug for ArmoredKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArmoredKeyPair")
            .field("public_key_len", &self.public_key.len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait KeyPairProvider: Send + Sync {
    async fn generate(&self, identity: &str) -> Result<ArmoredKeyPair, KeyPairError>;
}

/// Key pairs generated by the `gpg` command line tool.
///
/// Every call uses a fresh temporary GNUPGHOME, so no key survives the call
/// outside of the returned armor.
#[derive(Debug, Clone)]
pub struct GpgCliKeyPairProvider {
    binary: PathBuf,
}

impl GpgCliKeyPairProvider {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    async fn run(
        gpg: &Path,
        home: &Path,
        step: &'static str,
        args: &[&str],
    ) -> Result<Vec<u8>, KeyPairError> {
        let output = tokio::process::Command::new(gpg)
            .env("GNUPGHOME", home)
            .arg("--batch")
            .arg("--yes")
            .arg("--pinentry-mode")
            .arg("loopback")
            .arg("--passphrase")
            .arg("")
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| KeyPairError::Command {
                step,
                message: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(KeyPairError::Command {
                step,
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output.stdout)
    }
}

#[async_trait]
impl KeyPairProvider for GpgCliKeyPairProvider {
    async fn generate(&self, identity: &str) -> Result<ArmoredKeyPair, KeyPairError> {
        let gpg = which::which(&self.binary)
            .map_err(|_| KeyPairError::BinaryNotFound(self.binary.display().to_string()))?;
        let home = tempfile::Builder::new()
            .prefix("gpg-home-")
            .tempdir()
            .map_err(KeyPairError::Workspace)?;

        debug!(identity = %identity, "Generating GPG key pair");
        Self::run(
            &gpg,
            home.path(),
            "key generation",
            &["--quick-gen-key", identity, "default", "default", "never"],
        )
        .await?;

        let public = Self::run(
            &gpg,
            home.path(),
            "public key export",
            &["--armor", "--export", identity],
        )
        .await?;
        let private = Zeroizing::new(
            Self::run(
                &gpg,
                home.path(),
                "private key export",
                &["--armor", "--export-secret-keys", identity],
            )
            .await?,
        );

        let public_key = String::from_utf8_lossy(&public).trim().to_string();
        let private_key = Zeroizing::new(String::from_utf8_lossy(&private).trim().to_string());
        if public_key.is_empty() {
            return Err(KeyPairError::EmptyOutput("public key"));
        }
        if private_key.is_empty() {
            return Err(KeyPairError::EmptyOutput("private key"));
        }

        info!(identity = %identity, "Generated GPG key pair");
        Ok(ArmoredKeyPair {
            public_key,
            private_key,
        })
    }
}
