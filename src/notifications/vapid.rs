//! VAPID key files: generated on first start, public half derived from the
//! private key on every start.
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::process::Command;
use tracing::info;
use web_push::VapidSignatureBuilder;

#[derive(Error, Debug)]
pub enum VapidError {
    #[error("openssl is required to generate VAPID keys but could not be run: {0}")]
    ToolUnavailable(#[source] std::io::Error),
    #[error("openssl exited with {status} while generating VAPID keys: {stderr}")]
    GenerationFailed { status: String, stderr: String },
    #[error("VAPID key file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid VAPID private key: {0}")]
    InvalidKey(String),
}

#[derive(Debug, Clone)]
pub struct VapidKeys {
    pub private_key_pem: Vec<u8>,
    /// Uncompressed P-256 point, base64url without padding.
    pub public_key: String,
}

/// Makes sure both key files exist and agree, generating a private key when
/// there is none.
pub async fn ensure_vapid_keys(
    private_key_path: &Path,
    public_key_path: &Path,
) -> Result<VapidKeys, VapidError> {
    let private_key_pem = match fs::read(private_key_path).await {
        Ok(pem) => pem,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            info!(path = ?private_key_path, "No VAPID private key found. Generating a new one.");
            generate_private_key(private_key_path).await?;
            fs::read(private_key_path).await.map_err(|source| VapidError::Io {
                path: private_key_path.to_path_buf(),
                source,
            })?
        }
        Err(source) => {
            return Err(VapidError::Io {
                path: private_key_path.to_path_buf(),
                source,
            });
        }
    };

    let public_key = public_key_from_pem(&private_key_pem)?;

    let stored = fs::read_to_string(public_key_path).await.ok();
    if stored.as_deref().map(str::trim) != Some(public_key.as_str()) {
        if let Some(parent) = public_key_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(|source| VapidError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        fs::write(public_key_path, &public_key)
            .await
            .map_err(|source| VapidError::Io {
                path: public_key_path.to_path_buf(),
                source,
            })?;
        info!(path = ?public_key_path, "Wrote VAPID public key.");
    }

    Ok(VapidKeys {
        private_key_pem,
        public_key,
    })
}

pub fn public_key_from_pem(pem: &[u8]) -> Result<String, VapidError> {
    let builder = VapidSignatureBuilder::from_pem_no_sub(pem)
        .map_err(|e| VapidError::InvalidKey(e.to_string()))?;
    Ok(URL_SAFE_NO_PAD.encode(builder.get_public_key()))
}

async fn generate_private_key(path: &Path) -> Result<(), VapidError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await.map_err(|source| VapidError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let output = Command::new("openssl")
        .args(["ecparam", "-genkey", "-name", "prime256v1", "-noout", "-out"])
        .arg(path)
        .output()
        .await
        .map_err(VapidError::ToolUnavailable)?;

    if !output.status.success() {
        return Err(VapidError::GenerationFailed {
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    info!(path = ?path, "Generated VAPID private key.");
    Ok(())
}
