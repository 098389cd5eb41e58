use crate::domain::{DomainError, DomainResult};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, instrument, warn};

/// File names of the TLS material, resolved relative to a credential directory
#[derive(Debug, Clone)]
pub struct CredentialPaths {
    pub bus_client_key: PathBuf,
    pub bus_client_cert: PathBuf,
    pub bus_ca_cert: PathBuf,
    pub storage_client_pem: PathBuf,
    pub storage_ca_cert: PathBuf,
}

impl CredentialPaths {
    pub fn in_dir(
        dir: impl AsRef<Path>,
        bus_client_key: &str,
        bus_client_cert: &str,
        bus_ca_cert: &str,
        storage_client_pem: &str,
        storage_ca_cert: &str,
    ) -> Self {
        let dir = dir.as_ref();
        Self {
            bus_client_key: dir.join(bus_client_key),
            bus_client_cert: dir.join(bus_client_cert),
            bus_ca_cert: dir.join(bus_ca_cert),
            storage_client_pem: dir.join(storage_client_pem),
            storage_ca_cert: dir.join(storage_ca_cert),
        }
    }
}

/// A credential file that was present at startup.
///
/// The MQTT transport consumes the bytes, the MongoDB driver only accepts
/// file paths, so both are kept.
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialFile {
    pub path: PathBuf,
    pub contents: Vec<u8>,
}

impl std::fmt::Debug for CredentialFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // never print key material
        f.debug_struct("CredentialFile")
            .field("path", &self.path)
            .field("len", &self.contents.len())
            .finish()
    }
}

/// Bus side of the TLS material
#[derive(Debug, Clone, Default)]
pub struct BusTlsMaterial {
    pub client_key: Option<CredentialFile>,
    pub client_cert: Option<CredentialFile>,
    pub ca_cert: Option<CredentialFile>,
}

impl BusTlsMaterial {
    /// Client key and certificate, when both are available
    pub fn client_auth(&self) -> Option<(Vec<u8>, Vec<u8>)> {
        match (&self.client_cert, &self.client_key) {
            (Some(cert), Some(key)) => Some((cert.contents.clone(), key.contents.clone())),
            _ => None,
        }
    }
}

/// Storage side of the TLS material
#[derive(Debug, Clone, Default)]
pub struct StorageTlsMaterial {
    pub client_pem: Option<CredentialFile>,
    pub ca_cert: Option<CredentialFile>,
}

/// All TLS material loaded at startup. Absent fields disable the
/// corresponding mutual-TLS capability.
#[derive(Debug, Clone, Default)]
pub struct ConnectionMaterial {
    pub bus: BusTlsMaterial,
    pub storage: StorageTlsMaterial,
}

/// Load every credential file.
///
/// A missing file leaves its field empty and is logged. Any other I/O
/// failure is returned as `CredentialReadError` and must abort startup.
#[instrument(skip_all)]
pub fn load_connection_material(paths: &CredentialPaths) -> DomainResult<ConnectionMaterial> {
    Ok(ConnectionMaterial {
        bus: BusTlsMaterial {
            client_key: read_optional("bus client key", &paths.bus_client_key)?,
            client_cert: read_optional("bus client certificate", &paths.bus_client_cert)?,
            ca_cert: read_optional("bus CA certificate", &paths.bus_ca_cert)?,
        },
        storage: StorageTlsMaterial {
            client_pem: read_optional("storage client PEM", &paths.storage_client_pem)?,
            ca_cert: read_optional("storage CA certificate", &paths.storage_ca_cert)?,
        },
    })
}

fn read_optional(label: &str, path: &Path) -> DomainResult<Option<CredentialFile>> {
    match std::fs::read(path) {
        Ok(contents) => {
            debug!(credential = label, path = %path.display(), bytes = contents.len(), "loaded credential file");
            Ok(Some(CredentialFile {
                path: path.to_path_buf(),
                contents,
            }))
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {
            warn!(credential = label, path = %path.display(), "credential file not found, continuing without it");
            Ok(None)
        }
        Err(e) => Err(DomainError::CredentialReadError {
            path: path.display().to_string(),
            message: e.to_string(),
        }),
    }
}
