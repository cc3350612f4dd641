use std::fs::File;
use std::io::BufReader;

use log::error;

use crate::config::TlsPaths;

/// Check that the certificate chain and private key can be read and parsed
/// before handing the paths to warp, which would otherwise panic on startup.
pub fn validate(paths: &TlsPaths) -> bool {
    let cert_file = match File::open(&paths.cert) {
        Ok(file) => file,
        Err(e) => {
            error!("Failed to open certificate file {}: {}", paths.cert.display(), e);
            return false;
        }
    };
    let key_file = match File::open(&paths.key) {
        Ok(file) => file,
        Err(e) => {
            error!("Failed to open private key file {}: {}", paths.key.display(), e);
            return false;
        }
    };

    let certs = match rustls_pemfile::certs(&mut BufReader::new(cert_file))
        .collect::<Result<Vec<_>, _>>()
    {
        Ok(certs) => certs,
        Err(e) => {
            error!("Failed to parse certificate: {}", e);
            return false;
        }
    };
    if certs.is_empty() {
        error!("No certificates found in {}", paths.cert.display());
        return false;
    }

    match rustls_pemfile::private_key(&mut BufReader::new(key_file)) {
        Ok(Some(_)) => true,
        Ok(None) => {
            error!("No private key found in {}", paths.key.display());
            false
        }
        Err(e) => {
            error!("Failed to parse private key: {}", e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn missing_files_are_rejected() {
        let paths = TlsPaths {
            cert: PathBuf::from("/nonexistent/cert.pem"),
            key: PathBuf::from("/nonexistent/key.pem"),
        };
        assert!(!validate(&paths));
    }

    #[test]
    fn files_without_pem_blocks_are_rejected() {
        let dir = std::env::temp_dir().join(format!("study-hub-tls-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let cert = dir.join("cert.pem");
        let key = dir.join("key.pem");
        std::fs::write(&cert, "not a certificate").unwrap();
        std::fs::write(&key, "not a key").unwrap();

        assert!(!validate(&TlsPaths { cert, key }));
        std::fs::remove_dir_all(dir).unwrap();
    }
}
