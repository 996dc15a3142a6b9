//! Access token for the control surface.
//!
//! A fresh token is generated each time the surface is created and written
//! to `<config root>/token`, readable by its owner only.

use std::fs::OpenOptions;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use rand::RngCore;

use crate::error::{io_err, PersistError};
use crate::writer::{sha256_hex, tmp_path};

/// 64 hex characters derived from 32 random bytes.
pub fn generate_token() -> String {
    let mut seed = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut seed);
    sha256_hex(&seed)
}

/// Write `token` to `path` with mode `0600`, replacing any previous token.
pub fn write_token(path: &Path, token: &str) -> Result<(), PersistError> {
    let tmp = tmp_path(path);
    let _ = std::fs::remove_file(&tmp);

    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(&tmp)
        .map_err(|e| io_err(&tmp, e))?;
    file.write_all(token.as_bytes())
        .map_err(|e| io_err(&tmp, e))?;
    drop(file);

    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(io_err(path, e));
    }
    Ok(())
}
