use crate::error::{PatchError, PatchResult};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io;
use std::path::Path;

pub fn hash_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

pub fn hash_file(path: &Path) -> PatchResult<String> {
    let mut file = File::open(path).map_err(|e| PatchError::io(path, e))?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher).map_err(|e| PatchError::io(path, e))?;
    Ok(hex::encode(hasher.finalize()))
}
