use crate::operations::Rejection;
use anyhow::{Context, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Serialize;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

pub const ERROR_DIAGNOSTIC_FILE: &str = "pkgpatch-error.json.gz";
pub const REJECTS_FILE: &str = "pkgpatch-rejects.json";

#[derive(Debug, Serialize)]
struct Diagnostic<'a> {
    error: &'a str,
    patch: &'a str,
}

/// Dumps a diff the parser refused, compressed, for attaching to a bug
/// report.
pub fn write_error_diagnostic(path: &Path, error: &str, patch: &str) -> Result<()> {
    let json = serde_json::to_vec(&Diagnostic { error, patch })
        .context("Failed to serialize diagnostic")?;

    let file = File::create(path).with_context(|| format!("Failed to create {:?}", path))?;
    let mut encoder = GzEncoder::new(file, Compression::default());
    encoder
        .write_all(&json)
        .with_context(|| format!("Failed to write {:?}", path))?;
    encoder
        .finish()
        .with_context(|| format!("Failed to write {:?}", path))?;
    Ok(())
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectionRecord {
    pub patch_file: String,
    #[serde(flatten)]
    pub rejection: Rejection,
}

pub fn write_rejection_report(path: &Path, records: &[RejectionRecord]) -> Result<()> {
    let json =
        serde_json::to_string_pretty(records).context("Failed to serialize rejection report")?;
    fs::write(path, json).with_context(|| format!("Failed to write {:?}", path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;
    use std::path::PathBuf;
    use tempfile::tempdir;

    #[test]
    fn test_error_diagnostic_is_gzipped_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(ERROR_DIAGNOSTIC_FILE);
        write_error_diagnostic(&path, "malformed patch: boom", "diff --git a/x b/x\n").unwrap();

        let mut decoded = String::new();
        GzDecoder::new(File::open(&path).unwrap())
            .read_to_string(&mut decoded)
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&decoded).unwrap();
        assert_eq!(value["error"], "malformed patch: boom");
        assert_eq!(value["patch"], "diff --git a/x b/x\n");
    }

    #[test]
    fn test_rejection_report_shape() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(REJECTS_FILE);
        let records = vec![RejectionRecord {
            patch_file: "left-pad+1.3.0.patch".to_string(),
            rejection: Rejection {
                file: PathBuf::from("node_modules/left-pad/index.js"),
                hunk: Some(2),
                header: Some("@@ -10,3 +10,4 @@".to_string()),
                reason: "context not found within the fuzz window".to_string(),
                text: "@@ -10,3 +10,4 @@\n a\n".to_string(),
            },
        }];
        write_rejection_report(&path, &records).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value[0]["patchFile"], "left-pad+1.3.0.patch");
        assert_eq!(value[0]["file"], "node_modules/left-pad/index.js");
        assert_eq!(value[0]["hunk"], 2);
        assert_eq!(value[0]["header"], "@@ -10,3 +10,4 @@");
    }
}
