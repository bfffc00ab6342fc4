//! Artifact bundle persistence
//!
//! A bundle is a directory of canonical JSON files. `ensemble_info.json` is written
//! last and records the blake3 hash of every other file, so a bundle is only
//! loadable once all of its parts are present and belong together. Saving builds
//! the directory under a staging name and renames it into place.

use crate::ensemble::{EnsembleArtifact, EnsembleMetadata};
use crate::errors::{CoreError, Result};
use crate::gbdt::GbdtClassifier;
use crate::meta::BaseLearners;
use crate::mlp::MlpClassifier;
use crate::scaler::StandardScaler;
use crate::serde_canon::{hash_bytes_hex, to_canonical_json};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const SCALER_FILE: &str = "feature_scaler.json";
pub const GBDT_FILE: &str = "gbdt_model.json";
pub const HIST_GBDT_FILE: &str = "hist_gbdt_model.json";
pub const MLP_FILE: &str = "mlp_model.json";
pub const META_FILE: &str = "meta_model.json";
pub const INFO_FILE: &str = "ensemble_info.json";

/// Every file a loadable bundle must contain
pub const ARTIFACT_FILES: [&str; 6] = [
    SCALER_FILE,
    GBDT_FILE,
    HIST_GBDT_FILE,
    MLP_FILE,
    META_FILE,
    INFO_FILE,
];

/// Contents of `ensemble_info.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleInfo {
    #[serde(flatten)]
    pub metadata: EnsembleMetadata,
    /// File name -> blake3 hex of its bytes
    pub file_hashes: BTreeMap<String, String>,
}

/// Expected files absent from `dir`, in `ARTIFACT_FILES` order
pub fn missing_files(dir: &Path) -> Vec<String> {
    ARTIFACT_FILES
        .iter()
        .filter(|name| !dir.join(name).is_file())
        .map(|name| name.to_string())
        .collect()
}

fn sibling(dir: &Path, suffix: &str) -> Result<PathBuf> {
    let name = dir
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| CoreError::Io(std::io::Error::other(format!(
            "bundle path {} has no directory name",
            dir.display()
        ))))?;
    let parent = dir.parent().unwrap_or_else(|| Path::new("."));
    Ok(parent.join(format!(".{name}.{suffix}")))
}

fn write_canonical<T: Serialize>(
    dir: &Path,
    name: &str,
    value: &T,
    hashes: &mut BTreeMap<String, String>,
) -> Result<()> {
    let json = to_canonical_json(value)?;
    fs::write(dir.join(name), json.as_bytes())?;
    hashes.insert(name.to_string(), hash_bytes_hex(json.as_bytes()));
    Ok(())
}

/// Persist `artifact` as a complete bundle at `dir`, replacing any previous bundle.
pub fn save_bundle(artifact: &EnsembleArtifact, dir: &Path) -> Result<BundleInfo> {
    artifact.validate()?;
    let staging = sibling(dir, "staging")?;
    if let Some(parent) = staging.parent() {
        fs::create_dir_all(parent)?;
    }
    if staging.exists() {
        fs::remove_dir_all(&staging)?;
    }
    fs::create_dir_all(&staging)?;

    let mut hashes = BTreeMap::new();
    write_canonical(&staging, SCALER_FILE, &artifact.scaler, &mut hashes)?;
    write_canonical(&staging, GBDT_FILE, &artifact.base.gradient_boosted, &mut hashes)?;
    write_canonical(&staging, HIST_GBDT_FILE, &artifact.base.histogram_boosted, &mut hashes)?;
    write_canonical(&staging, MLP_FILE, &artifact.base.neural, &mut hashes)?;
    write_canonical(&staging, META_FILE, &artifact.meta_model, &mut hashes)?;

    let info = BundleInfo {
        metadata: artifact.metadata.clone(),
        file_hashes: hashes,
    };
    fs::write(staging.join(INFO_FILE), to_canonical_json(&info)?)?;

    if dir.exists() {
        let previous = sibling(dir, "previous")?;
        if previous.exists() {
            fs::remove_dir_all(&previous)?;
        }
        fs::rename(dir, &previous)?;
        fs::rename(&staging, dir)?;
        fs::remove_dir_all(&previous)?;
    } else {
        fs::rename(&staging, dir)?;
    }

    info!(
        "Saved ensemble bundle to {} ({} features, trained {})",
        dir.display(),
        info.metadata.feature_count,
        info.metadata.trained_at
    );
    Ok(info)
}

pub fn read_bundle_info(dir: &Path) -> Result<BundleInfo> {
    let bytes = fs::read(dir.join(INFO_FILE))?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn read_verified<T: DeserializeOwned>(dir: &Path, name: &str, info: &BundleInfo) -> Result<T> {
    let bytes = fs::read(dir.join(name))?;
    let expected = info.file_hashes.get(name).ok_or_else(|| {
        CoreError::ArtifactIntegrity(format!("{INFO_FILE} records no hash for {name}"))
    })?;
    let actual = hash_bytes_hex(&bytes);
    if &actual != expected {
        return Err(CoreError::ArtifactIntegrity(format!(
            "{name} hash {actual} does not match recorded {expected}"
        )));
    }
    debug!("Verified {} ({} bytes)", name, bytes.len());
    Ok(serde_json::from_slice(&bytes)?)
}

/// Load and verify a complete bundle. Any missing file is an `IncompleteBundle`
/// error listing every absent file.
pub fn load_bundle(dir: &Path) -> Result<EnsembleArtifact> {
    load_bundle_with_info(dir).map(|(artifact, _)| artifact)
}

/// Like `load_bundle`, also returning the `ensemble_info.json` contents the
/// component files were verified against.
pub fn load_bundle_with_info(dir: &Path) -> Result<(EnsembleArtifact, BundleInfo)> {
    let missing = missing_files(dir);
    if !missing.is_empty() {
        return Err(CoreError::IncompleteBundle { missing });
    }
    let info = read_bundle_info(dir)?;

    let scaler: StandardScaler = read_verified(dir, SCALER_FILE, &info)?;
    let gradient_boosted: GbdtClassifier = read_verified(dir, GBDT_FILE, &info)?;
    let histogram_boosted: GbdtClassifier = read_verified(dir, HIST_GBDT_FILE, &info)?;
    let neural: MlpClassifier = read_verified(dir, MLP_FILE, &info)?;
    let meta_model: MlpClassifier = read_verified(dir, META_FILE, &info)?;

    let artifact = EnsembleArtifact {
        scaler,
        base: BaseLearners {
            gradient_boosted,
            histogram_boosted,
            neural,
        },
        meta_model,
        metadata: info.metadata.clone(),
    };
    artifact.validate()?;
    info!(
        "Loaded ensemble bundle from {} (schema {}, {} features)",
        dir.display(),
        artifact.metadata.schema_version,
        artifact.metadata.feature_count
    );
    Ok((artifact, info))
}
