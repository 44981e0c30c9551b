//! rpmdb extraction from image layers.
//!
//! Layers are applied in manifest order, keeping only entries below one of
//! the known rpmdb locations. Later layers overwrite earlier ones.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use serde::Deserialize;
use tar::Archive;
use xz2::read::XzDecoder;

use rpm_lockfile_core::error::{LockError, Result};

use super::image_service::{translate_arch, ImageService};
use super::reference::is_fully_qualified;

/// Known rpmdb locations inside an image, in preference order.
/// `files/lib/sysimage/rpm` is used by flatpak runtime images.
pub const RPMDB_PATHS: [&str; 3] = ["usr/lib/sysimage/rpm", "var/lib/rpm", "files/lib/sysimage/rpm"];

const WHITEOUT_PREFIX: &str = ".wh.";
const OPAQUE_WHITEOUT: &str = ".wh..wh..opq";

/// `manifest.json` of a `dir:` image layout.
#[derive(Debug, Deserialize)]
struct DirManifest {
    layers: Vec<LayerDescriptor>,
}

#[derive(Debug, Deserialize)]
struct LayerDescriptor {
    digest: String,
}

impl LayerDescriptor {
    /// Blob file name: the hex part of the digest.
    fn blob_name(&self) -> &str {
        self.digest
            .split_once(':')
            .map(|(_, hex)| hex)
            .unwrap_or(&self.digest)
    }
}

/// Download `image_ref` for `arch` and extract its rpmdb into `dest`.
///
/// `dbpath` is where the local package manager looks for the database,
/// relative to the root (e.g. `usr/lib/sysimage/rpm`).
pub async fn extract_rpmdb(
    images: &dyn ImageService,
    image_ref: &str,
    arch: &str,
    dest: &Path,
    dbpath: &str,
) -> Result<()> {
    if !is_fully_qualified(image_ref) {
        tracing::warn!(
            image = %image_ref,
            "Image reference is missing a registry; the image tool will pick a default \
             registry, which may differ from the one the build system uses"
        );
    }

    let layout = tempfile::Builder::new()
        .prefix("rpm-lockfile-image-")
        .tempdir()?;
    images
        .copy(image_ref, translate_arch(arch), layout.path())
        .await?;

    let layout_dir = layout.path().to_path_buf();
    let dest_dir = dest.to_path_buf();
    let dbpath = dbpath.to_string();
    tokio::task::spawn_blocking(move || {
        let populated = extract_layout(&layout_dir, &dest_dir)?;
        link_expected_dbpath(&dest_dir, &populated, &dbpath)
    })
    .await
    .map_err(|e| LockError::ImageError(format!("Layer extraction task failed: {}", e)))?
}

/// Apply every layer of the `dir:` layout at `layout_dir` onto `dest`.
///
/// Returns the rpmdb locations that received at least one entry.
pub fn extract_layout(layout_dir: &Path, dest: &Path) -> Result<BTreeSet<&'static str>> {
    let manifest_path = layout_dir.join("manifest.json");
    let data = std::fs::read(&manifest_path).map_err(|e| {
        LockError::ImageError(format!(
            "Failed to read image manifest {}: {}",
            manifest_path.display(),
            e
        ))
    })?;
    let manifest: DirManifest = serde_json::from_slice(&data)?;

    std::fs::create_dir_all(dest)?;
    let mut populated = BTreeSet::new();
    for layer in &manifest.layers {
        tracing::info!(layer = %layer.digest, "Extracting rpmdb from layer");
        extract_layer_rpmdb(&layout_dir.join(layer.blob_name()), dest, &mut populated)?;
    }
    Ok(populated)
}

/// Extract rpmdb entries of one layer blob (gzip, xz or plain tar).
pub fn extract_layer_rpmdb(
    layer_path: &Path,
    dest: &Path,
    populated: &mut BTreeSet<&'static str>,
) -> Result<()> {
    let reader = open_layer(layer_path)?;
    let mut archive = Archive::new(reader);
    let entries = archive.entries().map_err(|e| layer_error(layer_path, e))?;

    for entry in entries {
        let mut entry = entry.map_err(|e| layer_error(layer_path, e))?;
        let path = normalize(&entry.path().map_err(|e| layer_error(layer_path, e))?);
        let Some(candidate) = RPMDB_PATHS.iter().find(|c| path.starts_with(c)) else {
            continue;
        };

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if file_name.starts_with(WHITEOUT_PREFIX) {
            apply_whiteout(dest, &path, &file_name)?;
            continue;
        }

        populated.insert(*candidate);
        entry
            .unpack_in(dest)
            .map_err(|e| layer_error(layer_path, e))?;
    }

    tracing::debug!(
        layer = %layer_path.display(),
        target = %dest.display(),
        "Extracted layer"
    );
    Ok(())
}

/// Symlink `dbpath` to a populated rpmdb location when it was not populated
/// itself. The link is relative so it survives moving `root`.
pub fn link_expected_dbpath(
    root: &Path,
    populated: &BTreeSet<&'static str>,
    dbpath: &str,
) -> Result<()> {
    if populated.is_empty() || populated.contains(dbpath) {
        return Ok(());
    }
    let Some(target) = RPMDB_PATHS.iter().find(|c| populated.contains(*c)) else {
        return Ok(());
    };

    let link = root.join(dbpath);
    if link.symlink_metadata().is_ok() {
        return Ok(());
    }
    if let Some(parent) = link.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let depth = Path::new(dbpath).components().count().saturating_sub(1);
    let mut relative = PathBuf::new();
    for _ in 0..depth {
        relative.push("..");
    }
    relative.push(target);

    tracing::debug!(link = %dbpath, target = %relative.display(), "Creating rpmdb symlink");
    std::os::unix::fs::symlink(&relative, &link)?;
    Ok(())
}

fn open_layer(path: &Path) -> Result<Box<dyn Read>> {
    let mut file = File::open(path).map_err(|e| {
        LockError::ImageError(format!("Failed to open layer {}: {}", path.display(), e))
    })?;
    let mut magic = [0u8; 6];
    let n = read_prefix(&mut file, &mut magic)?;
    file.seek(SeekFrom::Start(0))?;

    let magic = &magic[..n];
    if magic.starts_with(&[0x1f, 0x8b]) {
        Ok(Box::new(GzDecoder::new(file)))
    } else if magic.starts_with(&[0xfd, b'7', b'z', b'X', b'Z', 0x00]) {
        Ok(Box::new(XzDecoder::new(file)))
    } else {
        Ok(Box::new(file))
    }
}

fn read_prefix(file: &mut File, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Drop `.` components so `./usr/lib` and `usr/lib` compare equal.
fn normalize(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .collect()
}

fn apply_whiteout(dest: &Path, path: &Path, file_name: &str) -> Result<()> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    let dir = dest.join(parent);

    if file_name == OPAQUE_WHITEOUT {
        if let Ok(entries) = std::fs::read_dir(&dir) {
            for entry in entries.flatten() {
                remove_path(&entry.path())?;
            }
        }
        return Ok(());
    }

    let hidden = &file_name[WHITEOUT_PREFIX.len()..];
    remove_path(&dir.join(hidden))
}

fn remove_path(path: &Path) -> Result<()> {
    match path.symlink_metadata() {
        Ok(meta) if meta.is_dir() => std::fs::remove_dir_all(path)?,
        Ok(_) => std::fs::remove_file(path)?,
        Err(_) => {}
    }
    Ok(())
}

fn layer_error(path: &Path, err: std::io::Error) -> LockError {
    LockError::ImageError(format!("Failed to extract layer {}: {}", path.display(), err))
}
