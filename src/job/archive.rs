use std::fs::{self, File};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

const ARCHIVE_EXTENSIONS: [&str; 4] = ["gz", "tgz", "zip", "tar"];

/// Pattern of the converter output below the model directory.
pub const CONVERTED_OUTPUT_PATTERN: &str = "*/export/*/*/output";

/// Unpack every archive directly inside `dir` into `dir`.
///
/// Only the top level is scanned. Files with other extensions are skipped and
/// a missing directory yields nothing.
pub fn extract_archives(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            log::info!("{} does not exist, nothing to extract", dir.display());
            return Ok(Vec::new());
        }
        Err(err) => return Err(err).with_context(|| format!("scan {}", dir.display())),
    };

    let mut archives = Vec::new();
    for entry in entries {
        let path = entry?.path();
        let is_archive = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ARCHIVE_EXTENSIONS.contains(&ext))
            .unwrap_or(false);
        if is_archive && path.is_file() {
            archives.push(path);
        }
    }
    archives.sort();

    for archive in &archives {
        log::info!("Extract {}", archive.display());
        unpack(archive, dir)?;
    }
    Ok(archives)
}

/// Unpack one archive; `.gz` and `.tgz` are gzip-compressed tarballs.
pub fn unpack(archive: &Path, dest: &Path) -> Result<()> {
    let file = File::open(archive).with_context(|| format!("open {}", archive.display()))?;
    let ext = archive.extension().and_then(|ext| ext.to_str()).unwrap_or("");
    match ext {
        "gz" | "tgz" => tar::Archive::new(GzDecoder::new(file)).unpack(dest)?,
        "tar" => tar::Archive::new(file).unpack(dest)?,
        "zip" => zip::ZipArchive::new(file)?.extract(dest)?,
        other => return Err(anyhow!("unsupported archive type .{}: {}", other, archive.display())),
    }
    Ok(())
}

/// Write `<dest_dir>/<basename>.tar.gz` holding `src` under its basename.
pub fn compress_dir(src: &Path, dest_dir: &Path) -> Result<PathBuf> {
    let base_name = src
        .file_name()
        .ok_or_else(|| anyhow!("cannot compress {}: no file name", src.display()))?;
    fs::create_dir_all(dest_dir).with_context(|| format!("create {}", dest_dir.display()))?;

    let mut archive_name = base_name.to_os_string();
    archive_name.push(".tar.gz");
    let archive_path = dest_dir.join(archive_name);

    let file = File::create(&archive_path)
        .with_context(|| format!("create {}", archive_path.display()))?;
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    builder
        .append_dir_all(base_name, src)
        .with_context(|| format!("archive {}", src.display()))?;
    builder.into_inner()?.finish()?;
    Ok(archive_path)
}

/// First directory matching `*/export/*/*/output` below `model_dir`.
pub fn search_converted_output(model_dir: &Path) -> Result<PathBuf> {
    let mut candidates = vec![model_dir.to_path_buf()];
    for component in CONVERTED_OUTPUT_PATTERN.split('/') {
        let mut next = Vec::new();
        for dir in &candidates {
            if component == "*" {
                next.extend(sorted_subdirs(dir)?);
            } else {
                let path = dir.join(component);
                if path.is_dir() {
                    next.push(path);
                }
            }
        }
        candidates = next;
    }
    candidates.into_iter().next().ok_or_else(|| {
        anyhow!(
            "No such file or directory: {}",
            model_dir.join(CONVERTED_OUTPUT_PATTERN).display()
        )
    })
}

/// Non-hidden subdirectories, sorted by name. Unreadable directories are empty.
fn sorted_subdirs(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return Ok(Vec::new()),
    };
    let mut dirs = Vec::new();
    for entry in entries {
        let entry = entry?;
        let hidden = entry.file_name().to_string_lossy().starts_with('.');
        if !hidden && entry.path().is_dir() {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    Ok(dirs)
}
