use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

use tracing::{info, warn};
use zip::CompressionMethod;
use zip::write::FileOptions;

use crate::services::engine::{EngineError, ResizeSpec, ResultArtifact, TransformEngine};
use crate::services::staging::{TempStore, UploadedAsset};

/// One bulk-resize run: the per-member results plus the archive that
/// packages them. Everything here is subject to the same deferred-deletion
/// policy as single-file artifacts.
#[derive(Debug)]
pub struct BulkJob {
    pub results: Vec<ResultArtifact>,
    pub archive: ResultArtifact,
}

/// Resize each asset in input order and package the results into a single
/// deflate archive at maximum compression. A failure on any member aborts
/// the whole job and removes every output produced so far; there is no
/// partial-success mode.
///
/// Archive entry names are the members' original filenames. Same-named
/// inputs collide (last write wins) — callers should pre-validate
/// uniqueness.
pub async fn run_bulk(
    engine: &TransformEngine,
    store: &TempStore,
    assets: &[UploadedAsset],
    spec: ResizeSpec,
) -> Result<BulkJob, EngineError> {
    let mut results: Vec<ResultArtifact> = Vec::with_capacity(assets.len());

    for asset in assets {
        match engine.resize(asset, spec).await {
            Ok(artifact) => results.push(artifact),
            Err(e) => {
                warn!(
                    "Bulk resize aborted at '{}' after {} member(s): {}",
                    asset.original_filename,
                    results.len(),
                    e
                );
                for produced in &results {
                    store.delete_now(&produced.path);
                }
                return Err(e);
            }
        }
    }

    let archive_name = TempStore::unique_name("resized", "zip");
    let archive_path = store.output_path(&archive_name);

    let entries: Vec<(String, PathBuf)> = assets
        .iter()
        .zip(&results)
        .map(|(asset, result)| (asset.original_filename.clone(), result.path.clone()))
        .collect();

    let write_result = {
        let archive_path = archive_path.clone();
        tokio::task::spawn_blocking(move || write_archive(&archive_path, &entries))
            .await
            .map_err(|e| EngineError::Encode(format!("archive worker failed: {e}")))?
    };

    let size_bytes = match write_result {
        Ok(size) => size,
        Err(e) => {
            for produced in &results {
                store.delete_now(&produced.path);
            }
            store.delete_now(&archive_path);
            return Err(e);
        }
    };

    info!(
        "Packaged {} resized image(s) into {} ({} bytes)",
        results.len(),
        archive_name,
        size_bytes
    );

    Ok(BulkJob {
        results,
        archive: ResultArtifact {
            path: archive_path,
            size_bytes,
            mime_type: "application/zip",
            suggested_filename: archive_name,
        },
    })
}

fn write_archive(archive_path: &PathBuf, entries: &[(String, PathBuf)]) -> Result<u64, EngineError> {
    let file = File::create(archive_path)?;
    let mut writer = zip::ZipWriter::new(file);
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(9));

    for (name, path) in entries {
        writer
            .start_file(name.clone(), options)
            .map_err(|e| EngineError::Encode(format!("archive entry failed: {e}")))?;
        let data = std::fs::read(path)?;
        writer.write_all(&data)?;
    }

    let file = writer
        .finish()
        .map_err(|e| EngineError::Encode(format!("archive finalization failed: {e}")))?;
    Ok(file.metadata()?.len())
}
