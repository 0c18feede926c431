use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing_appender::rolling::{RollingFileAppender, Rotation};

/// Log files are `<prefix>.<date>.log` inside the logs directory.
pub const LOG_FILE_PREFIX: &str = "app";
/// Daily log files kept before the oldest is deleted.
pub const LOG_FILES_KEPT: usize = 7;

#[cfg(target_os = "macos")]
const ORT_LIB_NAME: &str = "libonnxruntime.dylib";
#[cfg(target_os = "windows")]
const ORT_LIB_NAME: &str = "onnxruntime.dll";
#[cfg(not(any(target_os = "macos", target_os = "windows")))]
const ORT_LIB_NAME: &str = "libonnxruntime.so";

/// Resolve and set ORT_DYLIB_PATH at runtime when it is missing or invalid.
///
/// Priority order:
/// 1) Existing ORT_DYLIB_PATH (if file exists)
/// 2) models/onnxruntime*/lib/<lib> near the working directory or current exe
/// 3) the platform's usual system library directories
///
/// Returns the path that will be loaded, if any.
pub fn configure_ort_dylib() -> Option<PathBuf> {
    if let Some(existing) = std::env::var_os("ORT_DYLIB_PATH") {
        let existing_path = PathBuf::from(existing);
        if existing_path.is_file() {
            tracing::info!(path = %existing_path.display(), "using ORT_DYLIB_PATH from environment");
            return Some(existing_path);
        }
        tracing::warn!(
            path = %existing_path.display(),
            "ORT_DYLIB_PATH is set but file does not exist; attempting auto-discovery"
        );
    }

    match find_ort_dylib(&search_roots()) {
        Some(found) => {
            // SAFETY: called once from main before any ORT session exists
            // and before worker threads are spawned.
            unsafe {
                std::env::set_var("ORT_DYLIB_PATH", &found);
            }
            tracing::info!(path = %found.display(), "configured ORT_DYLIB_PATH");
            Some(found)
        }
        None => {
            tracing::warn!(
                lib = ORT_LIB_NAME,
                "could not locate ONNX Runtime; set ORT_DYLIB_PATH or rely on the system loader"
            );
            None
        }
    }
}

/// Daily-rotated log file under `dir`, keeping the last [`LOG_FILES_KEPT`].
///
/// Binaries wrap it in `tracing_appender::non_blocking` and add it as a
/// second `fmt` layer beside stderr.
pub fn rolling_log_appender(dir: &Path) -> Result<RollingFileAppender> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create log directory {}", dir.display()))?;
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .filename_suffix("log")
        .max_log_files(LOG_FILES_KEPT)
        .build(dir)
        .with_context(|| format!("failed to open rolling log in {}", dir.display()))
}

/// First existing candidate under `roots`, then the system fallbacks.
pub fn find_ort_dylib(roots: &[PathBuf]) -> Option<PathBuf> {
    ort_candidates(roots).into_iter().find(|c| c.is_file())
}

fn search_roots() -> Vec<PathBuf> {
    let mut roots = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        roots.push(cwd);
    }

    if let Ok(exe) = std::env::current_exe() {
        let mut dir = exe.parent().map(Path::to_path_buf);
        for _ in 0..7 {
            let Some(d) = dir else {
                break;
            };
            roots.push(d.clone());
            dir = d.parent().map(Path::to_path_buf);
        }
    }
    roots
}

fn ort_candidates(roots: &[PathBuf]) -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    for root in roots {
        candidates.push(root.join("models/onnxruntime/lib").join(ORT_LIB_NAME));
        candidates.push(root.join("yolo_model/onnxruntime/lib").join(ORT_LIB_NAME));
        candidates.push(root.join("models").join(ORT_LIB_NAME));
    }

    if cfg!(target_os = "macos") {
        candidates.push(PathBuf::from("/opt/homebrew/lib").join(ORT_LIB_NAME));
    } else if cfg!(target_os = "linux") {
        candidates.push(PathBuf::from("/usr/local/lib").join(ORT_LIB_NAME));
        candidates.push(PathBuf::from("/usr/lib").join(ORT_LIB_NAME));
    }
    candidates
}
