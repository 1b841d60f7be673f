use std::path::{Path, PathBuf};

use tokio::{fs, io::AsyncWriteExt};

use crate::{error::PollError, utils::CaptureTime};

/// `root/camera/YYYY-MM-DD/<unix>.jpg`. Two captures in the same second map to
/// the same file and the later one wins.
pub fn capture_path(root: &Path, camera: &str, time: &CaptureTime) -> PathBuf {
    root.join(camera)
        .join(time.date.format("%Y-%m-%d").to_string())
        .join(format!("{}.jpg", time.unix))
}

/// Creates the day directory for `file`. Safe to call when it already exists.
pub async fn prepare_capture_dir(file: &Path) -> Result<(), PollError> {
    match file.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => {
            fs::create_dir_all(dir).await.map_err(|e| PollError::fs(dir, e))
        }
        _ => Ok(()),
    }
}

/// Writes the image next to its destination and renames it into place, so a
/// failure leaves either the previous file or nothing, never a torn jpeg.
pub async fn write_capture(file: &Path, bytes: &[u8]) -> Result<(), PollError> {
    let part = part_path(file);
    if let Err(e) = write_part(&part, bytes).await {
        let _ = fs::remove_file(&part).await;
        return Err(e);
    }
    if let Err(e) = fs::rename(&part, file).await {
        let _ = fs::remove_file(&part).await;
        return Err(PollError::fs(file, e));
    }
    Ok(())
}

async fn write_part(part: &Path, bytes: &[u8]) -> Result<(), PollError> {
    let mut f = fs::File::create(part).await.map_err(|e| PollError::fs(part, e))?;
    f.write_all(bytes).await.map_err(|e| PollError::fs(part, e))?;
    f.sync_all().await.map_err(|e| PollError::fs(part, e))
}

fn part_path(file: &Path) -> PathBuf {
    let mut name = file.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".part");
    file.with_file_name(name)
}
