//! Buffered file copies through a temporary sibling

use crate::local::io_error;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncWriteExt, BufReader, BufWriter};
use tracing::debug;
use uuid::Uuid;
use xcopy_types::Result;

/// Default I/O buffer size
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Copy options for customizing copy behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyOptions {
    /// Buffer size for I/O operations
    pub buffer_size: usize,
    /// Carry the source modification time over to the copy
    pub preserve_mtime: bool,
    /// Flush the copy to disk before it is renamed into place
    pub sync: bool,
}

impl Default for CopyOptions {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            preserve_mtime: true,
            sync: true,
        }
    }
}

/// Copy `src` to `dir/name`; the target only appears once it is complete
///
/// The occupant of `dir/name`, if any, is overwritten by the final rename.
pub async fn copy_via_temp(src: &Path, dir: &Path, name: &str, options: CopyOptions) -> Result<u64> {
    let temp = temp_path(dir, name);
    let copied = match copy_contents(src, &temp, options).await {
        Ok(copied) => copied,
        Err(error) => {
            // best effort, the original error matters more
            let _ = fs::remove_file(&temp).await;
            return Err(error);
        }
    };

    let target = dir.join(name);
    if let Err(error) = fs::rename(&temp, &target).await {
        let _ = fs::remove_file(&temp).await;
        return Err(io_error(&target, error));
    }
    debug!("copied {} bytes: {} -> {}", copied, src.display(), target.display());
    Ok(copied)
}

/// Copy file contents with buffered reads and writes
pub async fn copy_contents(src: &Path, dst: &Path, options: CopyOptions) -> Result<u64> {
    let source = fs::File::open(src).await.map_err(|e| io_error(src, e))?;
    let metadata = source.metadata().await.map_err(|e| io_error(src, e))?;
    let destination = fs::File::create(dst).await.map_err(|e| io_error(dst, e))?;

    let mut reader = BufReader::with_capacity(options.buffer_size, source);
    let mut writer = BufWriter::with_capacity(options.buffer_size, destination);
    let copied = tokio::io::copy_buf(&mut reader, &mut writer)
        .await
        .map_err(|e| io_error(dst, e))?;
    writer.flush().await.map_err(|e| io_error(dst, e))?;
    if options.sync {
        writer.get_ref().sync_all().await.map_err(|e| io_error(dst, e))?;
    }
    drop(writer);

    if options.preserve_mtime {
        let mtime = filetime::FileTime::from_last_modification_time(&metadata);
        filetime::set_file_mtime(dst, mtime).map_err(|e| io_error(dst, e))?;
    }
    Ok(copied)
}

fn temp_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!(".{}.{}.xcopy", name, Uuid::new_v4().simple()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_copy_via_temp_leaves_only_target() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src.bin");
        let data = vec![7u8; 3 * DEFAULT_BUFFER_SIZE + 11];
        fs::write(&src, &data).await.unwrap();
        let dst_dir = temp.path().join("out");
        fs::create_dir(&dst_dir).await.unwrap();

        let copied = copy_via_temp(&src, &dst_dir, "copy.bin", CopyOptions::default())
            .await
            .unwrap();

        assert_eq!(copied, data.len() as u64);
        assert_eq!(fs::read(dst_dir.join("copy.bin")).await.unwrap(), data);
        let names: Vec<_> = std::fs::read_dir(&dst_dir)
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("copy.bin")]);
    }

    #[tokio::test]
    async fn test_copy_preserves_mtime() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("a");
        fs::write(&src, b"a").await.unwrap();
        let past = filetime::FileTime::from_unix_time(1_000_000_000, 0);
        filetime::set_file_mtime(&src, past).unwrap();

        copy_via_temp(&src, temp.path(), "b", CopyOptions::default())
            .await
            .unwrap();

        let meta = std::fs::metadata(temp.path().join("b")).unwrap();
        assert_eq!(filetime::FileTime::from_last_modification_time(&meta), past);
    }

    #[tokio::test]
    async fn test_failed_copy_cleans_up() {
        let temp = TempDir::new().unwrap();
        let err = copy_via_temp(
            &temp.path().join("missing"),
            temp.path(),
            "b",
            CopyOptions::default(),
        )
        .await
        .unwrap_err();

        assert_eq!(err.code(), "ENOENT");
        assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 0);
    }
}
