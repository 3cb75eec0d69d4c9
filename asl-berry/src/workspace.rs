//! 单次运行独占的临时工作目录.

use std::io;
use std::path::{Path, PathBuf};

use tempfile::{Builder, TempDir};

/// 单次运行独占的临时工作目录.
///
/// 目录名由 `tempfile` 随机生成, 因此并发运行时各自的工作目录互不相同.
/// 离开作用域时目录被删除 (包括出错提前返回的路径); `keep` 为 `true` 时保留以便调试.
#[derive(Debug)]
pub struct WorkingArea {
    dir: TempDir,
    keep: bool,
}

impl WorkingArea {
    /// 在系统临时目录下创建工作目录.
    #[inline]
    pub fn new(keep: bool) -> io::Result<Self> {
        Self::new_in(std::env::temp_dir(), keep)
    }

    /// 在 `parent` 下创建工作目录.
    pub fn new_in<P: AsRef<Path>>(parent: P, keep: bool) -> io::Result<Self> {
        let dir = Builder::new()
            .prefix("asl_calib_")
            .keep(keep)
            .tempdir_in(parent.as_ref())?;
        log::debug!("working area: {}", dir.path().display());
        Ok(Self { dir, keep })
    }

    /// 工作目录路径.
    #[inline]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// 工作目录下名为 `name` 的文件路径.
    #[inline]
    pub fn file(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// 运行结束后是否保留.
    #[inline]
    pub fn is_kept(&self) -> bool {
        self.keep
    }
}

impl Drop for WorkingArea {
    fn drop(&mut self) {
        if self.keep {
            log::info!("working area kept at {}", self.dir.path().display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::WorkingArea;

    #[test]
    fn test_removed_on_drop() {
        let parent = tempfile::tempdir().unwrap();
        let path = {
            let area = WorkingArea::new_in(parent.path(), false).unwrap();
            std::fs::write(area.file("x.txt"), "1").unwrap();
            area.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn test_removed_on_early_error() {
        fn failing(parent: &std::path::Path) -> Result<(), std::path::PathBuf> {
            let area = WorkingArea::new_in(parent, false).map_err(|_| parent.to_path_buf())?;
            Err(area.path().to_path_buf())
        }

        let parent = tempfile::tempdir().unwrap();
        let path = failing(parent.path()).unwrap_err();
        assert!(!path.exists());
    }

    #[test]
    fn test_kept_in_debug_mode() {
        let parent = tempfile::tempdir().unwrap();
        let path = {
            let area = WorkingArea::new_in(parent.path(), true).unwrap();
            assert!(area.is_kept());
            area.path().to_path_buf()
        };
        assert!(path.is_dir());
    }

    #[test]
    fn test_unique_per_run() {
        let parent = tempfile::tempdir().unwrap();
        let a = WorkingArea::new_in(parent.path(), false).unwrap();
        let b = WorkingArea::new_in(parent.path(), false).unwrap();
        assert_ne!(a.path(), b.path());
    }
}
