//! SPDX-License-Identifier: GPL-3.0-or-later
//!
//! File snapshot transport (spec §4.6, §8): write `<path>.tmp` then rename
//! over `<path>` so a reader never observes a truncated file.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp: PathBuf = {
        let mut s = path.as_os_str().to_os_string();
        s.push(".tmp");
        PathBuf::from(s)
    };
    fs::write(&tmp, bytes).with_context(|| format!("writing {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("renaming {} to {}", tmp.display(), path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_atomic_leaves_no_tmp_file_behind() {
        let dir = std::env::temp_dir().join(format!("sentrymesh-file-sink-test-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("snapshot.jpg");
        write_atomic(&path, b"fake-jpeg-bytes").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"fake-jpeg-bytes");
        assert!(!path.with_extension("jpg.tmp").exists());
        let _ = fs::remove_dir_all(&dir);
    }
}
