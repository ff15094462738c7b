// src/system/fs_ops.rs

use std::fs;
use std::io;
use std::path::Path;
use walkdir::WalkDir;

/// Reads a file as a vector of lines, without trailing newlines.
pub fn read_lines(path: &Path) -> io::Result<Vec<String>> {
    let text = fs::read_to_string(path)?;
    Ok(text.lines().map(str::to_string).collect())
}

/// Copies a file or a whole directory tree into `dst_dir`.
///
/// A file lands as `dst_dir/<filename>`; a directory is recreated as
/// `dst_dir/<dirname>/...` with its full structure.
pub fn copy_into(src: &Path, dst_dir: &Path) -> io::Result<()> {
    if src.is_dir() {
        let name = src
            .file_name()
            .ok_or_else(|| io::Error::other(format!("'{}' has no final component", src.display())))?;
        let target_root = dst_dir.join(name);
        for entry in WalkDir::new(src) {
            let entry = entry.map_err(io::Error::other)?;
            let relative = entry
                .path()
                .strip_prefix(src)
                .map_err(io::Error::other)?;
            let target = target_root.join(relative);
            if entry.file_type().is_dir() {
                fs::create_dir_all(&target)?;
            } else {
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::copy(entry.path(), &target)?;
            }
        }
        Ok(())
    } else {
        let name = src
            .file_name()
            .ok_or_else(|| io::Error::other(format!("'{}' has no final component", src.display())))?;
        fs::copy(src, dst_dir.join(name))?;
        Ok(())
    }
}
