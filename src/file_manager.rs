//! # File Management Module
//!
//! Input discovery and small size helpers.
//!
//! Discovery walks the input directory recursively and keeps the supported
//! image formats (JPEG, PNG, WebP). Results are sorted so a batch over the
//! same tree always dispatches jobs in the same order.

use anyhow::Result;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Extensions the compressor accepts as input.
const SUPPORTED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp"];

/// Check if a file is a supported input image.
pub fn is_supported_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let lower = ext.to_lowercase();
            SUPPORTED_EXTENSIONS.contains(&lower.as_str())
        })
        .unwrap_or(false)
}

/// Find all supported images under `input_dir`, sorted for deterministic
/// dispatch order.
pub fn find_input_images(input_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = WalkDir::new(input_dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| is_supported_image(path))
        .collect();

    files.sort();
    Ok(files)
}

/// Get human-readable file size
pub fn format_size(size: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = size as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", size as u64, UNITS[unit_index])
    } else {
        format!("{:.2} {}", size, UNITS[unit_index])
    }
}

/// Calculate percentage reduction
pub fn reduction_percent(original_size: u64, new_size: u64) -> f64 {
    if original_size == 0 {
        0.0
    } else {
        (original_size.saturating_sub(new_size)) as f64 / original_size as f64 * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_supported_extensions() {
        assert!(is_supported_image(Path::new("photo.jpg")));
        assert!(is_supported_image(Path::new("photo.JPEG")));
        assert!(is_supported_image(Path::new("dir/photo.webp")));
        assert!(!is_supported_image(Path::new("clip.mp4")));
        assert!(!is_supported_image(Path::new("notes.txt")));
        assert!(!is_supported_image(Path::new("no_extension")));
    }

    #[test]
    fn test_find_input_images_recursive_and_sorted() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("nested");
        std::fs::create_dir_all(&nested).unwrap();

        std::fs::write(temp_dir.path().join("b.jpg"), b"x").unwrap();
        std::fs::write(temp_dir.path().join("a.png"), b"x").unwrap();
        std::fs::write(temp_dir.path().join("skip.txt"), b"x").unwrap();
        std::fs::write(nested.join("c.webp"), b"x").unwrap();

        let files = find_input_images(temp_dir.path()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.png", "b.jpg", "c.webp"]);
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.00 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.00 MB");
    }

    #[test]
    fn test_reduction_percent() {
        assert_eq!(reduction_percent(100, 25), 75.0);
        assert_eq!(reduction_percent(0, 25), 0.0);
        assert_eq!(reduction_percent(100, 150), 0.0);
    }
}
