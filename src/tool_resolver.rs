//! # External Tool Resolution
//!
//! Encoder and metric binaries are located by name on the system `PATH`.
//! A missing tool disables only the pipelines that depend on it; the run
//! fails fast before any job starts only when nothing usable remains.

use std::env;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Resolves external binaries by searching the system PATH.
#[derive(Debug, Default)]
pub struct ToolResolver;

impl ToolResolver {
    pub fn new() -> Self {
        Self
    }

    /// Resolve the first available binary from a list of alternative names
    /// (e.g. `cjpeg` with `mozjpeg` as a fallback name).
    pub fn resolve(&self, names: &[&str]) -> Option<PathBuf> {
        for name in names {
            if let Some(path) = self.find_in_path(name) {
                debug!("Resolved tool {} -> {}", name, path.display());
                return Some(path);
            }
        }
        debug!("No binary found for any of: {:?}", names);
        None
    }

    /// Check whether any of the alternative names is available.
    pub fn is_available(&self, names: &[&str]) -> bool {
        self.resolve(names).is_some()
    }

    /// Find a single binary name in the system PATH.
    fn find_in_path(&self, tool_name: &str) -> Option<PathBuf> {
        let extension = if cfg!(windows) { ".exe" } else { "" };
        let tool_with_ext = format!("{}{}", tool_name, extension);

        env::var_os("PATH")?
            .to_str()?
            .split(if cfg!(windows) { ';' } else { ':' })
            .map(|dir| Path::new(dir).join(&tool_with_ext))
            .find(|path| path.is_file())
    }

    /// Installation hint for a missing tool, used in warnings.
    pub fn install_hint(tool_name: &str) -> &'static str {
        match tool_name {
            "cjpeg" | "mozjpeg" => "apt-get install libjpeg-progs (or build mozjpeg)",
            "cwebp" => "apt-get install webp",
            "avifenc" => "apt-get install libavif-bin",
            "oxipng" => "cargo install oxipng",
            "butteraugli" => "build from github.com/google/butteraugli",
            _ => "install the tool and make sure it is on PATH",
        }
    }
}
