//! Asset loading: shader sources, procedural textures, scene presets.
//!
//! The renderer consumes assets as in-memory payloads, never by raw file
//! paths. Paths are resolved here, against a single asset root.
//!
//! # Invariants
//! - A shader's [`ShaderId`] is derived from its content, so two loads of the
//!   same text yield the same id regardless of path.

pub mod scenes;
pub mod texture;

use dxrt_common::ShaderSource;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

pub use texture::{checkerboard, default_checkerboard};

/// Content-addressed shader id computed from the source text and entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShaderId(pub u64);

impl ShaderId {
    pub fn of(source: &ShaderSource) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(source.code.as_bytes());
        hasher.update([0u8]);
        hasher.update(source.vertex_entry.as_bytes());
        hasher.update([0u8]);
        hasher.update(source.pixel_entry.as_bytes());
        let result = hasher.finalize();
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&result[..8]);
        ShaderId(u64::from_le_bytes(bytes))
    }
}

/// Errors from asset operations.
#[derive(Debug, thiserror::Error)]
pub enum AssetError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("asset not found: {0}")]
    NotFound(PathBuf),
    #[error("invalid texture: {0}")]
    InvalidTexture(String),
}

/// Resolves asset names against a root directory and loads them.
#[derive(Debug, Clone)]
pub struct AssetLoader {
    root: PathBuf,
}

impl AssetLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Loader rooted next to the running executable, falling back to the
    /// working directory when the executable path is unavailable.
    pub fn beside_executable() -> Self {
        let root = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."));
        Self::new(root)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Full path of a named asset under the root.
    pub fn asset_full_path(&self, name: impl AsRef<Path>) -> PathBuf {
        self.root.join(name)
    }

    /// Read a shader source file. Entry points default to `vs_main`/`fs_main`.
    pub fn load_shader(&self, name: impl AsRef<Path>) -> Result<ShaderSource, AssetError> {
        let path = self.asset_full_path(name);
        if !path.exists() {
            return Err(AssetError::NotFound(path));
        }
        let code = std::fs::read_to_string(&path).map_err(|source| AssetError::Io {
            path: path.clone(),
            source,
        })?;
        let shader = ShaderSource::new(path.display().to_string(), code);
        tracing::debug!(
            "loaded shader {} ({:016x})",
            shader.label,
            ShaderId::of(&shader).0
        );
        Ok(shader)
    }
}

pub fn crate_info() -> &'static str {
    "dxrt-assets v0.1.0"
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn full_path_joins_root() {
        let loader = AssetLoader::new("/opt/dxrt/assets");
        assert_eq!(
            loader.asset_full_path("shaders/shader.wgsl"),
            PathBuf::from("/opt/dxrt/assets/shaders/shader.wgsl")
        );
    }

    #[test]
    fn load_shader_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = std::fs::File::create(dir.path().join("tri.wgsl")).unwrap();
        writeln!(file, "@vertex fn vs_main() {{}}").unwrap();

        let loader = AssetLoader::new(dir.path());
        let shader = loader.load_shader("tri.wgsl").unwrap();
        assert!(shader.code.contains("vs_main"));
        assert_eq!(shader.vertex_entry, "vs_main");
        assert_eq!(shader.pixel_entry, "fs_main");
        assert!(shader.label.ends_with("tri.wgsl"));
    }

    #[test]
    fn missing_shader_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let loader = AssetLoader::new(dir.path());
        let err = loader.load_shader("missing.wgsl").unwrap_err();
        assert!(matches!(err, AssetError::NotFound(_)));
    }

    #[test]
    fn shader_id_is_content_addressed() {
        let a = ShaderSource::new("a.wgsl", "fn vs_main() {}");
        let b = ShaderSource::new("b.wgsl", "fn vs_main() {}");
        let c = ShaderSource::new("a.wgsl", "fn vs_main() {} // edited");
        assert_eq!(ShaderId::of(&a), ShaderId::of(&b));
        assert_ne!(ShaderId::of(&a), ShaderId::of(&c));
        let d = a.clone().with_entries("VSMain", "PSMain");
        assert_ne!(ShaderId::of(&a), ShaderId::of(&d));
    }
}
