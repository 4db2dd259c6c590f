//! SPIR-V loading from disk.

use std::fs::File;
use std::path::{Path, PathBuf};
use touhou_gpu::error::{GpuError, Result};

/// File name of the compiled vertex shader.
pub const VERTEX_SHADER_FILE: &str = "vert.spv";
/// File name of the compiled fragment shader.
pub const FRAGMENT_SHADER_FILE: &str = "frag.spv";

/// Read a SPIR-V binary into 32-bit words.
///
/// A missing file is [`GpuError::ResourceNotFound`]; a file that is not
/// SPIR-V is [`GpuError::ShaderCompilation`].
pub fn load_spirv(path: &Path) -> Result<Vec<u32>> {
    let mut file = File::open(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            GpuError::ResourceNotFound(path.display().to_string())
        } else {
            GpuError::Other(format!("Failed to open {}: {e}", path.display()))
        }
    })?;

    let words = ash::util::read_spv(&mut file)
        .map_err(|e| GpuError::ShaderCompilation(format!("{}: {e}", path.display())))?;

    tracing::debug!("Loaded {} ({} words)", path.display(), words.len());

    Ok(words)
}

/// Vertex and fragment shader code for the quad pipeline.
#[derive(Debug, Clone)]
pub struct ShaderSet {
    pub vertex: Vec<u32>,
    pub fragment: Vec<u32>,
}

impl ShaderSet {
    /// Load `vert.spv` and `frag.spv` from a directory.
    pub fn load(dir: &Path) -> Result<Self> {
        let (vertex_path, fragment_path) = Self::paths(dir);
        Ok(Self {
            vertex: load_spirv(&vertex_path)?,
            fragment: load_spirv(&fragment_path)?,
        })
    }

    /// Where [`ShaderSet::load`] looks.
    pub fn paths(dir: &Path) -> (PathBuf, PathBuf) {
        (dir.join(VERTEX_SHADER_FILE), dir.join(FRAGMENT_SHADER_FILE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPIRV_MAGIC: u32 = 0x0723_0203;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("touhou-shader-{name}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn missing_file_is_resource_not_found() {
        let dir = scratch_dir("missing");
        let err = load_spirv(&dir.join("nope.spv")).unwrap_err();
        assert!(matches!(err, GpuError::ResourceNotFound(_)));
    }

    #[test]
    fn reads_words() {
        let dir = scratch_dir("words");
        let path = dir.join("ok.spv");
        let words = [SPIRV_MAGIC, 0x0001_0000, 0, 1, 0];
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        std::fs::write(&path, bytes).unwrap();

        assert_eq!(load_spirv(&path).unwrap(), words);
    }

    #[test]
    fn rejects_non_spirv() {
        let dir = scratch_dir("garbage");
        let path = dir.join("bad.spv");
        std::fs::write(&path, [1u8, 2, 3]).unwrap();

        let err = load_spirv(&path).unwrap_err();
        assert!(matches!(err, GpuError::ShaderCompilation(_)));
    }

    #[test]
    fn shader_set_needs_both_stages() {
        let dir = scratch_dir("half");
        let bytes: Vec<u8> = [SPIRV_MAGIC, 0x0001_0000]
            .iter()
            .flat_map(|w| w.to_le_bytes())
            .collect();
        std::fs::write(dir.join(VERTEX_SHADER_FILE), bytes).unwrap();
        let _ = std::fs::remove_file(dir.join(FRAGMENT_SHADER_FILE));

        let err = ShaderSet::load(&dir).unwrap_err();
        assert!(matches!(err, GpuError::ResourceNotFound(_)));
    }
}
