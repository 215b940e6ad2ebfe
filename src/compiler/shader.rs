//! Shader compiler: HLSL in, SPIR-V container out.

use std::path::Path;
use std::sync::Arc;

use super::hlsl::{compile_hlsl, ShaderStage};
use super::{
    BufferAllocator, CompileError, Compiler, FileHeader, FileType, OutputBuffer, HEADER_SIZE,
};

/// Compiler for `.vs`, `.ps` and `.gs` HLSL sources.
///
/// The stage is taken from the source path's extension. Decompiling returns
/// the SPIR-V module stored in the container.
#[derive(Debug)]
pub struct ShaderCompiler {
    output: OutputBuffer,
}

impl ShaderCompiler {
    pub fn new(allocator: Arc<dyn BufferAllocator>) -> Self {
        Self { output: OutputBuffer::new(allocator) }
    }
}

impl Compiler for ShaderCompiler {
    fn file_type(&self) -> FileType {
        FileType::Shader
    }

    fn output(&mut self) -> &mut OutputBuffer {
        &mut self.output
    }

    fn compile_into(&mut self, input: &[u8], source_path: &Path) -> Result<(), CompileError> {
        let stage = ShaderStage::from_path(source_path)
            .ok_or_else(|| CompileError::UnknownShaderStage(source_path.to_path_buf()))?;
        let source = std::str::from_utf8(input).map_err(|e| {
            CompileError::InvalidSource(format!("{} is not UTF-8: {}", source_path.display(), e))
        })?;

        let words = compile_hlsl(source, source_path, stage).map_err(CompileError::CrossCompile)?;
        log::debug!(
            "{}: {} shader, {} SPIR-V words",
            source_path.display(),
            stage.name(),
            words.len()
        );

        let size = words.len() * 4;
        let out = self.output.allocate(HEADER_SIZE + size);
        FileHeader::new(FileType::Shader, size as u64).write_to(out);
        for (chunk, word) in out[HEADER_SIZE..].chunks_exact_mut(4).zip(&words) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        Ok(())
    }

    fn decompile_into(&mut self, container: &[u8]) -> Result<(), CompileError> {
        let header = FileHeader::read_expecting(container, FileType::Shader)?;
        let payload = header.payload(container)?;
        self.output.allocate(payload.len()).copy_from_slice(payload);
        Ok(())
    }
}
