//! Script compiler: wraps source text in a container and RC4-encrypts it.

use std::path::Path;
use std::sync::Arc;

use super::cipher::apply_keystream;
use super::{
    BufferAllocator, CompileError, Compiler, FileHeader, FileType, OutputBuffer, HEADER_SIZE,
};

/// Key embedded in every build; the runtime loader carries the same bytes.
pub const DEFAULT_KEY: &[u8] = b"snuff.script.v1";

/// Compiler for `.js` scripts.
#[derive(Debug)]
pub struct ScriptCompiler {
    key: Vec<u8>,
    output: OutputBuffer,
}

impl ScriptCompiler {
    /// Create a script compiler using [`DEFAULT_KEY`].
    pub fn new(allocator: Arc<dyn BufferAllocator>) -> Self {
        Self { key: DEFAULT_KEY.to_vec(), output: OutputBuffer::new(allocator) }
    }

    /// Use a different cipher key.
    pub fn with_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.key = key.into();
        self
    }

    /// The last decompiled script including its trailing NUL.
    ///
    /// Empty unless the last operation was a successful `decompile`.
    pub fn decompiled_with_nul(&self) -> &[u8] {
        self.output.raw()
    }
}

impl Compiler for ScriptCompiler {
    fn file_type(&self) -> FileType {
        FileType::Script
    }

    fn output(&mut self) -> &mut OutputBuffer {
        &mut self.output
    }

    fn compile_into(&mut self, input: &[u8], _source_path: &Path) -> Result<(), CompileError> {
        let header = FileHeader::new(FileType::Script, input.len() as u64);
        let out = self.output.allocate(HEADER_SIZE + input.len());
        header.write_to(out);

        let payload = &mut out[HEADER_SIZE..];
        payload.copy_from_slice(input);
        apply_keystream(&self.key, payload);
        Ok(())
    }

    fn decompile_into(&mut self, container: &[u8]) -> Result<(), CompileError> {
        let header = FileHeader::read_expecting(container, FileType::Script)?;
        let payload = header.payload(container)?;

        let out = self.output.allocate(payload.len() + 1);
        out[..payload.len()].copy_from_slice(payload);
        apply_keystream(&self.key, &mut out[..payload.len()]);
        out[payload.len()] = 0;

        self.output.set_visible(payload.len());
        Ok(())
    }
}
