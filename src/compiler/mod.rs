//! Pluggable per-file-type compilers.
//!
//! Every compiled artifact is wrapped in a tagged container (see [`header`]):
//! a fixed [`FileHeader`] followed by the compiler's payload. Compilers are
//! looked up by [`FileType`] through a [`CompilerRegistry`], so a new asset
//! kind only needs a `Compiler` impl and a `register` call.
//!
//! # Example
//!
//! ```ignore
//! use snuff::compiler::{CompilerRegistry, FileType};
//!
//! let mut registry = CompilerRegistry::with_defaults();
//! let compiler = registry.get_mut(FileType::Script).unwrap();
//! let container = compiler.compile(b"x=1;", Path::new("main.js"))?.to_vec();
//! assert_eq!(compiler.decompile(&container)?, b"x=1;");
//! ```

pub mod cipher;
pub mod header;
pub mod hlsl;
pub mod script;
pub mod shader;

pub use header::{FileHeader, HEADER_SIZE, MAGIC};
pub use hlsl::ShaderStage;
pub use script::ScriptCompiler;
pub use shader::ShaderCompiler;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Kind of asset a source file compiles into.
///
/// The numeric tag is what gets written into [`FileHeader::file_type`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FileType {
    /// Script source, stored encrypted
    Script,
    /// HLSL shader, stored as SPIR-V
    Shader,
}

impl FileType {
    /// All known file types.
    pub const ALL: [FileType; 2] = [FileType::Script, FileType::Shader];

    /// Container tag for this type.
    pub fn tag(self) -> u32 {
        match self {
            FileType::Script => 1,
            FileType::Shader => 2,
        }
    }

    /// Look up a type from its container tag.
    pub fn from_tag(tag: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.tag() == tag)
    }

    /// Map a file extension (without the dot, any case) to a type.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "js" => Some(FileType::Script),
            "vs" | "ps" | "gs" => Some(FileType::Shader),
            _ => None,
        }
    }

    /// Map a path to a type by its extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension().and_then(|e| e.to_str()).and_then(Self::from_extension)
    }

    /// Short lowercase name.
    pub fn name(self) -> &'static str {
        match self {
            FileType::Script => "script",
            FileType::Shader => "shader",
        }
    }
}

impl std::fmt::Display for FileType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Error raised by a compiler or by container validation.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum CompileError {
    /// Input does not start with a valid container header
    #[error("not a snuff container: {0}")]
    NotAContainer(String),
    /// Container belongs to a different compiler
    #[error("wrong file type: expected {expected}, found tag {found}")]
    WrongFileType { expected: FileType, found: u32 },
    /// Header declares more payload than the container holds
    #[error("container truncated: header declares {declared} bytes, payload has {actual}")]
    Truncated { declared: u64, actual: usize },
    /// Shader stage could not be inferred from the source path
    #[error("unrecognized shader stage for '{}' (expected .vs, .ps or .gs)", .0.display())]
    UnknownShaderStage(PathBuf),
    /// Source text could not be decoded
    #[error("invalid source: {0}")]
    InvalidSource(String),
    /// The HLSL cross-compiler rejected the shader
    #[error("shader cross-compilation failed:\n{0}")]
    CrossCompile(String),
    /// No compiler is registered for the file type
    #[error("no compiler registered for {0} files")]
    NoCompiler(FileType),
}

/// Allocation strategy for compiler output buffers.
///
/// The default [`HeapAllocator`] uses the global allocator. Engines that
/// pool their upload memory can plug their own implementation in through
/// [`CompilerRegistry::with_allocator`].
pub trait BufferAllocator: Send + Sync {
    /// Allocate a zeroed buffer of exactly `len` bytes.
    fn allocate(&self, len: usize) -> Vec<u8>;

    /// Give a buffer back once the compiler no longer needs it.
    fn release(&self, buffer: Vec<u8>);
}

/// Allocator backed by the global heap.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeapAllocator;

impl BufferAllocator for HeapAllocator {
    fn allocate(&self, len: usize) -> Vec<u8> {
        vec![0; len]
    }

    fn release(&self, buffer: Vec<u8>) {
        drop(buffer);
    }
}

/// The single transient output buffer a compiler instance owns.
///
/// Holds at most one allocation at a time: allocating again, calling
/// [`OutputBuffer::reset`] or dropping the buffer hands the previous
/// allocation back to the allocator.
pub struct OutputBuffer {
    allocator: Arc<dyn BufferAllocator>,
    data: Option<Vec<u8>>,
    /// Number of leading bytes exposed through `as_slice`
    visible: usize,
}

impl std::fmt::Debug for OutputBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputBuffer")
            .field("allocated", &self.data.as_ref().map(Vec::len))
            .field("visible", &self.visible)
            .finish()
    }
}

impl OutputBuffer {
    /// Create an empty buffer drawing from `allocator`.
    pub fn new(allocator: Arc<dyn BufferAllocator>) -> Self {
        Self { allocator, data: None, visible: 0 }
    }

    /// Release the held allocation, if any.
    pub fn reset(&mut self) {
        if let Some(buffer) = self.data.take() {
            self.allocator.release(buffer);
        }
        self.visible = 0;
    }

    /// Replace the held allocation with a fresh zeroed one of `len` bytes.
    pub fn allocate(&mut self, len: usize) -> &mut [u8] {
        self.reset();
        self.visible = len;
        self.data.insert(self.allocator.allocate(len)).as_mut_slice()
    }

    /// Limit the exposed view to the first `len` bytes of the allocation.
    pub fn set_visible(&mut self, len: usize) {
        self.visible = len.min(self.raw().len());
    }

    /// The exposed output bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.raw()[..self.visible]
    }

    /// The whole allocation, including bytes hidden by `set_visible`.
    pub fn raw(&self) -> &[u8] {
        self.data.as_deref().unwrap_or(&[])
    }

    /// Whether an allocation is currently held.
    pub fn is_allocated(&self) -> bool {
        self.data.is_some()
    }
}

impl Drop for OutputBuffer {
    fn drop(&mut self) {
        self.reset();
    }
}

/// Compile/decompile contract shared by all asset compilers.
///
/// Implementors provide the `*_into` primitives that fill their
/// [`OutputBuffer`]; the provided `compile` / `decompile` methods release the
/// previous output first, so an instance never holds more than one buffer.
pub trait Compiler: Send {
    /// The file type this compiler produces and accepts.
    fn file_type(&self) -> FileType;

    /// The instance's output buffer.
    fn output(&mut self) -> &mut OutputBuffer;

    /// Compile `input` into the output buffer as a complete container.
    ///
    /// `source_path` is the original file location; compilers that need
    /// context (shader stage, include directory) derive it from there.
    fn compile_into(&mut self, input: &[u8], source_path: &Path) -> Result<(), CompileError>;

    /// Unwrap `container` into the output buffer.
    fn decompile_into(&mut self, container: &[u8]) -> Result<(), CompileError>;

    /// Compile `input`, returning the container bytes.
    fn compile(&mut self, input: &[u8], source_path: &Path) -> Result<&[u8], CompileError> {
        self.output().reset();
        self.compile_into(input, source_path)?;
        Ok(self.output().as_slice())
    }

    /// Decompile a container produced by this compiler.
    fn decompile(&mut self, container: &[u8]) -> Result<&[u8], CompileError> {
        self.output().reset();
        self.decompile_into(container)?;
        Ok(self.output().as_slice())
    }

    /// Validate the container prefix of `data`.
    fn file_header(&self, data: &[u8]) -> Result<FileHeader, CompileError> {
        FileHeader::read(data)
    }
}

/// Maps file types to compiler instances.
///
/// Each worker owns its own registry, giving one compiler instance per
/// (worker, file type) pair.
pub struct CompilerRegistry {
    compilers: BTreeMap<FileType, Box<dyn Compiler>>,
}

impl std::fmt::Debug for CompilerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompilerRegistry")
            .field("types", &self.compilers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl CompilerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self { compilers: BTreeMap::new() }
    }

    /// Registry with the script and shader compilers on the heap allocator.
    pub fn with_defaults() -> Self {
        Self::with_allocator(Arc::new(HeapAllocator))
    }

    /// Registry with the script and shader compilers on a custom allocator.
    pub fn with_allocator(allocator: Arc<dyn BufferAllocator>) -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(ScriptCompiler::new(Arc::clone(&allocator))));
        registry.register(Box::new(ShaderCompiler::new(allocator)));
        registry
    }

    /// Register a compiler under its own file type, replacing any previous one.
    pub fn register(&mut self, compiler: Box<dyn Compiler>) -> Option<Box<dyn Compiler>> {
        self.compilers.insert(compiler.file_type(), compiler)
    }

    /// Get the compiler for a file type.
    pub fn get_mut(&mut self, file_type: FileType) -> Option<&mut (dyn Compiler + 'static)> {
        self.compilers.get_mut(&file_type).map(|c| c.as_mut())
    }

    /// Whether a compiler is registered for the type.
    pub fn supports(&self, file_type: FileType) -> bool {
        self.compilers.contains_key(&file_type)
    }

    /// Registered file types in tag order.
    pub fn file_types(&self) -> impl Iterator<Item = FileType> + '_ {
        self.compilers.keys().copied()
    }

    /// Decompile a container with whichever compiler its header names.
    pub fn decompile(&mut self, container: &[u8]) -> Result<(FileType, Vec<u8>), CompileError> {
        let header = FileHeader::read(container)?;
        let file_type = FileType::from_tag(header.file_type).ok_or_else(|| {
            CompileError::NotAContainer(format!("unknown file type tag {}", header.file_type))
        })?;
        let compiler = self.get_mut(file_type).ok_or(CompileError::NoCompiler(file_type))?;
        let payload = compiler.decompile(container)?.to_vec();
        Ok((file_type, payload))
    }
}

impl Default for CompilerRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingAllocator {
        allocated: AtomicUsize,
        released: AtomicUsize,
    }

    impl BufferAllocator for CountingAllocator {
        fn allocate(&self, len: usize) -> Vec<u8> {
            self.allocated.fetch_add(1, Ordering::SeqCst);
            vec![0; len]
        }

        fn release(&self, _buffer: Vec<u8>) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_file_type_from_extension() {
        assert_eq!(FileType::from_extension("js"), Some(FileType::Script));
        assert_eq!(FileType::from_extension("JS"), Some(FileType::Script));
        assert_eq!(FileType::from_extension("vs"), Some(FileType::Shader));
        assert_eq!(FileType::from_extension("ps"), Some(FileType::Shader));
        assert_eq!(FileType::from_extension("gs"), Some(FileType::Shader));
        assert_eq!(FileType::from_extension("png"), None);
        assert_eq!(FileType::from_path(Path::new("a/b/main.js")), Some(FileType::Script));
        assert_eq!(FileType::from_path(Path::new("README")), None);
    }

    #[test]
    fn test_file_type_tags() {
        for ft in FileType::ALL {
            assert_eq!(FileType::from_tag(ft.tag()), Some(ft));
        }
        assert_eq!(FileType::from_tag(0), None);
        assert_eq!(FileType::Shader.to_string(), "shader");
    }

    #[test]
    fn test_output_buffer_holds_one_allocation() {
        let alloc = Arc::new(CountingAllocator::default());
        let mut buffer = OutputBuffer::new(alloc.clone());

        buffer.allocate(8);
        buffer.allocate(4);
        assert_eq!(alloc.allocated.load(Ordering::SeqCst), 2);
        assert_eq!(alloc.released.load(Ordering::SeqCst), 1);
        assert_eq!(buffer.as_slice().len(), 4);

        drop(buffer);
        assert_eq!(alloc.released.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_output_buffer_visible_view() {
        let mut buffer = OutputBuffer::new(Arc::new(HeapAllocator));
        assert!(!buffer.is_allocated());
        assert!(buffer.as_slice().is_empty());

        buffer.allocate(5).copy_from_slice(b"abcd\0");
        buffer.set_visible(4);
        assert_eq!(buffer.as_slice(), b"abcd");
        assert_eq!(buffer.raw(), b"abcd\0");

        buffer.set_visible(100);
        assert_eq!(buffer.as_slice().len(), 5);
    }

    #[test]
    fn test_compile_releases_previous_output() {
        let alloc = Arc::new(CountingAllocator::default());
        let mut registry = CompilerRegistry::with_allocator(alloc.clone());
        let script = registry.get_mut(FileType::Script).unwrap();

        script.compile(b"one", Path::new("a.js")).unwrap();
        script.compile(b"two", Path::new("b.js")).unwrap();

        assert_eq!(alloc.allocated.load(Ordering::SeqCst), 2);
        assert_eq!(alloc.released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_registry_defaults() {
        let registry = CompilerRegistry::with_defaults();
        assert!(registry.supports(FileType::Script));
        assert!(registry.supports(FileType::Shader));
        assert_eq!(registry.file_types().collect::<Vec<_>>(), FileType::ALL.to_vec());
    }

    #[test]
    fn test_registry_decompile_dispatches_on_header() {
        let mut registry = CompilerRegistry::with_defaults();
        let container = registry
            .get_mut(FileType::Script)
            .unwrap()
            .compile(b"print(1)", Path::new("x.js"))
            .unwrap()
            .to_vec();

        let (file_type, payload) = registry.decompile(&container).unwrap();
        assert_eq!(file_type, FileType::Script);
        assert_eq!(payload, b"print(1)");
    }

    #[test]
    fn test_registry_decompile_unknown_tag() {
        let mut registry = CompilerRegistry::with_defaults();
        let data = FileHeader { magic: MAGIC, file_type: 99, size: 0 }.to_bytes();
        assert!(matches!(registry.decompile(&data), Err(CompileError::NotAContainer(_))));
    }

    #[test]
    fn test_file_header_rejects_foreign_data_for_every_compiler() {
        let mut registry = CompilerRegistry::with_defaults();
        let garbage = b"PNG\x89 definitely not a container";
        for ft in FileType::ALL {
            let compiler = registry.get_mut(ft).unwrap();
            assert!(matches!(compiler.file_header(garbage), Err(CompileError::NotAContainer(_))));
            assert!(compiler.decompile(garbage).is_err());
        }
    }
}
