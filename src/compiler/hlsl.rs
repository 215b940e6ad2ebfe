//! HLSL to SPIR-V cross-compilation.
//!
//! Wraps the `shaderc` (glslang) front end. The toolchain is treated as
//! non-reentrant: every call holds [`TOOLCHAIN_LOCK`] for its whole duration.
//! Includes are resolved only against the directory of the shader being
//! compiled; `#include <...>` system includes are never found.

use std::path::{Component, Path};
use std::sync::OnceLock;

use parking_lot::Mutex;
use regex::Regex;

/// Serializes every call into the cross-compiler.
pub static TOOLCHAIN_LOCK: Mutex<()> = parking_lot::const_mutex(());

/// Pipeline stage a shader source targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Geometry,
}

impl ShaderStage {
    /// Stage from a source extension (`vs`, `ps`, `gs`, any case).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "vs" => Some(ShaderStage::Vertex),
            "ps" => Some(ShaderStage::Fragment),
            "gs" => Some(ShaderStage::Geometry),
            _ => None,
        }
    }

    /// Stage from a source path's extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension().and_then(|e| e.to_str()).and_then(Self::from_extension)
    }

    pub fn name(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vertex",
            ShaderStage::Fragment => "fragment",
            ShaderStage::Geometry => "geometry",
        }
    }
}

/// How a `#include` directive named its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncludeKind {
    /// `#include "file"`
    Relative,
    /// `#include <file>`
    Standard,
}

/// A successfully resolved include.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedInclude {
    pub resolved_name: String,
    pub content: String,
}

/// Resolve an include against `base_dir`, the directory of the top-level
/// shader. Standard includes are never found, and relative includes may not
/// climb out of `base_dir` or name an absolute path.
pub fn resolve_include(
    requested: &str,
    kind: IncludeKind,
    base_dir: &Path,
) -> Result<ResolvedInclude, String> {
    if kind == IncludeKind::Standard {
        return Err(format!("cannot find system include <{}>", requested));
    }
    if !stays_within(Path::new(requested)) {
        return Err(format!("include '{}' leaves the shader directory", requested));
    }

    let path = base_dir.join(requested);
    let content = std::fs::read_to_string(&path)
        .map_err(|e| format!("cannot open include '{}': {}", path.display(), e))?;
    Ok(ResolvedInclude { resolved_name: path.to_string_lossy().into_owned(), content })
}

/// Whether a relative path, normalised lexically, stays below its base.
fn stays_within(requested: &Path) -> bool {
    let mut depth = 0usize;
    for component in requested.components() {
        match component {
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
            Component::ParentDir => match depth.checked_sub(1) {
                Some(d) => depth = d,
                None => return false,
            },
            Component::RootDir | Component::Prefix(_) => return false,
        }
    }
    depth > 0
}

fn diagnostic_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(?:.*?):(\d+): (?:error|warning): (.*)$").expect("diagnostic regex is valid")
    })
}

fn quoted_token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"'([^']+)'").expect("token regex is valid"))
}

/// Turn raw front-end diagnostics into a readable report.
///
/// Located diagnostics are followed by the offending source line and, when the
/// message quotes a token found on that line, a caret under each occurrence
/// of it; glslang reports lines, not columns. Diagnostics without a location
/// come from the link stage and are labelled as such.
pub fn describe_diagnostics(source: &str, raw: &str) -> String {
    let lines: Vec<&str> = source.lines().collect();
    let mut report = Vec::new();

    for diagnostic in raw.lines().map(str::trim_end).filter(|l| !l.trim().is_empty()) {
        let Some(caps) = diagnostic_pattern().captures(diagnostic) else {
            if diagnostic.contains("error") {
                report.push(format!("link error: {}", diagnostic.trim()));
            } else {
                report.push(diagnostic.to_string());
            }
            continue;
        };

        report.push(diagnostic.to_string());

        let line_no: usize = caps[1].parse().unwrap_or(0);
        let Some(text) = line_no.checked_sub(1).and_then(|i| lines.get(i)) else {
            continue;
        };
        report.push(format!("    {}", text));

        let token = quoted_token_pattern()
            .captures_iter(&caps[2])
            .filter_map(|t| t.get(1))
            .map(|t| t.as_str())
            .find(|t| text.contains(t));
        if let Some(token) = token {
            report.push(format!("    {}", caret_line(text, token)));
        }
    }

    report.join("\n")
}

/// Carets under every occurrence of `token` in `text`, keeping tabs aligned.
fn caret_line(text: &str, token: &str) -> String {
    let mut marker = String::new();
    let mut cursor = 0;
    for (column, _) in text.match_indices(token) {
        marker.extend(text[cursor..column].chars().map(|c| if c == '\t' { '\t' } else { ' ' }));
        marker.push('^');
        cursor = column + text[column..].chars().next().map_or(1, char::len_utf8);
    }
    marker
}

/// Cross-compile HLSL `source` for `stage` into SPIR-V words.
///
/// `source_path` names the shader in diagnostics and anchors relative includes.
#[cfg(feature = "shaders")]
pub fn compile_hlsl(source: &str, source_path: &Path, stage: ShaderStage) -> Result<Vec<u32>, String> {
    use shaderc::{CompileOptions, EnvVersion, IncludeType, ShaderKind, SourceLanguage, TargetEnv};

    let _guard = TOOLCHAIN_LOCK.lock();

    let base_dir = source_path.parent().unwrap_or(Path::new("")).to_path_buf();
    let file_name = source_path.to_string_lossy();

    let compiler = shaderc::Compiler::new().ok_or("failed to initialize the HLSL front end")?;
    let mut options = CompileOptions::new().ok_or("failed to create HLSL compile options")?;
    options.set_source_language(SourceLanguage::HLSL);
    options.set_target_env(TargetEnv::Vulkan, EnvVersion::Vulkan1_0 as u32);
    options.set_include_callback(move |requested, include_type, _requesting, _depth| {
        let kind = match include_type {
            IncludeType::Relative => IncludeKind::Relative,
            IncludeType::Standard => IncludeKind::Standard,
        };
        resolve_include(requested, kind, &base_dir).map(|r| shaderc::ResolvedInclude {
            resolved_name: r.resolved_name,
            content: r.content,
        })
    });

    let kind = match stage {
        ShaderStage::Vertex => ShaderKind::Vertex,
        ShaderStage::Fragment => ShaderKind::Fragment,
        ShaderStage::Geometry => ShaderKind::Geometry,
    };

    match compiler.compile_into_spirv(source, kind, &file_name, "main", Some(&options)) {
        Ok(artifact) => {
            if artifact.get_num_warnings() > 0 {
                log::warn!("{}: {}", file_name, artifact.get_warning_messages().trim_end());
            }
            Ok(artifact.as_binary().to_vec())
        }
        Err(shaderc::Error::CompilationError(_, messages)) => {
            Err(describe_diagnostics(source, &messages))
        }
        Err(other) => Err(other.to_string()),
    }
}

/// Cross-compile HLSL `source` for `stage` into SPIR-V words.
///
/// Built without the `shaders` feature: always fails.
#[cfg(not(feature = "shaders"))]
pub fn compile_hlsl(
    _source: &str,
    _source_path: &Path,
    _stage: ShaderStage,
) -> Result<Vec<u32>, String> {
    let _guard = TOOLCHAIN_LOCK.lock();
    Err("HLSL cross-compilation is unavailable: snuff was built without the `shaders` feature"
        .to_string())
}
