//! Docling backend: drives the `docling` command-line tool.
//!
//! Capabilities are read once from `docling --help`; a profile is only built
//! when every option it needs is listed there. Each conversion runs
//!
//! ```text
//! docling --to md --output <tmpdir> [--device D] [--ocr|--no-ocr] [--document-timeout S] <path>
//! ```
//!
//! and reads the Markdown back from `<tmpdir>/<stem>.md`.

use crate::engine::device::Device;
use crate::engine::{BuildError, ConvertedDocument, DocumentEngine, EngineFactory, EngineProfile};
use crate::error::Doc2MdError;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::{Arc, OnceLock};
use std::time::Instant;
use tracing::{debug, info, warn};

const STDERR_TAIL: usize = 2000;

/// Options of the installed docling CLI that profiles depend on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DoclingCapabilities {
    pub device: bool,
    pub ocr: bool,
    pub document_timeout: bool,
}

impl DoclingCapabilities {
    pub fn from_help(help: &str) -> Self {
        let has = |flag: &str| {
            help.split(|c: char| c.is_whitespace() || c == ',' || c == '/' || c == '=')
                .any(|tok| tok == flag)
        };
        Self {
            device: has("--device"),
            ocr: has("--ocr"),
            document_timeout: has("--document-timeout"),
        }
    }
}

/// Builds [`DoclingEngine`]s, probing the executable on first use.
#[derive(Debug)]
pub struct DoclingFactory {
    program: PathBuf,
    document_timeout_secs: Option<u64>,
    capabilities: OnceLock<Result<DoclingCapabilities, String>>,
}

impl DoclingFactory {
    pub fn new(program: impl Into<PathBuf>, document_timeout_secs: Option<u64>) -> Self {
        Self {
            program: program.into(),
            document_timeout_secs,
            capabilities: OnceLock::new(),
        }
    }

    fn capabilities(&self) -> Result<&DoclingCapabilities, BuildError> {
        self.capabilities
            .get_or_init(|| probe(&self.program))
            .as_ref()
            .map_err(|msg| BuildError::Fatal(Doc2MdError::EngineInit(msg.clone())))
    }
}

fn probe(program: &Path) -> Result<DoclingCapabilities, String> {
    let output = Command::new(program)
        .arg("--help")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                format!("docling executable '{}' not found", program.display())
            } else {
                format!("failed to run '{} --help': {err}", program.display())
            }
        })?;

    if !output.status.success() {
        return Err(format!(
            "'{} --help' exited with {}: {}",
            program.display(),
            output.status,
            tail(&String::from_utf8_lossy(&output.stderr))
        ));
    }

    let help = String::from_utf8_lossy(&output.stdout);
    let caps = DoclingCapabilities::from_help(&help);
    debug!(?caps, program = %program.display(), "Probed docling capabilities");
    Ok(caps)
}

impl EngineFactory for DoclingFactory {
    fn name(&self) -> &str {
        "docling"
    }

    fn build(&self, profile: &EngineProfile) -> Result<Arc<dyn DocumentEngine>, BuildError> {
        let caps = self.capabilities()?;
        if profile.device.is_some() && !caps.device {
            return Err(BuildError::Incompatible("docling has no --device option".into()));
        }
        if profile.ocr.is_some() && !caps.ocr {
            return Err(BuildError::Incompatible("docling has no --ocr option".into()));
        }

        let document_timeout_secs = match self.document_timeout_secs {
            Some(secs) if caps.document_timeout => Some(secs),
            Some(_) => {
                warn!("docling has no --document-timeout option; relying on the request timeout");
                None
            }
            None => None,
        };

        Ok(Arc::new(DoclingEngine {
            program: self.program.clone(),
            device: profile.device,
            ocr: profile.ocr,
            document_timeout_secs,
        }))
    }
}

/// One configured docling invocation.
#[derive(Debug, Clone)]
pub struct DoclingEngine {
    program: PathBuf,
    device: Option<Device>,
    ocr: Option<bool>,
    document_timeout_secs: Option<u64>,
}

impl DoclingEngine {
    fn command(&self, input: &Path, output_dir: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("--to").arg("md").arg("--output").arg(output_dir);
        if let Some(device) = self.device {
            cmd.arg("--device").arg(device.engine_name());
            if let Device::Cuda { index: Some(i) } = device {
                cmd.env("CUDA_VISIBLE_DEVICES", i.to_string());
            }
        }
        match self.ocr {
            Some(true) => {
                cmd.arg("--ocr");
            }
            Some(false) => {
                cmd.arg("--no-ocr");
            }
            None => {}
        }
        if let Some(secs) = self.document_timeout_secs {
            cmd.arg("--document-timeout").arg(secs.to_string());
        }
        cmd.arg(input)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }
}

impl DocumentEngine for DoclingEngine {
    fn name(&self) -> &str {
        "docling"
    }

    fn convert(&self, path: &Path) -> Result<ConvertedDocument, Doc2MdError> {
        let started = Instant::now();
        let out_dir = tempfile::Builder::new()
            .prefix("doc2md-out-")
            .tempdir()
            .map_err(|e| Doc2MdError::Internal(format!("Failed to create output dir: {e}")))?;

        let output = self
            .command(path, out_dir.path())
            .output()
            .map_err(|e| Doc2MdError::ConversionFailed {
                detail: format!("failed to run docling: {e}"),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(
                path = %path.display(),
                exit_code = output.status.code().unwrap_or(-1),
                stderr = %tail(&stderr),
                "docling invocation failed"
            );
            return Err(Doc2MdError::ConversionFailed {
                detail: format!("docling exited with {}: {}", output.status, tail(&stderr)),
            });
        }

        let markdown_path = find_markdown(path, out_dir.path()).ok_or_else(|| {
            Doc2MdError::ConversionFailed {
                detail: "docling produced no Markdown output".into(),
            }
        })?;
        let markdown = std::fs::read_to_string(&markdown_path).map_err(|e| {
            Doc2MdError::ConversionFailed {
                detail: format!("failed to read docling output: {e}"),
            }
        })?;

        info!(
            path = %path.display(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            markdown_bytes = markdown.len(),
            "docling conversion complete"
        );
        Ok(ConvertedDocument::new(markdown))
    }
}

/// `<dir>/<stem>.md`, or the only `.md` file docling left in `dir`.
fn find_markdown(input: &Path, dir: &Path) -> Option<PathBuf> {
    if let Some(stem) = input.file_stem() {
        let expected = dir.join(format!("{}.md", stem.to_string_lossy()));
        if expected.is_file() {
            return Some(expected);
        }
    }
    std::fs::read_dir(dir)
        .ok()?
        .filter_map(Result::ok)
        .map(|e| e.path())
        .find(|p| p.extension().is_some_and(|ext| ext == "md"))
}

fn tail(s: &str) -> &str {
    let s = s.trim();
    if s.len() <= STDERR_TAIL {
        return s;
    }
    let mut start = s.len() - STDERR_TAIL;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    &s[start..]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capabilities_from_help_text() {
        let help = "Usage: docling [OPTIONS] SOURCE\n\
                    --to [md|json]\n\
                    --ocr / --no-ocr   Use OCR\n\
                    --device [auto|cpu|cuda|mps]\n";
        let caps = DoclingCapabilities::from_help(help);
        assert!(caps.device);
        assert!(caps.ocr);
        assert!(!caps.document_timeout);

        let bare = DoclingCapabilities::from_help("--to [md]\n--output PATH\n--ocr-engine TEXT");
        assert_eq!(bare, DoclingCapabilities::default());
    }

    #[test]
    fn tail_keeps_end_of_long_output() {
        let long = "x".repeat(STDERR_TAIL + 10) + "END";
        assert!(tail(&long).ends_with("END"));
        assert_eq!(tail(&long).len(), STDERR_TAIL);
        assert_eq!(tail("  short \n"), "short");
    }

    #[test]
    fn missing_executable_is_fatal() {
        let factory = DoclingFactory::new("/nonexistent/docling-binary", None);
        match factory.build(&EngineProfile::default()) {
            Err(BuildError::Fatal(Doc2MdError::EngineInit(msg))) => {
                assert!(msg.contains("not found"), "got: {msg}")
            }
            other => panic!("expected fatal error, got {:?}", other.map(|e| e.name().to_string())),
        }
    }
}

#[cfg(all(test, unix))]
mod script_tests {
    use super::*;
    use crate::engine::build_with_fallback;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn make_executable(path: &Path) {
        let mut perms = fs::metadata(path).expect("metadata").permissions();
        perms.set_mode(0o755);
        fs::set_permissions(path, perms).expect("set perms");
    }

    /// A stand-in `docling` that advertises `help_options` and writes
    /// `# converted <name>` to `<out>/<stem>.md`, logging its args.
    fn fake_docling(dir: &Path, help_options: &str) -> (PathBuf, PathBuf) {
        let script_path = dir.join("fake-docling");
        let args_path = dir.join("args.log");
        let script = format!(
            r#"#!/bin/sh
set -eu
if [ "${{1:-}}" = "--help" ]; then
  cat <<'HELP'
Usage: docling [OPTIONS] SOURCE
  --to [md|json|html]
  --output PATH
{help_options}
HELP
  exit 0
fi
echo "CUDA_VISIBLE_DEVICES=${{CUDA_VISIBLE_DEVICES:-unset}} $@" > "{args_file}"
out=""
input=""
while [ "$#" -gt 0 ]; do
  case "$1" in
    --output) shift; out="$1" ;;
    --to|--device|--document-timeout) shift ;;
    --*) ;;
    *) input="$1" ;;
  esac
  shift
done
base=$(basename "$input")
stem="${{base%.*}}"
printf '# converted %s\n' "$base" > "$out/$stem.md"
"#,
            help_options = help_options,
            args_file = args_path.display()
        );
        fs::write(&script_path, script).expect("write script");
        make_executable(&script_path);
        (script_path, args_path)
    }

    fn input_file(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, b"%PDF-1.7").expect("write input");
        path
    }

    #[test]
    fn full_profile_passes_device_and_ocr() {
        let dir = TempDir::new().expect("temp dir");
        let (script, args) = fake_docling(
            dir.path(),
            "  --device [auto|cpu|cuda|mps]\n  --ocr / --no-ocr\n  --document-timeout FLOAT",
        );
        let factory = DoclingFactory::new(&script, Some(90));
        let (engine, profile) =
            build_with_fallback(&factory, &EngineProfile::ladder(Device::Cpu, false))
                .expect("engine");
        assert_eq!(profile.ocr, Some(false));

        let input = input_file(dir.path(), "report.pdf");
        let doc = engine.convert(&input).expect("converted");
        assert_eq!(doc.export_to_markdown(), "# converted report.pdf\n");

        let logged = fs::read_to_string(&args).expect("args");
        assert!(logged.contains("--to md"), "args: {logged}");
        assert!(logged.contains("--device cpu"), "args: {logged}");
        assert!(logged.contains("--no-ocr"), "args: {logged}");
        assert!(logged.contains("--document-timeout 90"), "args: {logged}");
    }

    #[test]
    fn missing_ocr_option_falls_back_to_device_only() {
        let dir = TempDir::new().expect("temp dir");
        let (script, args) = fake_docling(dir.path(), "  --device [auto|cpu|cuda|mps]");
        let factory = DoclingFactory::new(&script, None);
        let (engine, profile) = build_with_fallback(
            &factory,
            &EngineProfile::ladder(Device::Cuda { index: Some(1) }, true),
        )
        .expect("engine");
        assert_eq!(profile.ocr, None);

        let input = input_file(dir.path(), "slides.pptx");
        engine.convert(&input).expect("converted");
        let logged = fs::read_to_string(&args).expect("args");
        assert!(logged.starts_with("CUDA_VISIBLE_DEVICES=1"), "args: {logged}");
        assert!(logged.contains("--device cuda"), "args: {logged}");
        assert!(!logged.contains("--ocr"), "args: {logged}");
    }

    #[test]
    fn bare_cli_uses_defaults() {
        let dir = TempDir::new().expect("temp dir");
        let (script, args) = fake_docling(dir.path(), "");
        let factory = DoclingFactory::new(&script, None);
        let (engine, profile) =
            build_with_fallback(&factory, &EngineProfile::ladder(Device::Cpu, true))
                .expect("engine");
        assert_eq!(profile, EngineProfile::default());

        engine
            .convert(&input_file(dir.path(), "a.docx"))
            .expect("converted");
        let logged = fs::read_to_string(&args).expect("args");
        assert!(!logged.contains("--device"), "args: {logged}");
    }

    #[test]
    fn surfaces_cli_errors() {
        let dir = TempDir::new().expect("temp dir");
        let script = dir.path().join("fake-docling");
        fs::write(
            &script,
            r#"#!/bin/sh
if [ "$1" = "--help" ]; then echo "--device --ocr"; exit 0; fi
echo "boom: unreadable document" >&2
exit 3
"#,
        )
        .expect("write script");
        make_executable(&script);

        let factory = DoclingFactory::new(&script, None);
        let engine = factory.build(&EngineProfile::default()).expect("engine");
        let err = engine
            .convert(&input_file(dir.path(), "broken.pdf"))
            .expect_err("expected failure");
        match err {
            Doc2MdError::ConversionFailed { detail } => {
                assert!(detail.contains("boom"), "detail: {detail}")
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
