//! Model artifact rewriting.
//!
//! A model artifact declares its tunable constants as lines of the form
//! `def Int name() = expr;` or `def Rat name() = expr;`. Rewriting replaces the
//! right-hand side of each declaration whose name is configured and writes the
//! result to a fresh temporary file. The original artifact is only ever read.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use st_types::{Configuration, EvaluationError};
use tempfile::TempPath;
use tracing::debug;

/// Numeric type tag of a declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclarationType {
    Int,
    Rat,
}

impl DeclarationType {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Int => "Int",
            Self::Rat => "Rat",
        }
    }
}

/// A typed declaration recognised on a single line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration<'a> {
    pub ty: DeclarationType,
    pub name: &'a str,
}

impl<'a> Declaration<'a> {
    /// Recognise `def <Int|Rat> <identifier>... = ...` at the start of a line.
    /// Anything else on the line is not inspected.
    pub fn parse(line: &'a str) -> Option<Self> {
        let rest = line.strip_prefix("def")?;
        let rest = strip_required_whitespace(rest)?;

        let (ty, rest) = if let Some(r) = rest.strip_prefix("Int") {
            (DeclarationType::Int, r)
        } else if let Some(r) = rest.strip_prefix("Rat") {
            (DeclarationType::Rat, r)
        } else {
            return None;
        };
        let rest = strip_required_whitespace(rest)?;

        let end = rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(rest.len());
        if end == 0 {
            return None;
        }
        let (name, tail) = rest.split_at(end);
        if !tail.contains('=') {
            return None;
        }

        Some(Self { ty, name })
    }

    fn render(&self, value: &str, line_ending: &str) -> String {
        format!("def {} {}() = {};{}", self.ty.as_str(), self.name, value, line_ending)
    }
}

fn strip_required_whitespace(s: &str) -> Option<&str> {
    let trimmed = s.trim_start_matches([' ', '\t']);
    if trimmed.len() == s.len() {
        None
    } else {
        Some(trimmed)
    }
}

fn split_line_ending(line: &str) -> (&str, &str) {
    if let Some(body) = line.strip_suffix("\r\n") {
        (body, "\r\n")
    } else if let Some(body) = line.strip_suffix('\n') {
        (body, "\n")
    } else {
        (line, "")
    }
}

/// Substitute configured values into `source`.
///
/// Returns `None` when no declaration matched, so callers can keep using the
/// original text.
pub fn rewrite_source(source: &str, config: &Configuration) -> Option<String> {
    let mut changed = false;
    let mut out = String::with_capacity(source.len());

    for line in source.split_inclusive('\n') {
        let (body, ending) = split_line_ending(line);
        let replacement = Declaration::parse(body).and_then(|decl| {
            config.get(decl.name).map(|value| {
                debug!("Changed parameter {} to {}", decl.name, value);
                decl.render(&value.to_string(), ending)
            })
        });

        match replacement {
            Some(new_line) => {
                changed = true;
                out.push_str(&new_line);
            }
            None => out.push_str(line),
        }
    }

    changed.then_some(out)
}

/// A parameter-substituted copy of a model artifact.
///
/// The file is removed when this value is dropped, on every exit path.
#[derive(Debug)]
pub struct RewrittenArtifact {
    path: TempPath,
    original: PathBuf,
}

impl RewrittenArtifact {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn original(&self) -> &Path {
        &self.original
    }
}

/// Rewrites model artifacts into temporary copies.
#[derive(Debug, Clone, Default)]
pub struct ArtifactRewriter {
    temp_dir: Option<PathBuf>,
}

impl ArtifactRewriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place temporary artifacts in `dir` instead of the system temp directory.
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }

    /// Produce a rewritten copy of `artifact` if any declaration in it is
    /// configured, or `None` when the original can be used verbatim.
    pub fn rewrite(
        &self,
        artifact: &Path,
        config: &Configuration,
    ) -> Result<Option<RewrittenArtifact>, EvaluationError> {
        let artifact_error = |source| EvaluationError::Artifact {
            path: artifact.to_path_buf(),
            source,
        };

        let source = fs::read_to_string(artifact).map_err(artifact_error)?;
        let Some(rewritten) = rewrite_source(&source, config) else {
            return Ok(None);
        };

        let suffix = artifact
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .unwrap_or_default();
        let mut builder = tempfile::Builder::new();
        builder.prefix("simtune-").suffix(&suffix);
        let mut file = match &self.temp_dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        }
        .map_err(artifact_error)?;

        file.write_all(rewritten.as_bytes()).map_err(artifact_error)?;
        file.flush().map_err(artifact_error)?;

        let path = file.into_temp_path();
        debug!("Program written into {}", path.display());

        Ok(Some(RewrittenArtifact {
            path,
            original: artifact.to_path_buf(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use st_types::ParameterValue;

    const MODEL: &str = "module Main;\n\
                         def Int x() = 1;\n\
                         def Rat rate() = 1/2;\n\
                         def Int untouched() = 7;\n\
                         { skip; }\n";

    fn write_model(dir: &Path, contents: &str) -> PathBuf {
        let path = dir.join("model.abs");
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn parses_typed_declarations() {
        let decl = Declaration::parse("def Int x() = 1;").unwrap();
        assert_eq!(decl.ty, DeclarationType::Int);
        assert_eq!(decl.name, "x");

        let decl = Declaration::parse("def  Rat\tbeta_2(Int a) = a / 3;").unwrap();
        assert_eq!(decl.ty, DeclarationType::Rat);
        assert_eq!(decl.name, "beta_2");
    }

    #[test]
    fn ignores_other_lines() {
        assert!(Declaration::parse("  def Int x() = 1;").is_none());
        assert!(Declaration::parse("def String s() = \"a\";").is_none());
        assert!(Declaration::parse("def Int x();").is_none());
        assert!(Declaration::parse("def Integer x() = 1;").is_none());
        assert!(Declaration::parse("// def Int x() = 1;").is_none());
    }

    #[test]
    fn replaces_only_configured_declarations() {
        let config = Configuration::new().with("x", ParameterValue::Int(5));
        let out = rewrite_source(MODEL, &config).unwrap();

        let expected = MODEL.replace("def Int x() = 1;", "def Int x() = 5;");
        assert_eq!(out, expected);
    }

    #[test]
    fn no_match_means_no_rewrite() {
        let config = Configuration::new().with("unknown", ParameterValue::Int(5));
        assert!(rewrite_source(MODEL, &config).is_none());
    }

    #[test]
    fn keeps_missing_trailing_newline_and_crlf() {
        let config = Configuration::new().with("x", ParameterValue::Int(9));
        assert_eq!(
            rewrite_source("def Int x() = 1;", &config).unwrap(),
            "def Int x() = 9;"
        );
        assert_eq!(
            rewrite_source("a\r\ndef Int x() = 1;\r\nb", &config).unwrap(),
            "a\r\ndef Int x() = 9;\r\nb"
        );
    }

    #[test]
    fn rewrite_leaves_original_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let model = write_model(dir.path(), MODEL);
        let rewriter = ArtifactRewriter::new().with_temp_dir(dir.path());

        let config = Configuration::new().with("x", ParameterValue::Int(5));
        let artifact = rewriter.rewrite(&model, &config).unwrap().unwrap();

        assert_ne!(artifact.path(), model.as_path());
        assert_eq!(artifact.original(), model.as_path());
        assert_eq!(artifact.path().extension().unwrap(), "abs");
        let written = fs::read_to_string(artifact.path()).unwrap();
        assert!(written.contains("def Int x() = 5;\n"));
        assert!(written.contains("def Int untouched() = 7;\n"));
        assert_eq!(fs::read_to_string(&model).unwrap(), MODEL);
    }

    #[test]
    fn repeated_rewrites_give_distinct_identical_files() {
        let dir = tempfile::tempdir().unwrap();
        let model = write_model(dir.path(), MODEL);
        let rewriter = ArtifactRewriter::new().with_temp_dir(dir.path());
        let config = Configuration::new().with("rate", ParameterValue::Json(serde_json::json!("3/4")));

        let first = rewriter.rewrite(&model, &config).unwrap().unwrap();
        let second = rewriter.rewrite(&model, &config).unwrap().unwrap();

        assert_ne!(first.path(), second.path());
        assert_eq!(
            fs::read_to_string(first.path()).unwrap(),
            fs::read_to_string(second.path()).unwrap()
        );
        assert!(fs::read_to_string(first.path()).unwrap().contains("def Rat rate() = 3/4;"));
    }

    #[test]
    fn dropping_artifact_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let model = write_model(dir.path(), MODEL);
        let rewriter = ArtifactRewriter::new().with_temp_dir(dir.path());
        let config = Configuration::new().with("x", ParameterValue::Int(2));

        let artifact = rewriter.rewrite(&model, &config).unwrap().unwrap();
        let path = artifact.path().to_path_buf();
        assert!(path.exists());
        drop(artifact);
        assert!(!path.exists());
    }

    #[test]
    fn unchanged_artifact_produces_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let model = write_model(dir.path(), MODEL);
        let rewriter = ArtifactRewriter::new().with_temp_dir(dir.path());

        let result = rewriter.rewrite(&model, &Configuration::new()).unwrap();
        assert!(result.is_none());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn missing_artifact_is_an_artifact_error() {
        let rewriter = ArtifactRewriter::new();
        let err = rewriter
            .rewrite(Path::new("/definitely/not/here.abs"), &Configuration::new())
            .unwrap_err();
        assert!(matches!(err, EvaluationError::Artifact { .. }));
    }
}
