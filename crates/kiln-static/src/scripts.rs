//! Script minification stage.

use std::fs;
use std::path::{Path, PathBuf};

use oxc_allocator::Allocator;
use oxc_codegen::{Codegen, CodegenOptions};
use oxc_minifier::{Minifier, MinifierOptions};
use oxc_parser::Parser;
use oxc_span::SourceType;
use rayon::prelude::*;

use kiln_graph::output::write_atomic;
use kiln_graph::{BuildContext, GlobSet, Stage, StageError, StageOutput};

use crate::naming::{has_suffix, with_min_suffix};

/// Settings for [`ScriptStage`].
#[derive(Debug, Clone)]
pub struct ScriptSettings {
    /// Scripts to minify (root-relative globs)
    pub globs: Vec<String>,

    /// File name suffixes passed through without minification
    pub ignore: Vec<String>,
}

/// Minifies scripts into `<stem>.min.js`.
pub struct ScriptStage {
    sources: GlobSet,
    ignore: Vec<String>,
    banner: String,
}

impl ScriptStage {
    /// Stage name.
    pub const NAME: &'static str = "minify:scripts";

    /// Create the stage.
    pub fn new(settings: ScriptSettings, banner: String) -> Result<Self, StageError> {
        Ok(Self {
            sources: GlobSet::new(&settings.globs)?,
            ignore: settings.ignore,
            banner,
        })
    }

    fn output_relative(&self, relative: &Path) -> PathBuf {
        if has_suffix(relative, &self.ignore) {
            relative.to_path_buf()
        } else {
            with_min_suffix(relative, "js")
        }
    }
}

impl Stage for ScriptStage {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "Minify scripts"
    }

    fn sources(&self) -> &GlobSet {
        &self.sources
    }

    fn run(&self, ctx: &BuildContext) -> Result<StageOutput, StageError> {
        let dest = ctx.dest_dir();

        let outputs = self
            .sources
            .walk(&ctx.root)
            .par_iter()
            .map(|script| {
                let source =
                    fs::read_to_string(&script.path).map_err(|e| StageError::io(&script.path, e))?;

                let code = if has_suffix(&script.relative, &self.ignore) {
                    tracing::debug!("Passing through {}", script.path.display());
                    source
                } else {
                    minify_js(&source).map_err(|message| StageError::transform(&script.path, message))?
                };

                let output = dest.join(self.output_relative(&script.relative));
                write_atomic(&output, format!("{}{}", self.banner, code).as_bytes())?;

                Ok(output)
            })
            .collect::<Result<Vec<_>, StageError>>()?;

        Ok(StageOutput::new(outputs))
    }

    fn output_for(&self, ctx: &BuildContext, source: &Path) -> Option<PathBuf> {
        let relative = self.sources.relative(source)?;
        Some(ctx.dest_dir().join(self.output_relative(&relative)))
    }
}

/// Compress, mangle and print a classic (non-module) script.
pub fn minify_js(source: &str) -> Result<String, String> {
    let allocator = Allocator::default();
    let parsed = Parser::new(&allocator, source, SourceType::default()).parse();

    if let Some(error) = parsed.errors.first() {
        return Err(format!("JS parse error: {error}"));
    }

    let mut program = parsed.program;
    let minified = Minifier::new(MinifierOptions::default()).build(&allocator, &mut program);

    let code = Codegen::new()
        .with_options(CodegenOptions::minify())
        .with_scoping(minified.scoping)
        .build(&program)
        .code;

    Ok(code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    fn stage(banner: &str) -> ScriptStage {
        ScriptStage::new(
            ScriptSettings {
                globs: vec!["src/**/*.js".into()],
                ignore: vec![".combo.js".into(), "-min.js".into(), ".min.js".into()],
            },
            banner.to_string(),
        )
        .unwrap()
    }

    #[test]
    fn minifies_scripts() {
        let js = r#"
// greet the user
function greet(name) {
    var message = "Hello, " + name;
    return message;
}
greet("world");
"#;

        let out = minify_js(js).unwrap();

        assert!(!out.contains("greet the user"));
        assert!(out.len() < js.len());
        assert!(out.contains("greet"));
    }

    #[test]
    fn rejects_invalid_syntax() {
        assert!(minify_js("function (").is_err());
    }

    #[test]
    fn writes_min_js_and_passes_through_ignored_files() {
        let temp = tempdir().unwrap();
        let js = temp.path().join("src/js");
        fs::create_dir_all(&js).unwrap();
        fs::write(js.join("app.js"), "function add(a, b) { return a + b; }\nadd(1, 2);").unwrap();
        fs::write(js.join("lib.min.js"), "var   x=1;").unwrap();

        let ctx = BuildContext::new(temp.path(), "www");
        let output = stage("/*! b */\n").run(&ctx).unwrap();

        assert_eq!(
            output.outputs,
            vec![
                temp.path().join("www/js/app.min.js"),
                temp.path().join("www/js/lib.min.js"),
            ]
        );
        assert_eq!(
            fs::read_to_string(temp.path().join("www/js/lib.min.js")).unwrap(),
            "/*! b */\nvar   x=1;"
        );
        let app = fs::read_to_string(temp.path().join("www/js/app.min.js")).unwrap();
        assert!(app.starts_with("/*! b */\n"));
        assert!(!temp.path().join("www/js/app.js").exists());
    }

    #[test]
    fn syntax_errors_name_the_file() {
        let temp = tempdir().unwrap();
        fs::create_dir_all(temp.path().join("src")).unwrap();
        fs::write(temp.path().join("src/broken.js"), "let = ;").unwrap();

        let ctx = BuildContext::new(temp.path(), "www");
        let err = stage("").run(&ctx).unwrap_err();

        assert!(err.to_string().contains("broken.js"));
    }

    #[test]
    fn maps_outputs() {
        let ctx = BuildContext::new("/p", "www");
        let stage = stage("");

        assert_eq!(
            stage.output_for(&ctx, Path::new("src/js/app.js")),
            Some(PathBuf::from("/p/www/js/app.min.js"))
        );
        assert_eq!(
            stage.output_for(&ctx, Path::new("src/js/x.combo.js")),
            Some(PathBuf::from("/p/www/js/x.combo.js"))
        );
    }
}
