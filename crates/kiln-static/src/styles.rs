//! Stylesheet compilation stage.
//!
//! `.scss` sources go through grass with the source's glob base and any
//! configured directories as load paths. Plain `.css` sources are bundled by
//! lightningcss, which inlines `@import`ed files. Either way the result is
//! minified by lightningcss for the configured browsers.

use std::path::{Path, PathBuf};

use lightningcss::bundler::{Bundler, FileProvider};
use lightningcss::stylesheet::{MinifyOptions, ParserOptions, PrinterOptions, StyleSheet};
use lightningcss::targets::{Browsers, Targets};
use rayon::prelude::*;

use kiln_graph::output::write_atomic;
use kiln_graph::{BuildContext, GlobSet, Matched, Stage, StageError, StageOutput};

use crate::naming::{is_partial, with_min_suffix};

/// Settings for [`StyleStage`].
#[derive(Debug, Clone)]
pub struct StyleSettings {
    /// Stylesheets to compile (root-relative globs)
    pub globs: Vec<String>,

    /// Directory under the output directory
    pub prefix: PathBuf,

    /// Browser targets, e.g. `["ie 9", "safari 11.1"]`
    pub targets: Vec<String>,

    /// Extra Sass load paths (root-relative)
    pub load_paths: Vec<PathBuf>,
}

/// Compiles, minifies and renames stylesheets.
pub struct StyleStage {
    sources: GlobSet,
    prefix: PathBuf,
    browsers: Browsers,
    load_paths: Vec<PathBuf>,
    banner: String,
}

impl StyleStage {
    /// Stage name.
    pub const NAME: &'static str = "compile:styles";

    /// Create the stage.
    pub fn new(settings: StyleSettings, banner: String) -> Result<Self, StageError> {
        let browsers = parse_targets(&settings.targets)
            .map_err(|message| StageError::transform("styles.targets", message))?;

        Ok(Self {
            sources: GlobSet::new(&settings.globs)?,
            prefix: settings.prefix,
            browsers,
            load_paths: settings.load_paths,
            banner,
        })
    }

    fn output_path(&self, ctx: &BuildContext, relative: &Path) -> PathBuf {
        ctx.dest_dir()
            .join(&self.prefix)
            .join(with_min_suffix(relative, "css"))
    }

    fn compile(&self, ctx: &BuildContext, sheet: &Matched) -> Result<String, String> {
        if !is_sass(&sheet.path) {
            return bundle_css(&sheet.path, self.browsers);
        }

        // The directory the matching glob is rooted at.
        let base = sheet
            .path
            .ancestors()
            .nth(sheet.relative.components().count())
            .unwrap_or(ctx.root.as_path());
        let mut load_paths = vec![base.to_path_buf()];
        load_paths.extend(self.load_paths.iter().map(|p| ctx.root.join(p)));

        let css = compile_sass(&sheet.path, &load_paths)?;
        minify_css(&css, &sheet.root_relative, self.browsers)
    }
}

impl Stage for StyleStage {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "Compile and minify stylesheets"
    }

    fn sources(&self) -> &GlobSet {
        &self.sources
    }

    fn run(&self, ctx: &BuildContext) -> Result<StageOutput, StageError> {
        let sheets: Vec<_> = self
            .sources
            .walk(&ctx.root)
            .into_iter()
            .filter(|m| !is_partial(&m.relative))
            .collect();

        let outputs = sheets
            .par_iter()
            .map(|sheet| {
                let css = self
                    .compile(ctx, sheet)
                    .map_err(|message| StageError::transform(&sheet.path, message))?;

                let output = self.output_path(ctx, &sheet.relative);
                write_atomic(&output, format!("{}{}", self.banner, css).as_bytes())?;

                Ok(output)
            })
            .collect::<Result<Vec<_>, StageError>>()?;

        Ok(StageOutput::new(outputs))
    }

    fn output_for(&self, ctx: &BuildContext, source: &Path) -> Option<PathBuf> {
        let relative = self.sources.relative(source)?;
        if is_partial(&relative) {
            return None;
        }
        Some(self.output_path(ctx, &relative))
    }
}

fn is_sass(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "scss")
}

/// Compile a Sass file to (unminified) CSS.
pub fn compile_sass(path: &Path, load_paths: &[PathBuf]) -> Result<String, String> {
    let options = load_paths
        .iter()
        .fold(grass::Options::default().quiet(true), |options, dir| {
            options.load_path(dir)
        });

    grass::from_path(path, &options).map_err(|e| format!("Sass error: {}", e))
}

/// Bundle a CSS file with its `@import`s inlined, then minify it.
pub fn bundle_css(path: &Path, browsers: Browsers) -> Result<String, String> {
    let provider = FileProvider::new();
    let mut bundler = Bundler::new(&provider, None, ParserOptions::default());
    let mut stylesheet = bundler
        .bundle(path)
        .map_err(|e| format!("CSS parse error: {}", e))?;

    finish(&mut stylesheet, browsers)
}

/// Parse, minify and print a stylesheet for the given browsers.
pub fn minify_css(source: &str, filename: &Path, browsers: Browsers) -> Result<String, String> {
    let mut stylesheet = StyleSheet::parse(
        source,
        ParserOptions {
            filename: filename.display().to_string(),
            ..ParserOptions::default()
        },
    )
    .map_err(|e| format!("CSS parse error: {}", e))?;

    finish(&mut stylesheet, browsers)
}

fn finish(stylesheet: &mut StyleSheet, browsers: Browsers) -> Result<String, String> {
    stylesheet
        .minify(MinifyOptions {
            targets: Targets::from(browsers),
            ..MinifyOptions::default()
        })
        .map_err(|e| format!("CSS minify error: {}", e))?;

    let printed = stylesheet
        .to_css(PrinterOptions {
            minify: true,
            targets: Targets::from(browsers),
            ..PrinterOptions::default()
        })
        .map_err(|e| format!("CSS print error: {}", e))?;

    Ok(printed.code)
}

/// Parse browser targets such as `"ie 9"` or `"safari 11.1"`.
pub fn parse_targets(targets: &[String]) -> Result<Browsers, String> {
    let mut browsers = Browsers::default();

    for target in targets {
        let mut parts = target.split_whitespace();
        let (Some(name), Some(version), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(format!("invalid browser target '{target}'"));
        };
        let version = Some(encode_version(version)?);

        let slot = match name.to_ascii_lowercase().as_str() {
            "android" => &mut browsers.android,
            "chrome" => &mut browsers.chrome,
            "edge" => &mut browsers.edge,
            "firefox" | "ff" => &mut browsers.firefox,
            "ie" => &mut browsers.ie,
            "ios" | "ios_saf" => &mut browsers.ios_saf,
            "opera" => &mut browsers.opera,
            "safari" => &mut browsers.safari,
            "samsung" => &mut browsers.samsung,
            other => return Err(format!("unknown browser '{other}'")),
        };
        *slot = version;
    }

    Ok(browsers)
}

/// Encode `major[.minor[.patch]]` the way lightningcss expects.
fn encode_version(version: &str) -> Result<u32, String> {
    let mut encoded = 0u32;
    let mut parts = version.split('.');

    for shift in [16, 8, 0] {
        let value = match parts.next() {
            Some(part) => part
                .parse::<u8>()
                .map_err(|_| format!("invalid browser version '{version}'"))?,
            None => 0,
        };
        encoded |= u32::from(value) << shift;
    }

    if parts.next().is_some() {
        return Err(format!("invalid browser version '{version}'"));
    }

    Ok(encoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::tempdir;

    fn stage(banner: &str) -> StyleStage {
        stage_for("src/css/**/*.css", banner)
    }

    fn stage_for(glob: &str, banner: &str) -> StyleStage {
        StyleStage::new(
            StyleSettings {
                globs: vec![glob.into()],
                prefix: PathBuf::from("css"),
                targets: vec!["ie 9".into()],
                load_paths: vec![PathBuf::from("vendor/scss")],
            },
            banner.to_string(),
        )
        .unwrap()
    }

    fn write(root: &Path, rel: &str, contents: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn minifies_css() {
        let css = r#"
.button {
    background-color: blue;
    padding: 10px;
}
        "#;

        let minified = minify_css(css, Path::new("app.css"), Browsers::default()).unwrap();

        assert!(!minified.contains('\n'));
        assert!(minified.contains(".button"));
    }

    #[test]
    fn lowers_nesting_for_old_targets() {
        let css = ".nav { color: red; & a { color: blue; } }";
        let browsers = parse_targets(&["ie 9".to_string()]).unwrap();

        let out = minify_css(css, Path::new("nav.css"), browsers).unwrap();

        assert!(out.contains(".nav a"));
        assert!(!out.contains('&'));
    }

    #[test]
    fn parses_targets() {
        let browsers =
            parse_targets(&["ie 9".to_string(), "safari 11.1".to_string()]).unwrap();

        assert_eq!(browsers.ie, Some(9 << 16));
        assert_eq!(browsers.safari, Some((11 << 16) | (1 << 8)));
        assert!(parse_targets(&["netscape 4".to_string()]).is_err());
        assert!(parse_targets(&["ie".to_string()]).is_err());
    }

    #[test]
    fn writes_min_files_with_banner() {
        let temp = tempdir().unwrap();
        let css_dir = temp.path().join("src/css/pages");
        fs::create_dir_all(&css_dir).unwrap();
        fs::write(temp.path().join("src/css/main.css"), "body { margin: 0; }").unwrap();
        fs::write(css_dir.join("home.css"), "h1 { color: #ff0000; }").unwrap();
        fs::write(temp.path().join("src/css/_vars.css"), ":root { --x: 1; }").unwrap();

        let ctx = BuildContext::new(temp.path(), "www");
        let output = stage("/*! site */\n").run(&ctx).unwrap();

        assert_eq!(
            output.outputs,
            vec![
                temp.path().join("www/css/main.min.css"),
                temp.path().join("www/css/pages/home.min.css"),
            ]
        );
        let main = fs::read_to_string(temp.path().join("www/css/main.min.css")).unwrap();
        assert_eq!(main, "/*! site */\nbody{margin:0}");
        assert!(!temp.path().join("www/css/_vars.min.css").exists());
    }

    #[test]
    fn inlines_imported_partials() {
        let temp = tempdir().unwrap();
        write(temp.path(), "src/css/_vars.css", ".brand { color: red; }");
        write(
            temp.path(),
            "src/css/main.css",
            "@import \"_vars.css\";\nbody { margin: 0; }",
        );

        let ctx = BuildContext::new(temp.path(), "www");
        stage("").run(&ctx).unwrap();

        let main = fs::read_to_string(temp.path().join("www/css/main.min.css")).unwrap();
        assert_eq!(main, ".brand{color:red}body{margin:0}");
        assert!(!temp.path().join("www/css/_vars.min.css").exists());
    }

    #[test]
    fn compiles_scss_with_partials_and_mixins() {
        let temp = tempdir().unwrap();
        let root = temp.path();
        write(root, "src/scss/_colors.scss", "$brand: #ff0000;");
        write(root, "vendor/scss/_mixins.scss", "@mixin flat { padding: 0; }");
        write(
            root,
            "src/scss/pages/home.scss",
            r#"@import "colors";
@import "mixins";

.title {
    color: $brand;
    @include flat;

    &:hover {
        color: #000000;
    }
}
"#,
        );

        let ctx = BuildContext::new(root, "www");
        let output = stage_for("src/scss/**/*.scss", "/*! site */\n")
            .run(&ctx)
            .unwrap();

        assert_eq!(
            output.outputs,
            vec![root.join("www/css/pages/home.min.css")]
        );
        let home = fs::read_to_string(root.join("www/css/pages/home.min.css")).unwrap();
        assert_eq!(
            home,
            "/*! site */\n.title{color:red;padding:0}.title:hover{color:#000}"
        );
        assert!(!root.join("www/css/_colors.min.css").exists());
    }

    #[test]
    fn sass_errors_name_the_file() {
        let temp = tempdir().unwrap();
        write(temp.path(), "src/scss/bad.scss", ".a { color: $missing; }");

        let ctx = BuildContext::new(temp.path(), "www");
        let err = stage_for("src/scss/**/*.scss", "").run(&ctx).unwrap_err();

        assert!(err.to_string().contains("bad.scss"));
    }

    #[test]
    fn rebuilds_identically() {
        let temp = tempdir().unwrap();
        fs::create_dir_all(temp.path().join("src/css")).unwrap();
        fs::write(temp.path().join("src/css/a.css"), ".a { color: red }").unwrap();

        let ctx = BuildContext::new(temp.path(), "www");
        let stage = stage("");
        stage.run(&ctx).unwrap();
        let first = fs::read(temp.path().join("www/css/a.min.css")).unwrap();
        stage.run(&ctx).unwrap();
        let second = fs::read(temp.path().join("www/css/a.min.css")).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn parse_errors_name_the_file() {
        let temp = tempdir().unwrap();
        fs::create_dir_all(temp.path().join("src/css")).unwrap();
        fs::write(temp.path().join("src/css/bad.css"), "%%% { color: red }").unwrap();

        let ctx = BuildContext::new(temp.path(), "www");
        let err = stage("").run(&ctx).unwrap_err();

        assert!(err.to_string().contains("bad.css"));
    }

    #[test]
    fn maps_outputs() {
        let ctx = BuildContext::new("/p", "www");
        let stage = stage("");

        assert_eq!(
            stage.output_for(&ctx, Path::new("src/css/pages/home.css")),
            Some(PathBuf::from("/p/www/css/pages/home.min.css"))
        );
        assert_eq!(stage.output_for(&ctx, Path::new("src/css/_vars.css")), None);
        assert_eq!(stage.output_for(&ctx, Path::new("src/js/app.js")), None);
    }
}
