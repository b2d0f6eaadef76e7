//! Wiring of the concrete stages into the build task graph.

use std::path::PathBuf;

use chrono::Datelike;

use kiln_graph::{parallel, series, task, GraphError, StageError, TaskGraph};

use crate::banner::{render_banner, PackageInfo};
use crate::clean::CleanStage;
use crate::copy::{AssetStage, VendorEntry, VendorStage};
use crate::scripts::{ScriptSettings, ScriptStage};
use crate::styles::{StyleSettings, StyleStage};
use crate::templates::{TemplateSettings, TemplateStage};

/// Name of the vendor task (clean then copy).
pub const VENDOR_TASK: &str = "vendor";

/// Name of the full build task.
pub const BUILD_TASK: &str = "build";

/// Name of the default task.
pub const DEFAULT_TASK: &str = "default";

/// Extensions copied verbatim by the asset stage.
pub const ASSET_EXTENSIONS: &str = "eot,svg,ttf,woff,woff2,png,jpg,gif,ico,mp4,ogg,webm";

/// Configuration for building the task graph.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Source directory
    pub src_dir: PathBuf,

    /// Output directory
    pub dest_dir: PathBuf,

    /// Directory holding installed third-party packages
    pub node_modules: PathBuf,

    /// Output subdirectory for vendor files
    pub vendor_dir: PathBuf,

    pub templates: TemplateSettings,

    pub styles: StyleSettings,

    pub scripts: ScriptSettings,

    /// Asset globs (root-relative)
    pub assets: Vec<String>,

    pub vendor: Vec<VendorEntry>,

    /// Banner metadata; `None` disables the banner
    pub package: Option<PackageInfo>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::with_dirs("src", "node_modules")
    }
}

impl PipelineConfig {
    /// Default settings for a source tree at `src` with third-party
    /// packages under `node_modules`.
    pub fn with_dirs(src: &str, node_modules: &str) -> Self {
        Self {
            src_dir: PathBuf::from(src),
            dest_dir: PathBuf::from("www"),
            node_modules: PathBuf::from(node_modules),
            vendor_dir: PathBuf::from("vendor"),
            templates: TemplateSettings {
                globs: vec![format!("{src}/views/*.html")],
                views_dir: PathBuf::from(format!("{src}/views")),
                replace_from: format!("../{node_modules}"),
                replace_to: "vendor".to_string(),
            },
            styles: StyleSettings {
                globs: vec![format!("{src}/scss/**/*.scss")],
                prefix: PathBuf::from("css"),
                targets: vec!["ie 9".to_string()],
                load_paths: Vec::new(),
            },
            scripts: ScriptSettings {
                globs: vec![format!("{src}/**/*.js")],
                ignore: vec![
                    ".combo.js".to_string(),
                    "-min.js".to_string(),
                    ".min.js".to_string(),
                ],
            },
            assets: vec![format!("{src}/**/*.{{{ASSET_EXTENSIONS}}}")],
            vendor: default_vendor(node_modules),
            package: None,
        }
    }
}

/// Third-party files copied by default.
pub fn default_vendor(node_modules: &str) -> Vec<VendorEntry> {
    let fa = format!("{node_modules}/@fortawesome/fontawesome-free");
    [
        (format!("{node_modules}/jquery/dist/jquery.min.js"), "jquery"),
        (
            format!("{node_modules}/bootstrap/dist/js/bootstrap.min.js"),
            "bootstrap",
        ),
        (format!("{fa}/css/all.min.css"), "fontawesome/css"),
        (format!("{fa}/webfonts/*"), "fontawesome/webfonts"),
        (format!("{fa}/sprites/*"), "fontawesome/sprites"),
        (format!("{fa}/svgs/**/*"), "fontawesome/svgs"),
        (format!("{fa}/js/all.min.js"), "fontawesome/js"),
        (format!("{node_modules}/vue/dist/vue.min.js"), "vue"),
        (
            format!("{node_modules}/vue-resource/dist/vue-resource.min.js"),
            "vue-resource",
        ),
    ]
    .into_iter()
    .map(|(from, to)| VendorEntry {
        from: vec![from],
        to: PathBuf::from(to),
    })
    .collect()
}

/// Errors from assembling the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Stage(#[from] StageError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("Failed to render banner: {0}")]
    Banner(#[from] minijinja::Error),
}

/// Builds the task graph from a [`PipelineConfig`].
pub struct Pipeline;

impl Pipeline {
    /// Register every stage and composite task.
    ///
    /// `build` is `clean`, then templates, styles and scripts in parallel,
    /// then assets and vendor files in parallel.
    pub fn from_config(config: &PipelineConfig) -> Result<TaskGraph, PipelineError> {
        let year = chrono::Local::now().year();
        Self::with_year(config, year)
    }

    /// Like [`Pipeline::from_config`] with a fixed copyright year.
    pub fn with_year(config: &PipelineConfig, year: i32) -> Result<TaskGraph, PipelineError> {
        let package = config.package.clone().unwrap_or_default();
        let banner = render_banner(&package, year)?;

        let mut graph = TaskGraph::new();
        graph.stage(CleanStage::all())?;
        graph.stage(CleanStage::vendor(&config.vendor_dir))?;
        graph.stage(TemplateStage::new(
            config.templates.clone(),
            package.clone(),
            year,
        )?)?;
        graph.stage(StyleStage::new(config.styles.clone(), banner.clone())?)?;
        graph.stage(ScriptStage::new(config.scripts.clone(), banner)?)?;
        graph.stage(AssetStage::new(&config.assets, "")?)?;
        graph.stage(VendorStage::new(&config.vendor, &config.vendor_dir)?)?;

        graph.alias(
            VENDOR_TASK,
            "Replace vendor files in the output",
            series([task(CleanStage::VENDOR), task(VendorStage::NAME)]),
        )?;
        graph.alias(
            BUILD_TASK,
            "Build the site from scratch",
            series([
                task(CleanStage::NAME),
                parallel([
                    task(TemplateStage::NAME),
                    task(StyleStage::NAME),
                    task(ScriptStage::NAME),
                ]),
                parallel([task(AssetStage::NAME), task(VENDOR_TASK)]),
            ]),
        )?;
        graph.alias(DEFAULT_TASK, "Same as build", series([task(BUILD_TASK)]))?;

        graph.validate()?;
        Ok(graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_graph::{BuildContext, Executor, Plan};
    use pretty_assertions::assert_eq;
    use std::fs;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn config() -> PipelineConfig {
        PipelineConfig {
            package: Some(PackageInfo {
                name: "site".into(),
                version: "1.0.0".into(),
                author: "Dev".into(),
                license: "MIT".into(),
                homepage: "https://example.org".into(),
                since: Some(2019),
            }),
            ..PipelineConfig::default()
        }
    }

    fn write(root: &std::path::Path, rel: &str, contents: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn build_plan_orders_stages() {
        let graph = Pipeline::with_year(&config(), 2024).unwrap();
        let plan = graph.resolve(BUILD_TASK).unwrap();

        assert_eq!(
            plan,
            Plan::Series(vec![
                Plan::Stage("clean".into()),
                Plan::Parallel(vec![
                    Plan::Stage("compile:templates".into()),
                    Plan::Stage("compile:styles".into()),
                    Plan::Stage("minify:scripts".into()),
                ]),
                Plan::Parallel(vec![
                    Plan::Stage("copy:assets".into()),
                    Plan::Series(vec![
                        Plan::Stage("clean:vendor".into()),
                        Plan::Stage("copy:vendor".into()),
                    ]),
                ]),
            ])
        );
        assert_eq!(
            graph.resolve(DEFAULT_TASK).unwrap().stages(),
            plan.stages()
        );
    }

    #[test]
    fn default_globs_follow_source_layout() {
        let config = PipelineConfig::default();

        assert_eq!(config.templates.globs, vec!["src/views/*.html"]);
        assert_eq!(config.styles.globs, vec!["src/scss/**/*.scss"]);
        assert_eq!(
            config.assets,
            vec!["src/**/*.{eot,svg,ttf,woff,woff2,png,jpg,gif,ico,mp4,ogg,webm}"]
        );
        assert_eq!(config.vendor.len(), 9);
    }

    #[tokio::test]
    async fn full_build_is_idempotent() {
        let temp = tempdir().unwrap();
        let root = temp.path();
        write(root, "src/views/index.html", "<link href=\"../node_modules/x.css\">");
        write(root, "src/scss/_theme.scss", "$text: #ff0000;");
        write(root, "src/scss/main.scss", "@import \"theme\";\nbody { color: $text; }");
        write(root, "src/js/app.js", "function hi() { return 1; }\nhi();");
        write(root, "src/img/logo.png", "png");
        write(root, "node_modules/jquery/dist/jquery.min.js", "jq");
        write(root, "www/stale.txt", "old");

        let graph = Arc::new(Pipeline::with_year(&config(), 2024).unwrap());
        let executor = Executor::new(graph, BuildContext::new(root, "www"));

        executor.run(BUILD_TASK).await.unwrap();
        let first = snapshot(&root.join("www"));
        executor.run(BUILD_TASK).await.unwrap();
        let second = snapshot(&root.join("www"));

        assert_eq!(first, second);
        let names: Vec<_> = first.iter().map(|(p, _)| p.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "css/main.min.css",
                "img/logo.png",
                "index.html",
                "js/app.min.js",
                "vendor/jquery/jquery.min.js",
            ]
        );
        let css = fs::read_to_string(root.join("www/css/main.min.css")).unwrap();
        assert!(css.starts_with("/*!\n * site v1.0.0\n * Dev Copyright 2019 - 2024\n"));
        assert!(css.ends_with("body{color:red}"));
        assert_eq!(
            fs::read_to_string(root.join("www/index.html")).unwrap(),
            "<link href=\"vendor/x.css\">"
        );
    }

    #[tokio::test]
    async fn concurrent_runs_of_one_stage_match_a_single_run() {
        let temp = tempdir().unwrap();
        let root = temp.path();
        write(root, "src/scss/_theme.scss", "$gap: 4px;");
        for page in ["home", "about", "contact", "blog"] {
            write(
                root,
                &format!("src/scss/{page}.scss"),
                &format!("@import \"theme\";\n.{page} {{ margin: $gap; .inner {{ padding: $gap * 2; }} }}"),
            );
        }

        let graph = Arc::new(Pipeline::with_year(&config(), 2024).unwrap());
        let executor = Executor::new(graph, BuildContext::new(root, "www"));

        executor.run_stage(StyleStage::NAME).await.unwrap();
        let single = snapshot(&root.join("www"));

        let (a, b) = tokio::join!(
            executor.run_stage(StyleStage::NAME),
            executor.run_stage(StyleStage::NAME)
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(a.outputs, b.outputs);
        assert_eq!(a.outputs.len(), 4);
        assert_eq!(snapshot(&root.join("www")), single);
    }

    fn snapshot(dir: &std::path::Path) -> Vec<(String, Vec<u8>)> {
        let mut files: Vec<_> = walk(dir)
            .into_iter()
            .map(|p| {
                let rel = p
                    .strip_prefix(dir)
                    .unwrap()
                    .to_string_lossy()
                    .replace('\\', "/");
                let bytes = fs::read(&p).unwrap();
                (rel, bytes)
            })
            .collect();
        files.sort();
        files
    }

    fn walk(dir: &std::path::Path) -> Vec<std::path::PathBuf> {
        let mut out = Vec::new();
        for entry in fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                out.extend(walk(&path));
            } else {
                out.push(path);
            }
        }
        out
    }
}
