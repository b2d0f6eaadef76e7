//! Template compilation stage.
//!
//! Every matched page is rendered with minijinja. The loader is rooted at
//! the views directory so pages can include and extend templates kept in
//! subdirectories. Before compiling, the vendor prefix used by sources
//! (`../node_modules`) is rewritten to the deployed vendor path.

use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use minijinja::{context, Environment, ErrorKind as TemplateErrorKind};
use rayon::prelude::*;

use kiln_graph::glob::to_slash;
use kiln_graph::output::write_atomic;
use kiln_graph::{BuildContext, GlobSet, Stage, StageError, StageOutput};

use crate::banner::PackageInfo;
use crate::naming::is_partial;

/// Settings for [`TemplateStage`].
#[derive(Debug, Clone)]
pub struct TemplateSettings {
    /// Pages to emit (root-relative globs)
    pub globs: Vec<String>,

    /// Directory the template loader resolves names against
    pub views_dir: PathBuf,

    /// Text replaced in every template source
    pub replace_from: String,

    /// Replacement text
    pub replace_to: String,
}

/// Compiles templates into HTML pages.
pub struct TemplateStage {
    sources: GlobSet,
    views_dir: PathBuf,
    replace_from: String,
    replace_to: String,
    package: PackageInfo,
    year: i32,
}

impl TemplateStage {
    /// Stage name.
    pub const NAME: &'static str = "compile:templates";

    /// Create the stage.
    pub fn new(
        settings: TemplateSettings,
        package: PackageInfo,
        year: i32,
    ) -> Result<Self, StageError> {
        Ok(Self {
            sources: GlobSet::new(&settings.globs)?,
            views_dir: settings.views_dir,
            replace_from: settings.replace_from,
            replace_to: settings.replace_to,
            package,
            year,
        })
    }

    /// Build an environment whose loader reads from the views directory.
    fn environment(&self, ctx: &BuildContext) -> Environment<'static> {
        let mut env = Environment::new();
        let views = ctx.resolve(&self.views_dir);
        let from = self.replace_from.clone();
        let to = self.replace_to.clone();

        env.set_loader(move |name| {
            let Some(path) = safe_join(&views, name) else {
                return Ok(None);
            };
            match fs::read_to_string(&path) {
                Ok(source) => Ok(Some(rewrite(&source, &from, &to))),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
                Err(e) => Err(minijinja::Error::new(
                    TemplateErrorKind::InvalidOperation,
                    format!("could not read template {}", path.display()),
                )
                .with_source(e)),
            }
        });

        env
    }

    /// Template name for a root-relative source path.
    fn template_name(&self, source: &Path) -> Option<String> {
        source
            .strip_prefix(&self.views_dir)
            .ok()
            .map(to_slash)
    }
}

impl Stage for TemplateStage {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "Compile page templates to HTML"
    }

    fn sources(&self) -> &GlobSet {
        &self.sources
    }

    fn run(&self, ctx: &BuildContext) -> Result<StageOutput, StageError> {
        let env = self.environment(ctx);
        let dest = ctx.dest_dir();

        let pages: Vec<_> = self
            .sources
            .walk(&ctx.root)
            .into_iter()
            .filter(|m| !is_partial(&m.relative))
            .collect();

        let outputs = pages
            .par_iter()
            .map(|page| {
                let name = self.template_name(&page.root_relative).ok_or_else(|| {
                    StageError::transform(
                        &page.path,
                        format!("page is outside {}", self.views_dir.display()),
                    )
                })?;

                let html = env
                    .get_template(&name)
                    .and_then(|tmpl| {
                        tmpl.render(context! {
                            package => &self.package,
                            year => self.year,
                        })
                    })
                    .map_err(|e| StageError::transform(&page.path, format!("{e:#}")))?;

                let output = dest.join(page.relative.with_extension("html"));
                write_atomic(&output, html.as_bytes())?;
                tracing::debug!("Rendered {} -> {}", page.path.display(), output.display());

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
        Some(ctx.dest_dir().join(relative.with_extension("html")))
    }
}

fn rewrite(source: &str, from: &str, to: &str) -> String {
    if from.is_empty() {
        source.to_string()
    } else {
        source.replace(from, to)
    }
}

/// Join a template name onto the views directory, refusing to escape it.
fn safe_join(views: &Path, name: &str) -> Option<PathBuf> {
    let mut path = views.to_path_buf();
    for component in Path::new(name).components() {
        match component {
            Component::Normal(part) => path.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    Some(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    fn stage() -> TemplateStage {
        TemplateStage::new(
            TemplateSettings {
                globs: vec!["src/views/*.html".into()],
                views_dir: PathBuf::from("src/views"),
                replace_from: "../node_modules".into(),
                replace_to: "vendor".into(),
            },
            PackageInfo {
                name: "site".into(),
                version: "2.0.0".into(),
                ..Default::default()
            },
            2024,
        )
        .unwrap()
    }

    #[test]
    fn renders_pages_with_includes() {
        let temp = tempdir().unwrap();
        let views = temp.path().join("src/views");
        fs::create_dir_all(views.join("partials")).unwrap();
        fs::write(
            views.join("index.html"),
            r#"{% include "partials/head.html" %}<h1>{{ package.name }} {{ package.version }}</h1>"#,
        )
        .unwrap();
        fs::write(
            views.join("partials/head.html"),
            r#"<script src="../node_modules/jquery/dist/jquery.min.js"></script>"#,
        )
        .unwrap();

        let ctx = BuildContext::new(temp.path(), "www");
        let output = stage().run(&ctx).unwrap();

        assert_eq!(output.outputs, vec![temp.path().join("www/index.html")]);
        let html = fs::read_to_string(temp.path().join("www/index.html")).unwrap();
        assert_eq!(
            html,
            r#"<script src="vendor/jquery/dist/jquery.min.js"></script><h1>site 2.0.0</h1>"#
        );
        // Subdirectories are not pages.
        assert!(!temp.path().join("www/partials").exists());
    }

    #[test]
    fn extends_layouts_and_skips_partials() {
        let temp = tempdir().unwrap();
        let views = temp.path().join("src/views");
        fs::create_dir_all(&views).unwrap();
        fs::write(
            views.join("_layout.html"),
            "<main>{% block body %}{% endblock %}</main>",
        )
        .unwrap();
        fs::write(
            views.join("about.html"),
            r#"{% extends "_layout.html" %}{% block body %}About {{ year }}{% endblock %}"#,
        )
        .unwrap();

        let ctx = BuildContext::new(temp.path(), "www");
        stage().run(&ctx).unwrap();

        assert_eq!(
            fs::read_to_string(temp.path().join("www/about.html")).unwrap(),
            "<main>About 2024</main>"
        );
        assert!(!temp.path().join("www/_layout.html").exists());
    }

    #[test]
    fn reports_template_errors_with_path() {
        let temp = tempdir().unwrap();
        let views = temp.path().join("src/views");
        fs::create_dir_all(&views).unwrap();
        fs::write(views.join("broken.html"), "{% if %}").unwrap();

        let ctx = BuildContext::new(temp.path(), "www");
        let err = stage().run(&ctx).unwrap_err();

        assert!(matches!(err, StageError::Transform { ref path, .. } if path.ends_with("broken.html")));
    }

    #[test]
    fn maps_sources_to_outputs() {
        let ctx = BuildContext::new("/project", "www");
        let stage = stage();

        assert_eq!(
            stage.output_for(&ctx, Path::new("src/views/contact.html")),
            Some(PathBuf::from("/project/www/contact.html"))
        );
        assert_eq!(stage.output_for(&ctx, Path::new("src/views/_nav.html")), None);
        assert_eq!(
            stage.output_for(&ctx, Path::new("src/views/partials/nav.html")),
            None
        );
    }

    #[test]
    fn loader_refuses_parent_paths() {
        assert_eq!(safe_join(Path::new("views"), "../secret.html"), None);
        assert_eq!(
            safe_join(Path::new("views"), "partials/nav.html"),
            Some(PathBuf::from("views/partials/nav.html"))
        );
    }

    #[test]
    fn missing_views_directory_is_empty_run() {
        let temp = tempdir().unwrap();
        let ctx = BuildContext::new(temp.path(), "www");

        assert!(stage().run(&ctx).unwrap().outputs.is_empty());
    }
}
