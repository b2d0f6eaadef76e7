//! Initialize a kiln project.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

/// Run the init command.
pub async fn run(config_path: &Path, yes: bool) -> Result<()> {
    tracing::info!("Initializing kiln...");

    if config_path.exists() && !yes {
        tracing::warn!(
            "{} already exists. Use --yes to overwrite.",
            config_path.display()
        );
        return Ok(());
    }

    fs::write(config_path, DEFAULT_CONFIG)
        .with_context(|| format!("Failed to write {}", config_path.display()))?;
    tracing::info!("Created {}", config_path.display());

    let root = config_path.parent().unwrap_or(Path::new(""));
    for (rel, contents) in STARTER_FILES {
        let path = root.join(rel);
        if path.exists() {
            continue;
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        fs::write(&path, contents)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        tracing::info!("Created {}", rel);
    }

    tracing::info!("Initialization complete!");
    tracing::info!("Run 'kiln watch' to build and start the development server.");

    Ok(())
}

/// Sources created when missing, so a fresh project builds.
const STARTER_FILES: &[(&str, &str)] = &[
    ("src/views/index.html", DEFAULT_INDEX),
    ("src/views/_head.html", DEFAULT_HEAD),
    ("src/scss/_variables.scss", DEFAULT_SCSS_VARIABLES),
    ("src/scss/main.scss", DEFAULT_SCSS),
    ("src/js/main.js", DEFAULT_JS),
];

pub(crate) const DEFAULT_CONFIG: &str = r#"# kiln configuration
#
# Every key is optional; the values below are the defaults.

[paths]
# Source tree
src = "src"
# Build output (removed by `kiln clean`)
dest = "www"
# Installed third-party packages
node_modules = "node_modules"
# Vendor files land in <dest>/<vendor>
vendor = "vendor"

[templates]
# Pages; files starting with "_" are partials and are not emitted
globs = ["src/views/*.html"]
views_dir = "src/views"
# Rewrites asset links written against node_modules
replace_from = "../node_modules"
replace_to = "vendor"

[styles]
# Sass (.scss) or plain CSS; files starting with "_" are partials
globs = ["src/scss/**/*.scss"]
# Output subdirectory; main.scss becomes css/main.min.css
prefix = "css"
# Browsers the minified output must support
targets = ["ie 9"]
# Extra directories for Sass @import, besides the glob base
load_paths = []

[scripts]
globs = ["src/**/*.js"]
# Already bundled or minified; copied as is
ignore = [".combo.js", "-min.js", ".min.js"]

[assets]
globs = ["src/**/*.{eot,svg,ttf,woff,woff2,png,jpg,gif,ico,mp4,ogg,webm}"]

# Third-party files. Listing any [[vendor]] entry replaces the defaults.
# [[vendor]]
# from = "node_modules/jquery/dist/jquery.min.js"
# to = "jquery"

# Banner metadata. Read from package.json when this section is absent.
# [package]
# name = "my-site"
# version = "1.0.0"
# author = "Me"
# license = "GPL-3.0"
# homepage = "https://example.org"
# since = 2019

[watch]
debounce_ms = 100

# Listing any rule replaces the defaults.
# [[watch.rules]]
# globs = "src/scss/**/*.scss"
# stage = "compile:styles"

[server]
host = "127.0.0.1"
port = 3000
open = true
"#;

const DEFAULT_INDEX: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
{% include "_head.html" %}
</head>
<body>
  <h1>{{ package.name }}</h1>
  <script src="js/main.min.js"></script>
</body>
</html>
"#;

const DEFAULT_HEAD: &str = r#"  <meta charset="utf-8">
  <meta name="viewport" content="width=device-width, initial-scale=1">
  <title>{{ package.name }}</title>
  <link rel="stylesheet" href="css/main.min.css">
"#;

const DEFAULT_SCSS_VARIABLES: &str = r#"$font-stack: sans-serif;
$gutter: 2rem;
"#;

const DEFAULT_SCSS: &str = r#"@import "variables";

body {
  font-family: $font-stack;
  margin: $gutter;
}
"#;

const DEFAULT_JS: &str = r#"document.addEventListener('DOMContentLoaded', function () {
  console.log('ready');
});
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use tempfile::tempdir;

    #[test]
    fn default_config_parses_to_defaults() {
        let config = parse_config(DEFAULT_CONFIG).unwrap();

        assert_eq!(config.paths.dest, "www");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.watch.debounce_ms, 100);
        assert!(config.vendor.is_none());
        assert!(config.package.is_none());
        assert!(config.watch.rules.is_none());
        assert_eq!(
            config.styles.globs,
            Some(vec!["src/scss/**/*.scss".to_string()])
        );
    }

    #[tokio::test]
    async fn writes_config_and_sources() {
        let temp = tempdir().unwrap();
        let config_path = temp.path().join("kiln.toml");

        run(&config_path, false).await.unwrap();

        assert!(config_path.exists());
        assert!(temp.path().join("src/views/index.html").exists());
        assert!(temp.path().join("src/scss/main.scss").exists());
        assert!(temp.path().join("src/scss/_variables.scss").exists());
    }

    #[tokio::test]
    async fn keeps_existing_config_without_yes() {
        let temp = tempdir().unwrap();
        let config_path = temp.path().join("kiln.toml");
        fs::write(&config_path, "# mine").unwrap();

        run(&config_path, false).await.unwrap();
        assert_eq!(fs::read_to_string(&config_path).unwrap(), "# mine");

        run(&config_path, true).await.unwrap();
        assert_eq!(fs::read_to_string(&config_path).unwrap(), DEFAULT_CONFIG);
    }
}
