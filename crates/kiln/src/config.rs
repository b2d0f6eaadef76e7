//! Project configuration (kiln.toml).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use kiln_graph::BuildContext;
use kiln_server::{DevServerConfig, WatchRule};
use kiln_static::{
    AssetStage, PackageInfo, PipelineConfig, ScriptStage, StyleStage, TemplateStage, VendorEntry,
};

/// Configuration file structure (kiln.toml).
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFile {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub templates: TemplatesConfig,
    #[serde(default)]
    pub styles: StylesConfig,
    #[serde(default)]
    pub scripts: ScriptsConfig,
    #[serde(default)]
    pub assets: AssetsConfig,
    /// Replaces the default vendor list when present
    pub vendor: Option<Vec<VendorConfig>>,
    /// Banner metadata; falls back to package.json
    pub package: Option<PackageInfo>,
    #[serde(default)]
    pub watch: WatchConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_src")]
    pub src: String,
    #[serde(default = "default_dest")]
    pub dest: String,
    #[serde(default = "default_node_modules")]
    pub node_modules: String,
    #[serde(default = "default_vendor_dir")]
    pub vendor: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            src: default_src(),
            dest: default_dest(),
            node_modules: default_node_modules(),
            vendor: default_vendor_dir(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct TemplatesConfig {
    pub globs: Option<Vec<String>>,
    pub views_dir: Option<String>,
    pub replace_from: Option<String>,
    pub replace_to: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct StylesConfig {
    pub globs: Option<Vec<String>>,
    pub prefix: Option<String>,
    pub targets: Option<Vec<String>>,
    /// Extra directories searched by Sass `@import`
    pub load_paths: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
pub struct ScriptsConfig {
    pub globs: Option<Vec<String>>,
    /// File name suffixes copied without minification
    pub ignore: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
pub struct AssetsConfig {
    pub globs: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct VendorConfig {
    pub from: Patterns,
    pub to: String,
}

/// One glob or a list of globs.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum Patterns {
    One(String),
    Many(Vec<String>),
}

impl Patterns {
    fn to_vec(&self) -> Vec<String> {
        match self {
            Patterns::One(p) => vec![p.clone()],
            Patterns::Many(ps) => ps.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct WatchConfig {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Replaces the default rules when present
    pub rules: Option<Vec<RuleConfig>>,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            rules: None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RuleConfig {
    pub globs: Patterns,
    pub stage: String,
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_open")]
    pub open: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            open: default_open(),
        }
    }
}

fn default_src() -> String {
    "src".to_string()
}
fn default_dest() -> String {
    "www".to_string()
}
fn default_node_modules() -> String {
    "node_modules".to_string()
}
fn default_vendor_dir() -> String {
    "vendor".to_string()
}
fn default_debounce_ms() -> u64 {
    100
}
fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    3000
}
fn default_open() -> bool {
    true
}

/// A loaded project: its root directory and configuration.
#[derive(Debug)]
pub struct Project {
    /// Absolute project root (the directory holding the config file)
    pub root: PathBuf,

    pub config: ConfigFile,
}

impl Project {
    /// Load the project whose configuration lives at `config_path`.
    ///
    /// A missing file yields the defaults. A malformed file is an error.
    pub fn load(config_path: &Path) -> Result<Self> {
        let cwd = std::env::current_dir().context("Failed to read current directory")?;
        let config_path = cwd.join(config_path);
        let root = config_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| cwd.clone());

        let config = if config_path.exists() {
            let content = fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read {}", config_path.display()))?;
            let config = parse_config(&content)
                .with_context(|| format!("Failed to parse {}", config_path.display()))?;
            tracing::info!("Loaded config from {}", config_path.display());
            config
        } else {
            tracing::debug!("No {} found, using defaults", config_path.display());
            ConfigFile::default()
        };

        Ok(Self { root, config })
    }

    /// Stage settings for the task graph.
    pub fn pipeline(&self) -> Result<PipelineConfig> {
        let file = &self.config;
        let mut pipeline = PipelineConfig::with_dirs(&file.paths.src, &file.paths.node_modules);

        pipeline.dest_dir = PathBuf::from(&file.paths.dest);
        pipeline.vendor_dir = PathBuf::from(&file.paths.vendor);

        if let Some(globs) = &file.templates.globs {
            pipeline.templates.globs = globs.clone();
        }
        if let Some(dir) = &file.templates.views_dir {
            pipeline.templates.views_dir = PathBuf::from(dir);
        }
        if let Some(from) = &file.templates.replace_from {
            pipeline.templates.replace_from = from.clone();
        }
        if let Some(to) = &file.templates.replace_to {
            pipeline.templates.replace_to = to.clone();
        }

        if let Some(globs) = &file.styles.globs {
            pipeline.styles.globs = globs.clone();
        }
        if let Some(prefix) = &file.styles.prefix {
            pipeline.styles.prefix = PathBuf::from(prefix);
        }
        if let Some(targets) = &file.styles.targets {
            pipeline.styles.targets = targets.clone();
        }
        if let Some(load_paths) = &file.styles.load_paths {
            pipeline.styles.load_paths = load_paths.iter().map(PathBuf::from).collect();
        }

        if let Some(globs) = &file.scripts.globs {
            pipeline.scripts.globs = globs.clone();
        }
        if let Some(ignore) = &file.scripts.ignore {
            pipeline.scripts.ignore = ignore.clone();
        }

        if let Some(globs) = &file.assets.globs {
            pipeline.assets = globs.clone();
        }

        if let Some(vendor) = &file.vendor {
            pipeline.vendor = vendor
                .iter()
                .map(|v| VendorEntry {
                    from: v.from.to_vec(),
                    to: PathBuf::from(&v.to),
                })
                .collect();
        }

        pipeline.package = self.package()?;

        Ok(pipeline)
    }

    /// Banner metadata from `[package]`, else from package.json.
    pub fn package(&self) -> Result<Option<PackageInfo>> {
        if let Some(package) = &self.config.package {
            return Ok(Some(package.clone()));
        }

        let path = self.root.join("package.json");
        let package = PackageInfo::from_package_json(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        if package.is_some() {
            tracing::debug!("Banner metadata from {}", path.display());
        }
        Ok(package)
    }

    /// Build context for an output directory (relative to the root).
    pub fn context(&self, dest: &Path) -> BuildContext {
        BuildContext::new(&self.root, dest)
    }

    /// Watch rules from `[watch]`, or the defaults for `pipeline`.
    pub fn watch_rules(&self, pipeline: &PipelineConfig) -> Result<Vec<WatchRule>> {
        let specs: Vec<(Vec<String>, String)> = match &self.config.watch.rules {
            Some(rules) => rules
                .iter()
                .map(|r| (r.globs.to_vec(), r.stage.clone()))
                .collect(),
            None => default_watch_rules(&self.config.paths.src, pipeline),
        };

        specs
            .into_iter()
            .map(|(globs, stage)| {
                WatchRule::new(&globs, &stage)
                    .with_context(|| format!("Invalid watch rule for '{}'", stage))
            })
            .collect()
    }

    /// Dev server settings; `dest` is resolved against the root.
    pub fn server(&self, dest: &Path) -> DevServerConfig {
        let server = &self.config.server;
        DevServerConfig {
            dest: self.root.join(dest),
            host: server.host.clone(),
            port: server.port,
            open: server.open,
            debounce: Duration::from_millis(self.config.watch.debounce_ms),
        }
    }
}

/// Parse kiln.toml content.
pub fn parse_config(content: &str) -> Result<ConfigFile, toml::de::Error> {
    toml::from_str(content)
}

/// Styles, assets, then every view and script under the source tree.
///
/// Partials and nested views are watched so that editing one rebuilds all
/// pages. Sass load paths count as style sources.
fn default_watch_rules(src: &str, pipeline: &PipelineConfig) -> Vec<(Vec<String>, String)> {
    let mut styles = pipeline.styles.globs.clone();
    styles.extend(
        pipeline
            .styles
            .load_paths
            .iter()
            .map(|dir| format!("{}/**/*.{{scss,css}}", dir.display())),
    );

    vec![
        (styles, StyleStage::NAME.to_string()),
        (pipeline.assets.clone(), AssetStage::NAME.to_string()),
        (
            vec![format!("{src}/views/**/*.html")],
            TemplateStage::NAME.to_string(),
        ),
        (
            vec![format!("{src}/js/**/*.js")],
            ScriptStage::NAME.to_string(),
        ),
    ]
}
