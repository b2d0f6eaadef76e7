//! License banner prepended to compiled styles and scripts.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use minijinja::{context, Environment};
use serde::{Deserialize, Serialize};

use kiln_graph::StageError;

/// Project metadata shown in the banner and exposed to templates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageInfo {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub version: String,

    #[serde(default)]
    pub author: String,

    #[serde(default)]
    pub license: String,

    #[serde(default)]
    pub homepage: String,

    /// First copyright year; defaults to the current year
    #[serde(default)]
    pub since: Option<i32>,
}

/// `package.json` fields we care about.
#[derive(Debug, Deserialize)]
struct PackageJson {
    #[serde(default)]
    name: String,
    #[serde(default)]
    version: String,
    #[serde(default)]
    author: Option<Author>,
    #[serde(default)]
    license: String,
    #[serde(default)]
    homepage: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Author {
    Name(String),
    Person { name: String },
}

impl PackageInfo {
    /// Read metadata from a `package.json` file.
    ///
    /// Returns `Ok(None)` when the file does not exist.
    pub fn from_package_json(path: &Path) -> Result<Option<Self>, StageError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StageError::io(path, e)),
        };

        let pkg: PackageJson = serde_json::from_str(&content)
            .map_err(|e| StageError::transform(path, e.to_string()))?;

        Ok(Some(Self {
            name: pkg.name,
            version: pkg.version,
            author: match pkg.author {
                Some(Author::Name(name)) | Some(Author::Person { name }) => name,
                None => String::new(),
            },
            license: pkg.license,
            homepage: pkg.homepage,
            since: None,
        }))
    }

    /// Whether there is anything to put in a banner.
    pub fn is_empty(&self) -> bool {
        self.name.is_empty() && self.version.is_empty() && self.author.is_empty()
    }
}

const BANNER_TEMPLATE: &str = "/*!
 * {{ name }} v{{ version }}
 * {{ author }} Copyright {{ years }}
 * Licensed under {{ license }}
 * {{ homepage }}
 */
";

/// Copyright range: `"2019"` or `"2019 - 2024"`.
pub fn copyright_years(since: i32, current: i32) -> String {
    if current > since {
        format!("{since} - {current}")
    } else {
        since.to_string()
    }
}

/// Render the banner for `info` as of `current_year`.
///
/// Empty metadata renders an empty banner.
pub fn render_banner(info: &PackageInfo, current_year: i32) -> Result<String, minijinja::Error> {
    if info.is_empty() {
        return Ok(String::new());
    }

    let years = copyright_years(info.since.unwrap_or(current_year), current_year);
    let mut env = Environment::new();
    env.set_keep_trailing_newline(true);

    env.render_str(
        BANNER_TEMPLATE,
        context! {
            name => &info.name,
            version => &info.version,
            author => &info.author,
            years => years,
            license => &info.license,
            homepage => &info.homepage,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    fn info() -> PackageInfo {
        PackageInfo {
            name: "site".into(),
            version: "1.2.0".into(),
            author: "Laurent".into(),
            license: "GPL-3.0".into(),
            homepage: "https://example.org".into(),
            since: Some(2019),
        }
    }

    #[test]
    fn year_range() {
        assert_eq!(copyright_years(2019, 2019), "2019");
        assert_eq!(copyright_years(2019, 2024), "2019 - 2024");
        assert_eq!(copyright_years(2030, 2024), "2030");
    }

    #[test]
    fn renders_banner() {
        let banner = render_banner(&info(), 2021).unwrap();

        assert_eq!(
            banner,
            "/*!\n * site v1.2.0\n * Laurent Copyright 2019 - 2021\n * Licensed under GPL-3.0\n * https://example.org\n */\n"
        );
    }

    #[test]
    fn empty_metadata_renders_nothing() {
        assert_eq!(render_banner(&PackageInfo::default(), 2024).unwrap(), "");
    }

    #[test]
    fn reads_package_json_author_forms() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("package.json");

        fs::write(&path, r#"{"name": "a", "version": "1.0.0", "author": "Jo"}"#).unwrap();
        let pkg = PackageInfo::from_package_json(&path).unwrap().unwrap();
        assert_eq!(pkg.author, "Jo");

        fs::write(
            &path,
            r#"{"name": "a", "author": {"name": "Kim", "email": "k@example.org"}, "license": "MIT"}"#,
        )
        .unwrap();
        let pkg = PackageInfo::from_package_json(&path).unwrap().unwrap();
        assert_eq!(pkg.author, "Kim");
        assert_eq!(pkg.license, "MIT");
    }

    #[test]
    fn missing_package_json_is_none() {
        let temp = tempdir().unwrap();
        assert_eq!(
            PackageInfo::from_package_json(&temp.path().join("package.json")).unwrap(),
            None
        );
    }
}
