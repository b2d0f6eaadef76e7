//! Path globs and glob sets.
//!
//! Patterns are written relative to the project root with `/` separators.
//! Supported syntax: `*`, `?`, `**` as a whole segment, `{a,b}` alternation
//! and `[...]` classes. A leading `!` in a [`GlobSet`] marks an exclusion.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use regex::Regex;
use walkdir::WalkDir;

/// Errors that can occur while compiling a glob.
#[derive(Debug, thiserror::Error)]
pub enum GlobError {
    #[error("Empty glob pattern")]
    Empty,

    #[error("Unclosed '{delimiter}' in glob: {pattern}")]
    Unclosed { pattern: String, delimiter: char },

    #[error("Invalid glob {pattern}: {message}")]
    Invalid { pattern: String, message: String },
}

/// A compiled path glob.
#[derive(Debug, Clone)]
pub struct Glob {
    pattern: String,
    base: PathBuf,
    regex: Regex,
}

impl Glob {
    /// Compile a glob pattern.
    pub fn new(pattern: &str) -> Result<Self, GlobError> {
        let pattern = pattern.trim().trim_start_matches("./");
        if pattern.is_empty() {
            return Err(GlobError::Empty);
        }

        let segments: Vec<&str> = pattern.split('/').filter(|s| !s.is_empty()).collect();

        let literal_prefix = segments
            .iter()
            .take_while(|s| !has_meta(s))
            .count();

        let base = if literal_prefix == segments.len() {
            // No metacharacters at all: the base is the parent directory.
            segments[..segments.len().saturating_sub(1)]
                .iter()
                .collect::<PathBuf>()
        } else {
            segments[..literal_prefix].iter().collect::<PathBuf>()
        };

        let mut source = String::from("^");
        for (i, segment) in segments.iter().enumerate() {
            let last = i + 1 == segments.len();
            if *segment == "**" {
                if last {
                    source.push_str("(?:[^/.][^/]*(?:/[^/.][^/]*)*)?");
                } else {
                    source.push_str("(?:[^/.][^/]*/)*");
                }
                continue;
            }
            let tokens = tokenize(pattern, segment)?;
            match translate(&tokens, Lead::SegmentStart) {
                Some(regex) => source.push_str(&regex),
                // Nothing can match this segment.
                None => source.push_str("[^\\s\\S]"),
            }
            if !last {
                source.push('/');
            }
        }
        source.push('$');

        let regex = Regex::new(&source).map_err(|e| GlobError::Invalid {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })?;

        Ok(Self {
            pattern: pattern.to_string(),
            base,
            regex,
        })
    }

    /// The original pattern text.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// The leading literal directory of the pattern.
    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Check whether a root-relative path matches.
    pub fn is_match(&self, path: &Path) -> bool {
        self.regex.is_match(&to_slash(path))
    }

    /// Path relative to [`Glob::base`], if the path matches.
    pub fn relative(&self, path: &Path) -> Option<PathBuf> {
        if !self.is_match(path) {
            return None;
        }
        let normalized: PathBuf = normal_components(path).collect();
        normalized
            .strip_prefix(&self.base)
            .ok()
            .map(Path::to_path_buf)
    }
}

/// A file found by [`GlobSet::walk`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Matched {
    /// Path as found on disk (root joined with the root-relative path).
    pub path: PathBuf,

    /// Path relative to the project root.
    pub root_relative: PathBuf,

    /// Path relative to the base of the glob that matched it.
    pub relative: PathBuf,
}

/// Include and exclude globs evaluated together.
#[derive(Debug, Clone, Default)]
pub struct GlobSet {
    includes: Vec<Glob>,
    excludes: Vec<Glob>,
}

impl GlobSet {
    /// An empty set that matches nothing.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Compile a list of patterns. Patterns starting with `!` exclude.
    pub fn new<I, S>(patterns: I) -> Result<Self, GlobError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Self::default();
        for pattern in patterns {
            let pattern = pattern.as_ref();
            match pattern.strip_prefix('!') {
                Some(excluded) => set.excludes.push(Glob::new(excluded)?),
                None => set.includes.push(Glob::new(pattern)?),
            }
        }
        Ok(set)
    }

    /// Whether the set has no include patterns.
    pub fn is_empty(&self) -> bool {
        self.includes.is_empty()
    }

    /// Include globs in declaration order.
    pub fn includes(&self) -> &[Glob] {
        &self.includes
    }

    /// Check whether a root-relative path matches.
    pub fn is_match(&self, path: &Path) -> bool {
        self.first_include(path).is_some()
    }

    /// Path relative to the base of the first include that matches.
    pub fn relative(&self, path: &Path) -> Option<PathBuf> {
        self.first_include(path).and_then(|glob| glob.relative(path))
    }

    fn first_include(&self, path: &Path) -> Option<&Glob> {
        if self.excludes.iter().any(|g| g.is_match(path)) {
            return None;
        }
        self.includes.iter().find(|g| g.is_match(path))
    }

    /// Find every file under `root` matched by this set, sorted by path.
    ///
    /// Missing base directories are skipped.
    pub fn walk(&self, root: &Path) -> Vec<Matched> {
        let mut found: BTreeMap<PathBuf, Matched> = BTreeMap::new();

        for glob in &self.includes {
            let dir = root.join(glob.base());
            if !dir.exists() {
                tracing::debug!("Glob base {} does not exist", dir.display());
                continue;
            }

            for entry in WalkDir::new(&dir)
                .follow_links(true)
                .into_iter()
                .filter_map(|e| e.ok())
            {
                if !entry.file_type().is_file() {
                    continue;
                }

                let Ok(root_relative) = entry.path().strip_prefix(root) else {
                    continue;
                };
                let root_relative: PathBuf = normal_components(root_relative).collect();

                if found.contains_key(&root_relative)
                    || !glob.is_match(&root_relative)
                    || self.excludes.iter().any(|g| g.is_match(&root_relative))
                {
                    continue;
                }

                let Some(relative) = glob.relative(&root_relative) else {
                    continue;
                };

                found.insert(
                    root_relative.clone(),
                    Matched {
                        path: entry.path().to_path_buf(),
                        root_relative,
                        relative,
                    },
                );
            }
        }

        found.into_values().collect()
    }
}

fn has_meta(segment: &str) -> bool {
    segment.contains(['*', '?', '[', '{'])
}

/// One element of a path segment pattern.
#[derive(Debug, Clone)]
enum Token {
    Star,
    Any,
    /// A regex character class, brackets included.
    Class(String),
    Alternatives(Vec<Vec<Token>>),
    Literal(char),
}

/// How the start of a segment may be matched.
///
/// Wildcards never match a leading `.` of a file or directory name; only a
/// pattern segment that itself starts with `.` does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lead {
    /// Anything goes.
    Free,
    /// Start of a segment: a literal `.` is allowed, wildcards are not.
    SegmentStart,
    /// After an empty `*` at the start of a segment: no `.` at all.
    NoDot,
}

fn tokenize(pattern: &str, segment: &str) -> Result<Vec<Token>, GlobError> {
    let mut tokens = Vec::new();
    let mut chars = segment.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '*' => {
                // A `**` inside a segment behaves like `*`.
                while chars.peek() == Some(&'*') {
                    chars.next();
                }
                tokens.push(Token::Star);
            }
            '?' => tokens.push(Token::Any),
            '[' => {
                let mut class = String::from("[");
                if chars.peek() == Some(&'!') {
                    chars.next();
                    class.push('^');
                }
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == ']' {
                        closed = true;
                        break;
                    }
                    if c == '\\' || c == '[' {
                        class.push('\\');
                    }
                    class.push(c);
                }
                if !closed {
                    return Err(GlobError::Unclosed {
                        pattern: pattern.to_string(),
                        delimiter: '[',
                    });
                }
                class.push(']');
                tokens.push(Token::Class(class));
            }
            '{' => {
                let mut body = String::new();
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == '}' {
                        closed = true;
                        break;
                    }
                    body.push(c);
                }
                if !closed {
                    return Err(GlobError::Unclosed {
                        pattern: pattern.to_string(),
                        delimiter: '{',
                    });
                }
                let alternatives = body
                    .split(',')
                    .map(|alternative| tokenize(pattern, alternative))
                    .collect::<Result<_, _>>()?;
                tokens.push(Token::Alternatives(alternatives));
            }
            other => tokens.push(Token::Literal(other)),
        }
    }

    Ok(tokens)
}

/// Translate tokens to a regex, or `None` when `lead` rules out every match.
fn translate(tokens: &[Token], lead: Lead) -> Option<String> {
    let Some((first, rest)) = tokens.split_first() else {
        return Some(String::new());
    };

    if lead == Lead::Free {
        let mut out = String::new();
        for token in tokens {
            match token {
                Token::Star => out.push_str("[^/]*"),
                Token::Any => out.push_str("[^/]"),
                Token::Class(class) => out.push_str(class),
                Token::Alternatives(alternatives) => {
                    let branches: Vec<String> = alternatives
                        .iter()
                        .filter_map(|a| translate(a, Lead::Free))
                        .collect();
                    out.push_str(&group(branches)?);
                }
                Token::Literal(c) => out.push_str(&regex::escape(c.encode_utf8(&mut [0; 4]))),
            }
        }
        return Some(out);
    }

    let free_rest = || translate(rest, Lead::Free);

    match first {
        Token::Literal('.') if lead == Lead::NoDot => None,
        Token::Literal(_) => translate(tokens, Lead::Free),
        Token::Any => Some(format!("[^/.]{}", free_rest()?)),
        Token::Class(class) => Some(format!("[{class}&&[^.]]{}", free_rest()?)),
        Token::Star => {
            let mut branches = Vec::new();
            if let Some(tail) = free_rest() {
                branches.push(format!("[^/.][^/]*{tail}"));
            }
            branches.extend(translate(rest, Lead::NoDot));
            group(branches)
        }
        Token::Alternatives(alternatives) => {
            let branches: Vec<String> = alternatives
                .iter()
                .filter_map(|alternative| {
                    let mut expanded = alternative.clone();
                    expanded.extend_from_slice(rest);
                    translate(&expanded, lead)
                })
                .collect();
            group(branches)
        }
    }
}

fn group(branches: Vec<String>) -> Option<String> {
    if branches.is_empty() {
        None
    } else {
        Some(format!("(?:{})", branches.join("|")))
    }
}

fn normal_components(path: &Path) -> impl Iterator<Item = &std::ffi::OsStr> {
    path.components().filter_map(|c| match c {
        Component::Normal(part) => Some(part),
        _ => None,
    })
}

/// Render a path with `/` separators, dropping `.` and root components.
pub fn to_slash(path: &Path) -> String {
    normal_components(path)
        .map(|part| part.to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn computes_base_directory() {
        assert_eq!(Glob::new("src/**/*.js").unwrap().base(), Path::new("src"));
        assert_eq!(
            Glob::new("src/views/*.html").unwrap().base(),
            Path::new("src/views")
        );
        assert_eq!(
            Glob::new("node_modules/jquery/dist/jquery.min.js")
                .unwrap()
                .base(),
            Path::new("node_modules/jquery/dist")
        );
    }

    #[test]
    fn double_star_matches_zero_or_more_segments() {
        let glob = Glob::new("src/**/*.js").unwrap();

        assert!(glob.is_match(Path::new("src/app.js")));
        assert!(glob.is_match(Path::new("src/js/app.js")));
        assert!(glob.is_match(Path::new("src/js/lib/deep.js")));
        assert!(!glob.is_match(Path::new("src/app.jsx")));
        assert!(!glob.is_match(Path::new("other/app.js")));
    }

    #[test]
    fn single_star_stays_in_segment() {
        let glob = Glob::new("src/views/*.html").unwrap();

        assert!(glob.is_match(Path::new("src/views/index.html")));
        assert!(!glob.is_match(Path::new("src/views/partials/nav.html")));
    }

    #[test]
    fn matches_alternation_and_classes() {
        let glob = Glob::new("src/**/*.{png,woff2,jpg}").unwrap();
        assert!(glob.is_match(Path::new("src/img/logo.png")));
        assert!(glob.is_match(Path::new("src/fonts/a.woff2")));
        assert!(!glob.is_match(Path::new("src/fonts/a.woff")));

        let glob = Glob::new("src/file[0-9].txt").unwrap();
        assert!(glob.is_match(Path::new("src/file3.txt")));
        assert!(!glob.is_match(Path::new("src/filex.txt")));
    }

    #[test]
    fn rejects_unclosed_groups() {
        assert!(matches!(
            Glob::new("src/*.{js,css"),
            Err(GlobError::Unclosed { delimiter: '{', .. })
        ));
        assert!(matches!(
            Glob::new("src/[ab.js"),
            Err(GlobError::Unclosed { delimiter: '[', .. })
        ));
        assert!(matches!(Glob::new("  "), Err(GlobError::Empty)));
    }

    #[test]
    fn dots_are_literal() {
        let glob = Glob::new("src/*.min.js").unwrap();
        assert!(glob.is_match(Path::new("src/a.min.js")));
        assert!(!glob.is_match(Path::new("src/a-minxjs")));
    }

    #[test]
    fn wildcards_skip_dot_names() {
        let glob = Glob::new("src/css/**/*.css").unwrap();
        assert!(glob.is_match(Path::new("src/css/main.css")));
        assert!(!glob.is_match(Path::new("src/css/.#main.css")));
        assert!(!glob.is_match(Path::new("src/css/.css")));
        assert!(!glob.is_match(Path::new("src/css/.cache/main.css")));

        let glob = Glob::new("src/?ain.css").unwrap();
        assert!(!glob.is_match(Path::new("src/.ain.css")));

        let glob = Glob::new("src/{*,x}.js").unwrap();
        assert!(glob.is_match(Path::new("src/app.js")));
        assert!(!glob.is_match(Path::new("src/.app.js")));
    }

    #[test]
    fn explicit_dots_still_match() {
        let glob = Glob::new("src/.well-known/*.txt").unwrap();
        assert!(glob.is_match(Path::new("src/.well-known/security.txt")));

        let glob = Glob::new("src/.*").unwrap();
        assert!(glob.is_match(Path::new("src/.htaccess")));

        let glob = Glob::new("src/**/[a.]*.css").unwrap();
        assert!(glob.is_match(Path::new("src/a.css")));
        assert!(!glob.is_match(Path::new("src/.b.css")));
    }

    #[test]
    fn walk_skips_editor_lock_files() {
        let temp = tempdir().unwrap();
        let root = temp.path();
        fs::create_dir_all(root.join("src/css")).unwrap();
        fs::write(root.join("src/css/main.css"), "a{}").unwrap();
        fs::write(root.join("src/css/.#main.css"), "").unwrap();

        let set = GlobSet::new(["src/css/**/*.css"]).unwrap();
        let found: Vec<_> = set.walk(root).into_iter().map(|m| m.relative).collect();

        assert_eq!(found, vec![PathBuf::from("main.css")]);
    }

    #[test]
    fn relative_strips_base() {
        let glob = Glob::new("src/scss/**/*.css").unwrap();
        assert_eq!(
            glob.relative(Path::new("src/scss/pages/home.css")),
            Some(PathBuf::from("pages/home.css"))
        );
        assert_eq!(glob.relative(Path::new("src/js/app.js")), None);
    }

    #[test]
    fn set_excludes_win() {
        let set = GlobSet::new(["src/**/*.js", "!src/**/*.min.js"]).unwrap();

        assert!(set.is_match(Path::new("src/app.js")));
        assert!(!set.is_match(Path::new("src/vendor/lib.min.js")));
    }

    #[test]
    fn walks_matching_files_in_order() {
        let temp = tempdir().unwrap();
        let root = temp.path();
        fs::create_dir_all(root.join("src/js/lib")).unwrap();
        fs::write(root.join("src/js/b.js"), "b").unwrap();
        fs::write(root.join("src/js/lib/a.js"), "a").unwrap();
        fs::write(root.join("src/js/readme.md"), "x").unwrap();

        let set = GlobSet::new(["src/**/*.js"]).unwrap();
        let found = set.walk(root);

        let relative: Vec<_> = found.iter().map(|m| m.relative.clone()).collect();
        pretty_assertions::assert_eq!(
            relative,
            vec![PathBuf::from("js/b.js"), PathBuf::from("js/lib/a.js")]
        );
        assert_eq!(found[0].path, root.join("src/js/b.js"));
    }

    #[test]
    fn walk_reports_each_file_once() {
        let temp = tempdir().unwrap();
        let root = temp.path();
        fs::create_dir_all(root.join("src/js")).unwrap();
        fs::write(root.join("src/js/app.js"), "").unwrap();

        let set = GlobSet::new(["src/js/*.js", "src/**/*.js"]).unwrap();
        let found = set.walk(root);

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].relative, PathBuf::from("app.js"));
    }

    #[test]
    fn missing_base_yields_nothing() {
        let temp = tempdir().unwrap();
        let set = GlobSet::new(["missing/**/*.css"]).unwrap();

        assert!(set.walk(temp.path()).is_empty());
    }
}
