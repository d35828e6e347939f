//! Static description of the pipeline: where sources live, where output goes,
//! which globs feed which step and which external tools to call.
//!
//! A [`Config`] is built once at startup and handed to
//! [`Registry::standard`](crate::Registry::standard); nothing reads it from
//! ambient state afterwards.

use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;

use crate::error::ConfigError;

/// Name of the config file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "assetline.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Directory containing the sources, the base of every source glob.
    pub root: Utf8PathBuf,
    /// Output directory; wiped by `clean`.
    pub dist: Utf8PathBuf,
    /// Preferred port of the development server.
    pub port: u16,
    /// Browserslist query used for vendor prefixing.
    pub browsers: Vec<String>,
    /// esbuild `--target` for transpiled scripts.
    pub js_target: String,
    /// Whether esbuild also minifies transpiled scripts.
    pub js_minify: bool,
    pub tools: Tools,
    pub sources: Sources,
    pub outputs: Outputs,
    pub watch: Vec<WatchBinding>,
}

/// External executables; an empty string disables the operation using it.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Tools {
    pub esbuild: String,
    pub svgo: String,
}

impl Tools {
    /// Configuration that calls no external executables at all.
    pub fn none() -> Self {
        Self {
            esbuild: String::new(),
            svgo: String::new(),
        }
    }

    pub fn esbuild(&self) -> Option<&str> {
        Some(self.esbuild.as_str()).filter(|s| !s.is_empty())
    }

    pub fn svgo(&self) -> Option<&str> {
        Some(self.svgo.as_str()).filter(|s| !s.is_empty())
    }
}

impl Default for Tools {
    fn default() -> Self {
        Self {
            esbuild: "esbuild".into(),
            svgo: "svgo".into(),
        }
    }
}

/// Source globs per step, relative to [`Config::root`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Sources {
    pub styles: Vec<String>,
    pub scripts: Vec<String>,
    pub vendors: Vec<String>,
    pub markup: Vec<String>,
    pub images: Vec<String>,
    pub sprite: Vec<String>,
}

impl Default for Sources {
    fn default() -> Self {
        Self {
            styles: vec!["scss/**/*.scss".into()],
            scripts: vec!["js/**/*.js".into()],
            vendors: vec!["../node_modules/jquery/dist/jquery.min.js".into()],
            markup: vec!["*.html".into()],
            images: ["jpg", "jpeg", "png", "gif", "svg"]
                .iter()
                .map(|ext| format!("img/*.{ext}"))
                .collect(),
            sprite: vec!["svg/*.svg".into()],
        }
    }
}

/// Output file names and destination subdirectories, relative to
/// [`Config::dist`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Outputs {
    pub css_dir: Utf8PathBuf,
    pub js_dir: Utf8PathBuf,
    pub img_dir: Utf8PathBuf,
    pub css_file: String,
    pub js_file: String,
    pub vendors_file: String,
    pub sprite_file: String,
}

impl Default for Outputs {
    fn default() -> Self {
        Self {
            css_dir: "css".into(),
            js_dir: "js".into(),
            img_dir: "img".into(),
            css_file: "style.min.css".into(),
            js_file: "script.min.js".into(),
            vendors_file: "vendors.min.js".into(),
            sprite_file: "sprite-svg.svg".into(),
        }
    }
}

/// Re-run `step` whenever a file matching `glob` changes.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WatchBinding {
    pub glob: String,
    pub step: String,
}

impl WatchBinding {
    pub fn new(glob: impl Into<String>, step: impl Into<String>) -> Self {
        Self {
            glob: glob.into(),
            step: step.into(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let sources = Sources::default();

        let mut watch = vec![
            WatchBinding::new("scss/**/*.scss", "styles"),
            WatchBinding::new("js/**/*.js", "scripts"),
            WatchBinding::new("*.html", "markup"),
        ];
        watch.extend(sources.images.iter().map(|g| WatchBinding::new(g, "images")));
        watch.push(WatchBinding::new("svg/*.svg", "sprite"));

        Self {
            root: "src".into(),
            dist: "dist".into(),
            port: 3000,
            browsers: vec!["last 2 versions".into()],
            js_target: "es2015".into(),
            js_minify: true,
            tools: Tools::default(),
            sources,
            outputs: Outputs::default(),
            watch,
        }
    }
}

impl Config {
    /// Reads a TOML config file. Missing keys fall back to [`Config::default`]
    /// and relative `root`/`dist` are resolved against the file's directory.
    pub fn load(path: impl AsRef<Utf8Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| ConfigError::Read(path.to_owned(), e))?;
        let config: Config =
            toml::from_str(&text).map_err(|e| ConfigError::Parse(path.to_owned(), e))?;

        let base = path.parent().unwrap_or(Utf8Path::new(""));
        Ok(config.relative_to(base))
    }

    /// Loads `path` when given, otherwise `assetline.toml` if it exists,
    /// otherwise the defaults.
    pub fn discover(path: Option<&Utf8Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None if Utf8Path::new(DEFAULT_CONFIG_FILE).is_file() => Self::load(DEFAULT_CONFIG_FILE),
            None => Ok(Self::default()),
        }
    }

    /// Rebases relative `root` and `dist` onto `base`.
    pub fn relative_to(mut self, base: impl AsRef<Utf8Path>) -> Self {
        let base = base.as_ref();
        if self.root.is_relative() {
            self.root = base.join(&self.root);
        }
        if self.dist.is_relative() {
            self.dist = base.join(&self.dist);
        }
        self
    }

    pub fn css_dir(&self) -> Utf8PathBuf {
        self.dist.join(&self.outputs.css_dir)
    }

    pub fn js_dir(&self) -> Utf8PathBuf {
        self.dist.join(&self.outputs.js_dir)
    }

    pub fn img_dir(&self) -> Utf8PathBuf {
        self.dist.join(&self.outputs.img_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_mirror_layout() {
        let config = Config::default();

        assert_eq!(config.root, "src");
        assert_eq!(config.css_dir(), "dist/css");
        assert_eq!(config.outputs.css_file, "style.min.css");
        assert_eq!(config.sources.images.len(), 5);
        assert!(config.watch.contains(&WatchBinding::new("*.html", "markup")));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            port = 8080

            js_minify = false

            [tools]
            svgo = ""

            [[watch]]
            glob = "scss/*.scss"
            step = "styles"
            "#,
        )
        .unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.tools.svgo(), None);
        assert_eq!(config.tools.esbuild(), Some("esbuild"));
        assert_eq!(config.watch, vec![WatchBinding::new("scss/*.scss", "styles")]);
        assert_eq!(config.js_target, "es2015");
        assert!(!config.js_minify);
        assert!(Config::default().js_minify);
    }

    #[test]
    fn test_relative_paths_rebased() {
        let config = Config::default().relative_to("/project");
        assert_eq!(config.root, "/project/src");
        assert_eq!(config.dist, "/project/dist");

        let mut config = Config::default();
        config.dist = "/tmp/out".into();
        let config = config.relative_to("/project");
        assert_eq!(config.dist, "/tmp/out");
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(toml::from_str::<Config>("colour = 1").is_err());
    }
}
