//! Stylesheet operations.
//!
//! Sass compilation is done by `grass`; media query grouping, vendor
//! prefixing and minification by `lightningcss`.

use std::fmt::Display;

use camino::{Utf8Path, Utf8PathBuf};
use lightningcss::rules::CssRule;
use lightningcss::rules::media::MediaRule;
use lightningcss::stylesheet::{MinifyOptions, ParserOptions, PrinterOptions, StyleSheet};
use lightningcss::targets::{Browsers, Targets};
use lightningcss::traits::ToCss;
use parcel_sourcemap::SourceMap as ParcelSourceMap;

use crate::asset::{Asset, FileSet, SourceMap};
use crate::error::{ConfigError, Location, TransformError};
use crate::step::Operation;

fn css_error<T: Display>(
    operation: &'static str,
    file: &Utf8Path,
    error: lightningcss::error::Error<T>,
) -> TransformError {
    let location = error.loc.as_ref().map(|loc| Location {
        line: loc.line + 1,
        column: loc.column,
    });

    TransformError::new(operation, file, anyhow::anyhow!("{}", error.kind)).at(location)
}

fn utf8<'a>(operation: &'static str, asset: &'a Asset) -> Result<&'a str, TransformError> {
    asset
        .text()
        .map_err(|e| TransformError::new(operation, asset.origin(), e))
}

fn parse<'i>(
    operation: &'static str,
    asset: &Asset,
    code: &'i str,
) -> Result<StyleSheet<'i, 'static>, TransformError> {
    let options = ParserOptions {
        filename: asset.path.to_string(),
        ..ParserOptions::default()
    };

    StyleSheet::parse(code, options).map_err(|e| css_error(operation, asset.origin(), e))
}

/// Compiles Sass/SCSS sources to CSS.
///
/// Partials (`_name.scss`) are dropped from the set; they only exist to be
/// imported. Imports resolve against the importing file's directory and the
/// source root.
pub struct CompileSass {
    root: Utf8PathBuf,
}

impl CompileSass {
    const NAME: &'static str = "sass";

    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn compile(&self, asset: Asset) -> Result<Asset, TransformError> {
        let code = utf8(Self::NAME, &asset)?;

        let mut options = grass::Options::default()
            .style(grass::OutputStyle::Expanded)
            .load_path(self.root.as_std_path());

        if let Some(dir) = asset.source.as_deref().and_then(Utf8Path::parent) {
            options = options.load_path(dir.as_std_path());
        }

        if asset.has_extension("sass") {
            options = options.input_syntax(grass::InputSyntax::Sass);
        }

        let css = grass::from_string(code.to_owned(), &options).map_err(|e| {
            TransformError::new(Self::NAME, asset.origin(), anyhow::anyhow!("{e}"))
        })?;

        Ok(Asset {
            path: asset.path.with_extension("css"),
            data: css.into_bytes(),
            map: None,
            ..asset
        })
    }
}

fn is_partial(asset: &Asset) -> bool {
    asset
        .path
        .file_name()
        .is_some_and(|name| name.starts_with('_'))
}

impl Operation for CompileSass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn apply(&self, assets: FileSet) -> Result<FileSet, TransformError> {
        assets
            .into_iter()
            .filter(|asset| !is_partial(asset))
            .map(|asset| self.compile(asset))
            .collect()
    }
}

/// Moves every top-level `@media` block to the end of its stylesheet and
/// merges blocks with the same query, keeping first-seen order.
pub struct GroupMedia;

impl GroupMedia {
    const NAME: &'static str = "group-media";

    fn group(&self, asset: Asset) -> Result<Asset, TransformError> {
        let code = utf8(Self::NAME, &asset)?;
        let mut sheet = parse(Self::NAME, &asset, code)?;

        let mut plain = Vec::new();
        let mut grouped: Vec<(String, MediaRule)> = Vec::new();

        for rule in std::mem::take(&mut sheet.rules.0) {
            match rule {
                CssRule::Media(media) => {
                    let key = media
                        .query
                        .to_css_string(PrinterOptions::default())
                        .map_err(|e| css_error(Self::NAME, asset.origin(), e))?;

                    match grouped.iter_mut().find(|(k, _)| *k == key) {
                        Some((_, existing)) => existing.rules.0.extend(media.rules.0),
                        None => grouped.push((key, media)),
                    }
                }
                other => plain.push(other),
            }
        }

        plain.extend(grouped.into_iter().map(|(_, media)| CssRule::Media(media)));
        sheet.rules.0 = plain;

        let css = sheet
            .to_css(PrinterOptions::default())
            .map_err(|e| css_error(Self::NAME, asset.origin(), e))?;
        drop(sheet);

        Ok(Asset {
            data: css.code.into_bytes(),
            ..asset
        })
    }
}

impl Operation for GroupMedia {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn apply(&self, assets: FileSet) -> Result<FileSet, TransformError> {
        assets.into_iter().map(|asset| self.group(asset)).collect()
    }
}

/// Resolves a browserslist query into lightningcss targets.
fn targets(queries: &[String]) -> Result<Targets, ConfigError> {
    let browsers = Browsers::from_browserslist(queries)
        .map_err(|e| ConfigError::Browsers(queries.join(", "), e.to_string()))?;

    Ok(Targets {
        browsers,
        ..Targets::default()
    })
}

/// Adds the vendor prefixes needed by the configured browsers.
pub struct Autoprefix {
    targets: Targets,
}

impl Autoprefix {
    const NAME: &'static str = "autoprefix";

    pub fn new(queries: &[String]) -> Result<Self, ConfigError> {
        Ok(Self {
            targets: targets(queries)?,
        })
    }

    fn prefix(&self, asset: Asset) -> Result<Asset, TransformError> {
        let code = utf8(Self::NAME, &asset)?;
        let mut sheet = parse(Self::NAME, &asset, code)?;

        sheet
            .minify(MinifyOptions {
                targets: self.targets,
                ..MinifyOptions::default()
            })
            .map_err(|e| css_error(Self::NAME, asset.origin(), e))?;

        let css = sheet
            .to_css(PrinterOptions {
                targets: self.targets,
                ..PrinterOptions::default()
            })
            .map_err(|e| css_error(Self::NAME, asset.origin(), e))?;
        drop(sheet);

        Ok(Asset {
            data: css.code.into_bytes(),
            ..asset
        })
    }
}

impl Operation for Autoprefix {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn apply(&self, assets: FileSet) -> Result<FileSet, TransformError> {
        assets.into_iter().map(|asset| self.prefix(asset)).collect()
    }
}

/// Minifies CSS and attaches a map pointing back at the unminified input.
pub struct MinifyCss {
    targets: Targets,
}

impl MinifyCss {
    const NAME: &'static str = "minify-css";

    pub fn new(queries: &[String]) -> Result<Self, ConfigError> {
        Ok(Self {
            targets: targets(queries)?,
        })
    }

    fn minify(&self, asset: Asset) -> Result<Asset, TransformError> {
        let code = utf8(Self::NAME, &asset)?;
        let mut sheet = parse(Self::NAME, &asset, code)?;

        let map_error = |e: parcel_sourcemap::SourceMapError| {
            TransformError::new(Self::NAME, asset.origin(), anyhow::anyhow!("{e:?}"))
        };

        let mut map = ParcelSourceMap::new("/");
        map.add_source(asset.path.as_str());
        map.set_source_content(0, code).map_err(map_error)?;

        sheet
            .minify(MinifyOptions {
                targets: self.targets,
                ..MinifyOptions::default()
            })
            .map_err(|e| css_error(Self::NAME, asset.origin(), e))?;

        let css = sheet
            .to_css(PrinterOptions {
                minify: true,
                targets: self.targets,
                source_map: Some(&mut map),
                ..PrinterOptions::default()
            })
            .map_err(|e| css_error(Self::NAME, asset.origin(), e))?;

        drop(sheet);

        let json = map.to_json(None).map_err(map_error)?;
        let json = serde_json::from_str(&json)
            .map_err(|e| TransformError::new(Self::NAME, asset.origin(), e))?;

        Ok(Asset {
            data: css.code.into_bytes(),
            map: Some(SourceMap::Regular(json)),
            ..asset
        })
    }
}

impl Operation for MinifyCss {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn apply(&self, assets: FileSet) -> Result<FileSet, TransformError> {
        assets.into_iter().map(|asset| self.minify(asset)).collect()
    }
}
