use std::collections::HashSet;
use std::sync::LazyLock;

use camino::Utf8PathBuf;
use regex::{Captures, Regex};

use crate::asset::{Asset, FileSet};
use crate::error::TransformError;
use crate::step::Operation;

static RE_NOISE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<\?xml.*?\?>|<!DOCTYPE[^>]*>|<!--.*?-->").expect("valid regex")
});

static RE_ROOT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<svg\b([^>]*?)(?:/>|>(.*)</svg>)").expect("valid regex")
});

static RE_KEPT_ATTR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:^|\s)(viewBox|preserveAspectRatio)\s*=\s*(?:"([^"]*)"|'([^']*)')"#)
        .expect("valid regex")
});

static RE_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(^|\s)id\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("valid regex")
});

static RE_URL_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"url\(\s*(["']?)#([^)"'\s]+)["']?\s*\)"#).expect("valid regex")
});

static RE_HREF_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r##"(^|\s)((?:xlink:)?href)\s*=\s*(?:"#([^"]*)"|'#([^']*)')"##)
        .expect("valid regex")
});

/// Value of an attribute matched with one group per quote style, together
/// with the quote it was written with.
fn quoted<'h>(c: &Captures<'h>, double: usize, single: usize) -> Option<(&'h str, char)> {
    c.get(double)
        .map(|m| (m.as_str(), '"'))
        .or_else(|| c.get(single).map(|m| (m.as_str(), '\'')))
}

/// Merges every SVG in the set into a single sprite of `<symbol>`s.
///
/// Each symbol is named after its file stem. Ids inside a symbol are
/// prefixed with the stem, together with the `url(#…)` and `href="#…"`
/// references pointing at them, so symbols cannot clash. An empty set
/// produces no sprite at all.
pub struct SvgStore {
    file: Utf8PathBuf,
}

impl SvgStore {
    const NAME: &'static str = "svgstore";

    pub fn new() -> Self {
        Self {
            file: "sprite.svg".into(),
        }
    }

    fn symbol(asset: &Asset, seen: &mut HashSet<String>) -> Result<String, TransformError> {
        let fail = |msg: String| TransformError::new(Self::NAME, asset.origin(), anyhow::anyhow!(msg));

        let text = asset
            .text()
            .map_err(|e| TransformError::new(Self::NAME, asset.origin(), e))?;

        let stem = asset
            .path
            .file_stem()
            .ok_or_else(|| fail("file has no name".into()))?;

        if !seen.insert(stem.to_owned()) {
            return Err(fail(format!("symbol id '{stem}' is used by more than one file")));
        }

        let text = RE_NOISE.replace_all(text, "");
        let root = RE_ROOT
            .captures(&text)
            .ok_or_else(|| fail("no <svg> root element".into()))?;

        let attrs = root.get(1).map_or("", |m| m.as_str());
        let inner = root.get(2).map_or("", |m| m.as_str());

        let mut symbol = format!(r#"<symbol id="{stem}""#);
        for attr in RE_KEPT_ATTR.captures_iter(attrs) {
            if let Some((value, _)) = quoted(&attr, 2, 3) {
                symbol.push_str(&format!(r#" {}="{}""#, &attr[1], value));
            }
        }
        symbol.push('>');
        symbol.push_str(&prefix_ids(inner, stem));
        symbol.push_str("</symbol>");

        Ok(symbol)
    }
}

impl Default for SvgStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Prefixes every id declared in `inner` and every local reference to one.
fn prefix_ids(inner: &str, stem: &str) -> String {
    let ids: HashSet<&str> = RE_ID
        .captures_iter(inner)
        .filter_map(|c| quoted(&c, 2, 3).map(|(id, _)| id))
        .collect();

    if ids.is_empty() {
        return inner.to_owned();
    }

    let out = RE_ID.replace_all(inner, |c: &Captures| match quoted(c, 2, 3) {
        Some((id, q)) => format!("{}id={q}{stem}-{id}{q}", &c[1]),
        None => c[0].to_owned(),
    });

    let out = RE_URL_REF.replace_all(&out, |c: &Captures| {
        if ids.contains(&c[2]) {
            format!("url({q}#{stem}-{id}{q})", q = &c[1], id = &c[2])
        } else {
            c[0].to_owned()
        }
    });

    let out = RE_HREF_REF.replace_all(&out, |c: &Captures| match quoted(c, 3, 4) {
        Some((id, q)) if ids.contains(id) => format!("{}{}={q}#{stem}-{id}{q}", &c[1], &c[2]),
        _ => c[0].to_owned(),
    });

    out.into_owned()
}

impl Operation for SvgStore {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn apply(&self, assets: FileSet) -> Result<FileSet, TransformError> {
        if assets.is_empty() {
            return Ok(Vec::new());
        }

        let mut seen = HashSet::new();
        let symbols = assets
            .iter()
            .map(|asset| Self::symbol(asset, &mut seen))
            .collect::<Result<Vec<_>, _>>()?;

        let xlink = symbols.iter().any(|s| s.contains("xlink:"));
        let mut sprite = String::from(r#"<svg xmlns="http://www.w3.org/2000/svg""#);
        if xlink {
            sprite.push_str(r#" xmlns:xlink="http://www.w3.org/1999/xlink""#);
        }
        sprite.push('>');
        for symbol in symbols {
            sprite.push_str(&symbol);
        }
        sprite.push_str("</svg>");

        Ok(vec![Asset::new(self.file.clone(), sprite)])
    }
}
