use camino::{Utf8Path, Utf8PathBuf};

use crate::asset::{self, Asset, FileSet, SourceMap};
use crate::error::TransformError;
use crate::step::Operation;

/// Joins every file in the set into a single file, separated by newlines.
///
/// Parts without a map get an identity map, so the joined output always
/// carries an index map covering all of its lines. An empty set stays empty.
pub struct Concat {
    file: Utf8PathBuf,
}

impl Concat {
    pub fn new(file: impl Into<Utf8PathBuf>) -> Self {
        Self { file: file.into() }
    }
}

impl Operation for Concat {
    fn name(&self) -> &'static str {
        "concat"
    }

    fn apply(&self, assets: FileSet) -> Result<FileSet, TransformError> {
        if assets.is_empty() {
            return Ok(Vec::new());
        }

        let mut data = Vec::new();
        let mut parts = Vec::with_capacity(assets.len());
        let mut line = 0;

        for (i, mut asset) in assets.into_iter().enumerate() {
            if i > 0 {
                data.push(b'\n');
            }

            let map = match asset.map.take() {
                Some(map) => map,
                None => {
                    let text = String::from_utf8_lossy(&asset.data);
                    SourceMap::identity(&asset.path, &text)
                }
            };

            parts.push((line, map));
            line += asset::line_count(&asset.data);
            data.extend_from_slice(&asset.data);
        }

        Ok(vec![Asset {
            path: self.file.clone(),
            source: None,
            data,
            map: Some(SourceMap::concat(parts)),
        }])
    }
}

/// Gives the only file in the set a new name.
pub struct Rename {
    file: Utf8PathBuf,
}

impl Rename {
    pub fn new(file: impl Into<Utf8PathBuf>) -> Self {
        Self { file: file.into() }
    }
}

impl Operation for Rename {
    fn name(&self) -> &'static str {
        "rename"
    }

    fn apply(&self, mut assets: FileSet) -> Result<FileSet, TransformError> {
        if assets.len() > 1 {
            return Err(TransformError::new(
                "rename",
                self.file.clone(),
                anyhow::anyhow!("expected a single file, got {}", assets.len()),
            ));
        }

        for asset in &mut assets {
            asset.path = self.file.clone();
        }

        Ok(assets)
    }
}

/// Emits each attached map as a sidecar file and links it from the asset.
///
/// The map for `css/style.min.css` lands at `css/maps/style.min.css.map`.
pub struct WriteSourceMaps {
    dir: Utf8PathBuf,
}

impl WriteSourceMaps {
    pub fn new(dir: impl Into<Utf8PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn split(&self, mut asset: Asset) -> Result<Vec<Asset>, TransformError> {
        let Some(map) = asset.map.take() else {
            return Ok(vec![asset]);
        };

        let Some(name) = asset.path.file_name().map(str::to_owned) else {
            return Err(TransformError::new(
                "sourcemaps",
                asset.path.clone(),
                anyhow::anyhow!("asset has no file name"),
            ));
        };

        let link = self.dir.join(format!("{name}.map"));
        let path = asset
            .path
            .parent()
            .unwrap_or(Utf8Path::new(""))
            .join(&link);

        let json = serde_json::to_vec(&map.to_json(&name))
            .map_err(|e| TransformError::new("sourcemaps", asset.path.clone(), e))?;

        let comment = if asset.has_extension("css") {
            format!("\n/*# sourceMappingURL={link} */")
        } else {
            format!("\n//# sourceMappingURL={link}")
        };
        asset.data.extend_from_slice(comment.as_bytes());

        Ok(vec![asset, Asset::new(path, json)])
    }
}

impl Default for WriteSourceMaps {
    fn default() -> Self {
        Self::new("maps")
    }
}

impl Operation for WriteSourceMaps {
    fn name(&self) -> &'static str {
        "sourcemaps"
    }

    fn apply(&self, assets: FileSet) -> Result<FileSet, TransformError> {
        let mut out = Vec::with_capacity(assets.len() * 2);
        for asset in assets {
            out.extend(self.split(asset)?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;

    #[test]
    fn test_concat_joins_and_offsets_maps() {
        let assets = vec![
            Asset::new("a.js", "one\ntwo"),
            Asset::new("b.js", "three"),
            Asset::new("c.js", "four"),
        ];

        let out = Concat::new("all.js").apply(assets).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].path, "all.js");
        assert_eq!(out[0].data, b"one\ntwo\nthree\nfour");

        let Some(SourceMap::Indexed(sections)) = &out[0].map else {
            panic!("expected an index map");
        };
        let lines: Vec<_> = sections.iter().map(|s| s.line).collect();
        assert_eq!(lines, vec![0, 2, 3]);
        assert_eq!(sections[1].map["sources"][0], "b.js");
    }

    #[test]
    fn test_concat_keeps_existing_maps() {
        let mut a = Asset::new("a.css", ".a{}");
        a.map = Some(SourceMap::Regular(serde_json::json!({
            "version": 3,
            "sources": ["scss/a.scss"],
            "mappings": "AAAA",
        })));

        let out = Concat::new("style.css").apply(vec![a]).unwrap();
        let Some(SourceMap::Indexed(sections)) = &out[0].map else {
            panic!("expected an index map");
        };
        assert_eq!(sections[0].map["sources"][0], "scss/a.scss");
    }

    #[test]
    fn test_concat_maps_name_relative_sources() {
        let a = Asset::from_source("js/a.js", "/home/me/site/src/js/a.js", b"a()".to_vec());

        let out = Concat::new("all.js").apply(vec![a]).unwrap();
        let Some(SourceMap::Indexed(sections)) = &out[0].map else {
            panic!("expected an index map");
        };
        assert_eq!(sections[0].map["sources"][0], "js/a.js");
    }

    #[test]
    fn test_concat_empty_set() {
        assert!(Concat::new("all.js").apply(Vec::new()).unwrap().is_empty());
    }

    #[test]
    fn test_rename() {
        let out = Rename::new("sprite-svg.svg")
            .apply(vec![Asset::new("sprite.svg", "<svg/>")])
            .unwrap();
        assert_eq!(out[0].path, "sprite-svg.svg");

        assert!(Rename::new("x").apply(Vec::new()).unwrap().is_empty());

        let many = vec![Asset::new("a", ""), Asset::new("b", "")];
        assert!(Rename::new("x").apply(many).is_err());
    }

    #[test]
    fn test_write_source_maps_links_sidecar() {
        let mut css = Asset::new("style.min.css", ".a{}");
        css.map = Some(SourceMap::identity(Utf8Path::new("a.css"), ".a{}"));
        let plain = Asset::new("index.html", "<html></html>");

        let out = WriteSourceMaps::default().apply(vec![css, plain]).unwrap();
        let paths: Vec<_> = out.iter().map(|a| a.path.as_str()).collect();
        assert_eq!(paths, vec!["style.min.css", "maps/style.min.css.map", "index.html"]);

        assert_eq!(
            out[0].text().unwrap(),
            ".a{}\n/*# sourceMappingURL=maps/style.min.css.map */"
        );
        assert!(out[0].map.is_none());

        let map: Value = serde_json::from_slice(&out[1].data).unwrap();
        assert_eq!(map["file"], "style.min.css");
        assert_eq!(out[2].data, b"<html></html>");
    }

    #[test]
    fn test_write_source_maps_script_comment() {
        let mut js = Asset::new("lib/app.js", "x");
        js.map = Some(SourceMap::identity(Utf8Path::new("app.js"), "x"));

        let out = WriteSourceMaps::default().apply(vec![js]).unwrap();
        assert_eq!(out[0].text().unwrap(), "x\n//# sourceMappingURL=maps/app.js.map");
        assert_eq!(out[1].path, "lib/maps/app.js.map");
    }
}
