//! In-memory files flowing through a transform step.

use camino::{Utf8Path, Utf8PathBuf};
use serde_json::{Value, json};

/// The unit every operation consumes and produces.
///
/// Order matters: it is the sorted order of the resolved input paths and
/// every operation keeps it, which is what makes output deterministic.
pub type FileSet = Vec<Asset>;

/// A single file in a [`FileSet`].
#[derive(Debug, Clone)]
pub struct Asset {
    /// Destination path, relative to the step's output directory.
    pub path: Utf8PathBuf,
    /// File the asset was read from, if it came from disk.
    pub source: Option<Utf8PathBuf>,
    pub data: Vec<u8>,
    /// Source map describing how `data` relates to the original sources.
    pub map: Option<SourceMap>,
}

impl Asset {
    pub fn new(path: impl Into<Utf8PathBuf>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            source: None,
            data: data.into(),
            map: None,
        }
    }

    pub fn from_source(
        path: impl Into<Utf8PathBuf>,
        source: impl Into<Utf8PathBuf>,
        data: Vec<u8>,
    ) -> Self {
        Self {
            path: path.into(),
            source: Some(source.into()),
            data,
            map: None,
        }
    }

    /// Path used in diagnostics: the file on disk when there is one.
    pub fn origin(&self) -> &Utf8Path {
        self.source.as_deref().unwrap_or(&self.path)
    }

    pub fn text(&self) -> Result<&str, std::str::Utf8Error> {
        std::str::from_utf8(&self.data)
    }

    pub fn has_extension(&self, ext: &str) -> bool {
        self.path
            .extension()
            .is_some_and(|e| e.eq_ignore_ascii_case(ext))
    }
}

/// Number of generated lines, counting a trailing partial line.
pub(crate) fn line_count(data: &[u8]) -> usize {
    data.iter().filter(|&&b| b == b'\n').count() + 1
}

/// Version 3 source map attached to an [`Asset`].
#[derive(Debug, Clone, PartialEq)]
pub enum SourceMap {
    /// A regular map, usually produced by an external tool.
    Regular(Value),
    /// An index map: regular maps placed at line offsets of a concatenation.
    Indexed(Vec<Section>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    pub line: usize,
    pub map: Value,
}

impl SourceMap {
    /// Maps every line of `content` onto the same line of `source`.
    pub fn identity(source: &Utf8Path, content: &str) -> Self {
        let lines = content.split('\n').count();
        let mappings = (0..lines)
            .map(|i| if i == 0 { "AAAA" } else { "AACA" })
            .collect::<Vec<_>>()
            .join(";");

        SourceMap::Regular(json!({
            "version": 3,
            "sources": [source.as_str()],
            "sourcesContent": [content],
            "names": [],
            "mappings": mappings,
        }))
    }

    /// Shifts this map down by `offset` lines, producing index sections.
    fn into_sections(self, offset: usize) -> Vec<Section> {
        match self {
            SourceMap::Regular(map) => vec![Section { line: offset, map }],
            SourceMap::Indexed(sections) => sections
                .into_iter()
                .map(|s| Section {
                    line: s.line + offset,
                    map: s.map,
                })
                .collect(),
        }
    }

    /// Joins maps of consecutive chunks; each entry is the chunk's first
    /// line in the joined output.
    pub fn concat(parts: impl IntoIterator<Item = (usize, SourceMap)>) -> Self {
        SourceMap::Indexed(
            parts
                .into_iter()
                .flat_map(|(offset, map)| map.into_sections(offset))
                .collect(),
        )
    }

    /// Serialized form with the `file` field set.
    pub fn to_json(&self, file: &str) -> Value {
        match self {
            SourceMap::Regular(map) => {
                let mut map = map.clone();
                if let Some(object) = map.as_object_mut() {
                    object.insert("file".into(), file.into());
                }
                map
            }
            SourceMap::Indexed(sections) => json!({
                "version": 3,
                "file": file,
                "sections": sections
                    .iter()
                    .map(|s| json!({ "offset": { "line": s.line, "column": 0 }, "map": s.map }))
                    .collect::<Vec<_>>(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_mappings() {
        let map = SourceMap::identity(Utf8Path::new("a.js"), "one\ntwo\nthree");
        let json = map.to_json("out.js");

        assert_eq!(json["mappings"], "AAAA;AACA;AACA");
        assert_eq!(json["file"], "out.js");
        assert_eq!(json["sources"][0], "a.js");
    }

    #[test]
    fn test_concat_flattens_offsets() {
        let a = SourceMap::identity(Utf8Path::new("a.js"), "a");
        let b = SourceMap::identity(Utf8Path::new("b.js"), "b\nb");
        let c = SourceMap::identity(Utf8Path::new("c.js"), "c");

        let inner = SourceMap::concat([(0, b), (2, c)]);
        let outer = SourceMap::concat([(0, a), (1, inner)]);

        let json = outer.to_json("all.js");
        let offsets: Vec<_> = json["sections"]
            .as_array()
            .unwrap()
            .iter()
            .map(|s| s["offset"]["line"].as_u64().unwrap())
            .collect();

        assert_eq!(offsets, vec![0, 1, 3]);
        assert_eq!(json["sections"][2]["map"]["sources"][0], "c.js");
    }

    #[test]
    fn test_line_count() {
        assert_eq!(line_count(b""), 1);
        assert_eq!(line_count(b"x\n"), 2);
        assert_eq!(line_count(b"x\ny"), 2);
    }
}
