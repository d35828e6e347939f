use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::Value;

use crate::asset::{Asset, FileSet, SourceMap};
use crate::error::TransformError;
use crate::step::Operation;
use crate::step::tool::pipe_through;

const INLINE_MAP: &str = "//# sourceMappingURL=data:application/json;base64,";

/// Transpiles (and optionally minifies) scripts with esbuild.
///
/// Every file is piped through esbuild on its own, so the output keeps one
/// asset per input; the inline map esbuild emits is lifted into the asset.
///
/// **Note:** This operation requires the `esbuild` binary to be available.
pub struct Transpile {
    program: String,
    target: String,
    minify: bool,
}

impl Transpile {
    const NAME: &'static str = "transpile";

    pub fn new(program: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            target: target.into(),
            minify: true,
        }
    }

    pub fn minify(mut self, minify: bool) -> Self {
        self.minify = minify;
        self
    }

    fn args(&self, asset: &Asset) -> Vec<String> {
        let mut args = vec![
            format!("--target={}", self.target),
            "--loader=js".to_string(),
            "--sourcemap=inline".to_string(),
            "--sources-content=true".to_string(),
            format!("--sourcefile={}", asset.path),
        ];

        if self.minify {
            args.push("--minify".to_string());
        }

        args
    }

    fn transpile(&self, asset: Asset) -> Result<Asset, TransformError> {
        let output = pipe_through(&self.program, &self.args(&asset), &asset.data)
            .map_err(|e| TransformError::new(Self::NAME, asset.origin(), e))?;

        let output = String::from_utf8(output)
            .map_err(|e| TransformError::new(Self::NAME, asset.origin(), e))?;

        let (code, map) = split_inline_map(&output)
            .map_err(|e| TransformError::new(Self::NAME, asset.origin(), e))?;

        Ok(Asset {
            data: code.into_bytes(),
            map: map.map(SourceMap::Regular),
            ..asset
        })
    }
}

impl Operation for Transpile {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn apply(&self, assets: FileSet) -> Result<FileSet, TransformError> {
        assets.into_iter().map(|a| self.transpile(a)).collect()
    }
}

/// Separates code from a trailing base64 inline source map comment.
fn split_inline_map(output: &str) -> anyhow::Result<(String, Option<Value>)> {
    let Some(index) = output.rfind(INLINE_MAP) else {
        return Ok((output.to_string(), None));
    };

    let encoded = output[index + INLINE_MAP.len()..].trim();
    let decoded = STANDARD.decode(encoded)?;
    let map = serde_json::from_slice(&decoded)?;

    let code = output[..index].trim_end_matches(['\n', '\r']).to_string();
    Ok((code, Some(map)))
}
