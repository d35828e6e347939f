use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{ImageEncoder, ImageFormat};
use rayon::iter::{IntoParallelIterator, ParallelIterator};

use crate::asset::{Asset, FileSet};
use crate::error::TransformError;
use crate::step::Operation;
use crate::step::tool::pipe_through;

/// Lossless recompression of raster images.
///
/// PNGs are re-encoded with the strongest deflate setting and the smaller of
/// the two encodings is kept. Every other file passes through untouched.
pub struct OptimizeImages;

impl OptimizeImages {
    const NAME: &'static str = "optimize-images";

    fn optimize(asset: Asset) -> Result<Asset, TransformError> {
        if !matches!(image::guess_format(&asset.data), Ok(ImageFormat::Png)) {
            return Ok(asset);
        }

        let recompressed = recompress_png(&asset.data)
            .map_err(|e| TransformError::new(Self::NAME, asset.origin(), e))?;

        if recompressed.len() < asset.data.len() {
            tracing::debug!(
                "{} {} -> {} bytes",
                asset.path,
                asset.data.len(),
                recompressed.len()
            );
            Ok(Asset {
                data: recompressed,
                ..asset
            })
        } else {
            Ok(asset)
        }
    }
}

fn recompress_png(buffer: &[u8]) -> image::ImageResult<Vec<u8>> {
    let img = image::load_from_memory_with_format(buffer, ImageFormat::Png)?;
    let (w, h) = (img.width(), img.height());

    let mut out = Vec::new();
    let encoder =
        PngEncoder::new_with_quality(&mut out, CompressionType::Best, FilterType::Adaptive);
    encoder.write_image(img.as_bytes(), w, h, img.color().into())?;

    Ok(out)
}

impl Operation for OptimizeImages {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn apply(&self, assets: FileSet) -> Result<FileSet, TransformError> {
        // collect on an indexed parallel iterator keeps input order
        assets.into_par_iter().map(Self::optimize).collect()
    }
}

/// Minifies `.svg` files with svgo. Other files pass through.
///
/// **Note:** This operation requires the `svgo` binary to be available.
pub struct MinifySvg {
    program: String,
}

impl MinifySvg {
    const NAME: &'static str = "svgo";

    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn minify(&self, asset: Asset) -> Result<Asset, TransformError> {
        if !asset.has_extension("svg") {
            return Ok(asset);
        }

        let args = ["--input=-", "--output=-"].map(String::from);
        let data = pipe_through(&self.program, &args, &asset.data)
            .map_err(|e| TransformError::new(Self::NAME, asset.origin(), e))?;

        Ok(Asset { data, ..asset })
    }
}

impl Operation for MinifySvg {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn apply(&self, assets: FileSet) -> Result<FileSet, TransformError> {
        assets.into_iter().map(|a| self.minify(a)).collect()
    }
}
