use std::collections::BTreeMap;
use std::fmt::Display;
use std::fs;
use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};
use console::Style;

use crate::asset::{Asset, FileSet};
use crate::core::Hash32;
use crate::error::{CleanError, StepError};
use crate::paths::{normalize_path, split_glob};

const ANSI_BLUE: Style = Style::new().blue();

pub fn as_overhead(s: Instant) -> impl Display {
    let e = Instant::now();
    let f = format!("(+{}ms)", e.duration_since(s).as_millis());
    ANSI_BLUE.apply_to(f)
}

/// Delete the entire output directory if it exists.
pub async fn clean(dist: &Utf8Path) -> Result<(), CleanError> {
    let s = Instant::now();

    match tokio::fs::remove_dir_all(dist).await {
        Ok(()) => tracing::info!("cleaned {dist} {}", as_overhead(s)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("{dist} does not exist, nothing to clean")
        }
        Err(source) => {
            return Err(CleanError {
                path: dist.to_owned(),
                source,
            });
        }
    }

    Ok(())
}

/// Resolves `globs` under `root` and reads every matched file.
///
/// Each file's asset path is relative to the static prefix of the glob that
/// matched it. A file matched by several globs is read once, under the first
/// glob's prefix. The result is sorted by asset path.
pub fn read_sources(root: &Utf8Path, globs: &[String]) -> Result<FileSet, StepError> {
    let mut found: BTreeMap<Utf8PathBuf, (Utf8PathBuf, Utf8PathBuf)> = BTreeMap::new();

    for glob in globs {
        let (base, _) = split_glob(glob);
        let base = normalize_path(&root.join(base));
        let pattern = normalize_path(&root.join(glob));

        for path in glob::glob(pattern.as_str())? {
            let path = Utf8PathBuf::try_from(path?)?;
            if !path.is_file() {
                continue;
            }

            let relative = path
                .strip_prefix(&base)
                .map(Utf8Path::to_path_buf)
                .unwrap_or_else(|_| Utf8PathBuf::from(path.file_name().unwrap_or(path.as_str())));

            found.entry(path.clone()).or_insert((relative, path));
        }
    }

    let mut assets = found
        .into_values()
        .map(|(relative, path)| {
            let data = fs::read(&path)?;
            Ok(Asset::from_source(relative, path, data))
        })
        .collect::<Result<FileSet, std::io::Error>>()?;

    assets.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(assets)
}

/// Writes every asset under `dest`. Files already holding identical bytes
/// are left alone. Returns the number of files actually written.
pub fn write_assets(dest: &Utf8Path, assets: &[Asset]) -> Result<usize, std::io::Error> {
    let mut written = 0;

    for asset in assets {
        let path = dest.join(&asset.path);

        if path.is_file() && Hash32::hash_file(&path)? == Hash32::hash(&asset.data) {
            tracing::debug!("{path} unchanged");
            continue;
        }

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }

        fs::write(&path, &asset.data)?;
        written += 1;
    }

    Ok(written)
}
