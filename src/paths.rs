use camino::{Utf8Component, Utf8Path, Utf8PathBuf};

/// Normalize a path, removing things like `.` and `..`.
///
/// CAUTION: This does not resolve symlinks (unlike [`std::fs::canonicalize`]).
///
/// Adapted from
/// <https://github.com/rust-lang/cargo/blob/f7acf448fc127df9a77c52cc2bba027790ac4931/crates/cargo-util/src/paths.rs#L76-L116>
pub(crate) fn normalize_path(path: &Utf8Path) -> Utf8PathBuf {
    let mut components = path.components().peekable();
    let mut ret = if let Some(c @ Utf8Component::Prefix(..)) = components.peek().cloned() {
        components.next();
        Utf8PathBuf::from(c.as_str())
    } else {
        Utf8PathBuf::new()
    };

    for component in components {
        match component {
            Utf8Component::Prefix(..) => unreachable!(),
            Utf8Component::RootDir => {
                ret.push(Utf8Component::RootDir);
            }
            Utf8Component::CurDir => {}
            Utf8Component::ParentDir => {
                if ret.ends_with(Utf8Component::ParentDir) {
                    ret.push(Utf8Component::ParentDir);
                } else {
                    let popped = ret.pop();
                    if !popped && !ret.has_root() {
                        ret.push(Utf8Component::ParentDir);
                    }
                }
            }
            Utf8Component::Normal(c) => {
                ret.push(c);
            }
        }
    }
    ret
}

/// Splits a glob into its static directory prefix and the wildcard suffix.
///
/// - `scss/**/*.scss` -> (`scss`, `**/*.scss`)
/// - `*.html` -> (``, `*.html`)
/// - `vendor/jquery.js` -> (`vendor`, `jquery.js`)
pub(crate) fn split_glob(glob: &str) -> (Utf8PathBuf, Utf8PathBuf) {
    let path = Utf8Path::new(glob);
    let components: Vec<_> = path.components().collect();

    let split = components
        .iter()
        .position(|c| c.as_str().contains(['*', '?', '[']))
        .unwrap_or(components.len().saturating_sub(1));

    let base = components.iter().take(split).collect();
    let rest = components.iter().skip(split).collect();

    (base, rest)
}
