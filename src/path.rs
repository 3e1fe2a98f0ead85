use std::path::{Path, PathBuf};

/// Makes `path` absolute relative to the current working directory.
///
/// Joins against `std::env::current_dir` rather than resolving `..` or
/// symlinks -- the engine only needs a stable absolute root for its data
/// directory, not a canonical one.
pub fn absolute_path<P: AsRef<Path>>(path: P) -> PathBuf {
    let path = path.as_ref();

    if path.is_absolute() {
        return path.to_path_buf();
    }

    #[allow(clippy::expect_used)]
    std::env::current_dir()
        .expect("should have a current directory")
        .join(path)
}
