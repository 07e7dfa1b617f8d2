use std::path::{Component, Path, PathBuf};

use thiserror::Error;

/// Suffix of the hidden temporary files written during atomic downloads.
pub const PARTIAL_SUFFIX: &str = ".moveit-partial";

#[derive(Debug, Error)]
pub enum PathError {
    #[error("file name is empty")]
    Empty,
    #[error("file name contains unsupported component: {0}")]
    UnsupportedComponent(String),
    #[error("path is outside the sync directory: {0}")]
    OutsideRoot(PathBuf),
    #[error("file name is reserved for partial downloads: {0}")]
    Reserved(String),
}

/// Maps a flat remote file name to its location inside `root`.
///
/// Remote names come from an untrusted listing, so anything that is not a
/// single normal path component is refused. Partial-download names are
/// refused too: the index never reports them as present.
pub fn local_path_for(root: &Path, name: &str) -> Result<PathBuf, PathError> {
    if name.is_empty() {
        return Err(PathError::Empty);
    }
    if is_partial_name(name) {
        return Err(PathError::Reserved(name.to_string()));
    }
    if name.contains(|c| c == '/' || c == '\\') {
        return Err(PathError::UnsupportedComponent(name.to_string()));
    }

    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(part)), None) => Ok(root.join(part)),
        _ => Err(PathError::UnsupportedComponent(name.to_string())),
    }
}

/// Extracts the file name of a direct child of `root`; nested paths are rejected.
pub fn name_in_root(root: &Path, path: &Path) -> Result<String, PathError> {
    let relative = path
        .strip_prefix(root)
        .map_err(|_| PathError::OutsideRoot(path.to_path_buf()))?;
    let mut components = relative.components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(part)), None) => Ok(part.to_string_lossy().into_owned()),
        (None, _) => Err(PathError::Empty),
        _ => Err(PathError::UnsupportedComponent(
            relative.to_string_lossy().into_owned(),
        )),
    }
}

pub fn partial_path_for(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    target.with_file_name(format!(".{name}{PARTIAL_SUFFIX}"))
}

pub fn is_partial_name(name: &str) -> bool {
    name.starts_with('.') && name.ends_with(PARTIAL_SUFFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_name_under_root() {
        let root = PathBuf::from("/sync");
        let mapped = local_path_for(&root, "A.txt").unwrap();
        assert_eq!(mapped, PathBuf::from("/sync/A.txt"));
    }

    #[test]
    fn rejects_traversal_and_nested_names() {
        let root = PathBuf::from("/sync");
        for name in ["..", ".", "../secret", "Docs/A.txt", "a\\b"] {
            assert!(
                matches!(
                    local_path_for(&root, name),
                    Err(PathError::UnsupportedComponent(_))
                ),
                "{name} should be rejected"
            );
        }
        assert!(matches!(local_path_for(&root, ""), Err(PathError::Empty)));
    }

    #[test]
    fn rejects_partial_download_names() {
        let root = PathBuf::from("/sync");
        assert!(matches!(
            local_path_for(&root, ".x.moveit-partial"),
            Err(PathError::Reserved(_))
        ));
        assert!(local_path_for(&root, "x.moveit-partial").is_ok());
    }

    #[test]
    fn extracts_direct_child_names_only() {
        let root = Path::new("/sync");
        assert_eq!(
            name_in_root(root, Path::new("/sync/report.pdf")).unwrap(),
            "report.pdf"
        );
        assert!(matches!(
            name_in_root(root, Path::new("/sync/sub/report.pdf")),
            Err(PathError::UnsupportedComponent(_))
        ));
        assert!(matches!(
            name_in_root(root, Path::new("/elsewhere/report.pdf")),
            Err(PathError::OutsideRoot(_))
        ));
    }

    #[test]
    fn partial_path_is_hidden_sibling() {
        let partial = partial_path_for(Path::new("/sync/r.txt"));
        assert_eq!(partial, PathBuf::from("/sync/.r.txt.moveit-partial"));
        assert!(is_partial_name(".r.txt.moveit-partial"));
        assert!(!is_partial_name("r.txt"));
    }
}
