use crate::error::{Result, VesperError};
use std::path::{Component, Path, PathBuf};

/// Join a recorded relative name under `root`, refusing anything that
/// could escape it.
pub fn safe_join(root: &Path, rel: &str) -> Result<PathBuf> {
    let p = Path::new(rel);
    let ok = !rel.is_empty() && p.components().all(|c| matches!(c, Component::Normal(_)));
    if !ok {
        return Err(VesperError::integrity(format!("unsafe path: {rel}")));
    }
    Ok(root.join(p))
}

/// `/`-joined relative name.
pub fn child_name(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}/{name}")
    }
}
