//! Host platform utility functions

use std::path::PathBuf;

/// Name of the environment variable pointing at the root of the software tree.
pub const SW_ROOT_ENV_VAR: &str = "MTGP_SW_ROOT";

/// Get the root directory of the software, as given by the `MTGP_SW_ROOT` environment variable.
pub fn get_mtgp_sw_root() -> Result<PathBuf, std::env::VarError> {
    std::env::var(SW_ROOT_ENV_VAR).map(PathBuf::from)
}

/// Resolve a path that may be relative to the software root.
///
/// Absolute paths are returned unchanged.
pub fn resolve_in_sw_root<P: Into<PathBuf>>(path: P) -> Result<PathBuf, std::env::VarError> {
    let path = path.into();

    if path.is_absolute() {
        Ok(path)
    }
    else {
        get_mtgp_sw_root().map(|root| root.join(path))
    }
}
