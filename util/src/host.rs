//! Host platform utility functions

use std::env;
use std::path::{Path, PathBuf};

/// Name of the environment variable pointing at the software root directory.
pub const SW_ROOT_ENV_VAR: &str = "PLAN_BRIDGE_ROOT";

/// Get the software root directory from the environment.
pub fn get_sw_root() -> Result<PathBuf, env::VarError> {
    env::var(SW_ROOT_ENV_VAR).map(PathBuf::from)
}

/// Resolve a resource path, relative paths being taken from the software root.
pub fn resolve<P: AsRef<Path>>(path: P) -> Result<PathBuf, env::VarError> {
    let path = path.as_ref();

    if path.is_absolute() {
        Ok(path.to_path_buf())
    }
    else {
        Ok(get_sw_root()?.join(path))
    }
}
