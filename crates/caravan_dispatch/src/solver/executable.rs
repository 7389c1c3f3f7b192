use std::path::{Path, PathBuf};

use crate::error::DispatchError;

/// Resolves the solver binary from a priority-ordered candidate list: the
/// first existing file wins.
pub fn resolve_executable(candidates: &[PathBuf]) -> Result<PathBuf, DispatchError> {
    candidates
        .iter()
        .find(|path| Path::is_file(path))
        .cloned()
        .ok_or_else(|| {
            DispatchError::Process(format!(
                "no solver executable found among {} candidate paths",
                candidates.len()
            ))
        })
}
