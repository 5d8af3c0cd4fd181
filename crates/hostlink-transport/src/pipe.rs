use std::path::PathBuf;

use crate::error::{Result, TransportError};
use crate::traits::IpcStream;

#[cfg(windows)]
const PIPE_NAMESPACE: &str = r"\\.\pipe\";

/// Resolve a host pipe name to the platform address.
///
/// A name containing a path separator is taken as a full address. Otherwise
/// the name lives in the platform namespace: the temp directory on Unix,
/// `\\.\pipe\` on Windows.
pub fn resolve_pipe_path(name: &str) -> Result<PathBuf> {
    if name.is_empty() {
        return Err(TransportError::InvalidName {
            name: name.to_string(),
            reason: "empty",
        });
    }
    if name.contains('\0') {
        return Err(TransportError::InvalidName {
            name: name.to_string(),
            reason: "contains NUL",
        });
    }

    if name.contains('/') || name.contains('\\') {
        return Ok(PathBuf::from(name));
    }

    #[cfg(unix)]
    {
        Ok(std::env::temp_dir().join(name))
    }

    #[cfg(windows)]
    {
        Ok(PathBuf::from(format!("{PIPE_NAMESPACE}{name}")))
    }
}

/// Connect to the host pipe with the given name (blocking).
pub fn connect(name: &str) -> Result<IpcStream> {
    let path = resolve_pipe_path(name)?;

    #[cfg(unix)]
    {
        crate::uds::UnixDomainSocket::connect(path)
    }

    #[cfg(windows)]
    {
        crate::windows::NamedPipe::connect(path)
    }
}
