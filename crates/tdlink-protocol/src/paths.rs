use std::path::PathBuf;

/// Returns the default socket path of the engine bridge.
///
/// Checks `$TDLINK_SOCKET`, then `$XDG_RUNTIME_DIR/tdlink.sock`, then
/// `/tmp/tdlink-$UID.sock`.
pub fn default_socket_path() -> PathBuf {
    if let Ok(path) = std::env::var("TDLINK_SOCKET") {
        return PathBuf::from(path);
    }
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        PathBuf::from(runtime_dir).join("tdlink.sock")
    } else {
        // SAFETY: getuid() is always safe to call and has no preconditions
        let uid = unsafe { libc::getuid() };
        PathBuf::from(format!("/tmp/tdlink-{uid}.sock"))
    }
}

/// Returns the config directory for tdlink.
pub fn dirs_path() -> PathBuf {
    if let Ok(config_dir) = std::env::var("XDG_CONFIG_HOME") {
        PathBuf::from(config_dir).join("tdlink")
    } else if let Ok(home) = std::env::var("HOME") {
        PathBuf::from(home).join(".config").join("tdlink")
    } else {
        PathBuf::from("/tmp/tdlink")
    }
}

/// Returns the config file path.
pub fn config_path() -> PathBuf {
    dirs_path().join("config.toml")
}
