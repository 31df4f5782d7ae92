/// Build timestamp injected by build.rs, RFC 3339 (e.g. "2025-02-09T15:30:45Z").
/// Falls back to the crate version when the build script did not run.
pub fn current_version() -> &'static str {
    option_env!("BUILD_VERSION").unwrap_or(env!("CARGO_PKG_VERSION"))
}

/// Startup banner
pub fn log_version(device_id: &str) {
    tracing::info!(
        "{} {} starting (device ID: {})",
        env!("CARGO_PKG_NAME"),
        current_version(),
        device_id
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_version_format() {
        let version = current_version();
        let rfc3339 = regex::Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}Z$").unwrap();
        assert!(
            rfc3339.is_match(version),
            "Version should be an RFC 3339 timestamp, got: {}",
            version
        );
    }

    #[test]
    fn test_log_version() {
        log_version("rpi-01");
    }
}
