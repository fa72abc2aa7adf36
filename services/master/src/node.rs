//! Local node identity

use std::path::Path;
use tracing::warn;

const FALLBACK_HOSTNAME: &str = "localhost";

/// Hostname this node advertises: `$HOSTNAME`, then `/etc/hostname`, then
/// `localhost`
pub fn resolve_hostname() -> String {
    from_sources(std::env::var("HOSTNAME").ok(), Path::new("/etc/hostname"))
}

fn from_sources(env: Option<String>, hostname_file: &Path) -> String {
    if let Some(name) = env.map(|n| n.trim().to_string()).filter(|n| !n.is_empty()) {
        return name;
    }

    match std::fs::read_to_string(hostname_file) {
        Ok(content) if !content.trim().is_empty() => content.trim().to_string(),
        Ok(_) => FALLBACK_HOSTNAME.to_string(),
        Err(e) => {
            warn!(path = %hostname_file.display(), error = %e, "Could not read hostname, using localhost");
            FALLBACK_HOSTNAME.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_wins() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("hostname");
        std::fs::write(&file, "from-file\n").unwrap();

        assert_eq!(from_sources(Some(" master-1 ".into()), &file), "master-1");
        assert_eq!(from_sources(Some("".into()), &file), "from-file");
        assert_eq!(from_sources(None, &file), "from-file");
    }

    #[test]
    fn test_missing_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(from_sources(None, &dir.path().join("nope")), "localhost");
    }
}
