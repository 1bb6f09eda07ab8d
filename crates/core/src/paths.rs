use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Paths {
    pub base: PathBuf,
}

impl Paths {
    pub fn new() -> Self {
        let base = dirs::home_dir()
            .map(|h| h.join(".webhive"))
            .unwrap_or_else(|| PathBuf::from(".webhive"));
        Self { base }
    }

    pub fn with_base(base: PathBuf) -> Self {
        Self { base }
    }

    pub fn config_file(&self) -> PathBuf {
        self.base.join("config.json")
    }

    pub fn workspace(&self) -> PathBuf {
        self.base.join("workspace")
    }

    /// Per-session browser profile directories live under here.
    pub fn sessions_dir(&self) -> PathBuf {
        self.base.join("sessions")
    }

    /// Screenshots are written under here.
    pub fn media_dir(&self) -> PathBuf {
        self.workspace().join("media")
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        let paths = Paths::with_base(PathBuf::from("/tmp/hive"));
        assert_eq!(paths.config_file(), PathBuf::from("/tmp/hive/config.json"));
        assert_eq!(paths.sessions_dir(), PathBuf::from("/tmp/hive/sessions"));
        assert_eq!(
            paths.media_dir(),
            PathBuf::from("/tmp/hive/workspace/media")
        );
    }
}
