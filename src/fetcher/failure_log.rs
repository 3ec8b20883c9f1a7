use crate::error::FetchError;
use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use url::Url;

/// Append-only text log of failed downloads, one line per failure.
///
/// Appends are serialized so concurrent fetch tasks never interleave lines.
#[derive(Debug)]
pub struct FailureLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FailureLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn line(url: &Url, error: &FetchError) -> String {
        format!("Erro ao acessar o link: {url} - Código de Status: {error}")
    }

    pub async fn append(&self, url: &Url, error: &FetchError) -> Result<()> {
        let _guard = self.lock.lock().await;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Could not create dir {:?}", parent))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Could not open failure log {:?}", self.path))?;
        writeln!(file, "{}", Self::line(url, error))
            .with_context(|| format!("Could not write failure log {:?}", self.path))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_format() {
        let url = Url::parse("https://example.com/arqs/d24jan05.xls").unwrap();
        assert_eq!(
            FailureLog::line(&url, &FetchError::Status(404)),
            "Erro ao acessar o link: https://example.com/arqs/d24jan05.xls - Código de Status: 404"
        );
    }

    #[tokio::test]
    async fn test_appends_never_truncate() {
        let dir = tempfile::tempdir().unwrap();
        let log = FailureLog::new(dir.path().join("logs/log.txt"));
        let url = Url::parse("https://example.com/d24jan05.xls").unwrap();

        log.append(&url, &FetchError::Status(404)).await.unwrap();
        log.append(&url, &FetchError::Status(500)).await.unwrap();

        let text = std::fs::read_to_string(log.path()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("Código de Status: 404"));
        assert!(lines[1].ends_with("Código de Status: 500"));
    }
}
