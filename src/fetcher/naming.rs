use anyhow::{Context, Result};
use chrono::NaiveDate;
use url::Url;

/// Maps a business date to the provider URL and the local cache file name.
#[derive(Debug, Clone)]
pub struct FileNaming {
    base: Url,
    extension: String,
}

impl FileNaming {
    pub fn new(base_url: &str, extension: &str) -> Result<Self> {
        // Url::join drops the last segment unless the base ends with '/'.
        let base = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{base_url}/")
        };
        let base = Url::parse(&base).with_context(|| format!("Invalid base URL {base_url}"))?;

        let extension = if extension.is_empty() || extension.starts_with('.') {
            extension.to_string()
        } else {
            format!(".{extension}")
        };

        Ok(Self { base, extension })
    }

    /// `24jan05` for 2024-01-05.
    pub fn remote_token(date: NaiveDate) -> String {
        date.format("%y%b%d").to_string().to_lowercase()
    }

    /// e.g. `.../arqs/d24jan05.xls`
    pub fn remote_url(&self, date: NaiveDate) -> Result<Url> {
        let file = format!("d{}{}", Self::remote_token(date), self.extension);
        self.base
            .join(&file)
            .with_context(|| format!("Could not build URL for {date}"))
    }

    /// e.g. `20240105.xls`
    pub fn cache_file_name(&self, date: NaiveDate) -> String {
        format!("{}{}", date.format("%Y%m%d"), self.extension)
    }
}
