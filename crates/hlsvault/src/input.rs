//! Crawler list parsing.
//!
//! The list is a header line followed by comma-separated records. Field 0 is
//! the source (room) id; the playlist is the first `http(s)` field mentioning
//! `.m3u8`; images are every `http(s)` URL (fields may hold several,
//! `;`-separated) that looks like a picture.

use thiserror::Error;
use uuid::Uuid;

use crate::job::Job;

const IMAGE_MARKERS: [&str; 4] = [".png", ".jpg", ".jpeg", "gif"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InputError {
    #[error("expected at least 2 comma-separated fields, found {0}")]
    TooFewFields(usize),

    #[error("record has an empty source id")]
    MissingSourceId,

    #[error("record has neither a playlist nor an image URL")]
    NothingToDownload,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentItem {
    pub source_id: String,
    pub playlist_url: Option<String>,
    pub image_urls: Vec<String>,
}

impl ContentItem {
    pub fn parse(line: &str) -> Result<Self, InputError> {
        let fields: Vec<&str> = line.trim().split(',').collect();
        if fields.len() < 2 {
            return Err(InputError::TooFewFields(fields.len()));
        }
        let source_id = fields[0].trim();
        if source_id.is_empty() {
            return Err(InputError::MissingSourceId);
        }

        let playlist_url = fields
            .iter()
            .map(|f| f.trim())
            .find(|f| is_http(f) && f.contains(".m3u8"))
            .map(str::to_owned);

        let mut image_urls: Vec<String> = Vec::new();
        for url in fields
            .iter()
            .map(|f| f.trim())
            .filter(|f| is_http(f))
            .flat_map(|f| f.split(';'))
            .map(str::trim)
            .filter(|u| !u.is_empty() && looks_like_image(u))
        {
            if !image_urls.iter().any(|seen| seen == url) {
                image_urls.push(url.to_owned());
            }
        }

        if playlist_url.is_none() && image_urls.is_empty() {
            return Err(InputError::NothingToDownload);
        }

        Ok(Self {
            source_id: source_id.to_owned(),
            playlist_url,
            image_urls,
        })
    }

    /// `{source id}_{4 hex chars}`: repeated captures of one source never
    /// share a directory.
    pub fn content_id(&self) -> String {
        let suffix = Uuid::new_v4().simple().to_string();
        format!("{}_{}", self.source_id, &suffix[..4])
    }

    pub fn into_job(self, credential: Option<&str>) -> Job {
        Job {
            content_id: self.content_id(),
            playlist_url: self.playlist_url,
            image_urls: self.image_urls,
            target_dir: None,
            credential: credential.map(str::to_owned),
        }
    }
}

fn is_http(field: &str) -> bool {
    field.starts_with("http://") || field.starts_with("https://")
}

fn looks_like_image(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    IMAGE_MARKERS.iter().any(|marker| lower.contains(marker))
}
