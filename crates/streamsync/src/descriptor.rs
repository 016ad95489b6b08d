//! Stream descriptors as handed out by the stream list provider.

use serde::{Deserialize, Serialize};

/// Container/protocol of a stream URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    #[default]
    Hls,
    Mp4,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hls => "hls",
            Self::Mp4 => "mp4",
        }
    }

    /// MIME type a playback surface is asked about when probing native support.
    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Hls => "application/vnd.apple.mpegurl",
            Self::Mp4 => "video/mp4",
        }
    }

    /// Infers the media type from the URL path extension.
    ///
    /// Anything that is not recognizably progressive MP4 is treated as HLS,
    /// which is what the stream service serves.
    pub fn from_url(url: &str) -> Self {
        let path = match url::Url::parse(url) {
            Ok(parsed) => parsed.path().to_ascii_lowercase(),
            Err(_) => url
                .split(['?', '#'])
                .next()
                .unwrap_or_default()
                .to_ascii_lowercase(),
        };

        if path.ends_with(".mp4") || path.ends_with(".m4v") {
            Self::Mp4
        } else {
            Self::Hls
        }
    }
}

impl std::fmt::Display for MediaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Immutable description of one configured stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    id: String,
    title: String,
    url: String,
    #[serde(rename = "type", alias = "mediaType", default)]
    media_type: MediaType,
}

impl StreamDescriptor {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        url: impl Into<String>,
        media_type: MediaType,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            url: url.into(),
            media_type,
        }
    }

    /// Builds the descriptor for the camera at zero-based `index`.
    pub fn camera(index: usize, url: impl Into<String>) -> Self {
        let url = url.into();
        let media_type = MediaType::from_url(&url);
        Self {
            id: format!("stream{}", index + 1),
            title: format!("Camera {}", index + 1),
            url,
            media_type,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn media_type(&self) -> MediaType {
        self.media_type
    }
}
