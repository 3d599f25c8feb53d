//! Normalized shapes produced by the scraping backends.

use chrono::{DateTime, Utc};

/// A scraped Instagram profile with its recent posts and highlights,
/// normalised across backends.
#[derive(Debug, Clone, Default)]
pub struct ScrapedProfile {
    pub platform_id: String,
    pub username: String,
    pub full_name: Option<String>,
    pub biography: Option<String>,
    pub external_url: Option<String>,
    pub followers: i64,
    pub following: i64,
    pub media_count: i32,
    pub is_verified: bool,
    pub is_business: bool,
    /// Ephemeral CDN URL; replaced with an object-storage URL on persist.
    pub avatar_cdn_url: Option<String>,
    pub posts: Vec<ScrapedPost>,
    pub highlights: Vec<ScrapedHighlight>,
}

#[derive(Debug, Clone, Default)]
pub struct ScrapedPost {
    pub platform_id: String,
    pub caption: Option<String>,
    pub media_type: String,
    pub like_count: i32,
    pub comment_count: i32,
    /// Only set for reels/videos.
    pub play_count: Option<i64>,
    /// Ephemeral CDN URL; replaced with an object-storage URL on persist.
    pub thumbnail_cdn_url: Option<String>,
    pub taken_at: Option<DateTime<Utc>>,
}

impl ScrapedPost {
    #[must_use]
    pub fn is_reel(&self) -> bool {
        self.media_type == "reel"
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScrapedHighlight {
    pub platform_id: String,
    pub title: Option<String>,
    pub media_count: Option<i32>,
}

/// A user surfaced by hashtag discovery, before any profile scrape.
#[derive(Debug, Clone, Default)]
pub struct CandidateUser {
    pub platform_id: String,
    pub username: String,
    pub full_name: Option<String>,
    pub followers: i64,
    pub media_count: i32,
    pub is_private: bool,
}

/// Scraping-account availability reported on the health endpoint.
#[derive(Debug, Clone, Copy, Default)]
pub struct AccountStats {
    pub total: i64,
    pub available: i64,
}
