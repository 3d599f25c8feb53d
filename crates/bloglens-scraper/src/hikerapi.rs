//! HTTP client for the HikerAPI hosted scraping service.
//!
//! Wraps `reqwest` with `x-access-key` auth and maps HikerAPI failure modes
//! onto [`ScrapeError`]: 402/403 balance exhaustion, 404 unknown user,
//! 429 rate limiting, 5xx transient. Private accounts come back as regular
//! profiles flagged `is_private` and are surfaced as a typed error here so
//! handlers never see them as scrapable data.

use std::time::Duration;

use chrono::DateTime;
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use crate::error::ScrapeError;
use crate::types::{
    AccountStats, CandidateUser, ScrapedHighlight, ScrapedPost, ScrapedProfile,
};

const DEFAULT_BASE_URL: &str = "https://api.hikerapi.com";

/// How many recent medias one profile scrape pulls.
const MEDIA_AMOUNT: usize = 12;

/// How many hashtag medias one discovery pass inspects.
const HASHTAG_AMOUNT: usize = 50;

pub struct HikerApiClient {
    client: Client,
    access_key: String,
    base_url: String,
}

// ---------------------------------------------------------------------------
// Raw response shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawUser {
    pk: String,
    username: String,
    full_name: Option<String>,
    biography: Option<String>,
    external_url: Option<String>,
    follower_count: Option<i64>,
    following_count: Option<i64>,
    media_count: Option<i32>,
    #[serde(default)]
    is_verified: bool,
    #[serde(default)]
    is_business: bool,
    #[serde(default)]
    is_private: bool,
    profile_pic_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawMedia {
    pk: String,
    caption_text: Option<String>,
    media_type: Option<i32>,
    product_type: Option<String>,
    like_count: Option<i32>,
    comment_count: Option<i32>,
    play_count: Option<i64>,
    thumbnail_url: Option<String>,
    taken_at: Option<i64>,
    user: Option<RawUser>,
}

#[derive(Debug, Deserialize)]
struct RawHighlight {
    pk: String,
    title: Option<String>,
    media_count: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct RawBalance {
    balance: f64,
}

impl RawMedia {
    /// HikerAPI media types: 1 photo, 2 video (product_type `clips` = reel),
    /// 8 carousel.
    fn normalized_media_type(&self) -> &'static str {
        match (self.media_type, self.product_type.as_deref()) {
            (Some(2), Some("clips")) => "reel",
            (Some(2), _) => "video",
            (Some(8), _) => "carousel",
            _ => "photo",
        }
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

impl HikerApiClient {
    /// Creates a new client pointed at the production HikerAPI.
    ///
    /// # Errors
    ///
    /// Returns [`ScrapeError::Http`] if the underlying `reqwest::Client`
    /// cannot be constructed.
    pub fn new(access_key: &str, timeout_secs: u64) -> Result<Self, ScrapeError> {
        Self::with_base_url(access_key, timeout_secs, DEFAULT_BASE_URL)
    }

    /// Creates a new client with a custom base URL (for testing with wiremock).
    ///
    /// # Errors
    ///
    /// Returns [`ScrapeError::Http`] if the underlying `reqwest::Client`
    /// cannot be constructed.
    pub fn with_base_url(
        access_key: &str,
        timeout_secs: u64,
        base_url: &str,
    ) -> Result<Self, ScrapeError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .user_agent("bloglens/0.1 (blogger-intelligence)")
            .build()?;
        Ok(Self {
            client,
            access_key: access_key.to_owned(),
            base_url: base_url.trim_end_matches('/').to_owned(),
        })
    }

    /// Fetches a full profile: user info, recent medias, and highlights.
    ///
    /// # Errors
    ///
    /// Returns the typed [`ScrapeError`] taxonomy; see the module docs for
    /// the status mapping.
    pub async fn scrape_profile(&self, username: &str) -> Result<ScrapedProfile, ScrapeError> {
        let user: RawUser = self
            .get_json(
                "/v1/user/by/username",
                &[("username", username)],
                username,
            )
            .await?;

        if user.is_private {
            return Err(ScrapeError::PrivateAccount {
                username: username.to_owned(),
            });
        }

        let medias: Vec<RawMedia> = self
            .get_json(
                "/v1/user/medias/by/username",
                &[("username", username), ("amount", &MEDIA_AMOUNT.to_string())],
                username,
            )
            .await?;

        let highlights: Vec<RawHighlight> = self
            .get_json(
                "/v1/user/highlights/by/username",
                &[("username", username)],
                username,
            )
            .await?;

        Ok(normalize_profile(user, medias, highlights))
    }

    /// Fetches candidate users from recent top medias for a hashtag.
    ///
    /// Deduplicates by platform id; follower filtering happens in the
    /// discover handler.
    ///
    /// # Errors
    ///
    /// Returns the typed [`ScrapeError`] taxonomy.
    pub async fn discover(&self, hashtag: &str) -> Result<Vec<CandidateUser>, ScrapeError> {
        let medias: Vec<RawMedia> = self
            .get_json(
                "/v1/hashtag/medias/top",
                &[("name", hashtag), ("amount", &HASHTAG_AMOUNT.to_string())],
                hashtag,
            )
            .await?;

        let mut seen = std::collections::HashSet::new();
        let mut candidates = Vec::new();
        for media in medias {
            let Some(user) = media.user else { continue };
            if !seen.insert(user.pk.clone()) {
                continue;
            }
            candidates.push(CandidateUser {
                platform_id: user.pk,
                username: user.username,
                full_name: user.full_name,
                followers: user.follower_count.unwrap_or(0),
                media_count: user.media_count.unwrap_or(0),
                is_private: user.is_private,
            });
        }

        Ok(candidates)
    }

    /// Reports account availability from the request balance.
    ///
    /// HikerAPI is a single metered account: it is available while the
    /// balance is positive. Balance-check failures degrade to "unknown"
    /// rather than failing the health endpoint.
    pub async fn account_stats(&self) -> AccountStats {
        match self
            .get_json::<RawBalance>("/sys/balance", &[], "balance")
            .await
        {
            Ok(balance) => AccountStats {
                total: 1,
                available: i64::from(balance.balance > 0.0),
            },
            Err(e) => {
                tracing::warn!(error = %e, "hikerapi balance check failed");
                AccountStats::default()
            }
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
        context: &str,
    ) -> Result<T, ScrapeError> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("x-access-key", &self.access_key)
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if let Some(error) = map_error_status(status, context) {
            return Err(error);
        }

        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| ScrapeError::Deserialize {
            context: format!("{path}({context})"),
            source: e,
        })
    }
}

/// Map a non-success HTTP status onto the typed taxonomy, or `None` for 2xx.
fn map_error_status(status: StatusCode, context: &str) -> Option<ScrapeError> {
    if status.is_success() {
        return None;
    }

    Some(match status {
        StatusCode::NOT_FOUND => ScrapeError::UserNotFound {
            username: context.to_owned(),
        },
        StatusCode::PAYMENT_REQUIRED | StatusCode::FORBIDDEN => ScrapeError::InsufficientBalance,
        StatusCode::TOO_MANY_REQUESTS => ScrapeError::RateLimited,
        s if s.is_server_error() => ScrapeError::Transient {
            reason: format!("backend returned {s}"),
        },
        s => ScrapeError::Transient {
            reason: format!("unexpected status {s}"),
        },
    })
}

fn normalize_profile(
    user: RawUser,
    medias: Vec<RawMedia>,
    highlights: Vec<RawHighlight>,
) -> ScrapedProfile {
    let posts = medias
        .into_iter()
        .map(|media| {
            let media_type = media.normalized_media_type();
            ScrapedPost {
                platform_id: media.pk,
                caption: media.caption_text,
                media_type: media_type.to_owned(),
                like_count: media.like_count.unwrap_or(0),
                comment_count: media.comment_count.unwrap_or(0),
                play_count: media.play_count.filter(|_| media_type == "reel" || media_type == "video"),
                thumbnail_cdn_url: media.thumbnail_url,
                taken_at: media
                    .taken_at
                    .and_then(|secs| DateTime::from_timestamp(secs, 0)),
            }
        })
        .collect();

    let highlights = highlights
        .into_iter()
        .map(|h| ScrapedHighlight {
            platform_id: h.pk,
            title: h.title,
            media_count: h.media_count,
        })
        .collect();

    ScrapedProfile {
        platform_id: user.pk,
        username: user.username,
        full_name: user.full_name,
        biography: user.biography,
        external_url: user.external_url,
        followers: user.follower_count.unwrap_or(0),
        following: user.following_count.unwrap_or(0),
        media_count: user.media_count.unwrap_or(0),
        is_verified: user.is_verified,
        is_business: user.is_business,
        avatar_cdn_url: user.profile_pic_url,
        posts,
        highlights,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_type_normalization() {
        let clip = RawMedia {
            pk: "1".to_string(),
            caption_text: None,
            media_type: Some(2),
            product_type: Some("clips".to_string()),
            like_count: None,
            comment_count: None,
            play_count: None,
            thumbnail_url: None,
            taken_at: None,
            user: None,
        };
        assert_eq!(clip.normalized_media_type(), "reel");

        let carousel = RawMedia {
            media_type: Some(8),
            product_type: None,
            ..clip
        };
        assert_eq!(carousel.normalized_media_type(), "carousel");
    }

    #[test]
    fn status_mapping_covers_the_taxonomy() {
        assert!(matches!(
            map_error_status(StatusCode::NOT_FOUND, "u"),
            Some(ScrapeError::UserNotFound { .. })
        ));
        assert!(matches!(
            map_error_status(StatusCode::PAYMENT_REQUIRED, "u"),
            Some(ScrapeError::InsufficientBalance)
        ));
        assert!(matches!(
            map_error_status(StatusCode::TOO_MANY_REQUESTS, "u"),
            Some(ScrapeError::RateLimited)
        ));
        assert!(matches!(
            map_error_status(StatusCode::BAD_GATEWAY, "u"),
            Some(ScrapeError::Transient { .. })
        ));
        assert!(map_error_status(StatusCode::OK, "u").is_none());
    }
}
