//! HTTP client for a self-hosted instagrapi REST bridge.
//!
//! The bridge fronts a pool of logged-in Instagram accounts and mirrors the
//! HikerAPI data shapes, so normalisation here stays thin. Auth is a bearer
//! token; the bridge reports its account pool on `/accounts/stats`, which
//! feeds the service health endpoint.

use std::time::Duration;

use chrono::DateTime;
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use crate::error::ScrapeError;
use crate::types::{AccountStats, CandidateUser, ScrapedHighlight, ScrapedPost, ScrapedProfile};

const MEDIA_AMOUNT: usize = 12;
const HASHTAG_AMOUNT: usize = 50;

pub struct InstagrapiClient {
    client: Client,
    token: Option<String>,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct BridgeUser {
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
struct BridgeMedia {
    pk: String,
    caption_text: Option<String>,
    /// Already normalised by the bridge: photo, video, carousel, reel.
    media_type: Option<String>,
    like_count: Option<i32>,
    comment_count: Option<i32>,
    play_count: Option<i64>,
    thumbnail_url: Option<String>,
    taken_at: Option<i64>,
    user: Option<BridgeUser>,
}

#[derive(Debug, Deserialize)]
struct BridgeHighlight {
    pk: String,
    title: Option<String>,
    media_count: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct BridgeAccountStats {
    total: i64,
    available: i64,
}

impl InstagrapiClient {
    /// Creates a new client for the bridge at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`ScrapeError::Http`] if the underlying `reqwest::Client`
    /// cannot be constructed.
    pub fn new(
        base_url: &str,
        token: Option<&str>,
        timeout_secs: u64,
    ) -> Result<Self, ScrapeError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .user_agent("bloglens/0.1 (blogger-intelligence)")
            .build()?;
        Ok(Self {
            client,
            token: token.map(str::to_owned),
            base_url: base_url.trim_end_matches('/').to_owned(),
        })
    }

    /// Fetches a full profile from the bridge.
    ///
    /// # Errors
    ///
    /// Returns the typed [`ScrapeError`] taxonomy.
    pub async fn scrape_profile(&self, username: &str) -> Result<ScrapedProfile, ScrapeError> {
        let user: BridgeUser = self
            .get_json("/user/info", &[("username", username)], username)
            .await?;

        if user.is_private {
            return Err(ScrapeError::PrivateAccount {
                username: username.to_owned(),
            });
        }

        let medias: Vec<BridgeMedia> = self
            .get_json(
                "/user/medias",
                &[("username", username), ("amount", &MEDIA_AMOUNT.to_string())],
                username,
            )
            .await?;

        let highlights: Vec<BridgeHighlight> = self
            .get_json("/user/highlights", &[("username", username)], username)
            .await?;

        Ok(Self::normalize_profile(user, medias, highlights))
    }

    /// Fetches candidate users from a hashtag's top medias.
    ///
    /// # Errors
    ///
    /// Returns the typed [`ScrapeError`] taxonomy.
    pub async fn discover(&self, hashtag: &str) -> Result<Vec<CandidateUser>, ScrapeError> {
        let medias: Vec<BridgeMedia> = self
            .get_json(
                "/hashtag/top_medias",
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

    /// Reports the bridge's account pool, or zeros when unreachable.
    pub async fn account_stats(&self) -> AccountStats {
        match self
            .get_json::<BridgeAccountStats>("/accounts/stats", &[], "accounts")
            .await
        {
            Ok(stats) => AccountStats {
                total: stats.total,
                available: stats.available,
            },
            Err(e) => {
                tracing::warn!(error = %e, "instagrapi account stats failed");
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
        let mut request = self.client.get(&url).query(query);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;

        let status = response.status();
        if let Some(error) = map_bridge_status(status, context) {
            return Err(error);
        }

        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| ScrapeError::Deserialize {
            context: format!("{path}({context})"),
            source: e,
        })
    }

    fn normalize_profile(
        user: BridgeUser,
        medias: Vec<BridgeMedia>,
        highlights: Vec<BridgeHighlight>,
    ) -> ScrapedProfile {
        let posts = medias
            .into_iter()
            .map(|media| ScrapedPost {
                platform_id: media.pk,
                caption: media.caption_text,
                media_type: media.media_type.unwrap_or_else(|| "photo".to_string()),
                like_count: media.like_count.unwrap_or(0),
                comment_count: media.comment_count.unwrap_or(0),
                play_count: media.play_count,
                thumbnail_cdn_url: media.thumbnail_url,
                taken_at: media
                    .taken_at
                    .and_then(|secs| DateTime::from_timestamp(secs, 0)),
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
}

/// The bridge signals no-available-account as 503 and account bans as 429;
/// both are worth retrying after a delay.
fn map_bridge_status(status: StatusCode, context: &str) -> Option<ScrapeError> {
    if status.is_success() {
        return None;
    }

    Some(match status {
        StatusCode::NOT_FOUND => ScrapeError::UserNotFound {
            username: context.to_owned(),
        },
        StatusCode::TOO_MANY_REQUESTS => ScrapeError::RateLimited,
        s if s.is_server_error() => ScrapeError::Transient {
            reason: format!("bridge returned {s}"),
        },
        s => ScrapeError::Transient {
            reason: format!("unexpected status {s}"),
        },
    })
}
