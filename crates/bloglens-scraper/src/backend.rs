//! The adapter seam between handlers and the concrete scraping backends.

use bloglens_core::{AppConfig, ScraperBackendKind};

use crate::error::ScrapeError;
use crate::hikerapi::HikerApiClient;
use crate::instagrapi::InstagrapiClient;
use crate::types::{AccountStats, CandidateUser, ScrapedProfile};

/// Per-request timeout for backend calls, in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Candidates with fewer posts than this are not worth scraping.
const MIN_CANDIDATE_MEDIA: i32 = 5;

/// One of the interchangeable scraping backends.
///
/// Handlers only see this enum; which backend serves a deployment is a
/// config decision (`SCRAPER_BACKEND`).
pub enum Scraper {
    Hikerapi(HikerApiClient),
    Instagrapi(InstagrapiClient),
}

/// Build the configured scraping backend.
///
/// # Errors
///
/// Returns [`ScrapeError::Http`] if the HTTP client cannot be constructed.
/// Missing backend credentials are rejected earlier, at config load.
pub fn build_scraper(config: &AppConfig) -> Result<Scraper, ScrapeError> {
    match config.scraper_backend {
        ScraperBackendKind::Hikerapi => {
            let token = config.hikerapi_token.as_deref().unwrap_or_default();
            Ok(Scraper::Hikerapi(HikerApiClient::new(
                token,
                REQUEST_TIMEOUT_SECS,
            )?))
        }
        ScraperBackendKind::Instagrapi => {
            let url = config.instagrapi_url.as_deref().unwrap_or_default();
            Ok(Scraper::Instagrapi(InstagrapiClient::new(
                url,
                config.instagrapi_token.as_deref(),
                REQUEST_TIMEOUT_SECS,
            )?))
        }
    }
}

impl Scraper {
    /// Fetch and normalise one profile.
    ///
    /// # Errors
    ///
    /// Returns the typed [`ScrapeError`] taxonomy.
    pub async fn scrape_profile(&self, username: &str) -> Result<ScrapedProfile, ScrapeError> {
        match self {
            Scraper::Hikerapi(client) => client.scrape_profile(username).await,
            Scraper::Instagrapi(client) => client.scrape_profile(username).await,
        }
    }

    /// Fetch candidate users for a hashtag, dropping private accounts,
    /// audiences below `min_followers`, and near-empty profiles.
    ///
    /// # Errors
    ///
    /// Returns the typed [`ScrapeError`] taxonomy.
    pub async fn discover(
        &self,
        hashtag: &str,
        min_followers: i64,
    ) -> Result<Vec<CandidateUser>, ScrapeError> {
        let candidates = match self {
            Scraper::Hikerapi(client) => client.discover(hashtag).await?,
            Scraper::Instagrapi(client) => client.discover(hashtag).await?,
        };

        Ok(candidates
            .into_iter()
            .filter(|c| {
                !c.is_private
                    && c.followers >= min_followers
                    && c.media_count >= MIN_CANDIDATE_MEDIA
            })
            .collect())
    }

    /// Account availability for the health endpoint. Never fails; an
    /// unreachable backend reports zeros.
    pub async fn account_stats(&self) -> AccountStats {
        match self {
            Scraper::Hikerapi(client) => client.account_stats().await,
            Scraper::Instagrapi(client) => client.account_stats().await,
        }
    }
}
