//! Scraping adapters for Instagram profile and hashtag data.
//!
//! Two interchangeable backends live behind the [`Scraper`] seam: HikerAPI
//! (hosted) and an Instagrapi bridge (self-hosted). Both normalise raw
//! responses into [`ScrapedProfile`] and map provider failures onto the
//! typed [`ScrapeError`] taxonomy that drives queue transitions.

pub mod backend;
pub mod error;
pub mod hikerapi;
pub mod instagrapi;
pub mod metrics;
pub mod types;

pub use backend::{build_scraper, Scraper};
pub use error::ScrapeError;
pub use hikerapi::HikerApiClient;
pub use instagrapi::InstagrapiClient;
pub use metrics::{
    average_reel_views, derive_metrics, engagement_trend, median_engagement_rate,
    posts_per_week, DerivedMetrics, TREND_DECLINING, TREND_GROWING, TREND_STABLE,
};
pub use types::{AccountStats, CandidateUser, ScrapedHighlight, ScrapedPost, ScrapedProfile};
