//! Derived engagement metrics computed from scraped posts.
//!
//! All functions are pure; the full_scrape handler calls [`derive_metrics`]
//! once per successful scrape and persists the result on the blog row.

use chrono::Utc;

use crate::types::ScrapedPost;

pub const TREND_GROWING: &str = "growing";
pub const TREND_STABLE: &str = "stable";
pub const TREND_DECLINING: &str = "declining";

/// Relative change between recent and older engagement above which the
/// trend counts as growing (and below the negative of which, declining).
const TREND_THRESHOLD: f64 = 0.15;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DerivedMetrics {
    pub er: Option<f64>,
    pub er_reels: Option<f64>,
    pub er_trend: Option<&'static str>,
    pub posts_per_week: Option<f64>,
    pub avg_reels_views: Option<f64>,
}

/// Compute every derived metric for a scraped profile.
#[must_use]
pub fn derive_metrics(posts: &[ScrapedPost], followers: i64) -> DerivedMetrics {
    let reels: Vec<&ScrapedPost> = posts.iter().filter(|p| p.is_reel()).collect();

    DerivedMetrics {
        er: median_engagement_rate(posts.iter(), followers),
        er_reels: median_engagement_rate(reels.iter().copied(), followers),
        er_trend: engagement_trend(posts, followers),
        posts_per_week: posts_per_week(posts),
        avg_reels_views: average_reel_views(posts),
    }
}

/// Median of `(likes + comments) / followers` over the given posts.
///
/// Returns `None` when there are no posts or the follower count is
/// non-positive.
pub fn median_engagement_rate<'a, I>(posts: I, followers: i64) -> Option<f64>
where
    I: Iterator<Item = &'a ScrapedPost>,
{
    if followers <= 0 {
        return None;
    }

    #[allow(clippy::cast_precision_loss)]
    let mut rates: Vec<f64> = posts
        .map(|p| f64::from(p.like_count + p.comment_count) / followers as f64)
        .collect();
    if rates.is_empty() {
        return None;
    }

    rates.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = rates.len() / 2;
    let median = if rates.len() % 2 == 0 {
        (rates[mid - 1] + rates[mid]) / 2.0
    } else {
        rates[mid]
    };

    Some(median)
}

/// Engagement direction: recent-half median ER vs older-half median ER.
///
/// Posts are ordered newest-first by the backends. A relative change above
/// ±15% flips the trend away from stable. Fewer than four posts is not
/// enough signal and yields `None`.
#[must_use]
pub fn engagement_trend(posts: &[ScrapedPost], followers: i64) -> Option<&'static str> {
    if posts.len() < 4 || followers <= 0 {
        return None;
    }

    let mid = posts.len() / 2;
    let recent = median_engagement_rate(posts[..mid].iter(), followers)?;
    let older = median_engagement_rate(posts[mid..].iter(), followers)?;

    if older <= f64::EPSILON {
        return Some(if recent > f64::EPSILON {
            TREND_GROWING
        } else {
            TREND_STABLE
        });
    }

    let change = (recent - older) / older;
    if change > TREND_THRESHOLD {
        Some(TREND_GROWING)
    } else if change < -TREND_THRESHOLD {
        Some(TREND_DECLINING)
    } else {
        Some(TREND_STABLE)
    }
}

/// Posting cadence over the window covered by the scraped posts.
///
/// Uses the span from the oldest post to now; a single post or missing
/// timestamps yield `None`.
#[must_use]
pub fn posts_per_week(posts: &[ScrapedPost]) -> Option<f64> {
    let oldest = posts.iter().filter_map(|p| p.taken_at).min()?;
    let span_days = (Utc::now() - oldest).num_days();
    if span_days <= 0 || posts.len() < 2 {
        return None;
    }

    #[allow(clippy::cast_precision_loss)]
    Some(posts.len() as f64 * 7.0 / span_days as f64)
}

/// Mean `play_count` over reels, or `None` when the profile has none.
#[must_use]
pub fn average_reel_views(posts: &[ScrapedPost]) -> Option<f64> {
    let views: Vec<i64> = posts
        .iter()
        .filter(|p| p.is_reel())
        .filter_map(|p| p.play_count)
        .collect();
    if views.is_empty() {
        return None;
    }

    #[allow(clippy::cast_precision_loss)]
    Some(views.iter().sum::<i64>() as f64 / views.len() as f64)
}
