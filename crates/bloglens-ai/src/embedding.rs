//! Rendering insights to a canonical text and obtaining the semantic
//! embedding vector.
//!
//! Embedding is a best-effort side effect: [`EmbeddingClient::embed_or_none`]
//! logs failures and returns `None` so reconciliation never blocks on the
//! embedding provider. The backfill job is the recovery path.

use std::fmt::Write as _;
use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;

use crate::error::AiError;
use crate::insights::{AiInsights, EngagementQuality, PageType};

pub const EMBEDDING_MODEL: &str = "text-embedding-3-small";
pub const EMBEDDING_DIM: usize = 1536;

/// Fallback when the insights produce no renderable content.
const EMPTY_FALLBACK: &str = "блогер";

const DEFAULT_BASE_URL: &str = "https://api.openai.com";

// ---------------------------------------------------------------------------
// Canonical text
// ---------------------------------------------------------------------------

fn engagement_quality_label(quality: EngagementQuality) -> &'static str {
    match quality {
        EngagementQuality::Organic => "органическая",
        EngagementQuality::Mixed => "смешанная",
        EngagementQuality::Suspicious => "подозрительная",
    }
}

fn page_type_label(page_type: PageType) -> &'static str {
    match page_type {
        PageType::Blog => "blog",
        PageType::Public => "public",
        PageType::Business => "business",
    }
}

fn push_section(out: &mut String, text: &str) {
    if text.is_empty() {
        return;
    }
    if !out.is_empty() {
        out.push('\n');
    }
    out.push_str(text);
}

fn push_list(out: &mut String, label: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    push_section(out, &format!("{label}: {}", items.join(", ")));
}

/// Render insights to the canonical embedding text.
///
/// Sections in fixed order, empty ones omitted: summary; categories;
/// profile facts; tags; audience; industries; exclusions; brand
/// categories; a trailing characteristics line. Returns a one-word
/// fallback when nothing rendered.
#[must_use]
pub fn render_insights_text(insights: &AiInsights) -> String {
    let mut out = String::new();

    push_section(&mut out, insights.short_summary.trim());

    let mut categories = insights.content.primary_categories.clone();
    categories.extend(insights.content.secondary_topics.iter().cloned());
    push_list(&mut out, "Категории", &categories);

    let profile = &insights.blogger_profile;
    let mut facts: Vec<String> = Vec::new();
    if let Some(profession) = profile.profession.as_deref().filter(|s| !s.is_empty()) {
        facts.push(profession.to_string());
    }
    if let Some(city) = profile.city.as_deref().filter(|s| !s.is_empty()) {
        facts.push(city.to_string());
    }
    if let Some(country) = profile.country.as_deref().filter(|s| !s.is_empty()) {
        facts.push(country.to_string());
    }
    if !profile.speaks_languages.is_empty() {
        facts.push(format!("языки: {}", profile.speaks_languages.join(", ")));
    }
    facts.push(format!("тип страницы: {}", page_type_label(profile.page_type)));
    push_section(&mut out, &facts.join("; "));

    push_list(&mut out, "Теги", &insights.tags);
    push_list(
        &mut out,
        "Интересы аудитории",
        &insights.audience_inference.audience_interests,
    );
    push_list(
        &mut out,
        "Подходит для",
        &insights.marketing_value.best_fit_industries,
    );
    push_list(
        &mut out,
        "Не подходит для",
        &insights.marketing_value.not_suitable_for,
    );
    push_list(
        &mut out,
        "Бренд-категории",
        &insights.commercial.detected_brand_categories,
    );

    let mut characteristics = format!(
        "Характеристики: аудитория {}, brand safety {}/5",
        engagement_quality_label(insights.audience_inference.engagement_quality),
        insights.marketing_value.brand_safety_score
    );
    if let Some(level) = insights.lifestyle.lifestyle_level.as_deref().filter(|s| !s.is_empty()) {
        let _ = write!(characteristics, ", уровень жизни {level}");
    }
    if let Some(quality) = insights.content.content_quality.as_deref().filter(|s| !s.is_empty()) {
        let _ = write!(characteristics, ", качество контента {quality}");
    }
    if let Some(risk) = insights
        .marketing_value
        .collaboration_risk
        .as_deref()
        .filter(|s| !s.is_empty())
    {
        let _ = write!(characteristics, ", риск сотрудничества {risk}");
    }
    push_section(&mut out, &characteristics);

    if out.trim().is_empty() {
        return EMPTY_FALLBACK.to_string();
    }

    out
}

// ---------------------------------------------------------------------------
// Provider client
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

pub struct EmbeddingClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl EmbeddingClient {
    /// Creates a new client pointed at the production API.
    ///
    /// # Errors
    ///
    /// Returns [`AiError::Http`] if the underlying `reqwest::Client` cannot
    /// be constructed.
    pub fn new(api_key: &str) -> Result<Self, AiError> {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    /// Creates a new client with a custom base URL (for testing with wiremock).
    ///
    /// # Errors
    ///
    /// Returns [`AiError::Http`] if the underlying `reqwest::Client` cannot
    /// be constructed.
    pub fn with_base_url(api_key: &str, base_url: &str) -> Result<Self, AiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            api_key: api_key.to_owned(),
            base_url: base_url.trim_end_matches('/').to_owned(),
        })
    }

    /// Obtain the embedding vector for a text.
    ///
    /// # Errors
    ///
    /// Returns [`AiError::Api`] on non-2xx, [`AiError::EmbeddingShape`] when
    /// the provider returns a vector of the wrong length, and
    /// [`AiError::Http`]/[`AiError::Deserialize`] on transport/shape
    /// failures.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, AiError> {
        let response = self
            .client
            .post(format!("{}/v1/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "model": EMBEDDING_MODEL,
                "input": text,
            }))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(AiError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let parsed: EmbeddingResponse =
            serde_json::from_str(&body).map_err(|e| AiError::Deserialize {
                context: "embeddings".to_string(),
                source: e,
            })?;

        let vector = parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .unwrap_or_default();
        if vector.len() != EMBEDDING_DIM {
            return Err(AiError::EmbeddingShape {
                got: vector.len(),
                expected: EMBEDDING_DIM,
            });
        }

        Ok(vector)
    }

    /// Best-effort wrapper: failures are logged and collapsed to `None`.
    pub async fn embed_or_none(&self, blog_id: i64, text: &str) -> Option<Vec<f32>> {
        match self.embed(text).await {
            Ok(vector) => Some(vector),
            Err(e) => {
                tracing::warn!(blog_id, error = %e, "embedding generation failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::insights::AiInsights;

    fn sample() -> AiInsights {
        serde_json::from_value(crate::insights::insights_test::sample_insights_json())
            .expect("sample parses")
    }

    #[test]
    fn render_orders_sections_and_maps_engagement_quality() {
        let text = render_insights_text(&sample());

        let summary_pos = text.find("Ведёт блог").expect("summary present");
        let categories_pos = text.find("Категории:").expect("categories present");
        let characteristics_pos = text.find("Характеристики:").expect("characteristics present");

        assert!(summary_pos < categories_pos);
        assert!(categories_pos < characteristics_pos);
        assert!(text.contains("аудитория органическая"));
        assert!(text.contains("brand safety 5/5"), "integer formatting: {text}");
        assert!(text.contains("риск сотрудничества low"));
    }

    #[test]
    fn render_skips_empty_sections() {
        let mut insights = sample();
        insights.tags.clear();
        insights.marketing_value.not_suitable_for.clear();

        let text = render_insights_text(&insights);
        assert!(!text.contains("Теги:"));
        assert!(!text.contains("Не подходит для:"));
    }

    #[test]
    fn render_of_stripped_insights_still_carries_characteristics() {
        let mut insights = sample();
        insights.short_summary = String::new();
        insights.content.primary_categories.clear();
        insights.content.secondary_topics.clear();
        insights.tags.clear();
        insights.audience_inference.audience_interests.clear();
        insights.marketing_value.best_fit_industries.clear();
        insights.marketing_value.not_suitable_for.clear();
        insights.commercial.detected_brand_categories.clear();

        let text = render_insights_text(&insights);
        assert!(!text.contains("Категории:"));
        assert!(text.contains("Характеристики:"));
    }
}
