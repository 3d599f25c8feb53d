//! The structured analysis contract and batch-output parsing.
//!
//! Every level of [`AiInsights`] rejects unknown fields; silent contract
//! drift would corrupt the taxonomy matchers downstream. Batch output
//! lines parse into the three-way [`BatchOutcome`] so the reconciler can
//! never conflate a content-policy refusal with a transport error.

use serde::{Deserialize, Serialize};

use crate::error::AiError;

// ---------------------------------------------------------------------------
// Schema types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageType {
    Blog,
    Public,
    Business,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngagementQuality {
    Organic,
    Mixed,
    Suspicious,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BloggerProfile {
    pub profession: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
    pub page_type: PageType,
    #[serde(default)]
    pub speaks_languages: Vec<String>,
    pub has_manager: Option<bool>,
    pub manager_contact: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContentInsights {
    /// Top-level category codes, ordered; the first resolvable entry becomes
    /// the primary categorisation. At most three.
    #[serde(default)]
    pub primary_categories: Vec<String>,
    /// Subcategory names.
    #[serde(default)]
    pub secondary_topics: Vec<String>,
    pub content_language: Option<String>,
    pub content_tone: Option<String>,
    pub content_quality: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Lifestyle {
    pub lifestyle_level: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AudienceInference {
    pub engagement_quality: EngagementQuality,
    #[serde(default)]
    pub audience_interests: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MarketingValue {
    /// Ordinal 1..5.
    pub brand_safety_score: u8,
    #[serde(default)]
    pub best_fit_industries: Vec<String>,
    #[serde(default)]
    pub not_suitable_for: Vec<String>,
    pub collaboration_risk: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Commercial {
    #[serde(default)]
    pub ambassador_brands: Vec<String>,
    #[serde(default)]
    pub detected_brand_categories: Vec<String>,
    pub ad_frequency: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AiInsights {
    pub short_label: String,
    pub short_summary: String,
    /// Free-form tag strings chosen from the vocabulary; may include
    /// unknowns, which the matcher reports as vocabulary gaps.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Ordinal 1..5, rendered as an integer everywhere.
    pub confidence: u8,
    pub notes: Option<String>,
    pub blogger_profile: BloggerProfile,
    pub content: ContentInsights,
    pub life_situation: Option<String>,
    pub lifestyle: Lifestyle,
    pub audience_inference: AudienceInference,
    pub marketing_value: MarketingValue,
    pub commercial: Commercial,
}

impl AiInsights {
    /// Range checks that the schema alone cannot express.
    ///
    /// # Errors
    ///
    /// Returns a human-readable reason when a value is out of contract.
    pub fn validate(&self) -> Result<(), String> {
        if !(1..=5).contains(&self.confidence) {
            return Err(format!("confidence {} outside 1..5", self.confidence));
        }
        if !(1..=5).contains(&self.marketing_value.brand_safety_score) {
            return Err(format!(
                "brand_safety_score {} outside 1..5",
                self.marketing_value.brand_safety_score
            ));
        }
        if self.content.primary_categories.len() > 3 {
            return Err(format!(
                "{} primary categories, at most 3 allowed",
                self.content.primary_categories.len()
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Provider-side JSON schema
// ---------------------------------------------------------------------------

/// The JSON schema sent as the structured-output `response_format`.
///
/// Mirrors [`AiInsights`]; `additionalProperties: false` everywhere is the
/// wire-side twin of `deny_unknown_fields`.
#[must_use]
pub fn insights_json_schema() -> serde_json::Value {
    fn nullable_string() -> serde_json::Value {
        serde_json::json!({ "type": ["string", "null"] })
    }
    fn string_array() -> serde_json::Value {
        serde_json::json!({ "type": "array", "items": { "type": "string" } })
    }

    serde_json::json!({
        "type": "object",
        "additionalProperties": false,
        "required": [
            "short_label", "short_summary", "tags", "confidence", "notes",
            "blogger_profile", "content", "life_situation", "lifestyle",
            "audience_inference", "marketing_value", "commercial"
        ],
        "properties": {
            "short_label": { "type": "string" },
            "short_summary": { "type": "string" },
            "tags": string_array(),
            "confidence": { "type": "integer", "minimum": 1, "maximum": 5 },
            "notes": nullable_string(),
            "blogger_profile": {
                "type": "object",
                "additionalProperties": false,
                "required": [
                    "profession", "city", "country", "page_type",
                    "speaks_languages", "has_manager", "manager_contact"
                ],
                "properties": {
                    "profession": nullable_string(),
                    "city": nullable_string(),
                    "country": nullable_string(),
                    "page_type": { "type": "string", "enum": ["blog", "public", "business"] },
                    "speaks_languages": string_array(),
                    "has_manager": { "type": ["boolean", "null"] },
                    "manager_contact": nullable_string()
                }
            },
            "content": {
                "type": "object",
                "additionalProperties": false,
                "required": [
                    "primary_categories", "secondary_topics", "content_language",
                    "content_tone", "content_quality"
                ],
                "properties": {
                    "primary_categories": {
                        "type": "array", "items": { "type": "string" }, "maxItems": 3
                    },
                    "secondary_topics": string_array(),
                    "content_language": nullable_string(),
                    "content_tone": nullable_string(),
                    "content_quality": nullable_string()
                }
            },
            "life_situation": nullable_string(),
            "lifestyle": {
                "type": "object",
                "additionalProperties": false,
                "required": ["lifestyle_level"],
                "properties": { "lifestyle_level": nullable_string() }
            },
            "audience_inference": {
                "type": "object",
                "additionalProperties": false,
                "required": ["engagement_quality", "audience_interests"],
                "properties": {
                    "engagement_quality": {
                        "type": "string", "enum": ["organic", "mixed", "suspicious"]
                    },
                    "audience_interests": string_array()
                }
            },
            "marketing_value": {
                "type": "object",
                "additionalProperties": false,
                "required": [
                    "brand_safety_score", "best_fit_industries",
                    "not_suitable_for", "collaboration_risk"
                ],
                "properties": {
                    "brand_safety_score": { "type": "integer", "minimum": 1, "maximum": 5 },
                    "best_fit_industries": string_array(),
                    "not_suitable_for": string_array(),
                    "collaboration_risk": nullable_string()
                }
            },
            "commercial": {
                "type": "object",
                "additionalProperties": false,
                "required": [
                    "ambassador_brands", "detected_brand_categories", "ad_frequency"
                ],
                "properties": {
                    "ambassador_brands": string_array(),
                    "detected_brand_categories": string_array(),
                    "ad_frequency": nullable_string()
                }
            }
        }
    })
}

// ---------------------------------------------------------------------------
// Batch output parsing
// ---------------------------------------------------------------------------

/// The three-way result of one batch output line.
#[derive(Debug)]
pub enum BatchOutcome {
    /// A valid insights object ready for reconciliation.
    Success(Box<AiInsights>),
    /// The provider explicitly refused to analyse this profile.
    Refusal(String),
    /// Transport, status, or schema failure; the blog keeps no insights.
    Invalid,
}

/// One parsed line of the batch output file, keyed by the blog id the
/// request was built for.
#[derive(Debug)]
pub struct BatchOutputLine {
    pub custom_id: String,
    pub outcome: BatchOutcome,
}

#[derive(Debug, Deserialize)]
struct RawOutputLine {
    custom_id: String,
    response: Option<RawResponse>,
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct RawResponse {
    status_code: u16,
    body: Option<RawBody>,
}

#[derive(Debug, Deserialize)]
struct RawBody {
    #[serde(default)]
    choices: Vec<RawChoice>,
}

#[derive(Debug, Deserialize)]
struct RawChoice {
    message: RawMessage,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    content: Option<String>,
    refusal: Option<String>,
}

/// Parse one JSONL output line into its outcome.
///
/// # Errors
///
/// Returns [`AiError::Deserialize`] only when the line is not even a valid
/// output envelope; every in-envelope failure degrades to
/// [`BatchOutcome::Invalid`] so one broken result cannot stall the batch.
pub fn parse_output_line(line: &str) -> Result<BatchOutputLine, AiError> {
    let raw: RawOutputLine =
        serde_json::from_str(line).map_err(|e| AiError::Deserialize {
            context: "batch output line".to_string(),
            source: e,
        })?;

    let custom_id = raw.custom_id;

    if raw.error.is_some() {
        return Ok(BatchOutputLine {
            custom_id,
            outcome: BatchOutcome::Invalid,
        });
    }

    let Some(response) = raw.response else {
        return Ok(BatchOutputLine {
            custom_id,
            outcome: BatchOutcome::Invalid,
        });
    };
    if response.status_code != 200 {
        return Ok(BatchOutputLine {
            custom_id,
            outcome: BatchOutcome::Invalid,
        });
    }

    let message = response
        .body
        .and_then(|b| b.choices.into_iter().next())
        .map(|c| c.message);
    let Some(message) = message else {
        return Ok(BatchOutputLine {
            custom_id,
            outcome: BatchOutcome::Invalid,
        });
    };

    if let Some(reason) = message.refusal {
        return Ok(BatchOutputLine {
            custom_id,
            outcome: BatchOutcome::Refusal(reason),
        });
    }

    let outcome = match message.content.as_deref() {
        Some(content) => match serde_json::from_str::<AiInsights>(content) {
            Ok(insights) => match insights.validate() {
                Ok(()) => BatchOutcome::Success(Box::new(insights)),
                Err(reason) => {
                    tracing::warn!(custom_id = %custom_id, %reason, "insights failed validation");
                    BatchOutcome::Invalid
                }
            },
            Err(e) => {
                tracing::warn!(custom_id = %custom_id, error = %e, "insights failed schema parse");
                BatchOutcome::Invalid
            }
        },
        None => BatchOutcome::Invalid,
    };

    Ok(BatchOutputLine { custom_id, outcome })
}

#[cfg(test)]
#[path = "insights_test.rs"]
pub(crate) mod insights_test;
