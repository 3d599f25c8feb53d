//! Per-profile batch request building: the normalised profile text, the
//! data-quality hint, the taxonomy listing, and the final JSONL line.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::OnceLock;

use regex::Regex;

use crate::insights::insights_json_schema;

/// Model used for blogger analysis requests.
pub const ANALYSIS_MODEL: &str = "gpt-4o-mini";

/// Avatar plus up to three recent post thumbnails.
pub const MAX_IMAGES: usize = 4;

/// How many top hashtags/mentions the caption summary keeps.
const SUMMARY_TOP_N: usize = 10;

/// Captions shorter than this count as trivial for the data-quality hint.
const TRIVIAL_CAPTION_LEN: usize = 10;

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// A post as the request builder sees it.
#[derive(Debug, Clone, Default)]
pub struct PostSummary {
    pub caption: Option<String>,
    pub media_type: String,
    pub like_count: i32,
    pub comment_count: i32,
    pub play_count: Option<i64>,
    pub thumbnail_url: Option<String>,
}

/// Everything known about a blog at request-building time.
#[derive(Debug, Clone, Default)]
pub struct ProfileContext {
    pub blog_id: i64,
    pub username: String,
    pub full_name: Option<String>,
    pub biography: Option<String>,
    pub followers: i64,
    pub following: i64,
    pub media_count: i32,
    pub is_verified: bool,
    pub is_business: bool,
    pub er: Option<f64>,
    pub er_reels: Option<f64>,
    pub er_trend: Option<String>,
    pub posts_per_week: Option<f64>,
    pub avg_reels_views: Option<f64>,
    pub avatar_url: Option<String>,
    pub posts: Vec<PostSummary>,
    pub highlight_count: i64,
}

#[derive(Debug, Clone)]
pub struct CatalogCategory {
    pub code: String,
    pub name: String,
    pub children: Vec<String>,
}

/// The complete category/tag vocabulary shipped with every request so the
/// model picks from known codes and names.
#[derive(Debug, Clone, Default)]
pub struct TaxonomyCatalog {
    pub categories: Vec<CatalogCategory>,
    /// `(group, name)` pairs.
    pub tags: Vec<(String, String)>,
}

impl TaxonomyCatalog {
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::from("Категории (code — название: подкатегории):\n");
        for category in &self.categories {
            let _ = write!(out, "- {} — {}", category.code, category.name);
            if !category.children.is_empty() {
                let _ = write!(out, ": {}", category.children.join(", "));
            }
            out.push('\n');
        }

        out.push_str("\nТеги по группам:\n");
        let mut grouped: HashMap<&str, Vec<&str>> = HashMap::new();
        for (group, name) in &self.tags {
            grouped.entry(group).or_default().push(name);
        }
        let mut groups: Vec<_> = grouped.into_iter().collect();
        groups.sort_by_key(|(group, _)| *group);
        for (group, names) in groups {
            let _ = writeln!(out, "- {group}: {}", names.join(", "));
        }

        out
    }
}

// ---------------------------------------------------------------------------
// Profile text
// ---------------------------------------------------------------------------

fn hashtag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"#([\w\p{L}]+)").expect("hashtag regex is valid"))
}

fn mention_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"@([\w.]+)").expect("mention regex is valid"))
}

/// Count marker occurrences over all captions and keep the top N.
fn top_markers(posts: &[PostSummary], regex: &Regex) -> Vec<(String, usize)> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for post in posts {
        let Some(caption) = &post.caption else { continue };
        for capture in regex.captures_iter(caption) {
            let marker = capture[1].to_lowercase();
            *counts.entry(marker).or_default() += 1;
        }
    }

    let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.truncate(SUMMARY_TOP_N);
    ranked
}

fn format_marker_summary(prefix: char, ranked: &[(String, usize)]) -> String {
    ranked
        .iter()
        .map(|(marker, count)| format!("{prefix}{marker}×{count}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Render the normalised profile text: bio, audience stats, derived
/// metrics, per-post engagement lines, and hashtag/mention summaries.
#[must_use]
pub fn render_profile_text(ctx: &ProfileContext) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "Профиль @{}", ctx.username);
    if let Some(full_name) = ctx.full_name.as_deref().filter(|s| !s.is_empty()) {
        let _ = writeln!(out, "Имя: {full_name}");
    }
    if let Some(bio) = ctx.biography.as_deref().filter(|s| !s.is_empty()) {
        let _ = writeln!(out, "Био: {bio}");
    }
    let _ = writeln!(
        out,
        "Подписчики: {} | Подписки: {} | Постов всего: {}",
        ctx.followers, ctx.following, ctx.media_count
    );
    if ctx.is_verified {
        out.push_str("Аккаунт верифицирован\n");
    }
    if ctx.is_business {
        out.push_str("Бизнес-аккаунт\n");
    }

    let mut metrics = Vec::new();
    if let Some(er) = ctx.er {
        metrics.push(format!("ER (медиана): {:.2}%", er * 100.0));
    }
    if let Some(er_reels) = ctx.er_reels {
        metrics.push(format!("ER рилсов: {:.2}%", er_reels * 100.0));
    }
    if let Some(trend) = ctx.er_trend.as_deref() {
        metrics.push(format!("Тренд вовлечённости: {trend}"));
    }
    if let Some(cadence) = ctx.posts_per_week {
        metrics.push(format!("Постов в неделю: {cadence:.1}"));
    }
    if let Some(views) = ctx.avg_reels_views {
        metrics.push(format!("Средние просмотры рилсов: {views:.0}"));
    }
    if !metrics.is_empty() {
        let _ = writeln!(out, "Метрики: {}", metrics.join(" | "));
    }

    if !ctx.posts.is_empty() {
        out.push_str("\nПоследние посты:\n");
        for (i, post) in ctx.posts.iter().enumerate() {
            let _ = write!(
                out,
                "{}. [{}] лайки {} комментарии {}",
                i + 1,
                post.media_type,
                post.like_count,
                post.comment_count
            );
            if let Some(plays) = post.play_count {
                let _ = write!(out, " просмотры {plays}");
            }
            if let Some(caption) = post.caption.as_deref().filter(|s| !s.is_empty()) {
                let trimmed: String = caption.chars().take(200).collect();
                let _ = write!(out, " — {trimmed}");
            }
            out.push('\n');
        }
    }

    let hashtags = top_markers(&ctx.posts, hashtag_regex());
    if !hashtags.is_empty() {
        let _ = writeln!(out, "\nХэштеги: {}", format_marker_summary('#', &hashtags));
    }
    let mentions = top_markers(&ctx.posts, mention_regex());
    if !mentions.is_empty() {
        let _ = writeln!(out, "Упоминания: {}", format_marker_summary('@', &mentions));
    }

    out
}

/// A compact signal of how much material the model actually has, so low
/// confidence on thin profiles is grounded rather than guessed.
#[must_use]
pub fn data_quality_hint(ctx: &ProfileContext) -> String {
    let posts_with_text = ctx
        .posts
        .iter()
        .filter(|p| {
            p.caption
                .as_deref()
                .is_some_and(|c| c.chars().count() >= TRIVIAL_CAPTION_LEN)
        })
        .count();
    let posts_with_comments = ctx.posts.iter().filter(|p| p.comment_count > 0).count();
    let has_bio = ctx.biography.as_deref().is_some_and(|b| !b.trim().is_empty());

    format!(
        "Данные: постов {}, с содержательным текстом {}, с комментариями {}, \
         био {}, хайлайтов {}",
        ctx.posts.len(),
        posts_with_text,
        posts_with_comments,
        if has_bio { "есть" } else { "нет" },
        ctx.highlight_count
    )
}

// ---------------------------------------------------------------------------
// The batch line
// ---------------------------------------------------------------------------

const SYSTEM_PROMPT: &str = "Ты — аналитик инстаграм-блогеров. По профилю, постам и \
изображениям составь структурированный портрет блогера для рекламного каталога. \
Выбирай primary_categories только из кодов каталога, secondary_topics — из названий \
подкатегорий, tags — из словаря тегов. confidence и brand_safety_score — целые числа \
от 1 до 5. Не выдумывай данные: если сигнала нет, оставляй поле пустым и снижай \
confidence.";

const TEXT_ONLY_NOTE: &str = "Изображения недоступны; анализируй только текст.";

/// Build one JSONL batch line for a blog.
///
/// `custom_id` is the blog id so output lines key straight back to the
/// domain. With `text_only` the image parts are omitted and the system
/// instructions say so.
#[must_use]
pub fn build_batch_request(
    ctx: &ProfileContext,
    catalog: &TaxonomyCatalog,
    text_only: bool,
) -> serde_json::Value {
    let mut text = render_profile_text(ctx);
    text.push('\n');
    text.push_str(&data_quality_hint(ctx));
    text.push_str("\n\n");
    text.push_str(&catalog.render());

    let system_prompt = if text_only {
        format!("{SYSTEM_PROMPT} {TEXT_ONLY_NOTE}")
    } else {
        SYSTEM_PROMPT.to_string()
    };

    let user_content = if text_only {
        serde_json::json!(text)
    } else {
        let mut parts = vec![serde_json::json!({ "type": "text", "text": text })];
        let images = ctx
            .avatar_url
            .iter()
            .chain(ctx.posts.iter().filter_map(|p| p.thumbnail_url.as_ref()))
            .take(MAX_IMAGES);
        for url in images {
            parts.push(serde_json::json!({
                "type": "image_url",
                "image_url": { "url": url }
            }));
        }
        serde_json::json!(parts)
    };

    serde_json::json!({
        "custom_id": ctx.blog_id.to_string(),
        "method": "POST",
        "url": "/v1/chat/completions",
        "body": {
            "model": ANALYSIS_MODEL,
            "messages": [
                { "role": "system", "content": system_prompt },
                { "role": "user", "content": user_content }
            ],
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": "blogger_insights",
                    "strict": true,
                    "schema": insights_json_schema()
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_ctx() -> ProfileContext {
        ProfileContext {
            blog_id: 42,
            username: "blogger1".to_string(),
            full_name: Some("Blogger One".to_string()),
            biography: Some("путешествия и еда".to_string()),
            followers: 152_000,
            following: 810,
            media_count: 431,
            is_verified: false,
            is_business: true,
            er: Some(0.031),
            er_reels: Some(0.05),
            er_trend: Some("growing".to_string()),
            posts_per_week: Some(3.5),
            avg_reels_views: Some(88_000.0),
            avatar_url: Some("https://storage.example.com/42/avatar.jpg".to_string()),
            posts: vec![
                PostSummary {
                    caption: Some("sunset in lisbon #travel #portugal @friend".to_string()),
                    media_type: "reel".to_string(),
                    like_count: 4_200,
                    comment_count: 120,
                    play_count: Some(88_000),
                    thumbnail_url: Some("https://storage.example.com/42/post_m1.jpg".to_string()),
                },
                PostSummary {
                    caption: Some("#travel again".to_string()),
                    media_type: "photo".to_string(),
                    like_count: 3_100,
                    comment_count: 0,
                    play_count: None,
                    thumbnail_url: Some("https://storage.example.com/42/post_m2.jpg".to_string()),
                },
            ],
            highlight_count: 3,
        }
    }

    fn sample_catalog() -> TaxonomyCatalog {
        TaxonomyCatalog {
            categories: vec![CatalogCategory {
                code: "travel".to_string(),
                name: "Путешествия".to_string(),
                children: vec!["Budget Travel".to_string()],
            }],
            tags: vec![("content".to_string(), "vlogs".to_string())],
        }
    }

    #[test]
    fn profile_text_contains_stats_and_marker_summaries() {
        let text = render_profile_text(&sample_ctx());

        assert!(text.contains("@blogger1"));
        assert!(text.contains("Подписчики: 152000"));
        assert!(text.contains("#travel×2"), "hashtags counted across posts: {text}");
        assert!(text.contains("@friend×1"));
        assert!(text.contains("ER (медиана): 3.10%"));
    }

    #[test]
    fn data_quality_hint_counts_signal() {
        let hint = data_quality_hint(&sample_ctx());

        assert!(hint.contains("постов 2"));
        assert!(hint.contains("с содержательным текстом 2"));
        assert!(hint.contains("с комментариями 1"));
        assert!(hint.contains("био есть"));
        assert!(hint.contains("хайлайтов 3"));
    }

    #[test]
    fn batch_line_keys_on_blog_id_and_caps_images() {
        let line = build_batch_request(&sample_ctx(), &sample_catalog(), false);

        assert_eq!(line["custom_id"], "42");
        assert_eq!(line["url"], "/v1/chat/completions");
        assert_eq!(line["body"]["model"], ANALYSIS_MODEL);

        let content = line["body"]["messages"][1]["content"]
            .as_array()
            .expect("multipart content");
        // 1 text part + avatar + 2 thumbnails ≤ MAX_IMAGES + 1.
        assert_eq!(content.len(), 4);
        assert_eq!(content[0]["type"], "text");
        assert!(content[0]["text"].as_str().unwrap().contains("Категории"));
        assert_eq!(content[1]["type"], "image_url");
    }

    #[test]
    fn text_only_request_has_no_images_and_a_note() {
        let line = build_batch_request(&sample_ctx(), &sample_catalog(), true);

        let content = &line["body"]["messages"][1]["content"];
        assert!(content.is_string(), "text-only content is a single string");
        assert!(line["body"]["messages"][0]["content"]
            .as_str()
            .unwrap()
            .contains("Изображения недоступны"));
    }

    #[test]
    fn response_format_is_strict_json_schema() {
        let line = build_batch_request(&sample_ctx(), &sample_catalog(), false);
        let format = &line["body"]["response_format"];

        assert_eq!(format["type"], "json_schema");
        assert_eq!(format["json_schema"]["strict"], true);
        assert_eq!(
            format["json_schema"]["schema"]["additionalProperties"],
            serde_json::json!(false)
        );
    }

    #[test]
    fn catalog_render_lists_codes_children_and_groups() {
        let rendered = sample_catalog().render();

        assert!(rendered.contains("travel — Путешествия: Budget Travel"));
        assert!(rendered.contains("content: vlogs"));
    }
}
