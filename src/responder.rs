//! Reply generation for analysed reviews.
//!
//! Templates are the default. When AI replies are enabled, the generation
//! sidecar is asked first and anything it fails to deliver falls back to a
//! template, so callers always get a reply.

use crate::config::AiConfig;
use crate::sentiment::Sentiment;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

const POSITIVE_REPLIES: &[&str] = &[
    "Thank you so much for your positive feedback! We are delighted the product meets your expectations. Your satisfaction is our priority.",
    "What a pleasure to read your review! We truly appreciate your trust and hope to keep delighting you.",
    "We are thrilled you are happy with your purchase! Thanks for sharing your experience with us.",
];

const NEGATIVE_REPLIES: &[&str] = &[
    "Thank you for your feedback, and we sincerely apologise for the inconvenience. Our team will look into your case carefully.",
    "Your experience matters to us and we regret that we fell short of your expectations. We are working to do better.",
    "We take your comments very seriously and are committed to finding a quick solution to your problem.",
];

const NEUTRAL_REPLIES: &[&str] = &[
    "Thank you for your constructive feedback. We take every comment into account to keep improving our service.",
    "We appreciate your balanced review, it helps us better understand what our customers need.",
    "Your opinion guides our ongoing improvements. Thanks for taking the time to share your observations.",
];

/// Prefix the training corpus and the sidecar prompt share.
pub const PROMPT_PREFIX: &str = "Customer review:";

fn templates(sentiment: Sentiment) -> &'static [&'static str] {
    match sentiment {
        Sentiment::Positive => POSITIVE_REPLIES,
        Sentiment::Negative => NEGATIVE_REPLIES,
        Sentiment::Neutral => NEUTRAL_REPLIES,
    }
}

/// The fixed reply used as the target side of training pairs.
pub fn canonical_reply(sentiment: Sentiment) -> &'static str {
    templates(sentiment)[0]
}

/// Random template for the given sentiment.
pub fn template_reply(sentiment: Sentiment) -> &'static str {
    templates(sentiment)
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or_else(|| canonical_reply(sentiment))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ReplySource {
    Template,
    Ai,
}

#[derive(Debug, Clone)]
pub struct Reply {
    pub text: String,
    pub source: ReplySource,
}

#[derive(Debug, Serialize)]
struct GenerationRequest<'a> {
    prompt: String,
    sentiment: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerationResponse {
    text: String,
}

pub struct Responder {
    sidecar: Option<Sidecar>,
}

struct Sidecar {
    client: reqwest::Client,
    url: String,
}

impl Responder {
    /// Template-only responder.
    pub fn templates() -> Self {
        Self { sidecar: None }
    }

    pub fn from_config(config: &AiConfig) -> anyhow::Result<Self> {
        if !config.enabled {
            tracing::info!("💬 AI replies disabled, using templates");
            return Ok(Self::templates());
        }
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        tracing::info!("🤖 AI replies enabled via sidecar at {}", config.sidecar_url);
        Ok(Self {
            sidecar: Some(Sidecar {
                client,
                url: config.sidecar_url.clone(),
            }),
        })
    }

    pub fn ai_enabled(&self) -> bool {
        self.sidecar.is_some()
    }

    pub async fn reply(&self, cleaned_text: &str, sentiment: Sentiment) -> Reply {
        if let Some(sidecar) = &self.sidecar {
            match sidecar.generate(cleaned_text, sentiment).await {
                Ok(text) => {
                    return Reply {
                        text,
                        source: ReplySource::Ai,
                    }
                }
                Err(e) => tracing::warn!("⚠️ [AI] Generation failed, using template: {}", e),
            }
        }
        Reply {
            text: template_reply(sentiment).to_string(),
            source: ReplySource::Template,
        }
    }
}

impl Sidecar {
    async fn generate(&self, cleaned_text: &str, sentiment: Sentiment) -> anyhow::Result<String> {
        let response = self
            .client
            .post(&self.url)
            .json(&GenerationRequest {
                prompt: format!("{} {}", PROMPT_PREFIX, cleaned_text),
                sentiment: sentiment.as_str(),
            })
            .send()
            .await?;

        if !response.status().is_success() {
            anyhow::bail!("sidecar returned {}", response.status());
        }

        let text = response.json::<GenerationResponse>().await?.text.trim().to_string();
        let chars = text.chars().count();
        if !(15..300).contains(&chars) {
            anyhow::bail!("generated reply has unusable length {}", chars);
        }
        Ok(text)
    }
}
