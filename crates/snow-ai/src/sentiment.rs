//! Best-effort sentiment classification used to frame chat replies.

use tracing::{debug, warn};

use crate::api_types::WireMessage;
use crate::completion::{ChatCompleter, CompletionRequest};

const INSTRUCTION: &str = "Analyze the sentiment of the following text. \
Respond with only 'positive', 'neutral', or 'negative'.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Sentiment {
    Positive,
    #[default]
    Neutral,
    Negative,
}

impl Sentiment {
    /// Read a classifier answer; anything unrecognised is neutral.
    pub fn from_answer(answer: &str) -> Self {
        let word = answer
            .trim()
            .trim_matches(|c: char| c == '.' || c == '\'' || c == '"')
            .to_lowercase();

        match word.as_str() {
            "positive" => Sentiment::Positive,
            "negative" => Sentiment::Negative,
            _ => Sentiment::Neutral,
        }
    }

    /// System message steering the reply for this sentiment.
    pub fn framing(&self) -> &'static str {
        match self {
            Sentiment::Positive => "The user seems positive. Respond in an upbeat manner.",
            Sentiment::Negative => "The user seems negative. Respond with empathy and offer support.",
            Sentiment::Neutral => "Provide a balanced and informative response.",
        }
    }
}

/// Classify `text` with the same model the turn uses. Never fails: a broken
/// classifier call degrades to [`Sentiment::Neutral`].
pub async fn classify_sentiment<C: ChatCompleter>(completer: &C, text: &str, model: &str) -> Sentiment {
    let request = CompletionRequest::new(
        model,
        vec![WireMessage::system(INSTRUCTION), WireMessage::user(text)],
    )
    .with_max_tokens(10);

    match completer.complete(request).await {
        Ok(answer) => {
            let sentiment = Sentiment::from_answer(&answer);
            debug!("Sentiment classified as {:?}", sentiment);
            sentiment
        }
        Err(e) => {
            warn!("Sentiment classification failed, assuming neutral: {}", e);
            Sentiment::Neutral
        }
    }
}
