/// Free-text classification fallback.
///
/// Consulted only when no pattern matched. The engine hands over the tab
/// title and the candidate definition names and gets back one of those
/// names or nothing. Transport failures, malformed replies and the "misc"
/// sentinel mean "no match". A call inside the rate-limit window is not
/// an answer at all: the engine leaves the tab where it is.

use crate::error::ClassifyError;
use crate::platform::Clock;
use crate::settings::ClassifierSettings;
use crate::tab_data::TabInfo;
use log::{debug, warn};
use serde_json::{Value, json};
use std::cell::{Cell, RefCell};
use url::Url;

/// Reply meaning "none of the candidates"
pub const NO_MATCH: &str = "misc";

const SKIPPED_TITLES: [&str; 2] = ["newtab", "extensions"];

/// What the classifier made of one tab
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict<T> {
    Match(T),
    NoMatch,
    /// Not asked this time (rate limited); no decision either way
    NotConsulted,
}

impl<T> Verdict<T> {
    pub fn and_then<U>(self, f: impl FnOnce(T) -> Verdict<U>) -> Verdict<U> {
        match self {
            Verdict::Match(value) => f(value),
            Verdict::NoMatch => Verdict::NoMatch,
            Verdict::NotConsulted => Verdict::NotConsulted,
        }
    }
}

impl<T> From<Option<T>> for Verdict<T> {
    fn from(value: Option<T>) -> Self {
        value.map_or(Verdict::NoMatch, Verdict::Match)
    }
}

#[allow(async_fn_in_trait)]
pub trait Classifier {
    fn is_enabled(&self) -> bool;

    /// Pick one of `candidates` for a tab titled `title`
    async fn classify(&self, title: &str, candidates: &[String]) -> Verdict<String>;

    /// Pick up edited settings from the durable record
    fn configure(&self, _settings: &ClassifierSettings) {}
}

/// Pattern matching only
#[derive(Debug, Default, Clone, Copy)]
pub struct NoClassifier;

impl Classifier for NoClassifier {
    fn is_enabled(&self) -> bool {
        false
    }

    async fn classify(&self, _title: &str, _candidates: &[String]) -> Verdict<String> {
        Verdict::NoMatch
    }
}

/// Only regular web pages are worth a classification round trip
pub fn is_classifiable(tab: &TabInfo) -> bool {
    let is_web = Url::parse(&tab.url)
        .map(|url| matches!(url.scheme(), "http" | "https"))
        .unwrap_or(false);

    is_web && !tab.title.trim().is_empty() && !SKIPPED_TITLES.contains(&clean_string(&tab.title).as_str())
}

/// Lowercase and strip whitespace, quotes and '!' so model replies compare
/// against group names regardless of formatting noise.
pub fn clean_string(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '!' | '"' | '\'' | '`'))
        .flat_map(char::to_lowercase)
        .collect()
}

pub fn build_prompt(title: &str, candidates: &[String]) -> String {
    let names = candidates
        .iter()
        .map(|name| format!("'{}'", name))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "You are not interacting with a human user and are instead functioning as a piece of software. \
         Which of the following groups: [{names}] should the tab with the title: ['{title}'] be added to? \
         Your reply should be one string of data with no spaces, and must match the group name exactly. \
         It is critical that your reply be either '{NO_MATCH}' or one of the following group names: [{names}]. \
         Do NOT create group names where there are none. If you would create a new group, reply '{NO_MATCH}' instead."
    )
}

/// OpenAI-compatible chat-completion request body (Ollama accepts it too)
pub fn request_body(model: &str, prompt: &str) -> Value {
    json!({
        "model": model,
        "messages": [{ "role": "user", "content": prompt }],
        "stream": false,
    })
}

/// Pull the reply text out of either response shape
pub fn extract_reply(response: &Value) -> Result<String, ClassifyError> {
    response
        .pointer("/choices/0/message/content")
        .or_else(|| response.pointer("/message/content"))
        .and_then(Value::as_str)
        .filter(|content| !content.trim().is_empty())
        .map(str::to_string)
        .ok_or_else(|| ClassifyError::MalformedResponse(response.to_string()))
}

/// Map a reply back onto a candidate name, exactly as the candidate is spelled
pub fn resolve_reply(reply: &str, candidates: &[String]) -> Option<String> {
    let cleaned = clean_string(reply);
    if cleaned.is_empty() || cleaned == NO_MATCH {
        return None;
    }

    candidates
        .iter()
        .find(|candidate| clean_string(candidate) == cleaned)
        .cloned()
}

/// Sends a JSON body to a chat-completion endpoint
#[allow(async_fn_in_trait)]
pub trait ChatTransport {
    async fn post_json(&self, url: &str, api_key: Option<&str>, body: &Value) -> Result<Value, ClassifyError>;
}

pub struct ChatClassifier<T> {
    transport: T,
    settings: RefCell<ClassifierSettings>,
    clock: Clock,
    last_called: Cell<Option<f64>>,
}

impl<T: ChatTransport> ChatClassifier<T> {
    pub fn new(transport: T, settings: ClassifierSettings, clock: Clock) -> Self {
        ChatClassifier {
            transport,
            settings: RefCell::new(settings),
            clock,
            last_called: Cell::new(None),
        }
    }

    /// Claims the rate-limit slot if it is free
    fn try_acquire_slot(&self) -> bool {
        let now = (self.clock)();
        let min_interval = self.settings.borrow().min_interval_ms;
        if let Some(last) = self.last_called.get() {
            if now - last < min_interval {
                return false;
            }
        }
        self.last_called.set(Some(now));
        true
    }

    async fn request(&self, title: &str, candidates: &[String]) -> Result<Option<String>, ClassifyError> {
        let settings = self.settings.borrow().clone();
        let body = request_body(&settings.model, &build_prompt(title, candidates));

        let response = self
            .transport
            .post_json(&settings.endpoint, settings.api_key.as_deref(), &body)
            .await?;
        let reply = extract_reply(&response)?;
        debug!(
            "Classifier exchange: model={:?} endpoint={:?} title={:?} candidates={:?} reply={:?}",
            settings.model, settings.endpoint, title, candidates, reply
        );

        Ok(resolve_reply(&reply, candidates))
    }
}

impl<T: ChatTransport> Classifier for ChatClassifier<T> {
    fn is_enabled(&self) -> bool {
        self.settings.borrow().enabled
    }

    async fn classify(&self, title: &str, candidates: &[String]) -> Verdict<String> {
        if !self.is_enabled() || candidates.is_empty() {
            return Verdict::NoMatch;
        }
        if !self.try_acquire_slot() {
            debug!("Classifier rate limited, skipping {:?}", title);
            return Verdict::NotConsulted;
        }

        match self.request(title, candidates).await {
            Ok(answer) => Verdict::from(answer),
            Err(e) => {
                warn!("Classification of {:?} failed: {}", title, e);
                Verdict::NoMatch
            }
        }
    }

    fn configure(&self, settings: &ClassifierSettings) {
        *self.settings.borrow_mut() = settings.clone();
    }
}
