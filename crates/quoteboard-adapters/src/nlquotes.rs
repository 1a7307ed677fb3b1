//! Client for the nlquotes.com quote-search API.
//!
//! The API returns paginated entries (one per video), each carrying a
//! list of timestamped quotes. Random selection therefore happens in two
//! steps: pick a random entry (whose page is computable from its index),
//! then a random quote within it. This biases away from quotes in
//! quote-dense entries, which is acceptable for a novelty command.

use std::sync::OnceLock;

use rand::Rng;
use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use crate::error::{AdapterError, Result};

const API_BASE_URL: &str = "https://nlquotes.com/api";

/// Entries returned per search page.
const ENTRIES_PER_PAGE: usize = 10;

// ═══════════════════════════════════════════════════════════════════════
//  Wire types
// ═══════════════════════════════════════════════════════════════════════

/// One timestamped quote within a video entry.
#[derive(Debug, Clone, Deserialize)]
pub struct NlQuote {
    #[serde(default)]
    pub text: String,
    pub timestamp_start: String,
}

/// One video entry with its quotes.
#[derive(Debug, Clone, Deserialize)]
pub struct NlEntry {
    pub video_id: String,
    #[serde(default)]
    pub title: String,
    pub upload_date: String,
    #[serde(default)]
    pub channel_source: String,
    #[serde(default)]
    pub quotes: Vec<NlQuote>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    data: Vec<NlEntry>,
    #[serde(default)]
    total: usize,
}

#[derive(Debug, Deserialize)]
struct RandomResponse {
    #[serde(default)]
    quotes: Vec<NlEntry>,
}

// ═══════════════════════════════════════════════════════════════════════
//  Client
// ═══════════════════════════════════════════════════════════════════════

/// nlquotes.com API client.
#[derive(Clone, Default)]
pub struct NlQuotesClient {
    http: reqwest::Client,
}

impl NlQuotesClient {
    /// Create a client.
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    /// Fetch a fully random quote, formatted for chat.
    pub async fn random(&self) -> Result<String> {
        let endpoint = format!("{API_BASE_URL}/random");
        let response: RandomResponse = self
            .http
            .get(&endpoint)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if response.quotes.is_empty() {
            return Err(AdapterError::InvalidResponse {
                endpoint,
                reason: "no entries returned".to_string(),
            });
        }

        let entry = &response.quotes[rand::thread_rng().gen_range(0..response.quotes.len())];
        format_random_quote(entry)
    }

    /// Search for `term` and return a random matching quote, formatted
    /// for chat. `Ok(None)` means the API genuinely has no match.
    pub async fn search(&self, term: &str) -> Result<Option<String>> {
        let first_page = self.search_page(term, 1).await?;
        if first_page.total == 0 || first_page.data.is_empty() {
            return Ok(None);
        }

        // A random quote's page is unpredictable, but a random entry's is
        // (index / page size + 1), so randomize the entry and re-fetch its
        // page when it falls outside the first.
        let mut entry_index = rand::thread_rng().gen_range(0..first_page.total);
        debug!(term, total = first_page.total, entry_index, "picked search entry");

        let page = if entry_index < ENTRIES_PER_PAGE {
            first_page
        } else {
            let page_number = entry_index / ENTRIES_PER_PAGE + 1;
            entry_index %= ENTRIES_PER_PAGE;
            self.search_page(term, page_number).await?
        };

        let entry = page.data.get(entry_index).ok_or_else(|| {
            AdapterError::InvalidResponse {
                endpoint: format!("{API_BASE_URL}/"),
                reason: format!("entry {entry_index} missing from page"),
            }
        })?;
        format_random_quote(entry).map(Some)
    }

    async fn search_page(&self, term: &str, page: usize) -> Result<SearchResponse> {
        let page = page.to_string();
        let query = [
            ("search", term),
            ("page", page.as_str()),
            ("strict", "false"),
            ("channel", "all"),
            ("selectedMode", "searchText"),
            ("year", ""),
            ("sort", "default"),
            ("game", "all"),
        ];

        self.http
            .get(format!("{API_BASE_URL}/"))
            .query(&query)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .map_err(Into::into)
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Formatting
// ═══════════════════════════════════════════════════════════════════════

/// Pick a random quote from `entry` and format it.
fn format_random_quote(entry: &NlEntry) -> Result<String> {
    if entry.quotes.is_empty() {
        return Err(AdapterError::InvalidResponse {
            endpoint: API_BASE_URL.to_string(),
            reason: format!("entry {} has no quotes", entry.video_id),
        });
    }
    let quote = &entry.quotes[rand::thread_rng().gen_range(0..entry.quotes.len())];
    format_quote(entry, quote)
}

/// Render one quote as `text` plus a `[date @ offset](youtube)` link.
fn format_quote(entry: &NlEntry, quote: &NlQuote) -> Result<String> {
    let text = convert_bold_to_markdown(&quote.text);

    let offset_secs: f64 =
        quote
            .timestamp_start
            .parse()
            .map_err(|_| AdapterError::InvalidResponse {
                endpoint: API_BASE_URL.to_string(),
                reason: format!("bad quote timestamp: {}", quote.timestamp_start),
            })?;
    let offset_secs = offset_secs.round().max(0.0) as u64;
    let link = format!("https://youtu.be/{}/?t={offset_secs}", entry.video_id);

    let upload_date = chrono::DateTime::parse_from_rfc3339(&entry.upload_date).map_err(|err| {
        AdapterError::InvalidResponse {
            endpoint: API_BASE_URL.to_string(),
            reason: format!("bad upload date {}: {err}", entry.upload_date),
        }
    })?;

    Ok(format!(
        "{text}\n[{} @ {}]({link})",
        upload_date.format("%B %-d, %Y"),
        format_offset(offset_secs),
    ))
}

/// Replace the API's `<b>`/`</b>` highlights with markdown bold.
fn convert_bold_to_markdown(input: &str) -> String {
    static BOLD_TAG: OnceLock<Regex> = OnceLock::new();
    let re = BOLD_TAG.get_or_init(|| Regex::new(r"(?i)</?b>").expect("valid regex"));
    re.replace_all(input, "**").into_owned()
}

/// Render an offset in seconds as `1h2m3s` / `2m3s` / `45s`.
fn format_offset(total_secs: u64) -> String {
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    match (hours, minutes) {
        (0, 0) => format!("{seconds}s"),
        (0, _) => format!("{minutes}m{seconds}s"),
        _ => format!("{hours}h{minutes}m{seconds}s"),
    }
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(upload_date: &str, timestamp: &str, text: &str) -> (NlEntry, NlQuote) {
        let quote = NlQuote {
            text: text.to_string(),
            timestamp_start: timestamp.to_string(),
        };
        let entry = NlEntry {
            video_id: "abc123".to_string(),
            title: "some vod".to_string(),
            upload_date: upload_date.to_string(),
            channel_source: "main".to_string(),
            quotes: vec![quote.clone()],
        };
        (entry, quote)
    }

    #[test]
    fn bold_tags_become_markdown() {
        assert_eq!(
            convert_bold_to_markdown("a <b>big</b> and <B>LOUD</B> word"),
            "a **big** and **LOUD** word"
        );
        assert_eq!(convert_bold_to_markdown("no tags"), "no tags");
    }

    #[test]
    fn offsets_render_compactly() {
        assert_eq!(format_offset(45), "45s");
        assert_eq!(format_offset(123), "2m3s");
        assert_eq!(format_offset(3723), "1h2m3s");
    }

    #[test]
    fn quote_formats_with_link_and_date() {
        let (entry, quote) = entry("2021-03-04T00:00:00Z", "83.5", "<b>hello</b> there");
        let message = format_quote(&entry, &quote).unwrap();
        assert_eq!(
            message,
            "**hello** there\n[March 4, 2021 @ 1m24s](https://youtu.be/abc123/?t=84)"
        );
    }

    #[test]
    fn bad_timestamp_is_invalid_response() {
        let (entry, quote) = entry("2021-03-04T00:00:00Z", "not-a-number", "hi");
        assert!(matches!(
            format_quote(&entry, &quote),
            Err(AdapterError::InvalidResponse { .. })
        ));
    }

    #[test]
    fn entry_without_quotes_is_invalid_response() {
        let (mut entry, _) = entry("2021-03-04T00:00:00Z", "1", "hi");
        entry.quotes.clear();
        assert!(matches!(
            format_random_quote(&entry),
            Err(AdapterError::InvalidResponse { .. })
        ));
    }

    #[test]
    fn search_response_decodes_with_defaults() {
        let body = r#"{"data": [], "total": 0, "totalQuotes": 0}"#;
        let response: SearchResponse = serde_json::from_str(body).unwrap();
        assert!(response.data.is_empty());
        assert_eq!(response.total, 0);
    }
}
