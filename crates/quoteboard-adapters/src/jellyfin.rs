//! Media-server (Jellyfin) poller.
//!
//! Queries a Jellyfin instance for media added since a cutoff (movies
//! directly, series by walking their episode lists) and formats the
//! daily "new on the server" update message. The instance is assumed to
//! be reachable on the local network; credentials come from the
//! environment.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use crate::error::{AdapterError, Result};

/// Environment variables holding the Jellyfin credentials.
pub const USER_ID_ENV_VAR: &str = "JELLYFIN_USER_ID";
pub const API_KEY_ENV_VAR: &str = "JELLYFIN_API_KEY";

// ═══════════════════════════════════════════════════════════════════════
//  Wire types
// ═══════════════════════════════════════════════════════════════════════

/// A library item as returned by the Items endpoints.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MediaItem {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub id: String,
    #[serde(rename = "Type", default)]
    pub kind: String,
    #[serde(default)]
    pub date_created: Option<DateTime<Utc>>,
    #[serde(default)]
    pub production_year: Option<i32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct EpisodesResponse {
    #[serde(default)]
    items: Vec<MediaItem>,
}

/// A series together with its recently added episodes.
#[derive(Debug, Clone)]
pub struct SeriesEpisodes {
    pub series: String,
    pub production_year: Option<i32>,
    pub episodes: Vec<MediaItem>,
}

// ═══════════════════════════════════════════════════════════════════════
//  Client
// ═══════════════════════════════════════════════════════════════════════

/// Jellyfin REST client.
#[derive(Clone)]
pub struct JellyfinClient {
    base: Url,
    user_id: String,
    api_key: String,
    http: reqwest::Client,
}

impl JellyfinClient {
    /// Create a client for the instance at `base_url`.
    pub fn new(
        base_url: &str,
        user_id: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self> {
        // A trailing slash keeps Url::join from eating the last path
        // segment.
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{base_url}/")
        };
        let base = Url::parse(&normalized)
            .map_err(|err| AdapterError::Config(format!("bad jellyfin base url: {err}")))?;

        Ok(Self {
            base,
            user_id: user_id.into(),
            api_key: api_key.into(),
            http: reqwest::Client::new(),
        })
    }

    /// Create a client with credentials from the environment.
    pub fn from_env(base_url: &str) -> Result<Self> {
        let user_id = std::env::var(USER_ID_ENV_VAR).map_err(|_| AdapterError::AuthRequired {
            provider: "jellyfin",
            env_var: USER_ID_ENV_VAR,
        })?;
        let api_key = std::env::var(API_KEY_ENV_VAR).map_err(|_| AdapterError::AuthRequired {
            provider: "jellyfin",
            env_var: API_KEY_ENV_VAR,
        })?;
        Self::new(base_url, user_id, api_key)
    }

    fn auth_header(&self) -> String {
        format!(
            "MediaBrowser Client=\"quoteboard\", Device=\"server\", \
             DeviceId=\"quoteboard\", Version=\"0.1\", Token=\"{}\"",
            self.api_key
        )
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .map_err(|err| AdapterError::Config(format!("bad jellyfin path {path}: {err}")))
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Movies and per-series episodes added after `since`.
    pub async fn recent_media_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<(Vec<MediaItem>, Vec<SeriesEpisodes>)> {
        let url = self.endpoint(&format!("Users/{}/Items/Latest", self.user_id))?;
        let items: Vec<MediaItem> = self
            .http
            .get(url)
            .query(&[
                ("fields", "DateLastMediaAdded,DateCreated"),
                ("enableImages", "false"),
                ("enableUserData", "false"),
            ])
            .header("Authorization", self.auth_header())
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        debug!(items = items.len(), "fetched latest media");

        let mut movies = Vec::new();
        let mut shows = Vec::new();
        for item in items {
            match item.kind.as_str() {
                "Movie" => {
                    if item.date_created.is_some_and(|created| created > since) {
                        movies.push(item);
                    }
                }
                "Series" => match self.series_episodes_since(&item, since).await {
                    Ok(series) if !series.episodes.is_empty() => shows.push(series),
                    Ok(_) => {}
                    // One broken series should not sink the whole update.
                    Err(error) => {
                        warn!(%error, series = %item.name, "failed to fetch episodes");
                    }
                },
                _ => {}
            }
        }
        Ok((movies, shows))
    }

    async fn series_episodes_since(
        &self,
        series: &MediaItem,
        since: DateTime<Utc>,
    ) -> Result<SeriesEpisodes> {
        let url = self.endpoint(&format!("Shows/{}/Episodes", series.id))?;
        let response: EpisodesResponse = self
            .http
            .get(url)
            .query(&[("fields", "DateCreated")])
            .header("Authorization", self.auth_header())
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let episodes = response
            .items
            .into_iter()
            .filter(|episode| episode.date_created.is_some_and(|created| created > since))
            .collect();
        Ok(SeriesEpisodes {
            series: series.name.clone(),
            production_year: series.production_year,
            episodes,
        })
    }

    /// The formatted update message for media added after `since`, or
    /// `None` when nothing is new.
    pub async fn update_message_since(&self, since: DateTime<Utc>) -> Result<Option<String>> {
        let (movies, shows) = self.recent_media_since(since).await?;
        Ok(format_update_message(&movies, &shows))
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Formatting
// ═══════════════════════════════════════════════════════════════════════

/// Render the update message, or `None` when both lists are empty.
fn format_update_message(movies: &[MediaItem], shows: &[SeriesEpisodes]) -> Option<String> {
    if movies.is_empty() && shows.is_empty() {
        return None;
    }

    let mut message = String::from("**New on Jellyfin Since Yesterday**\n");
    if !movies.is_empty() {
        message.push_str("\n**Movies**\n");
        for movie in movies {
            message.push_str(&movie.name);
            if let Some(year) = movie.production_year {
                message.push_str(&format!(" ({year})"));
            }
            message.push('\n');
        }
    }
    if !shows.is_empty() {
        message.push_str("\n**TV Shows**\n");
        for show in shows {
            message.push_str(&show.series);
            if let Some(year) = show.production_year {
                message.push_str(&format!(" ({year})"));
            }
            message.push_str(&format!(" [ {} New Episode(s) ]\n", show.episodes.len()));
        }
    }
    Some(message)
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn movie(name: &str, year: i32) -> MediaItem {
        MediaItem {
            name: name.to_string(),
            id: "m1".to_string(),
            kind: "Movie".to_string(),
            date_created: Some(Utc::now()),
            production_year: Some(year),
        }
    }

    #[test]
    fn client_requires_valid_base_url() {
        assert!(JellyfinClient::new("not a url", "u", "k").is_err());
        assert!(JellyfinClient::new("http://localhost:8096/jelly", "u", "k").is_ok());
    }

    #[test]
    fn endpoint_preserves_base_path() {
        let client = JellyfinClient::new("http://localhost:8096/jelly", "u42", "key").unwrap();
        let url = client.endpoint("Users/u42/Items/Latest").unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:8096/jelly/Users/u42/Items/Latest"
        );
    }

    #[test]
    fn media_item_decodes_from_pascal_case() {
        let body = r#"{
            "Name": "Some Film",
            "Id": "abc",
            "Type": "Movie",
            "DateCreated": "2024-05-01T12:00:00Z",
            "ProductionYear": 2024
        }"#;
        let item: MediaItem = serde_json::from_str(body).unwrap();
        assert_eq!(item.name, "Some Film");
        assert_eq!(item.kind, "Movie");
        assert_eq!(item.production_year, Some(2024));
        assert!(item.date_created.is_some());
    }

    #[test]
    fn no_updates_formats_to_none() {
        assert!(format_update_message(&[], &[]).is_none());
    }

    #[test]
    fn updates_format_with_sections() {
        let shows = vec![SeriesEpisodes {
            series: "Some Show".to_string(),
            production_year: Some(2020),
            episodes: vec![movie("ep", 2020), movie("ep2", 2020)],
        }];
        let message = format_update_message(&[movie("Some Film", 2024)], &shows).unwrap();

        assert!(message.contains("**Movies**"));
        assert!(message.contains("Some Film (2024)"));
        assert!(message.contains("**TV Shows**"));
        assert!(message.contains("Some Show (2020) [ 2 New Episode(s) ]"));
    }

    #[test]
    fn movie_only_update_omits_tv_section() {
        let message = format_update_message(&[movie("Solo", 1999)], &[]).unwrap();
        assert!(message.contains("**Movies**"));
        assert!(!message.contains("**TV Shows**"));
    }
}
