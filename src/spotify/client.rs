use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde_json::Value;
use url::Url;

use crate::ports::catalog::{CatalogEndpoint, FetchWindow, Page, UpstreamError};
use crate::sync::collections::CollectionKind;

pub const DEFAULT_API_BASE_URL: &str = "https://api.spotify.com/v1/";

/// A paginated collection exposed by the Web API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpotifyResource {
    SavedTracks,
    SavedAlbums,
    FollowedArtists,
    Playlists,
    TopTracks,
    PlaylistItems { playlist_id: String },
}

impl SpotifyResource {
    fn path(&self) -> String {
        match self {
            SpotifyResource::SavedTracks => "me/tracks".to_string(),
            SpotifyResource::SavedAlbums => "me/albums".to_string(),
            SpotifyResource::FollowedArtists => "me/following".to_string(),
            SpotifyResource::Playlists => "me/playlists".to_string(),
            SpotifyResource::TopTracks => "me/top/tracks".to_string(),
            SpotifyResource::PlaylistItems { playlist_id } => {
                format!("playlists/{}/tracks", urlencoding::encode(playlist_id))
            }
        }
    }

    /// Key wrapping the paging object, for endpoints that nest it.
    fn envelope(&self) -> Option<&'static str> {
        match self {
            SpotifyResource::FollowedArtists => Some("artists"),
            _ => None,
        }
    }
}

impl From<CollectionKind> for SpotifyResource {
    fn from(kind: CollectionKind) -> Self {
        match kind {
            CollectionKind::SavedTracks => SpotifyResource::SavedTracks,
            CollectionKind::SavedAlbums => SpotifyResource::SavedAlbums,
            CollectionKind::FollowedArtists => SpotifyResource::FollowedArtists,
            CollectionKind::Playlists => SpotifyResource::Playlists,
            CollectionKind::TopTracks => SpotifyResource::TopTracks,
        }
    }
}

/// Authenticated Web API client. Token acquisition happens elsewhere.
pub struct SpotifyApi {
    client: Client,
    base_url: Url,
    access_token: String,
}

impl SpotifyApi {
    pub fn new(
        base_url: &str,
        access_token: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self, UpstreamError> {
        // Url::join drops the last path segment without a trailing slash.
        let base_url = if base_url.ends_with('/') {
            Url::parse(base_url)
        } else {
            Url::parse(&format!("{}/", base_url))
        }
        .map_err(|err| UpstreamError::Transport(format!("invalid base url {base_url}: {err}")))?;

        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|err| UpstreamError::Transport(err.to_string()))?;

        Ok(Self {
            client,
            base_url,
            access_token: access_token.into(),
        })
    }

    pub fn request_url(
        &self,
        resource: &SpotifyResource,
        window: &FetchWindow,
    ) -> Result<Url, UpstreamError> {
        let mut url = self
            .base_url
            .join(&resource.path())
            .map_err(|err| UpstreamError::Transport(err.to_string()))?;

        {
            let mut query = url.query_pairs_mut();
            if matches!(resource, SpotifyResource::FollowedArtists) {
                query.append_pair("type", "artist");
            }
            match window {
                FetchWindow::Offset { offset, limit } => {
                    query
                        .append_pair("offset", &offset.to_string())
                        .append_pair("limit", &limit.to_string());
                }
                FetchWindow::Cursor { after, limit } => {
                    if let Some(after) = after {
                        query.append_pair("after", after);
                    }
                    query.append_pair("limit", &limit.to_string());
                }
            }
        }

        Ok(url)
    }

    pub async fn fetch_page(
        &self,
        resource: &SpotifyResource,
        window: &FetchWindow,
    ) -> Result<Page, UpstreamError> {
        let url = self.request_url(resource, window)?;
        let body = self.get_json(url).await?;
        parse_page(body, resource.envelope())
    }

    /// Profile of the user owning the access token (`GET /me`).
    pub async fn current_user(&self) -> Result<Value, UpstreamError> {
        let url = self
            .base_url
            .join("me")
            .map_err(|err| UpstreamError::Transport(err.to_string()))?;
        self.get_json(url).await
    }

    async fn get_json(&self, url: Url) -> Result<Value, UpstreamError> {
        log::debug!("GET {}", url);

        let response = self
            .client
            .get(url)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(UpstreamError::Throttled);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::from_status(
                status.as_u16(),
                error_message(&body),
            ));
        }

        response.json().await.map_err(|err| {
            if err.is_timeout() {
                UpstreamError::Timeout
            } else {
                UpstreamError::Decode(err.to_string())
            }
        })
    }
}

fn classify_transport_error(err: reqwest::Error) -> UpstreamError {
    if err.is_timeout() {
        UpstreamError::Timeout
    } else {
        UpstreamError::Transport(err.to_string())
    }
}

/// `{"error": {"message": ...}}` when present, the raw body otherwise.
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| value.pointer("/error/message")?.as_str().map(str::to_string))
        .unwrap_or_else(|| body.to_string())
}

/// Normalize a paging object (optionally nested under `envelope`) into a [`Page`].
pub fn parse_page(mut body: Value, envelope: Option<&str>) -> Result<Page, UpstreamError> {
    let mut paging = match envelope {
        Some(key) => body
            .get_mut(key)
            .map(Value::take)
            .ok_or_else(|| UpstreamError::Decode(format!("response has no `{}` object", key)))?,
        None => body,
    };

    let items = match paging.get_mut("items").map(Value::take) {
        Some(Value::Array(items)) => items,
        Some(Value::Null) | None => Vec::new(),
        Some(other) => {
            return Err(UpstreamError::Decode(format!(
                "`items` is not an array: {}",
                other
            )));
        }
    };
    let total = paging.get("total").and_then(Value::as_u64);

    Ok(Page { items, total })
}

/// One Web API collection bound to a shared client.
pub struct SpotifyEndpoint {
    api: Arc<SpotifyApi>,
    resource: SpotifyResource,
}

impl SpotifyEndpoint {
    pub fn new(api: Arc<SpotifyApi>, resource: SpotifyResource) -> Self {
        Self { api, resource }
    }
}

#[async_trait::async_trait]
impl CatalogEndpoint for SpotifyEndpoint {
    async fn fetch(&self, window: &FetchWindow) -> Result<Page, UpstreamError> {
        self.api.fetch_page(&self.resource, window).await
    }
}
