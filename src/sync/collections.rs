use std::fmt;

use serde_json::Value;

use super::dedupe::{DedupeRule, SortOrder};
use super::transform::ItemTransform;

/// The user collections synced by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum CollectionKind {
    SavedTracks,
    SavedAlbums,
    FollowedArtists,
    Playlists,
    TopTracks,
}

impl CollectionKind {
    pub const ALL: [CollectionKind; 5] = [
        CollectionKind::SavedTracks,
        CollectionKind::SavedAlbums,
        CollectionKind::FollowedArtists,
        CollectionKind::Playlists,
        CollectionKind::TopTracks,
    ];

    pub fn name(self) -> &'static str {
        match self {
            CollectionKind::SavedTracks => "saved_tracks",
            CollectionKind::SavedAlbums => "saved_albums",
            CollectionKind::FollowedArtists => "followed_artists",
            CollectionKind::Playlists => "playlists",
            CollectionKind::TopTracks => "top_tracks",
        }
    }

    pub fn descriptor(self) -> EndpointDescriptor {
        let collection = self.name().to_string();
        match self {
            CollectionKind::SavedTracks => EndpointDescriptor {
                collection,
                pagination: Pagination::Parallel,
                transform: ItemTransform::project("/track"),
                dedupe: Some(DedupeRule::new(
                    "/external_ids/isrc",
                    "/name",
                    SortOrder::Descending,
                )),
                split: None,
            },
            CollectionKind::SavedAlbums => EndpointDescriptor {
                collection,
                pagination: Pagination::Parallel,
                transform: ItemTransform::project("/album").strip("available_markets"),
                dedupe: Some(DedupeRule::new(
                    "/external_ids/upc",
                    "/name",
                    SortOrder::Descending,
                )),
                split: None,
            },
            CollectionKind::FollowedArtists => EndpointDescriptor {
                collection,
                pagination: Pagination::Cursor {
                    cursor_field: "/id".to_string(),
                },
                transform: ItemTransform::identity(),
                dedupe: None,
                split: None,
            },
            CollectionKind::Playlists => EndpointDescriptor {
                collection,
                pagination: Pagination::Parallel,
                transform: ItemTransform::identity(),
                dedupe: None,
                split: None,
            },
            CollectionKind::TopTracks => EndpointDescriptor {
                collection,
                pagination: Pagination::Offset,
                transform: ItemTransform::identity(),
                dedupe: None,
                split: None,
            },
        }
    }
}

impl fmt::Display for CollectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How a collection's pages are walked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pagination {
    /// Sequential numeric offsets until an empty page.
    Offset,
    /// Sequential cursor taken from the last item of each page.
    Cursor { cursor_field: String },
    /// Concurrent offset batches over the total reported by a probe.
    Parallel,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointDescriptor {
    /// Name handed to the sink.
    pub collection: String,
    pub pagination: Pagination,
    pub transform: ItemTransform,
    pub dedupe: Option<DedupeRule>,
    pub split: Option<CollectionSplit>,
}

impl EndpointDescriptor {
    /// Keep only playlists owned by `display_name` in this collection and
    /// persist the rest as `other_<collection>`. A null name matches owners
    /// without one.
    pub fn owned_by(mut self, display_name: impl Into<Value>) -> Self {
        self.split = Some(CollectionSplit {
            pointer: "/owner/display_name".to_string(),
            value: display_name.into(),
            other_collection: format!("other_{}", self.collection),
        });
        self
    }
}

/// Routes items whose field differs from `value` to a second collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionSplit {
    pub pointer: String,
    pub value: Value,
    pub other_collection: String,
}

impl CollectionSplit {
    /// Items matching `value` first, the rest second. Order is kept in both.
    pub fn partition(&self, items: Vec<Value>) -> (Vec<Value>, Vec<Value>) {
        items
            .into_iter()
            .partition(|item| item.pointer(&self.pointer) == Some(&self.value))
    }
}

/// Tracks of a single playlist, unwrapped from their playlist item envelope.
pub fn playlist_tracks(playlist_id: &str) -> EndpointDescriptor {
    EndpointDescriptor {
        collection: format!("playlist_{}_tracks", playlist_id),
        pagination: Pagination::Parallel,
        transform: ItemTransform::project("/track"),
        dedupe: None,
        split: None,
    }
}
