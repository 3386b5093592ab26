//! Spotify Web API transport for the catalog port.

pub mod client;

pub use client::{SpotifyApi, SpotifyEndpoint, SpotifyResource};
