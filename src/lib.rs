//! YouTube-to-MP3 proxy: validates video references, shells out to `yt-dlp`
//! for metadata and transcoding, and streams the resulting file back.

pub mod artifact;
pub mod client;
pub mod config;
pub mod error;
pub mod extractor;
pub mod flow;
pub mod handlers;
pub mod rate_limit;
pub mod reference;
pub mod server;
