//! Resolves anime episodes on unofficial streaming sites to playable URLs.
//!
//! Each site is a [`providers::Provider`]; [`resolver::Resolver`] drives one
//! through its two stages and records the site's show id in the
//! [`cache::ProviderCache`] once a link came back.

pub mod cache;
pub mod config;
pub mod decode;
pub mod error;
pub mod http;
pub mod player;
pub mod providers;
pub mod quality;
pub mod resolver;
pub mod scrape;
pub mod types;
