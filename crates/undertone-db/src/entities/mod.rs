pub mod album;
pub mod album_recommendation;
pub mod artist;
pub mod user;
