//! Platforms Module
//!
//! One sync service per upstream study platform.

pub mod anki;
pub mod bunpro;
pub mod wanikani;

pub use anki::{AnkiCredentials, AnkiProfile, AnkiReview, AnkiSync};
pub use bunpro::{BunproCredentials, BunproProfile, BunproSync, GrammarReview};
pub use wanikani::{
    Assignment, LevelProgression, Resource, Review, UserProfile, WanikaniCredentials, WanikaniSync,
};
