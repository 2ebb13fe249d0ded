//! `VidChat`: conversation sync and polling client for a video-analysis chat
//! assistant.

pub mod app;
pub mod chat;
pub mod config;
pub mod poll;
pub mod sync;
