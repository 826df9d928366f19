//! Core library for Terrascope - a client for the Terrascope GIS survey
//! project service.
//!
//! The center of this crate is the session lifecycle manager: bearer
//! credential handling, durable session storage shared across application
//! contexts, proactive expiry scheduling, and the authenticated API client
//! with silent token refresh. Around it sit the domain models for projects,
//! clients, users, workspaces, and map layers, plus configuration and small
//! formatting utilities.

pub mod api;
pub mod auth;
pub mod config;
pub mod models;
pub mod storage;
pub mod utils;
