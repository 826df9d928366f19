//! Data models for Terrascope entities.
//!
//! This module contains all the data structures exchanged with the survey
//! service:
//!
//! - `Project`: survey projects with status and location metadata
//! - `Client`: customer organizations that own projects
//! - `User`, `UserRole`: accounts and the session's current profile
//! - `Workspace`: shared groupings of projects and members
//! - `Layer`, `LayerKind`, `LayerGroups`: map layers attached to a project

pub mod client;
pub mod layer;
pub mod person;
pub mod project;
pub mod workspace;

pub use client::{Client, ClientUpdate, NewClient};
pub use layer::{Layer, LayerGroups, LayerKind};
pub use person::{NewUser, ProfileUpdate, User, UserRole};
pub use project::{Centroid, NewProject, Project, ProjectStatus, ProjectUpdate};
pub use workspace::{NewWorkspace, Workspace, WorkspaceUpdate};
