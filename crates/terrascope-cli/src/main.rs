//! Terrascope CLI - command-line client for GIS survey project management.
//!
//! Wraps the terrascope-core session lifecycle and API client in a small
//! command tree. Session state is shared with every other Terrascope process
//! on the machine through the session storage document, so signing out here
//! signs out a `watch` running in another terminal too.

mod app;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::io;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use app::App;

#[derive(Parser)]
#[command(name = "terrascope", version, about = "Client for the Terrascope survey service")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Sign in and establish a session
    Login {
        #[arg(long)]
        username: Option<String>,
        /// Password (falls back to the keychain, then an interactive prompt)
        #[arg(long)]
        password: Option<String>,
        /// Remember the password in the OS keychain
        #[arg(long)]
        remember: bool,
    },
    /// Sign out of this machine's session
    Logout,
    /// Show session state and credential expiry
    Status,
    /// Current user's profile
    Profile {
        #[command(subcommand)]
        action: ProfileAction,
    },
    /// Survey projects
    Project {
        #[command(subcommand)]
        action: ProjectAction,
    },
    /// Customer organizations
    Client {
        #[command(subcommand)]
        action: ClientAction,
    },
    /// User accounts
    User {
        #[command(subcommand)]
        action: UserAction,
    },
    /// Project workspaces
    Workspace {
        #[command(subcommand)]
        action: WorkspaceAction,
    },
    /// List map layers attached to a project
    Layers { project_id: String },
    /// Keep the session supervised in the foreground, printing lifecycle events
    Watch,
}

#[derive(Subcommand)]
enum ProfileAction {
    /// Fetch and display the current profile
    Show,
    /// Update profile fields
    Set {
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        first_name: Option<String>,
        #[arg(long)]
        last_name: Option<String>,
    },
}

#[derive(Subcommand)]
enum ProjectAction {
    /// List projects, optionally filtered by name
    List {
        #[arg(long)]
        filter: Option<String>,
    },
    /// Show one project with its layer summary
    Show { id: String },
    Create {
        name: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        client_id: Option<String>,
        #[arg(long)]
        workspace_id: Option<String>,
        /// Survey date as YYYY-MM-DD
        #[arg(long)]
        survey_date: Option<String>,
    },
    /// Mark a project archived
    Archive { id: String },
    Delete { id: String },
}

#[derive(Subcommand)]
enum ClientAction {
    List {
        #[arg(long)]
        filter: Option<String>,
    },
    Create {
        name: String,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        phone: Option<String>,
        #[arg(long)]
        address: Option<String>,
    },
    Update {
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        phone: Option<String>,
        #[arg(long)]
        active: Option<bool>,
    },
    Delete { id: String },
}

#[derive(Subcommand)]
enum UserAction {
    List,
    Create {
        email: String,
        first_name: String,
        last_name: String,
        /// admin, manager, surveyor, or viewer
        #[arg(long, default_value = "viewer")]
        role: String,
        #[arg(long)]
        client_id: Option<String>,
    },
    Delete { id: String },
}

#[derive(Subcommand)]
enum WorkspaceAction {
    List,
    Create {
        name: String,
        #[arg(long)]
        description: Option<String>,
    },
    Rename { id: String, name: String },
    Delete { id: String },
}

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = Cli::parse();
    let mut app = App::new()?;
    app.bootstrap()?;

    match cli.command {
        Command::Login { username, password, remember } => {
            app.login(username, password, remember).await
        }
        Command::Logout => app.logout().await,
        Command::Status => {
            app.status();
            Ok(())
        }
        Command::Profile { action } => match action {
            ProfileAction::Show => app.profile_show().await,
            ProfileAction::Set { email, first_name, last_name } => {
                app.profile_set(email, first_name, last_name).await
            }
        },
        Command::Project { action } => match action {
            ProjectAction::List { filter } => app.project_list(filter).await,
            ProjectAction::Show { id } => app.project_show(&id).await,
            ProjectAction::Create { name, description, client_id, workspace_id, survey_date } => {
                app.project_create(name, description, client_id, workspace_id, survey_date).await
            }
            ProjectAction::Archive { id } => app.project_archive(&id).await,
            ProjectAction::Delete { id } => app.project_delete(&id).await,
        },
        Command::Client { action } => match action {
            ClientAction::List { filter } => app.client_list(filter).await,
            ClientAction::Create { name, email, phone, address } => {
                app.client_create(name, email, phone, address).await
            }
            ClientAction::Update { id, name, email, phone, active } => {
                app.client_update(&id, name, email, phone, active).await
            }
            ClientAction::Delete { id } => app.client_delete(&id).await,
        },
        Command::User { action } => match action {
            UserAction::List => app.user_list().await,
            UserAction::Create { email, first_name, last_name, role, client_id } => {
                app.user_create(email, first_name, last_name, role, client_id).await
            }
            UserAction::Delete { id } => app.user_delete(&id).await,
        },
        Command::Workspace { action } => match action {
            WorkspaceAction::List => app.workspace_list().await,
            WorkspaceAction::Create { name, description } => {
                app.workspace_create(name, description).await
            }
            WorkspaceAction::Rename { id, name } => app.workspace_rename(&id, name).await,
            WorkspaceAction::Delete { id } => app.workspace_delete(&id).await,
        },
        Command::Layers { project_id } => app.project_layers(&project_id).await,
        Command::Watch => app.watch().await,
    }
}
