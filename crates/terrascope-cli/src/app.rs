//! Application wiring and command implementations.
//!
//! `App` owns the pieces the commands need: config, the session store over
//! shared storage, the API client, and the route guard. Every protected
//! command passes through the guard first; the guard's redirect is surfaced
//! as a sign-in message.

use std::io::Write;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use tokio::sync::broadcast;
use tracing::debug;

use terrascope_core::api::ApiClient;
use terrascope_core::auth::{
    check_persisted, expiry::DEFAULT_LIVENESS_INTERVAL, ExpiryScheduler, PasswordVault,
    RouteGuard, SchedulerState, SessionEvent, SessionStore, SessionSync,
};
use terrascope_core::config::Config;
use terrascope_core::models::{
    ClientUpdate, LayerGroups, NewClient, NewProject, NewUser, NewWorkspace, ProfileUpdate,
    ProjectStatus, ProjectUpdate, UserRole, WorkspaceUpdate,
};
use terrascope_core::storage::{StorageFile, StorageWatcher};
use terrascope_core::utils::{contains_ignore_case, expires_in_display, is_valid_guid, truncate};

pub struct App {
    config: Config,
    storage: StorageFile,
    store: Arc<SessionStore>,
    client: ApiClient,
    guard: RouteGuard,
}

impl App {
    pub fn new() -> Result<Self> {
        let config = Config::load()?;
        let storage = StorageFile::new(config.storage_dir()?)?;
        let store = Arc::new(SessionStore::open(storage.clone()));
        let lead_secs = config.expiry_lead_secs();
        let client = ApiClient::new(config.api_base_url(), Arc::clone(&store), lead_secs)
            .context("Failed to create API client")?;
        let guard = RouteGuard::new(Arc::clone(&store), lead_secs);
        Ok(Self { config, storage, store, client, guard })
    }

    /// One immediate check of the stored credentials, run before any command.
    pub fn bootstrap(&self) -> Result<()> {
        if check_persisted(&self.store, self.config.expiry_lead_secs())? {
            debug!("restored session from storage");
        }
        Ok(())
    }

    fn ensure_signed_in(&self, view: &str) -> Result<()> {
        if let Err(redirect) = self.guard.check(view) {
            bail!("not signed in - run `terrascope login` first ({redirect})");
        }
        self.guard.revalidate();
        Ok(())
    }

    // ===== Session commands =====

    pub async fn login(
        &mut self,
        username: Option<String>,
        password: Option<String>,
        remember: bool,
    ) -> Result<()> {
        let username = match username.or_else(|| self.config.default_username.clone()) {
            Some(username) => username,
            None => prompt_line("Username: ")?,
        };
        let password = match password {
            Some(password) => password,
            None => match PasswordVault::get(&username)? {
                Some(password) => {
                    debug!("using remembered password");
                    password
                }
                None => rpassword::prompt_password("Password: ")?,
            },
        };

        let user = self.client.login(&username, &password).await?;
        println!("Signed in as {} ({})", user.full_name(), user.role);

        if remember {
            PasswordVault::store(&username, &password)?;
            println!("Password remembered for {username}");
        }
        if self.config.default_username.as_deref() != Some(username.as_str()) {
            self.config.default_username = Some(username);
            self.config.save()?;
        }
        Ok(())
    }

    pub async fn logout(&self) -> Result<()> {
        self.client.logout().await?;
        println!("Signed out");
        Ok(())
    }

    pub fn status(&self) {
        let info = self.store.session_info();
        if !info.is_authenticated {
            println!("Not signed in");
            return;
        }
        if let Some(user) = &info.current_user {
            println!("Signed in as {} <{}>", user.full_name(), user.email);
        }
        println!("Access credential expires in {}", expires_in_display(info.access_expiry));
        println!("Refresh credential expires in {}", expires_in_display(info.refresh_expiry));
    }

    // ===== Profile =====

    pub async fn profile_show(&self) -> Result<()> {
        self.ensure_signed_in("profile")?;
        let profile = self.client.refresh_profile().await?;
        println!("{} <{}>", profile.full_name(), profile.email);
        println!("Role: {}", profile.role);
        if let Some(client_id) = &profile.client_id {
            println!("Client: {client_id}");
        }
        Ok(())
    }

    pub async fn profile_set(
        &self,
        email: Option<String>,
        first_name: Option<String>,
        last_name: Option<String>,
    ) -> Result<()> {
        self.ensure_signed_in("profile")?;
        let update = ProfileUpdate { email, first_name, last_name };
        if update.is_empty() {
            bail!("nothing to update - pass at least one of --email/--first-name/--last-name");
        }
        let profile = self.client.update_profile(&update).await?;
        println!("Profile updated: {} <{}>", profile.full_name(), profile.email);
        Ok(())
    }

    // ===== Projects =====

    pub async fn project_list(&self, filter: Option<String>) -> Result<()> {
        self.ensure_signed_in("projects")?;
        let needle = filter.unwrap_or_default();
        let mut projects = self.client.list_projects().await?;
        projects.retain(|p| contains_ignore_case(&p.name, &needle));
        if projects.is_empty() {
            println!("No projects");
            return Ok(());
        }
        for project in &projects {
            println!("{}  {}", project.id, project.summary());
        }
        Ok(())
    }

    pub async fn project_show(&self, id: &str) -> Result<()> {
        self.ensure_signed_in("projects")?;
        check_guid(id)?;
        let (project, layers) = futures::future::try_join(
            self.client.fetch_project(id),
            self.client.fetch_project_layers(id),
        )
        .await?;

        println!("{} [{}]", project.name, project.status);
        if let Some(description) = &project.description {
            println!("{}", truncate(description, 120));
        }
        if let Some(date) = project.survey_date {
            println!("Survey date: {date}");
        }
        if let Some(centroid) = project.centroid {
            println!("Centroid: {centroid}");
        }

        let groups = LayerGroups::categorize(layers);
        println!(
            "Layers: {} ({} visible) - {} vector, {} raster, {} street imagery",
            groups.total(),
            groups.visible_count(),
            groups.vector.len(),
            groups.raster.len(),
            groups.street.len(),
        );
        Ok(())
    }

    pub async fn project_create(
        &self,
        name: String,
        description: Option<String>,
        client_id: Option<String>,
        workspace_id: Option<String>,
        survey_date: Option<String>,
    ) -> Result<()> {
        self.ensure_signed_in("projects")?;
        let survey_date = survey_date
            .map(|d| {
                NaiveDate::parse_from_str(&d, "%Y-%m-%d")
                    .with_context(|| format!("invalid survey date '{d}', expected YYYY-MM-DD"))
            })
            .transpose()?;
        let project = self
            .client
            .create_project(&NewProject { name, description, client_id, workspace_id, survey_date })
            .await?;
        println!("Created project {} ({})", project.name, project.id);
        Ok(())
    }

    pub async fn project_archive(&self, id: &str) -> Result<()> {
        self.ensure_signed_in("projects")?;
        check_guid(id)?;
        let update = ProjectUpdate { status: Some(ProjectStatus::Archived), ..Default::default() };
        let project = self.client.update_project(id, &update).await?;
        println!("Archived project {}", project.name);
        Ok(())
    }

    pub async fn project_delete(&self, id: &str) -> Result<()> {
        self.ensure_signed_in("projects")?;
        check_guid(id)?;
        self.client.delete_project(id).await?;
        println!("Deleted project {id}");
        Ok(())
    }

    pub async fn project_layers(&self, id: &str) -> Result<()> {
        self.ensure_signed_in("layers")?;
        check_guid(id)?;
        let groups = LayerGroups::categorize(self.client.fetch_project_layers(id).await?);
        if groups.total() == 0 {
            println!("No layers");
            return Ok(());
        }
        for layer in groups.iter() {
            let marker = if layer.visible { "*" } else { " " };
            println!("{marker} [{}] {}", layer.kind, layer.name);
        }
        println!("{} of {} visible", groups.visible_count(), groups.total());
        Ok(())
    }

    // ===== Clients =====

    pub async fn client_list(&self, filter: Option<String>) -> Result<()> {
        self.ensure_signed_in("clients")?;
        let needle = filter.unwrap_or_default();
        let mut clients = self.client.list_clients().await?;
        clients.retain(|c| contains_ignore_case(&c.name, &needle));
        for client in &clients {
            let status = if client.active { "" } else { "  (inactive)" };
            println!("{}  {}  {}{}", client.id, client.name, client.phone_display(), status);
        }
        if clients.is_empty() {
            println!("No clients");
        }
        Ok(())
    }

    pub async fn client_create(
        &self,
        name: String,
        contact_email: Option<String>,
        phone: Option<String>,
        address: Option<String>,
    ) -> Result<()> {
        self.ensure_signed_in("clients")?;
        let client = self
            .client
            .create_client(&NewClient { name, contact_email, phone, address })
            .await?;
        println!("Created client {} ({})", client.name, client.id);
        Ok(())
    }

    pub async fn client_update(
        &self,
        id: &str,
        name: Option<String>,
        contact_email: Option<String>,
        phone: Option<String>,
        active: Option<bool>,
    ) -> Result<()> {
        self.ensure_signed_in("clients")?;
        check_guid(id)?;
        let update = ClientUpdate { name, contact_email, phone, active };
        let client = self.client.update_client(id, &update).await?;
        println!("Updated client {}", client.name);
        Ok(())
    }

    pub async fn client_delete(&self, id: &str) -> Result<()> {
        self.ensure_signed_in("clients")?;
        check_guid(id)?;
        self.client.delete_client(id).await?;
        println!("Deleted client {id}");
        Ok(())
    }

    // ===== Users =====

    pub async fn user_list(&self) -> Result<()> {
        self.ensure_signed_in("users")?;
        for user in self.client.list_users().await? {
            let status = match user.active {
                Some(false) => "  (inactive)",
                _ => "",
            };
            println!("{}  {} <{}>  {}{}", user.id, user.full_name(), user.email, user.role, status);
        }
        Ok(())
    }

    pub async fn user_create(
        &self,
        email: String,
        first_name: String,
        last_name: String,
        role: String,
        client_id: Option<String>,
    ) -> Result<()> {
        self.ensure_signed_in("users")?;
        let role = parse_role(&role)?;
        if let Some(me) = self.store.snapshot().user {
            if !me.role.can_manage() {
                println!("Note: your role ({}) may not be allowed to create users", me.role);
            }
        }
        let user = self
            .client
            .create_user(&NewUser { email, first_name, last_name, role, client_id })
            .await?;
        println!("Created user {} ({})", user.full_name(), user.id);
        Ok(())
    }

    pub async fn user_delete(&self, id: &str) -> Result<()> {
        self.ensure_signed_in("users")?;
        check_guid(id)?;
        self.client.delete_user(id).await?;
        println!("Deleted user {id}");
        Ok(())
    }

    // ===== Workspaces =====

    pub async fn workspace_list(&self) -> Result<()> {
        self.ensure_signed_in("workspaces")?;
        for workspace in self.client.list_workspaces().await? {
            let members = workspace.member_count.unwrap_or(0);
            let projects = workspace.project_count.unwrap_or(0);
            println!(
                "{}  {}  {} member(s), {} project(s)",
                workspace.id, workspace.name, members, projects
            );
        }
        Ok(())
    }

    pub async fn workspace_create(&self, name: String, description: Option<String>) -> Result<()> {
        self.ensure_signed_in("workspaces")?;
        let workspace = self.client.create_workspace(&NewWorkspace { name, description }).await?;
        println!("Created workspace {} ({})", workspace.name, workspace.id);
        Ok(())
    }

    pub async fn workspace_rename(&self, id: &str, name: String) -> Result<()> {
        self.ensure_signed_in("workspaces")?;
        check_guid(id)?;
        let update = WorkspaceUpdate { name: Some(name), ..Default::default() };
        let workspace = self.client.update_workspace(id, &update).await?;
        println!("Renamed workspace to {}", workspace.name);
        Ok(())
    }

    pub async fn workspace_delete(&self, id: &str) -> Result<()> {
        self.ensure_signed_in("workspaces")?;
        check_guid(id)?;
        self.client.delete_workspace(id).await?;
        println!("Deleted workspace {id}");
        Ok(())
    }

    // ===== Watch =====

    /// Foreground session supervisor: runs the expiry scheduler and the
    /// cross-context sync, printing lifecycle events until interrupted.
    pub async fn watch(&self) -> Result<()> {
        let lead_secs = self.config.expiry_lead_secs();
        let scheduler =
            ExpiryScheduler::new(Arc::clone(&self.store), lead_secs, DEFAULT_LIVENESS_INTERVAL);
        let mut scheduler_state = scheduler.state();
        let scheduler_task = tokio::spawn(scheduler.run());
        let _sync = SessionSync::spawn(
            Arc::clone(&self.store),
            StorageWatcher::new(&self.storage)?,
        );
        let mut events = self.store.events();

        self.status();
        println!("Watching session (Ctrl-C to stop)");
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                event = events.recv() => match event {
                    Ok(SessionEvent::SignedIn) => println!("signed in"),
                    Ok(SessionEvent::Refreshed) => println!("access credential refreshed"),
                    Ok(SessionEvent::SignedOut { reason }) => println!("{reason}"),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                changed = scheduler_state.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    match *scheduler_state.borrow() {
                        SchedulerState::Armed { fire_in } => {
                            debug!(fire_in_secs = fire_in.as_secs(), "expiry timer re-armed");
                        }
                        SchedulerState::Idle => debug!("expiry timer idle"),
                    }
                }
            }
        }
        scheduler_task.abort();
        Ok(())
    }
}

fn check_guid(id: &str) -> Result<()> {
    if !is_valid_guid(id) {
        bail!("'{id}' does not look like a valid id");
    }
    Ok(())
}

fn parse_role(role: &str) -> Result<UserRole> {
    match role.to_lowercase().as_str() {
        "admin" => Ok(UserRole::Admin),
        "manager" => Ok(UserRole::Manager),
        "surveyor" => Ok(UserRole::Surveyor),
        "viewer" => Ok(UserRole::Viewer),
        _ => bail!("unknown role '{role}' (expected admin, manager, surveyor, or viewer)"),
    }
}

fn prompt_line(prompt: &str) -> Result<String> {
    print!("{prompt}");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}
