//! Interactive dashboard shell.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use almanac_client::api::HttpApi;
use almanac_client::config::ClientConfig;
use almanac_client::directory::{parse_valid_until, Directory};
use almanac_client::export::{ExportKind, Exporter};
use almanac_client::jobs::{DataUpdateJob, JobEvent, JobPoller};
use almanac_client::model::{permission_set, NewUser, Role, UpdateKind, User, UserRecord, UserUpdate};
use almanac_client::navigation::{admin_controls_visible, data_panel_enabled};
use almanac_client::search::{SearchController, StockSearch};
use almanac_client::{ClientError, Dashboard, DashboardView, SessionManager};
use anyhow::Context;
use clap::{CommandFactory, Parser};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc;
use tracing::debug;

use crate::cli::{split_line, ShellCommand, ShellLine, UserAction, UserEdit};
use crate::{prompt, render, style};

enum Flow {
    Continue,
    Quit,
}

struct Shell {
    config: ClientConfig,
    dashboard: Dashboard,
    directory: Directory,
    exporter: Exporter,
    job: Arc<DataUpdateJob>,
    poller: JobPoller<DataUpdateJob>,
    events: mpsc::UnboundedReceiver<JobEvent>,
    search: SearchController<StockSearch>,
}

pub async fn run(config: ClientConfig) -> anyhow::Result<()> {
    let mut shell = Shell::connect(config);
    println!(
        "{}",
        style::accent(format!("Almanac dashboard at {}", shell.config.server.base_url))
    );
    let view = shell.dashboard.boot().await;
    shell.show_view(&view);
    shell.resume_job().await;

    loop {
        shell.drain_events().await;
        let label = shell.prompt_label();
        let line = tokio::task::spawn_blocking(move || prompt::read_command(&label))
            .await
            .context("prompt task failed")??;
        let Some(line) = line else {
            break;
        };
        let words = match split_line(&line) {
            Ok(words) if words.is_empty() => continue,
            Ok(words) => words,
            Err(err) => {
                eprintln!("{}", style::error(err.to_string()));
                continue;
            }
        };
        let command = match ShellLine::try_parse_from(words) {
            Ok(parsed) => parsed.command,
            Err(err) => {
                let _ = err.print();
                continue;
            }
        };
        let feature = feature(&command);
        match shell.execute(command).await {
            Ok(Flow::Continue) => {}
            Ok(Flow::Quit) => break,
            Err(err) => shell.report(&err, feature),
        }
    }
    Ok(())
}

/// Name of the feature a command belongs to, for refusal notices.
fn feature(command: &ShellCommand) -> &'static str {
    match command {
        ShellCommand::Update { .. } | ShellCommand::Progress | ShellCommand::Status => {
            "data management"
        }
        ShellCommand::Export { .. } => "Excel export",
        ShellCommand::Find { .. } => "instrument search",
        ShellCommand::Users
        | ShellCommand::User { .. }
        | ShellCommand::Perms { .. }
        | ShellCommand::Catalog
        | ShellCommand::SessionHours { .. } => "user management",
        ShellCommand::Open { .. } | ShellCommand::Tabs => "this tab",
        _ => "this feature",
    }
}

impl Shell {
    fn connect(config: ClientConfig) -> Self {
        let api = HttpApi::new(&config.server);
        let session = SessionManager::new(Arc::new(api.clone()), config.support_contact.clone());
        let job = Arc::new(DataUpdateJob::new(Arc::new(api.clone())));
        let (poller, events) = JobPoller::new(Arc::clone(&job), config.jobs);
        let search = SearchController::new(
            Arc::new(StockSearch::new(Arc::new(api.clone()), config.search.limit)),
            config.search.timing,
        );
        Self {
            dashboard: Dashboard::new(session),
            directory: Directory::new(Arc::new(api.clone())),
            exporter: Exporter::new(Arc::new(api)),
            job,
            poller,
            events,
            search,
            config,
        }
    }

    fn prompt_label(&self) -> String {
        let view = self.dashboard.view();
        match (&view.signed_in, view.navigation.active()) {
            (Some(signed_in), Some(tab)) => format!("{}@{}", signed_in.username, tab.id),
            (Some(signed_in), None) => signed_in.username.clone(),
            (None, _) => "almanac".to_string(),
        }
    }

    fn show_view(&self, view: &DashboardView) {
        if let Some(notice) = &view.notice {
            println!("{}", style::warning(notice));
        }
        println!("{}", render::badge(view));
        if view.signed_in.is_some() {
            println!("{}", style::dim(render::capabilities(view)));
        }
    }

    fn user(&self) -> Result<User, ClientError> {
        self.dashboard
            .current_user()
            .cloned()
            .ok_or_else(|| ClientError::Unauthenticated {
                message: "Sign in first.".into(),
            })
    }

    fn require_data_panel(&self) -> Result<User, ClientError> {
        let user = self.user()?;
        if data_panel_enabled(&user) {
            Ok(user)
        } else {
            Err(ClientError::PermissionDenied {
                message: "data management".into(),
            })
        }
    }

    fn require_admin(&self) -> Result<User, ClientError> {
        let user = self.user()?;
        if admin_controls_visible(&user) {
            Ok(user)
        } else {
            Err(ClientError::PermissionDenied {
                message: "administrators only".into(),
            })
        }
    }

    async fn execute(&mut self, command: ShellCommand) -> anyhow::Result<Flow> {
        match command {
            ShellCommand::Login { username } => self.login(username).await?,
            ShellCommand::Logout => {
                self.poller.cancel();
                let view = self.dashboard.logout().await;
                println!("{}", style::success("Signed out."));
                self.show_view(&view);
            }
            ShellCommand::Whoami => self.show_view(&self.dashboard.view()),
            ShellCommand::Passwd => self.change_password().await?,
            ShellCommand::Tabs => {
                self.user()?;
                print!("{}", self.dashboard.view().navigation);
            }
            ShellCommand::Open { tab } => {
                let view = self.dashboard.open(&tab)?;
                if let Some(active) = view.navigation.active() {
                    println!("{}", style::success(format!("Now on {}", active.title)));
                }
            }
            ShellCommand::Update { kind, overwrite } => self.start_update(&kind, overwrite).await?,
            ShellCommand::Progress => {
                self.require_data_panel()?;
                if !self.poller.is_polling() {
                    self.poller.resume().await?;
                }
                let panel = self.poller.panel();
                println!("{}", render::panel(&panel));
                if panel.visible && panel.running {
                    self.follow_progress().await?;
                }
            }
            ShellCommand::Status => {
                self.require_data_panel()?;
                let status = self.job.summary().await?;
                print!("{}", render::data_status(&status));
            }
            ShellCommand::Find { keyword } => self.find(&keyword.join(" ")).await?,
            ShellCommand::Export { kind, body, out } => self.export(&kind, &body, out).await?,
            ShellCommand::Users => {
                self.require_admin()?;
                let records = self.directory.list_users().await?;
                print!("{}", render::users(&records));
            }
            ShellCommand::User { action } => self.manage_user(action).await?,
            ShellCommand::Perms { id, codes } => self.permissions(id, codes).await?,
            ShellCommand::Catalog => {
                self.require_admin()?;
                let entries = self.directory.permission_catalog().await?;
                print!("{}", render::catalog(&entries));
            }
            ShellCommand::SessionHours { hours } => {
                self.require_admin()?;
                match hours {
                    Some(hours) => {
                        let message = self.directory.set_session_hours(&hours).await?;
                        println!("{}", style::success(message));
                    }
                    None => {
                        let config = self.directory.system_config().await?;
                        println!("Session duration: {} hours", config.session_duration_hours);
                    }
                }
            }
            ShellCommand::Help => print_help(),
            ShellCommand::Quit => return Ok(Flow::Quit),
        }
        Ok(Flow::Continue)
    }

    fn report(&mut self, err: &anyhow::Error, feature: &str) {
        let Some(client) = err.downcast_ref::<ClientError>() else {
            eprintln!("{}", style::error(format!("Error: {err:#}")));
            return;
        };
        if self.dashboard.observe_failure(client) {
            self.poller.cancel();
            eprintln!("{}", style::warning(client.to_string()));
            println!("{}", render::badge(&self.dashboard.view()));
            return;
        }
        eprintln!("{}", style::error(client.operator_notice(feature)));
    }

    async fn login(&mut self, username: Option<String>) -> anyhow::Result<()> {
        let username = match username {
            Some(username) => username,
            None => prompt::prompt_string("Username", "")?,
        };
        let password = prompt::prompt_password("Password")?;
        // A refused sign-in is about the attempted account, never the current session.
        let view = match self.dashboard.login(&username, &password).await {
            Ok(view) => view,
            Err(err) => {
                eprintln!("{}", style::error(err.to_string()));
                return Ok(());
            }
        };
        self.poller.cancel();
        println!("{}", style::success(format!("Signed in as {username}.")));
        self.show_view(&view);
        self.resume_job().await;
        Ok(())
    }

    async fn change_password(&self) -> anyhow::Result<()> {
        self.user()?;
        let old_password = prompt::prompt_password("Current password")?;
        let new_password = prompt::prompt_password("New password")?;
        let confirm = prompt::prompt_password("Repeat new password")?;
        if new_password != confirm {
            anyhow::bail!("The new passwords do not match.");
        }
        let message = self
            .dashboard
            .session()
            .change_password(&old_password, &new_password)
            .await?;
        println!("{}", style::success(message));
        Ok(())
    }

    /// Picks up an update already running on the server.
    async fn resume_job(&mut self) {
        if self.require_data_panel().is_err() {
            return;
        }
        match self.poller.resume().await {
            Ok(true) => println!("{}", render::panel(&self.poller.panel())),
            Ok(false) => {}
            Err(err) => debug!(error = %err, "no job status on startup"),
        }
    }

    async fn start_update(&mut self, kind: &str, overwrite: bool) -> anyhow::Result<()> {
        self.require_data_panel()?;
        let update_type = UpdateKind::parse(kind)
            .with_context(|| format!("unknown update kind '{kind}', expected full or incremental"))?;
        if overwrite
            && matches!(update_type, UpdateKind::Full)
            && !prompt::prompt_yes_no("Overwrite all stored rows?", false)?
        {
            println!("Update cancelled.");
            return Ok(());
        }
        self.job.configure(update_type, overwrite);
        let started = self.poller.start().await?;
        if let Some(message) = started.message {
            println!("{}", style::accent(message));
        }
        self.follow_progress().await
    }

    /// Mirrors the progress panel in a bar until the job stops or Ctrl-C.
    async fn follow_progress(&mut self) -> anyhow::Result<()> {
        let mut panels = self.poller.subscribe();
        let bar = ProgressBar::new(1);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{bar:40.cyan/blue} {pos}/{len} {msg}")?
                .progress_chars("=> "),
        );
        loop {
            let panel = panels.borrow_and_update().clone();
            bar.set_length(panel.total.max(1));
            bar.set_position(panel.current);
            bar.set_message(panel.message);
            if !panel.visible || !panel.running {
                break;
            }
            tokio::select! {
                changed = panels.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    bar.abandon_with_message("still running; use `progress` to follow again");
                    return Ok(());
                }
            }
        }
        bar.finish_and_clear();
        Ok(())
    }

    async fn drain_events(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            match event {
                JobEvent::Progress(_) | JobEvent::Hidden => {}
                JobEvent::Finished(progress) => {
                    let message = if progress.message.is_empty() {
                        "Update finished.".to_string()
                    } else {
                        progress.message
                    };
                    println!("{}", style::success(message));
                }
                JobEvent::RefreshSummary => {
                    if self.require_data_panel().is_err() {
                        continue;
                    }
                    match self.job.summary().await {
                        Ok(status) => print!("{}", render::data_status(&status)),
                        Err(err) => debug!(error = %err, "summary refresh failed"),
                    }
                }
            }
        }
    }

    async fn find(&mut self, keyword: &str) -> anyhow::Result<()> {
        self.user()?;
        self.search.focus_gained();
        let mut views = self.search.subscribe();
        self.search.input_changed(keyword);
        let budget = self.config.search.timing.debounce + self.config.server.timeout + Duration::from_secs(1);
        let timed_out = tokio::time::timeout(budget, views.wait_for(|view| !view.searching))
            .await
            .is_err();
        if timed_out {
            self.search.focus_lost();
            anyhow::bail!("search timed out");
        }
        let hits = self.search.view().results.unwrap_or_default();
        if hits.is_empty() {
            println!("No matches.");
            self.search.focus_lost();
            return Ok(());
        }
        let labels: Vec<String> = hits.iter().map(render::search_hit).collect();
        match prompt::prompt_pick("Pick an instrument", &labels)? {
            Some(index) => {
                self.search.select(&hits[index]);
                println!("{}", style::success(format!("Selected {}", self.search.view().value)));
            }
            None => self.search.focus_lost(),
        }
        Ok(())
    }

    async fn export(&mut self, kind: &str, body: &str, out: Option<PathBuf>) -> anyhow::Result<()> {
        let kind = ExportKind::parse(kind).with_context(|| {
            let known: Vec<_> = ExportKind::ALL.iter().map(|kind| kind.slug()).collect();
            format!("unknown export '{kind}', expected one of: {}", known.join(", "))
        })?;
        let body: serde_json::Value =
            serde_json::from_str(body).context("export body must be JSON")?;
        let download = self
            .exporter
            .download(self.dashboard.current_user(), kind, &body)
            .await?;
        let path = output_path(out.as_deref(), download.safe_filename());
        std::fs::write(&path, &download.bytes)
            .with_context(|| format!("failed to write {}", path.display()))?;
        println!(
            "{}",
            style::success(format!("Wrote {} ({} bytes)", path.display(), download.bytes.len()))
        );
        Ok(())
    }

    async fn manage_user(&mut self, action: UserAction) -> anyhow::Result<()> {
        let admin = self.require_admin()?;
        match action {
            UserAction::Show { id } => {
                let record = self.directory.get_user(id).await?;
                print!("{}", render::users(std::slice::from_ref(&record)));
            }
            UserAction::Add {
                username,
                role,
                valid_until,
            } => {
                let role = parse_role(&role)?;
                let valid_until = parse_valid_until(valid_until.as_deref().unwrap_or_default())?;
                let password = prompt::prompt_password("Password")?;
                let id = self
                    .directory
                    .create_user(NewUser {
                        username,
                        password,
                        role,
                        valid_until,
                    })
                    .await?;
                println!("{}", style::success(format!("Created account {id}.")));
            }
            UserAction::Edit(edit) => {
                let record = self.directory.get_user(edit.id).await?;
                let password = if edit.password {
                    let password = prompt::prompt_password("New password")?;
                    if password != prompt::prompt_password("Repeat new password")? {
                        anyhow::bail!("The new passwords do not match.");
                    }
                    Some(password)
                } else {
                    None
                };
                let update = user_update(&record, &edit, password)?;
                let message = self.directory.update_user(edit.id, update).await?;
                println!("{}", style::success(message));
            }
            UserAction::Delete { id } => {
                if !prompt::prompt_yes_no(&format!("Delete account {id}?"), false)? {
                    println!("Nothing deleted.");
                    return Ok(());
                }
                let message = self.directory.delete_user(&admin, id).await?;
                println!("{}", style::success(message));
            }
        }
        Ok(())
    }

    async fn permissions(&mut self, id: i64, codes: Vec<String>) -> anyhow::Result<()> {
        let admin = self.require_admin()?;
        if codes.is_empty() {
            let set = self.directory.user_permissions(id).await?;
            println!("{}", render::permissions(&set));
            return Ok(());
        }
        let set = permission_set(codes);
        let message = self.directory.set_user_permissions(id, &set).await?;
        println!("{}", style::success(message));
        if admin.id == id {
            let view = self.dashboard.permissions_changed(set);
            print!("{}", view.navigation);
        }
        Ok(())
    }
}

fn parse_role(text: &str) -> Result<Role, ClientError> {
    Role::parse(text).ok_or_else(|| {
        ClientError::validation(format!("Unknown role '{text}', expected user or admin."))
    })
}

/// Applies the edited fields over the stored account.
fn user_update(
    record: &UserRecord,
    edit: &UserEdit,
    password: Option<String>,
) -> Result<UserUpdate, ClientError> {
    let role = match &edit.role {
        Some(role) => parse_role(role)?,
        None => record.role,
    };
    let valid_until = match &edit.valid_until {
        Some(text) => parse_valid_until(text)?,
        None => record.valid_until,
    };
    Ok(UserUpdate {
        username: edit.username.clone().unwrap_or_else(|| record.username.clone()),
        role,
        is_active: (record.is_active || edit.enable) && !edit.disable,
        password,
        valid_until,
    })
}

/// Where a download lands: a given file, a file inside a given directory,
/// or the working directory.
fn output_path(out: Option<&Path>, filename: &str) -> PathBuf {
    match out {
        Some(dir) if dir.is_dir() => dir.join(filename),
        Some(file) => file.to_path_buf(),
        None => PathBuf::from(filename),
    }
}

fn print_help() {
    let command = ShellLine::command();
    for sub in command.get_subcommands() {
        let about = sub.get_about().map(ToString::to_string).unwrap_or_default();
        println!("  {} {about}", style::accent(format!("{:<14}", sub.get_name())));
    }
}
