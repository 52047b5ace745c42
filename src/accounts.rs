use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local};
use colored::Colorize;
use std::{fs, time::Duration};

use crate::{
    config::{display_path, Settings},
    credentials::{self, CredentialStore},
    gcloud::{CloudCli, Gcloud},
    registry::{config_name_for, Account, Registry},
    watcher::Watcher,
};

/// Coordinates the registry, the credential store and gcloud. Holds no state
/// of its own beyond the loaded registry.
pub struct Manager<C: CloudCli> {
    registry: Registry,
    store: CredentialStore,
    watcher: Watcher,
    cli: C,
    watch_timeout: Duration,
}

impl Manager<Gcloud> {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Manager::new(settings, Gcloud::new(&settings.gcloud))
    }
}

impl<C: CloudCli> Manager<C> {
    pub fn new(settings: &Settings, cli: C) -> Result<Self> {
        let registry = Registry::load(settings.registry_path())
            .context("Cannot load gctx account registry")?;
        tracing::debug!("registry: {}", registry.path().display());

        Ok(Manager {
            registry,
            store: CredentialStore::new(&settings.adc_path, settings.slot_dir()),
            watcher: Watcher::new(&settings.adc_path),
            cli,
            watch_timeout: settings.watch_timeout,
        })
    }

    // ── Create ────────────────────────────────────────────────────────────────

    pub fn create(&mut self, name: &str, project_id: &str, auto_save: bool) -> Result<()> {
        validate_name(name)?;
        let config_name = config_name_for(name);

        self.cli.create_config(&config_name)?;
        println!(
            "  {} Created gcloud configuration {}",
            "✓".green().bold(),
            config_name.bold()
        );

        self.cli.activate_config(&config_name)?;
        self.cli
            .set_project(project_id)
            .with_context(|| format!("Cannot set project {project_id}"))?;
        println!("  {} Set project {}", "✓".green().bold(), project_id.bold());

        self.registry.add(Account::new(name, project_id))?;
        println!("  {} Account {} added\n", "✓".green().bold(), name.bold());

        if auto_save {
            return self.auto_auth(name);
        }

        println!("  Now run the following commands:");
        println!("    {} {}", "1.".dimmed(), "gcloud auth login".cyan());
        println!(
            "    {} {}",
            "2.".dimmed(),
            "gcloud auth application-default login".cyan()
        );
        println!("    {} {}\n", "3.".dimmed(), format!("gctx save {name}").cyan());
        Ok(())
    }

    // ── Login ─────────────────────────────────────────────────────────────────

    pub fn login(&mut self, name: &str) -> Result<()> {
        self.switch(name)
            .context("Failed to switch to account before login")?;
        self.auto_auth(name)
    }

    fn auto_auth(&mut self, name: &str) -> Result<()> {
        println!("  {} Running gcloud auth login...", "→".cyan().bold());
        self.cli.auth_login().context("Auth login failed")?;
        println!("  {} Logged in", "✓".green().bold());

        println!(
            "  {} Running application default credentials login...",
            "→".cyan().bold()
        );
        let warnings = self.cli.adc_login().context("ADC login failed")?;

        if let Err(e) = self.watcher.wait_for_update(self.watch_timeout) {
            println!("  {} {}", "!".yellow().bold(), e);
        }

        let slot = self
            .store
            .save(name)
            .with_context(|| format!("Cannot save credentials for {name}"))?;
        let email = self.resolve_email();
        self.registry.record_credentials(name, &slot, &email)?;

        println!(
            "  {} Credentials saved for {} to {}\n",
            "✓".green().bold(),
            name.bold(),
            display_path(&slot).dimmed()
        );

        if !warnings.is_empty() {
            println!("  {}", "Warnings:".yellow().bold());
            for warning in &warnings {
                println!("    {warning}");
            }
            println!();
        }

        println!("  Account {} is ready to use.", name.green().bold());
        println!("  Run {}\n", format!("gctx switch {name}").cyan().bold());
        Ok(())
    }

    // ── Switch ────────────────────────────────────────────────────────────────

    pub fn switch(&mut self, name: &str) -> Result<()> {
        let account = self.registry.get(name)?.clone();

        self.store
            .restore(name)
            .with_context(|| format!("Cannot restore credentials for {name}"))?;
        self.cli.activate_config(&account.config_name)?;

        // Project binding is advisory; the switch stands either way.
        if let Err(e) = self.cli.set_project(&account.project_id) {
            if e.needs_reauth() {
                println!(
                    "\n  {} Cannot set project {} because re-authentication is required.",
                    "!".yellow().bold(),
                    account.project_id
                );
                println!("  Run {}\n", format!("gctx login {name}").cyan().bold());
            } else {
                println!("  {} Failed to set project: {}", "!".yellow().bold(), e);
            }
        }

        self.registry.set_active(name)?;

        println!(
            "  {} Switched to {} {}",
            "▶".green().bold(),
            name.bold(),
            format!("({})", account.project_id).dimmed()
        );
        Ok(())
    }

    // ── Save ──────────────────────────────────────────────────────────────────

    pub fn save_credentials(&mut self, name: &str) -> Result<()> {
        self.registry.get(name)?;

        let slot = self
            .store
            .save(name)
            .with_context(|| format!("Cannot save credentials for {name}"))?;
        let email = self.resolve_email();
        self.registry.record_credentials(name, &slot, &email)?;

        println!(
            "  {} Credentials saved for {} to {}",
            "✓".green().bold(),
            name.bold(),
            display_path(&slot).dimmed()
        );
        Ok(())
    }

    // ── Delete ────────────────────────────────────────────────────────────────

    pub fn delete(&mut self, name: &str, purge_config: bool) -> Result<()> {
        let account = self.registry.get(name)?.clone();

        if let Err(e) = self.store.remove(name) {
            tracing::warn!("ignoring failure to remove stored credentials: {e}");
        }
        if let Some(path) = account.stored_credentials() {
            if path != self.store.slot_path(name) {
                if let Err(e) = fs::remove_file(path) {
                    tracing::warn!("ignoring failure to remove {}: {e}", path.display());
                }
            }
        }

        if purge_config {
            if let Err(e) = self.cli.delete_config(&account.config_name) {
                tracing::warn!("ignoring failure to delete gcloud configuration: {e}");
            }
        }

        self.registry.delete(name)?;
        println!("  {} Deleted account {}", "✓".green().bold(), name.bold());
        Ok(())
    }

    // ── Run ───────────────────────────────────────────────────────────────────

    pub fn run_with_account(&mut self, name: &str, args: &[String]) -> Result<()> {
        self.switch(name)?;
        self.cli.run(args)?;
        Ok(())
    }

    // ── Read-only views ───────────────────────────────────────────────────────

    pub fn list(&self) {
        let accounts = self.registry.list();
        if accounts.is_empty() {
            println!("\n  {}\n", "No accounts configured yet.".dimmed());
            println!(
                "  Run {} to add one.\n",
                "gctx create <name> <project-id>".cyan().bold()
            );
            return;
        }

        let active = self.registry.active();

        println!("\n  {}", "Configured Accounts".bold());
        println!("  {}", "─".repeat(40).dimmed());

        for account in accounts {
            let email = if account.email.is_empty() {
                String::new()
            } else {
                format!(" [{}]", account.email)
            };

            if active == Some(account.name.as_str()) {
                println!(
                    "  {} {} {}{} {}",
                    "▶".green().bold(),
                    account.name.green().bold(),
                    format!("({})", account.project_id).green(),
                    email.green(),
                    "(active)".green().dimmed()
                );
            } else {
                println!(
                    "    {} {}{}",
                    account.name,
                    format!("({})", account.project_id).dimmed(),
                    email.dimmed()
                );
            }
        }

        println!("  {}\n", "─".repeat(40).dimmed());
    }

    pub fn active(&self) {
        match self.registry.active() {
            Some(name) => println!("  {} {}", "▶".green().bold(), name.bold()),
            None => println!(
                "  {} No active account. Run {}",
                "✗".red().bold(),
                "gctx switch <name>".cyan().bold()
            ),
        }
    }

    pub fn info(&self, name: &str) -> Result<()> {
        let account = self.registry.get(name)?;

        println!("\n  {}", format!("Account: {}", account.name).bold());
        println!("  {}", "─".repeat(50).dimmed());
        println!("  Project ID:       {}", account.project_id);
        println!("  Config Name:      {}", account.config_name);

        match self.cli.list_configs() {
            Ok(names) if names.contains(&account.config_name) => {}
            Ok(_) => println!(
                "  {} gcloud configuration {} no longer exists",
                "!".yellow().bold(),
                account.config_name
            ),
            Err(e) => tracing::debug!("cannot list gcloud configurations: {e}"),
        }

        if !account.email.is_empty() {
            println!("  Email:            {}", account.email);
        }

        if let Some(path) = account.stored_credentials() {
            println!("  ADC Path:         {}", display_path(path));
            if let Ok(modified) = fs::metadata(path).and_then(|m| m.modified()) {
                let modified: DateTime<Local> = modified.into();
                println!(
                    "  ADC Modified:     {}",
                    modified.format("%Y-%m-%d %H:%M:%S")
                );
            }
            match credentials::validate(path) {
                Ok(adc) if !adc.quota_project_id.is_empty() => {
                    println!("  Quota Project:    {}", adc.quota_project_id)
                }
                Ok(_) => {}
                Err(e) => println!("  {} Stored credentials are unusable: {}", "!".yellow().bold(), e),
            }
        }

        let created: DateTime<Local> = account.created_at.into();
        println!("  Created:          {}", created.format("%Y-%m-%d %H:%M:%S"));

        if self.registry.active() == Some(account.name.as_str()) {
            println!("\n  {}", "This is the active account.".green());
        }
        println!();
        Ok(())
    }

    fn resolve_email(&self) -> String {
        match self.cli.current_account() {
            Ok(account) => account.unwrap_or_default(),
            Err(e) => {
                tracing::debug!("cannot resolve account email: {e}");
                String::new()
            }
        }
    }
}

/// Account names end up in file names and gcloud configuration names.
fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        bail!("Account name cannot be empty");
    }
    if name.starts_with('-') || name.starts_with('.') {
        bail!("Account name cannot start with '{}'", &name[..1]);
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        bail!("Account name '{name}' may only contain letters, digits, '-' and '_'");
    }
    Ok(())
}
