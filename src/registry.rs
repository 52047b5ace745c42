use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

use crate::error::{GctxError, Result};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Account {
    pub name: String,
    pub config_name: String,
    pub project_id: String,
    /// Slot the account's ADC was last saved to; empty until the first save.
    #[serde(default)]
    pub adc_path: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub email: String,
}

impl Account {
    pub fn new(name: &str, project_id: &str) -> Self {
        Account {
            name: name.to_string(),
            config_name: config_name_for(name),
            project_id: project_id.to_string(),
            adc_path: String::new(),
            created_at: Utc::now(),
            email: String::new(),
        }
    }

    pub fn stored_credentials(&self) -> Option<&Path> {
        (!self.adc_path.is_empty()).then(|| Path::new(&self.adc_path))
    }
}

/// Name of the gcloud configuration backing an account.
pub fn config_name_for(name: &str) -> String {
    format!("{name}-config")
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
struct RegistryFile {
    #[serde(default)]
    accounts: HashMap<String, Account>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    active_account: Option<String>,
}

/// The on-disk account registry. Every mutation rewrites the whole file
/// before returning.
#[derive(Debug)]
pub struct Registry {
    path: PathBuf,
    file: RegistryFile,
}

impl Registry {
    /// Load the registry at `path`. A missing file is an empty registry.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut file = match fs::read_to_string(&path) {
            Ok(content) if content.trim().is_empty() => RegistryFile::default(),
            Ok(content) => {
                serde_json::from_str(&content).map_err(|source| GctxError::InvalidFormat {
                    path: path.clone(),
                    source,
                })?
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => RegistryFile::default(),
            Err(e) => return Err(GctxError::io(path, e)),
        };

        if let Some(active) = file.active_account.take() {
            if file.accounts.contains_key(&active) {
                file.active_account = Some(active);
            } else if !active.is_empty() {
                tracing::warn!("active account '{active}' is not registered; clearing it");
            }
        }

        Ok(Registry { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).map_err(|e| GctxError::io(dir, e))?;
        }
        let content = serde_json::to_string_pretty(&self.file)
            .map_err(|e| GctxError::io(&self.path, io::Error::other(e)))?;
        write_atomic(&self.path, &content)
    }

    pub fn add(&mut self, account: Account) -> Result<()> {
        if self.file.accounts.contains_key(&account.name) {
            return Err(GctxError::AlreadyExists(account.name));
        }
        self.file.accounts.insert(account.name.clone(), account);
        self.save()
    }

    pub fn get(&self, name: &str) -> Result<&Account> {
        self.file
            .accounts
            .get(name)
            .ok_or_else(|| GctxError::AccountNotFound(name.to_string()))
    }

    pub fn delete(&mut self, name: &str) -> Result<Account> {
        let removed = self
            .file
            .accounts
            .remove(name)
            .ok_or_else(|| GctxError::AccountNotFound(name.to_string()))?;
        if self.file.active_account.as_deref() == Some(name) {
            self.file.active_account = None;
        }
        self.save()?;
        Ok(removed)
    }

    /// All accounts, sorted by name.
    pub fn list(&self) -> Vec<&Account> {
        let mut accounts: Vec<&Account> = self.file.accounts.values().collect();
        accounts.sort_by(|a, b| a.name.cmp(&b.name));
        accounts
    }

    pub fn set_active(&mut self, name: &str) -> Result<()> {
        self.get(name)?;
        self.file.active_account = Some(name.to_string());
        self.save()
    }

    pub fn active(&self) -> Option<&str> {
        self.file.active_account.as_deref()
    }

    /// Record where an account's credentials were saved and who they belong to.
    pub fn record_credentials(&mut self, name: &str, slot: &Path, email: &str) -> Result<()> {
        let account = self
            .file
            .accounts
            .get_mut(name)
            .ok_or_else(|| GctxError::AccountNotFound(name.to_string()))?;
        account.adc_path = slot.to_string_lossy().into_owned();
        account.email = email.to_string();
        self.save()
    }
}

/// Write `content` to a temp file beside `path`, then rename it into place.
fn write_atomic(path: &Path, content: &str) -> Result<()> {
    let temp_path = path.with_extension(format!("tmp.{}", std::process::id()));

    {
        let mut f = fs::File::create(&temp_path).map_err(|e| GctxError::io(&temp_path, e))?;
        f.write_all(content.as_bytes())
            .map_err(|e| GctxError::io(&temp_path, e))?;
        f.flush().map_err(|e| GctxError::io(&temp_path, e))?;
    }

    fs::rename(&temp_path, path).map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        GctxError::io(path, e)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn registry_path(dir: &TempDir) -> PathBuf {
        dir.path().join("gctx").join("config.json")
    }

    #[test]
    fn missing_file_is_empty_registry() {
        let dir = TempDir::new().unwrap();
        let registry = Registry::load(registry_path(&dir)).unwrap();
        assert!(registry.list().is_empty());
        assert_eq!(registry.active(), None);
        assert!(!registry.path().exists());
    }

    #[test]
    fn add_round_trips_through_disk() {
        let dir = TempDir::new().unwrap();
        let mut registry = Registry::load(registry_path(&dir)).unwrap();
        let mut account = Account::new("dev", "p1");
        account.email = "dev@example.com".into();
        account.adc_path = "/somewhere/dev_adc.json".into();

        registry.add(account.clone()).unwrap();

        let reloaded = Registry::load(registry_path(&dir)).unwrap();
        assert_eq!(reloaded.get("dev").unwrap(), &account);
        assert_eq!(reloaded.get("dev").unwrap().config_name, "dev-config");
    }

    #[test]
    fn duplicate_add_is_rejected_and_keeps_original() {
        let dir = TempDir::new().unwrap();
        let mut registry = Registry::load(registry_path(&dir)).unwrap();
        let original = Account::new("dev", "p1");
        registry.add(original.clone()).unwrap();

        let err = registry.add(Account::new("dev", "p2")).unwrap_err();

        assert!(matches!(err, GctxError::AlreadyExists(ref n) if n == "dev"));
        assert_eq!(registry.get("dev").unwrap(), &original);
        let reloaded = Registry::load(registry_path(&dir)).unwrap();
        assert_eq!(reloaded.get("dev").unwrap().project_id, "p1");
    }

    #[test]
    fn deleting_active_account_clears_pointer() {
        let dir = TempDir::new().unwrap();
        let mut registry = Registry::load(registry_path(&dir)).unwrap();
        registry.add(Account::new("dev", "p1")).unwrap();
        registry.add(Account::new("prod", "p2")).unwrap();
        registry.set_active("dev").unwrap();

        registry.delete("prod").unwrap();
        assert_eq!(registry.active(), Some("dev"));

        registry.delete("dev").unwrap();
        assert_eq!(registry.active(), None);

        let reloaded = Registry::load(registry_path(&dir)).unwrap();
        assert_eq!(reloaded.active(), None);
        assert!(reloaded.list().is_empty());
    }

    #[test]
    fn unknown_names_are_not_found() {
        let dir = TempDir::new().unwrap();
        let mut registry = Registry::load(registry_path(&dir)).unwrap();

        assert!(registry.get("ghost").unwrap_err().is_not_found());
        assert!(registry.delete("ghost").unwrap_err().is_not_found());
        assert!(registry.set_active("ghost").unwrap_err().is_not_found());
        assert!(!registry.path().exists());
    }

    #[test]
    fn persisted_layout_uses_snake_case_keys() {
        let dir = TempDir::new().unwrap();
        let mut registry = Registry::load(registry_path(&dir)).unwrap();
        registry.add(Account::new("dev", "p1")).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(registry_path(&dir)).unwrap()).unwrap();
        assert!(raw.get("active_account").is_none());
        let dev = &raw["accounts"]["dev"];
        assert_eq!(dev["config_name"], "dev-config");
        assert_eq!(dev["project_id"], "p1");
        assert_eq!(dev["adc_path"], "");
        assert!(dev.get("email").is_none());

        registry.set_active("dev").unwrap();
        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(registry_path(&dir)).unwrap()).unwrap();
        assert_eq!(raw["active_account"], "dev");
    }

    #[test]
    fn dangling_active_pointer_is_dropped_on_load() {
        let dir = TempDir::new().unwrap();
        let path = registry_path(&dir);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, r#"{"accounts": {}, "active_account": "gone"}"#).unwrap();

        let registry = Registry::load(&path).unwrap();
        assert_eq!(registry.active(), None);
    }

    #[test]
    fn failed_save_is_io_not_invalid_format() {
        let dir = TempDir::new().unwrap();
        // A regular file where the config directory should be.
        fs::write(dir.path().join("gctx"), "").unwrap();
        let mut registry = Registry::load(registry_path(&dir)).unwrap();

        let err = registry.add(Account::new("dev", "p1")).unwrap_err();
        assert!(matches!(err, GctxError::Io { .. }), "{err:?}");
    }

    #[test]
    fn corrupt_registry_is_invalid_format() {
        let dir = TempDir::new().unwrap();
        let path = registry_path(&dir);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "{ accounts").unwrap();

        assert!(matches!(
            Registry::load(&path).unwrap_err(),
            GctxError::InvalidFormat { .. }
        ));
    }

    #[test]
    fn record_credentials_persists_slot_and_email() {
        let dir = TempDir::new().unwrap();
        let mut registry = Registry::load(registry_path(&dir)).unwrap();
        registry.add(Account::new("dev", "p1")).unwrap();

        registry
            .record_credentials("dev", Path::new("/x/dev_adc.json"), "dev@example.com")
            .unwrap();

        let reloaded = Registry::load(registry_path(&dir)).unwrap();
        let dev = reloaded.get("dev").unwrap();
        assert_eq!(dev.stored_credentials(), Some(Path::new("/x/dev_adc.json")));
        assert_eq!(dev.email, "dev@example.com");
    }
}
