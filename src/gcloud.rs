use serde::Deserialize;
use std::{
    io::{self, Read, Write},
    process::{Command, Output, Stdio},
};

use crate::error::{GctxError, Result};

/// The gcloud operations account switching depends on.
pub trait CloudCli {
    /// Create a named configuration. An existing one is not an error.
    fn create_config(&self, name: &str) -> Result<()>;
    fn activate_config(&self, name: &str) -> Result<()>;
    fn delete_config(&self, name: &str) -> Result<()>;
    fn list_configs(&self) -> Result<Vec<String>>;
    fn set_project(&self, project_id: &str) -> Result<()>;
    /// Account of the active configuration, if one is logged in.
    fn current_account(&self) -> Result<Option<String>>;
    /// Interactive `auth login`.
    fn auth_login(&self) -> Result<()>;
    /// Interactive `auth application-default login`. Returns warning lines
    /// seen on its stderr.
    fn adc_login(&self) -> Result<Vec<String>>;
    /// Pass-through invocation with inherited stdio.
    fn run(&self, args: &[String]) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct Gcloud {
    program: String,
}

impl Gcloud {
    pub fn new(program: impl Into<String>) -> Self {
        Gcloud {
            program: program.into(),
        }
    }

    fn command(&self, args: &[&str]) -> Command {
        tracing::debug!("running {} {}", self.program, args.join(" "));
        let mut cmd = Command::new(&self.program);
        cmd.args(args);
        cmd
    }

    fn describe(&self, args: &[&str]) -> String {
        format!("{} {}", self.program, args.join(" "))
    }

    fn output(&self, args: &[&str]) -> Result<Output> {
        self.command(args).output().map_err(|e| self.spawn_error(args, e))
    }

    fn spawn_error(&self, args: &[&str], e: io::Error) -> GctxError {
        GctxError::ExternalTool {
            command: self.describe(args),
            message: format!("cannot run {}: {e}", self.program),
        }
    }

    /// Run with captured output, failing on a non-zero exit.
    fn checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.output(args)?;
        if !output.status.success() {
            return Err(GctxError::ExternalTool {
                command: self.describe(args),
                message: failure_message(&output),
            });
        }
        Ok(output)
    }

    /// Run attached to the user's terminal.
    fn interactive(&self, args: &[&str]) -> Result<()> {
        let status = self
            .command(args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .map_err(|e| self.spawn_error(args, e))?;

        if !status.success() {
            return Err(GctxError::ExternalTool {
                command: self.describe(args),
                message: format!("exited with {status}"),
            });
        }
        Ok(())
    }
}

impl CloudCli for Gcloud {
    fn create_config(&self, name: &str) -> Result<()> {
        let args = ["config", "configurations", "create", name];
        let output = self.output(&args)?;
        if output.status.success() {
            return Ok(());
        }

        let message = failure_message(&output);
        if message.contains("already exists") {
            tracing::debug!("configuration {name} already exists");
            return Ok(());
        }
        Err(GctxError::ExternalTool {
            command: self.describe(&args),
            message,
        })
    }

    fn activate_config(&self, name: &str) -> Result<()> {
        self.checked(&["config", "configurations", "activate", name])
            .map(|_| ())
    }

    fn delete_config(&self, name: &str) -> Result<()> {
        self.checked(&["config", "configurations", "delete", name, "--quiet"])
            .map(|_| ())
    }

    fn list_configs(&self) -> Result<Vec<String>> {
        let args = ["config", "configurations", "list", "--format=json"];
        let output = self.checked(&args)?;
        parse_config_names(&output.stdout).map_err(|e| GctxError::ExternalTool {
            command: self.describe(&args),
            message: format!("unexpected output: {e}"),
        })
    }

    fn set_project(&self, project_id: &str) -> Result<()> {
        self.checked(&["config", "set", "project", project_id])
            .map(|_| ())
    }

    fn current_account(&self) -> Result<Option<String>> {
        let output = self.checked(&["config", "get-value", "account"])?;
        let account = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok((!account.is_empty() && account != "(unset)").then_some(account))
    }

    fn auth_login(&self) -> Result<()> {
        self.interactive(&["auth", "login"])
    }

    fn adc_login(&self) -> Result<Vec<String>> {
        let args = ["auth", "application-default", "login"];
        let mut child = self
            .command(&args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.spawn_error(&args, e))?;

        // gcloud prints the browser URL and prompts on stderr, so echo while collecting.
        let warnings = match child.stderr.take() {
            Some(stderr) => tee_warnings(stderr, io::stderr()).unwrap_or_else(|e| {
                tracing::warn!("lost gcloud stderr: {e}");
                Vec::new()
            }),
            None => Vec::new(),
        };

        let status = child.wait().map_err(|e| self.spawn_error(&args, e))?;
        if !status.success() {
            return Err(GctxError::ExternalTool {
                command: self.describe(&args),
                message: format!("exited with {status}"),
            });
        }
        Ok(warnings)
    }

    fn run(&self, args: &[String]) -> Result<()> {
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        self.interactive(&args)
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn failure_message(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if !stderr.is_empty() {
        return stderr;
    }
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if !stdout.is_empty() {
        return stdout;
    }
    format!("exited with {}", output.status)
}

/// Copy `source` to `terminal` as bytes arrive, then pick warning lines out
/// of everything that was seen.
fn tee_warnings(mut source: impl Read, mut terminal: impl Write) -> io::Result<Vec<String>> {
    let mut seen = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = match source.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        let _ = terminal.write_all(&buf[..n]);
        let _ = terminal.flush();
        seen.extend_from_slice(&buf[..n]);
    }

    Ok(String::from_utf8_lossy(&seen)
        .lines()
        .filter(|line| is_warning(line))
        .map(|line| line.trim().to_string())
        .collect())
}

fn is_warning(line: &str) -> bool {
    line.contains("WARNING") || line.contains("quota")
}

fn parse_config_names(stdout: &[u8]) -> serde_json::Result<Vec<String>> {
    #[derive(Deserialize)]
    struct Configuration {
        name: String,
    }

    let configs: Vec<Configuration> = serde_json::from_slice(stdout)?;
    Ok(configs.into_iter().map(|c| c.name).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warning_and_quota_lines_are_collected() {
        let stderr = "Your browser has been opened to visit:\n\
                      \n\
                      Credentials saved to file: [/home/u/.config/gcloud/application_default_credentials.json]\n\
                      \n\
                      These credentials will be used by any library that requests ADC.\n\
                      WARNING: Cannot find a quota project to add to ADC.\n\
                      Quota project \"p1\" was added to ADC which can be used by Google client libraries for billing and quota.";

        let warnings: Vec<&str> = stderr.lines().filter(|l| is_warning(l)).collect();
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].starts_with("WARNING:"));
        assert!(warnings[1].contains("billing and quota"));
    }

    #[test]
    fn stderr_is_echoed_verbatim_including_unterminated_prompts() {
        let mut stderr = b"Go to the following link in your browser:\n\n    https://accounts.google.com/o/oauth2/auth\n".to_vec();
        stderr.extend_from_slice(b"bad bytes \xff\xfe here\n");
        stderr.extend_from_slice(b"WARNING: Cannot find a quota project to add to ADC.\n");
        stderr.extend_from_slice(b"Enter authorization code: ");

        let mut terminal = Vec::new();
        let warnings = tee_warnings(stderr.as_slice(), &mut terminal).unwrap();

        assert_eq!(terminal, stderr);
        assert_eq!(
            warnings,
            vec!["WARNING: Cannot find a quota project to add to ADC.".to_string()]
        );
    }

    #[test]
    fn config_names_are_read_from_json_listing() {
        let stdout = br#"[
          {"is_active": true, "name": "default", "properties": {"core": {"project": "p0"}}},
          {"is_active": false, "name": "dev-config", "properties": {}}
        ]"#;
        assert_eq!(
            parse_config_names(stdout).unwrap(),
            vec!["default".to_string(), "dev-config".to_string()]
        );
        assert!(parse_config_names(b"not json").is_err());
    }

    #[test]
    fn missing_binary_is_external_tool_failure() {
        let gcloud = Gcloud::new("gctx-test-no-such-binary");
        let err = gcloud.set_project("p1").unwrap_err();
        assert!(matches!(err, GctxError::ExternalTool { .. }));
        assert!(!err.needs_reauth());
    }

    #[cfg(unix)]
    mod scripted {
        use crate::{
            error::GctxError,
            gcloud::{CloudCli, Gcloud},
        };
        use std::{fs, os::unix::fs::PermissionsExt};
        use tempfile::TempDir;

        const FAKE_GCLOUD: &str = r#"#!/bin/sh
case "$*" in
  "config configurations create new-config")
    echo "Created [new-config]." >&2; exit 0 ;;
  "config configurations create dev-config")
    echo "ERROR: (gcloud.config.configurations.create) Cannot create configuration [dev-config], it already exists." >&2; exit 1 ;;
  "config configurations create Bad-config")
    echo "ERROR: (gcloud.config.configurations.create) Invalid name [Bad-config]." >&2; exit 1 ;;
  "config set project p1")
    echo "ERROR: (gcloud.config.set) Reauthentication required." >&2; exit 1 ;;
  "config get-value account")
    echo "(unset)"; exit 0 ;;
esac
echo "unexpected: $*" >&2
exit 2
"#;

        fn fake_gcloud(dir: &TempDir) -> Gcloud {
            let path = dir.path().join("gcloud");
            fs::write(&path, FAKE_GCLOUD).unwrap();
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
            Gcloud::new(path.to_string_lossy())
        }

        #[test]
        fn create_config_tolerates_existing_configuration() {
            let dir = TempDir::new().unwrap();
            let gcloud = fake_gcloud(&dir);

            gcloud.create_config("new-config").unwrap();
            gcloud.create_config("dev-config").unwrap();
        }

        #[test]
        fn create_config_fails_on_other_errors() {
            let dir = TempDir::new().unwrap();
            let gcloud = fake_gcloud(&dir);

            let err = gcloud.create_config("Bad-config").unwrap_err();
            match err {
                GctxError::ExternalTool { message, .. } => {
                    assert!(message.contains("Invalid name"), "{message}")
                }
                other => panic!("expected external tool failure, got {other:?}"),
            }
        }

        #[test]
        fn reauth_is_recognised_from_set_project_stderr() {
            let dir = TempDir::new().unwrap();
            let gcloud = fake_gcloud(&dir);

            let err = gcloud.set_project("p1").unwrap_err();
            assert!(err.needs_reauth(), "{err}");
        }

        #[test]
        fn unset_account_resolves_to_none() {
            let dir = TempDir::new().unwrap();
            let gcloud = fake_gcloud(&dir);

            assert_eq!(gcloud.current_account().unwrap(), None);
        }
    }
}
