//! Execution environment handed to the playbook process

use std::collections::BTreeMap;
use std::fmt;

use secrecy::{ExposeSecret, SecretString};

pub const BECOME_PASSWORD_VAR: &str = "ANSIBLE_BECOME_PASSWORD";
pub const SSH_PASSWORD_VAR: &str = "ANSIBLE_SSH_PASSWORD";

const REDACTED: &str = "********";

/// Variables forcing line-oriented, colour-free tool output
pub const TOOL_ENV: &[(&str, &str)] = &[
    ("PYTHONUNBUFFERED", "1"),
    ("ANSIBLE_FORCE_COLOR", "0"),
    ("ANSIBLE_STDOUT_CALLBACK", "default"),
    ("ANSIBLE_HOST_KEY_CHECKING", "False"),
];

/// Secrets and extra variables for one execution.
///
/// Secrets stay wrapped until the moment the process is spawned; `Debug`
/// never shows them.
#[derive(Default)]
pub struct ExecutionEnvironment {
    become_password: Option<SecretString>,
    ssh_password: Option<SecretString>,
    vars: BTreeMap<String, String>,
}

impl ExecutionEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_become_password(mut self, password: impl Into<String>) -> Self {
        self.become_password = non_empty_secret(password.into());
        self
    }

    pub fn with_ssh_password(mut self, password: impl Into<String>) -> Self {
        self.ssh_password = non_empty_secret(password.into());
        self
    }

    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    /// Build from a plain map, lifting the well-known secret variables out
    pub fn from_map(mut vars: BTreeMap<String, String>) -> Self {
        let become_password = vars.remove(BECOME_PASSWORD_VAR).and_then(non_empty_secret);
        let ssh_password = vars.remove(SSH_PASSWORD_VAR).and_then(non_empty_secret);
        Self {
            become_password,
            ssh_password,
            vars,
        }
    }

    pub fn has_become_password(&self) -> bool {
        self.become_password.is_some()
    }

    pub fn has_ssh_password(&self) -> bool {
        self.ssh_password.is_some()
    }

    pub fn vars(&self) -> &BTreeMap<String, String> {
        &self.vars
    }

    /// Variables for the child process, secrets exposed. Never log this.
    pub fn process_env(&self) -> Vec<(String, String)> {
        let mut env: Vec<(String, String)> = self
            .vars
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if let Some(secret) = &self.become_password {
            env.push((BECOME_PASSWORD_VAR.to_string(), secret.expose_secret().to_string()));
        }
        if let Some(secret) = &self.ssh_password {
            env.push((SSH_PASSWORD_VAR.to_string(), secret.expose_secret().to_string()));
        }
        env
    }

    /// Byte length of the longest secret, 0 without secrets
    pub fn longest_secret(&self) -> usize {
        [&self.become_password, &self.ssh_password]
            .into_iter()
            .flatten()
            .map(|secret| secret.expose_secret().len())
            .max()
            .unwrap_or(0)
    }

    /// Replace every secret value occurring in `text`
    pub fn scrub(&self, text: &str) -> String {
        let mut scrubbed = text.to_string();
        for secret in [&self.become_password, &self.ssh_password].into_iter().flatten() {
            let value = secret.expose_secret();
            if !value.is_empty() && scrubbed.contains(value) {
                scrubbed = scrubbed.replace(value, REDACTED);
            }
        }
        scrubbed
    }
}

impl Clone for ExecutionEnvironment {
    fn clone(&self) -> Self {
        Self {
            become_password: self.become_password.as_ref().map(clone_secret),
            ssh_password: self.ssh_password.as_ref().map(clone_secret),
            vars: self.vars.clone(),
        }
    }
}

impl fmt::Debug for ExecutionEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionEnvironment")
            .field("become_password", &self.become_password.as_ref().map(|_| REDACTED))
            .field("ssh_password", &self.ssh_password.as_ref().map(|_| REDACTED))
            .field("vars", &self.vars.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn non_empty_secret(value: String) -> Option<SecretString> {
    if value.is_empty() {
        None
    } else {
        Some(SecretString::from(value))
    }
}

fn clone_secret(secret: &SecretString) -> SecretString {
    SecretString::from(secret.expose_secret().to_owned())
}
