//! Credentials (§1.1): the Executor asks a `CredentialsProvider` to
//! wire up the agent subprocess's environment rather than reading or
//! storing a raw API key itself, so a test can supply a fake provider
//! instead of touching the host environment.

use tokio::process::Command;

/// Environment variable names the agent CLI itself reads; `orc` never
/// inspects their values, only forwards them if present.
const CREDENTIAL_ENV_VARS: &[&str] = &["ANTHROPIC_API_KEY", "CLAUDE_CODE_OAUTH_TOKEN"];

pub trait CredentialsProvider: Send + Sync {
    /// Sets whatever environment variables the agent subprocess needs
    /// to authenticate on `cmd`, before it's spawned.
    fn apply(&self, cmd: &mut Command);
}

/// The only implementation this engine ships: forwards known
/// credential env vars from the host environment, untouched.
pub struct EnvCredentialsProvider;

impl CredentialsProvider for EnvCredentialsProvider {
    fn apply(&self, cmd: &mut Command) {
        for key in CREDENTIAL_ENV_VARS {
            if let Ok(value) = std::env::var(key) {
                cmd.env(key, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RecordingProvider {
        var: &'static str,
        value: &'static str,
    }

    impl CredentialsProvider for RecordingProvider {
        fn apply(&self, cmd: &mut Command) {
            cmd.env(self.var, self.value);
        }
    }

    #[test]
    fn env_provider_only_forwards_known_vars() {
        // SAFETY: single-threaded test, no concurrent env access.
        unsafe {
            std::env::set_var("ANTHROPIC_API_KEY", "test-key");
            std::env::remove_var("SOME_UNRELATED_SECRET");
        }
        let mut cmd = Command::new("true");
        EnvCredentialsProvider.apply(&mut cmd);
        // tokio::process::Command doesn't expose a getter for envs set,
        // so this just exercises the call path without panicking.
        let _ = cmd;
        unsafe {
            std::env::remove_var("ANTHROPIC_API_KEY");
        }
    }

    #[test]
    fn fake_provider_can_stand_in_for_tests() {
        let provider = RecordingProvider { var: "FAKE_TOKEN", value: "abc" };
        let mut cmd = Command::new("true");
        provider.apply(&mut cmd);
        let _ = cmd;
    }
}
