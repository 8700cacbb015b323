//! Environment variables the bootstrap consults outside the layered settings.

pub const OAUTH2_CALLBACK_VAR: &str = "OAUTH2_CALLBACK";
pub const GAE_INSTANCE_VAR: &str = "GAE_INSTANCE";
pub const DATASTORE_EMULATOR_HOST_VAR: &str = "DATASTORE_EMULATOR_HOST";

/// Snapshot of the process environment taken once at startup.
///
/// Empty values are treated the same as unset ones. Other values are kept verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeEnv {
    oauth2_callback: Option<String>,
    gae_instance: Option<String>,
    datastore_emulator_host: Option<String>,
}

impl RuntimeEnv {
    /// Read the relevant variables from the current process environment.
    pub fn capture() -> Self {
        Self::from_vars(std::env::vars())
    }

    /// Build a snapshot from arbitrary key/value pairs; unknown keys are ignored.
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut env = Self::default();
        for (key, value) in vars {
            let value = Some(value.into()).filter(|value| !value.is_empty());
            match key.as_ref() {
                OAUTH2_CALLBACK_VAR => env.oauth2_callback = value,
                GAE_INSTANCE_VAR => env.gae_instance = value,
                DATASTORE_EMULATOR_HOST_VAR => env.datastore_emulator_host = value,
                _ => {}
            }
        }
        env
    }

    pub fn oauth2_callback(&self) -> Option<&str> {
        self.oauth2_callback.as_deref()
    }

    /// Running on App Engine, where Cloud SQL is reached through its unix socket.
    pub fn is_production(&self) -> bool {
        self.gae_instance.is_some()
    }

    pub fn datastore_emulator_host(&self) -> Option<&str> {
        self.datastore_emulator_host.as_deref()
    }
}
