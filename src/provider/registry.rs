use std::{collections::HashMap, env, fmt, sync::Arc, time::Duration};

use eyre::{eyre, WrapErr as _};

use super::{Provider, WebhookProvider};

/// Builds a provider from its configuration.
pub type ProviderFactory =
    Box<dyn Fn(&ProviderConfig) -> eyre::Result<Arc<dyn Provider>> + Send + Sync>;

/// Provider constructors by name.
///
/// Built once at startup and handed to whoever needs providers; there is no global
/// registration.
///
/// ```
/// use acme::provider::{Provider as _, ProviderConfig, ProviderRegistry};
///
/// let registry = ProviderRegistry::with_builtin();
/// let config = ProviderConfig::new().with("url", "https://dns.example.net/api");
/// let provider = registry.build("webhook", &config).unwrap();
/// assert_eq!(provider.name(), "webhook");
/// ```
pub struct ProviderRegistry {
    factories: HashMap<String, ProviderFactory>,
}

impl ProviderRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// A registry holding the providers shipped with this crate.
    pub fn with_builtin() -> Self {
        Self::new().with("webhook", |config| {
            Ok(Arc::new(WebhookProvider::from_config(config)?) as Arc<dyn Provider>)
        })
    }

    /// Adds (or replaces) the constructor for `name`.
    pub fn with<F>(mut self, name: &str, factory: F) -> Self
    where
        F: Fn(&ProviderConfig) -> eyre::Result<Arc<dyn Provider>> + Send + Sync + 'static,
    {
        self.factories.insert(name.to_owned(), Box::new(factory));
        self
    }

    /// Builds the provider registered as `name`.
    pub fn build(&self, name: &str, config: &ProviderConfig) -> eyre::Result<Arc<dyn Provider>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| eyre!("unknown DNS provider {name:?}, known: {:?}", self.names()))?;

        factory(config).wrap_err_with(|| format!("configure DNS provider {name}"))
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names = self.factories.keys().map(String::as_str).collect::<Vec<_>>();
        names.sort_unstable();
        names
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.names())
            .finish()
    }
}

/// Settings for one provider, as lowercase key/value pairs.
///
/// Keys understood by every provider:
///
/// - `propagation_timeout`, `polling_interval`: seconds, become the provider's
///   [`TimeoutPolicy`](super::TimeoutPolicy).
/// - `sequence_interval`: seconds, makes the provider [sequential](super::SequentialPolicy).
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ProviderConfig {
    values: HashMap<String, String>,
}

impl ProviderConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.values.insert(key.to_ascii_lowercase(), value.into());
        self
    }

    /// Collects the variables named `{prefix}_*`; `WEBHOOK_URL` becomes `url` for prefix
    /// `WEBHOOK`.
    pub fn from_env(prefix: &str) -> Self {
        Self::from_vars(prefix, env::vars())
    }

    fn from_vars(prefix: &str, vars: impl IntoIterator<Item = (String, String)>) -> Self {
        let prefix = format!("{}_", prefix.to_ascii_uppercase());

        let values = vars
            .into_iter()
            .filter_map(|(name, value)| {
                let key = name.strip_prefix(&prefix)?;
                (!key.is_empty()).then(|| (key.to_ascii_lowercase(), value))
            })
            .collect();

        Self { values }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Like [`get`](Self::get), but missing keys are an error.
    pub fn require(&self, key: &str) -> eyre::Result<&str> {
        self.get(key)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| eyre!("missing provider setting {key:?}"))
    }

    /// Reads `key` as a whole number of seconds.
    pub fn secs(&self, key: &str) -> eyre::Result<Option<Duration>> {
        self.get(key)
            .map(|value| {
                value
                    .trim()
                    .parse::<u64>()
                    .map(Duration::from_secs)
                    .wrap_err_with(|| format!("provider setting {key:?} must be seconds, got {value:?}"))
            })
            .transpose()
    }

    /// The capabilities every provider can be configured with.
    pub(crate) fn capabilities(&self) -> eyre::Result<super::Capabilities> {
        let mut caps = super::Capabilities::default();

        let timeout = self.secs("propagation_timeout")?;
        let interval = self.secs("polling_interval")?;
        if timeout.is_some() || interval.is_some() {
            let defaults = crate::dns::PropagationConfig::default();
            caps = caps.with_timeout(
                timeout.unwrap_or(defaults.timeout),
                interval.unwrap_or(defaults.interval),
            );
        }

        if let Some(interval) = self.secs("sequence_interval")? {
            caps = caps.with_sequential(interval);
        }

        Ok(caps)
    }
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // values may hold credentials
        let mut keys = self.values.keys().collect::<Vec<_>>();
        keys.sort_unstable();
        f.debug_struct("ProviderConfig").field("keys", &keys).finish()
    }
}
