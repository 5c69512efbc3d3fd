use std::collections::BTreeMap;
use std::error::Error;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fmt, fs, io};

use mouth_metrics::aggregator::AggregatorConfig;
use mouth_sink::SinkAddress;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

type BoxedError = Box<dyn Error + Send + Sync + 'static>;

/// Defines the source of a config error
#[derive(Debug, Default)]
enum ConfigErrorSource {
    /// An error occurring independently.
    #[default]
    None,
    /// An error originating from a configuration file.
    File(PathBuf),
    /// An error originating in a field override (an env var, or a CLI parameter).
    FieldOverride(String),
}

/// Indicates config related errors.
#[derive(Debug)]
pub struct ConfigError {
    source: ConfigErrorSource,
    kind: ConfigErrorKind,
    cause: Option<BoxedError>,
}

impl ConfigError {
    #[inline]
    fn new(kind: ConfigErrorKind) -> Self {
        Self {
            source: ConfigErrorSource::None,
            kind,
            cause: None,
        }
    }

    #[inline]
    fn wrap<E>(cause: E, kind: ConfigErrorKind) -> Self
    where
        E: Into<BoxedError>,
    {
        Self {
            source: ConfigErrorSource::None,
            kind,
            cause: Some(cause.into()),
        }
    }

    #[inline]
    fn for_field<E>(cause: E, field: &'static str) -> Self
    where
        E: Into<BoxedError>,
    {
        Self::wrap(cause, ConfigErrorKind::InvalidValue).field(field)
    }

    #[inline]
    fn file<P: AsRef<Path>>(mut self, p: P) -> Self {
        self.source = ConfigErrorSource::File(p.as_ref().to_path_buf());
        self
    }

    #[inline]
    fn field(mut self, name: &'static str) -> Self {
        self.source = ConfigErrorSource::FieldOverride(name.to_owned());
        self
    }

    /// Returns the error kind of the error.
    pub fn kind(&self) -> ConfigErrorKind {
        self.kind
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            ConfigErrorSource::None => write!(f, "{}", self.kind),
            ConfigErrorSource::File(file_name) => {
                write!(f, "{} (file {})", self.kind, file_name.display())
            }
            ConfigErrorSource::FieldOverride(name) => write!(f, "{} (field {})", self.kind, name),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.cause
            .as_ref()
            .map(|cause| cause.as_ref() as &(dyn Error + 'static))
    }
}

/// Indicates config related errors.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, thiserror::Error)]
pub enum ConfigErrorKind {
    /// Failed to open the file.
    #[error("could not open config file")]
    CouldNotOpenFile,
    /// Failed to save a file.
    #[error("could not write config file")]
    CouldNotWriteFile,
    /// Parsing YAML failed.
    #[error("could not parse yaml config file")]
    BadYaml,
    /// Parsing JSON failed.
    #[error("could not parse json config file")]
    BadJson,
    /// Invalid config value
    #[error("invalid config value")]
    InvalidValue,
    /// More than one sink address is configured.
    #[error("only a single sink address is supported")]
    UnsupportedSinkTopology,
}

enum ConfigFormat {
    Yaml,
}

impl ConfigFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ConfigFormat::Yaml => "yml",
        }
    }
}

trait ConfigObject: DeserializeOwned + Serialize {
    /// The format in which to serialize this configuration.
    fn format() -> ConfigFormat;

    /// The basename of the config file.
    fn name() -> &'static str;

    /// The full filename of the config file, including the file extension.
    fn path(base: &Path) -> PathBuf {
        base.join(format!("{}.{}", Self::name(), Self::format().extension()))
    }

    /// Loads the config file from a file within the given directory location.
    fn load(base: &Path) -> Result<Self, ConfigError> {
        let path = Self::path(base);

        let f = fs::File::open(&path)
            .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::CouldNotOpenFile).file(&path))?;

        match Self::format() {
            ConfigFormat::Yaml => serde_yaml::from_reader(io::BufReader::new(f))
                .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::BadYaml).file(&path)),
        }
    }

    /// Writes the configuration object to the given writer.
    fn write<W: Write>(&self, writer: &mut W) -> Result<(), ConfigError> {
        match Self::format() {
            ConfigFormat::Yaml => serde_yaml::to_writer(writer, self)
                .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::CouldNotWriteFile)),
        }
    }

    /// Writes the configuration to a file within the given directory location.
    fn save(&self, base: &Path) -> Result<(), ConfigError> {
        let path = Self::path(base);
        let mut options = fs::OpenOptions::new();
        options.write(true).truncate(true).create(true);

        // Remove all non-user permissions for the newly created file
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut f = options
            .open(&path)
            .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::CouldNotWriteFile).file(&path))?;

        self.write(&mut f).map_err(|e| e.file(&path))?;
        f.write_all(b"\n").ok();

        Ok(())
    }
}

/// Structure used to hold information about configuration overrides via
/// CLI parameters or environment variables
#[derive(Debug, Default)]
pub struct OverridableConfig {
    /// The host the UDP listener binds to.
    pub host: Option<String>,
    /// The port the UDP listener binds to.
    pub port: Option<String>,
    /// The flush interval in seconds.
    pub flush_interval: Option<String>,
    /// The host of the sink server. Replaces any configured list of sink hosts.
    pub sink_host: Option<String>,
    /// The port of the sink server.
    pub sink_port: Option<String>,
    /// The database to write documents into.
    pub sink_database: Option<String>,
}

/// Returns `true` if this value is equal to `Default::default()`.
fn is_default<T: Default + PartialEq>(t: &T) -> bool {
    *t == T::default()
}

/// Listener specific configuration values.
#[derive(Serialize, Deserialize, Debug)]
#[serde(default)]
pub struct Mouth {
    /// The host the UDP listener binds to.
    pub host: String,
    /// The port the UDP listener binds to.
    pub port: u16,
    /// Maximum time in seconds to wait for services to finish after a shutdown signal.
    pub shutdown_timeout: u64,
}

impl Default for Mouth {
    fn default() -> Self {
        Mouth {
            host: "localhost".to_owned(),
            port: 8889,
            shutdown_timeout: 10,
        }
    }
}

/// Control the document sink.
#[derive(Serialize, Deserialize, Debug)]
#[serde(default)]
struct Sink {
    /// Host of the sink server, used when `hosts` is empty.
    host: String,
    /// Port of the sink server, used when `hosts` is empty.
    port: u16,
    /// Explicit list of `host:port` addresses.
    ///
    /// Only a single address is supported.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    hosts: Vec<SinkAddress>,
    /// The database to write documents into.
    database: String,
    /// Prefix of the collection names. The namespace of a document is appended to it.
    collection_prefix: String,
}

impl Default for Sink {
    fn default() -> Self {
        Sink {
            host: "localhost".to_owned(),
            port: mouth_sink::DEFAULT_SINK_PORT,
            hosts: Vec::new(),
            database: "mouth".to_owned(),
            collection_prefix: "mouth_".to_owned(),
        }
    }
}

/// Control the metrics.
#[derive(Serialize, Deserialize, Debug)]
#[serde(default)]
struct Metrics {
    /// Hostname and port of the statsd server.
    ///
    /// Defaults to `None`.
    statsd: Option<String>,
    /// Common prefix that should be added to all metrics.
    ///
    /// Defaults to `"mouth"`.
    prefix: String,
    /// Default tags to apply to all metrics.
    #[serde(skip_serializing_if = "is_default")]
    default_tags: BTreeMap<String, String>,
    /// Tag name to report the hostname to for each metric. Defaults to not sending such a tag.
    hostname_tag: Option<String>,
    /// Size of the buffer for outgoing metrics in bytes.
    ///
    /// Defaults to the buffer size of the statsd client.
    buffer_size: Option<usize>,
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics {
            statsd: None,
            prefix: "mouth".into(),
            default_tags: BTreeMap::new(),
            hostname_tag: None,
            buffer_size: None,
        }
    }
}

/// Minimal version of a config for dumping out.
#[derive(Serialize, Deserialize, Debug, Default)]
pub struct MinimalConfig {
    /// The listener part of the config.
    pub mouth: Mouth,
}

impl MinimalConfig {
    /// Saves the config in the given config folder as config.yml
    pub fn save_in_folder<P: AsRef<Path>>(&self, p: P) -> Result<(), ConfigError> {
        let path = p.as_ref();
        if fs::metadata(path).is_err() {
            fs::create_dir_all(path)
                .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::CouldNotOpenFile).file(path))?;
        }
        self.save(path)
    }
}

impl ConfigObject for MinimalConfig {
    fn format() -> ConfigFormat {
        ConfigFormat::Yaml
    }

    fn name() -> &'static str {
        "config"
    }
}

#[derive(Serialize, Deserialize, Debug, Default)]
struct ConfigValues {
    #[serde(default)]
    mouth: Mouth,
    #[serde(default)]
    aggregator: AggregatorConfig,
    #[serde(default)]
    sink: Sink,
    #[serde(default)]
    logging: mouth_log::LogConfig,
    #[serde(default)]
    sentry: mouth_log::SentryConfig,
    #[serde(default)]
    metrics: Metrics,
}

impl ConfigObject for ConfigValues {
    fn format() -> ConfigFormat {
        ConfigFormat::Yaml
    }

    fn name() -> &'static str {
        "config"
    }
}

/// Config struct.
#[derive(Default)]
pub struct Config {
    values: ConfigValues,
    path: PathBuf,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("path", &self.path)
            .field("values", &self.values)
            .finish()
    }
}

impl Config {
    /// Loads a config from a given config folder.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
        let path = env::current_dir()
            .map(|x| x.join(path.as_ref()))
            .unwrap_or_else(|_| path.as_ref().to_path_buf());

        Ok(Config {
            values: ConfigValues::load(&path)?,
            path,
        })
    }

    /// Creates a config from a JSON value.
    ///
    /// This is mostly useful for tests.
    pub fn from_json_value(value: serde_json::Value) -> Result<Config, ConfigError> {
        Ok(Config {
            values: serde_json::from_value(value)
                .map_err(|err| ConfigError::wrap(err, ConfigErrorKind::BadJson))?,
            path: PathBuf::new(),
        })
    }

    /// Override configuration with values coming from other sources (e.g. env variables or
    /// command line parameters)
    pub fn apply_override(
        &mut self,
        overrides: OverridableConfig,
    ) -> Result<&mut Self, ConfigError> {
        let mouth = &mut self.values.mouth;

        if let Some(host) = overrides.host {
            mouth.host = host;
        }

        if let Some(port) = overrides.port {
            mouth.port = port
                .as_str()
                .parse()
                .map_err(|err| ConfigError::for_field(err, "port"))?;
        }

        if let Some(flush_interval) = overrides.flush_interval {
            self.values.aggregator.flush_interval = flush_interval
                .as_str()
                .parse()
                .map_err(|err| ConfigError::for_field(err, "flush_interval"))?;
        }

        let sink = &mut self.values.sink;

        if let Some(sink_host) = overrides.sink_host {
            sink.host = sink_host;
            sink.hosts.clear();
        }

        if let Some(sink_port) = overrides.sink_port {
            sink.port = sink_port
                .as_str()
                .parse()
                .map_err(|err| ConfigError::for_field(err, "sink_port"))?;
        }

        if let Some(sink_database) = overrides.sink_database {
            sink.database = sink_database;
        }

        Ok(self)
    }

    /// Checks the configuration for values that cannot be used to start the server.
    ///
    /// Multiple sink addresses are rejected, since only a single server is supported.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.values.mouth.host.is_empty() {
            return Err(ConfigError::new(ConfigErrorKind::InvalidValue).field("mouth.host"));
        }

        if self.values.aggregator.flush_interval == 0 {
            return Err(
                ConfigError::new(ConfigErrorKind::InvalidValue).field("aggregator.flush_interval")
            );
        }

        if self.values.sink.database.is_empty() {
            return Err(ConfigError::new(ConfigErrorKind::InvalidValue).field("sink.database"));
        }

        match self.sink_addresses().as_slice() {
            [address] if address.host.is_empty() => {
                Err(ConfigError::new(ConfigErrorKind::InvalidValue).field("sink.host"))
            }
            [_] => Ok(()),
            [] => Err(ConfigError::new(ConfigErrorKind::InvalidValue).field("sink.hosts")),
            _ => Err(ConfigError::new(ConfigErrorKind::UnsupportedSinkTopology).field("sink.hosts")),
        }
    }

    /// Checks if the config is already initialized.
    pub fn config_exists<P: AsRef<Path>>(path: P) -> bool {
        fs::metadata(ConfigValues::path(path.as_ref())).is_ok()
    }

    /// Returns the filename of the config file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Dumps out a YAML string of the values.
    pub fn to_yaml_string(&self) -> Result<String, ConfigError> {
        serde_yaml::to_string(&self.values)
            .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::CouldNotWriteFile))
    }

    /// Returns the host the UDP listener binds to.
    pub fn listen_host(&self) -> &str {
        &self.values.mouth.host
    }

    /// Returns the port the UDP listener binds to.
    pub fn listen_port(&self) -> u16 {
        self.values.mouth.port
    }

    /// Returns the maximum time to wait for a graceful shutdown.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.values.mouth.shutdown_timeout)
    }

    /// Returns the configuration of the metrics aggregator.
    pub fn aggregator_config(&self) -> &AggregatorConfig {
        &self.values.aggregator
    }

    /// Returns the configured sink addresses.
    ///
    /// This is the list of `sink.hosts` if set, otherwise the single `sink.host` and `sink.port`.
    pub fn sink_addresses(&self) -> Vec<SinkAddress> {
        let sink = &self.values.sink;
        if sink.hosts.is_empty() {
            vec![SinkAddress::new(sink.host.as_str(), sink.port)]
        } else {
            sink.hosts.clone()
        }
    }

    /// Returns the database documents are written into.
    pub fn sink_database(&self) -> &str {
        &self.values.sink.database
    }

    /// Returns the prefix of all collection names.
    pub fn collection_prefix(&self) -> &str {
        &self.values.sink.collection_prefix
    }

    /// Returns the logging configuration.
    pub fn logging(&self) -> &mouth_log::LogConfig {
        &self.values.logging
    }

    /// Returns the Sentry configuration.
    pub fn sentry(&self) -> &mouth_log::SentryConfig {
        &self.values.sentry
    }

    /// Returns the socket addresses for statsd.
    ///
    /// If stats are disabled, `None` is returned.
    pub fn statsd_addr(&self) -> Option<&str> {
        self.values.metrics.statsd.as_deref()
    }

    /// Return the prefix for statsd metrics.
    pub fn metrics_prefix(&self) -> &str {
        &self.values.metrics.prefix
    }

    /// Returns the default tags for statsd metrics.
    pub fn metrics_default_tags(&self) -> &BTreeMap<String, String> {
        &self.values.metrics.default_tags
    }

    /// Returns the name of the hostname tag that should be attached to each outgoing metric.
    pub fn metrics_hostname_tag(&self) -> Option<&str> {
        self.values.metrics.hostname_tag.as_deref()
    }

    /// Returns the buffer size for outgoing statsd metrics.
    pub fn metrics_buffer_size(&self) -> Option<usize> {
        self.values.metrics.buffer_size
    }
}
