use anyhow::Result;
use mouth_config::Config;
use mouth_statsd::MetricsConfig;

/// Checks the config for values that would prevent the server from starting.
pub fn check_config(config: &Config) -> Result<()> {
    config.validate()?;

    if config.listen_port() == 0 {
        mouth_log::warn!("listening on a random port, clients need to discover it from the log");
    }

    Ok(())
}

/// Print spawn infos to the log.
pub fn dump_spawn_infos(config: &Config) {
    if config.path().as_os_str().is_empty() {
        mouth_log::info!("launching mouth without config folder");
    } else {
        mouth_log::info!(
            "launching mouth from config folder {}",
            config.path().display()
        );
    }

    mouth_log::info!("  flush interval: {}s", config.aggregator_config().flush_interval);
    for address in config.sink_addresses() {
        mouth_log::info!("  sink: mongodb://{address}/{}", config.sink_database());
    }
    mouth_log::info!("  collection prefix: {}", config.collection_prefix());
    mouth_log::info!("  log level: {}", config.logging().level);
}

/// Initialize the metric system.
pub fn init_metrics(config: &Config) -> Result<()> {
    let Some(host) = config.statsd_addr() else {
        return Ok(());
    };

    let mut default_tags = config.metrics_default_tags().clone();
    if let Some(hostname_tag) = config.metrics_hostname_tag()
        && let Some(hostname) = hostname::get().ok().and_then(|s| s.into_string().ok())
    {
        default_tags.insert(hostname_tag.to_owned(), hostname);
    }

    mouth_statsd::init(MetricsConfig {
        prefix: config.metrics_prefix().to_owned(),
        host: host.to_owned(),
        buffer_size: config.metrics_buffer_size(),
        default_tags,
    })?;

    Ok(())
}
