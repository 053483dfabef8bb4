use config::{builder::DefaultState, Config, ConfigBuilder, ConfigError, Environment};
use log::info;

use super::models::Settings;

fn with_defaults(builder: ConfigBuilder<DefaultState>) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    builder
        .set_default("simulate", false)?
        .set_default("cups.uri", "https://localhost:631/")?
        .set_default("cups.ignoretlserrors", "true")?
        .set_default("cups.username", "")?
        .set_default("cups.password", "")?
        .set_default("monitor.pollinterval", "2s")?
        .set_default("jobs.waittimeout", "5m")?
        .set_default("jobs.tracktimeout", "1h")?
        .set_default("jobs.maxage", "1h")?
        .set_default("jobs.cleanupschedule", "10m")?
        .set_default("simulation.startdelay", "100ms")?
        .set_default("simulation.completiondelay", "2s")?
        .set_default("simulation.statuspollinterval", "50ms")?
        .set_default("simulation.failuremarker", "fail-test")?
        .set_default("simulation.missingmarkers", vec!["nonexistent", "does_not_exist"])?
        .set_default("sentrydsn", "")
}

pub fn load_config() -> Result<Settings, ConfigError> {
    // As Rust has no native support for .env files,
    // we use the dotenv_flow crate to import to actual ENV vars.
    if let Ok(dotenv_path) = dotenv_flow::dotenv_flow() {
        info!("Loaded dotenv file: {:?}", dotenv_path);
    }

    let builder = Config::builder()
        .add_source(Environment::default()
            .prefix("PW")
            .separator("_")
            .prefix_separator("_")
            .try_parsing(true)
            .with_list_parse_key("simulation.missingmarkers")
            .list_separator(","));

    with_defaults(builder)?.build()?.try_deserialize()
}
