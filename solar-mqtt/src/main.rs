use clap::Parser;
use solar_mqtt::{config, server, Result};
use url::Url;

#[derive(Parser, Debug)]
#[clap(
    name = "solar-mqtt",
    version,
    about = "A bridge between solar-plant Modbus devices and MQTT"
)]
struct Cli {
    /// Path to the gateway configuration file
    #[clap(default_value = "/data/options.json", value_hint = clap::ValueHint::FilePath)]
    config: std::path::PathBuf,

    /// Override the broker URL from the configuration file
    #[clap(long, env = "MQTT_URL", value_hint = clap::ValueHint::Url)]
    mqtt_url: Option<Url>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Cli::parse();

    let mut config = config::load(&args.config)?;
    if let Some(url) = args.mqtt_url {
        config.mqtt.url = url;
    }

    server::run(config, tokio::signal::ctrl_c()).await
}
