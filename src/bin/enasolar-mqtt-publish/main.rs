mod config;
mod logging;
mod rumqttc_wrapper;

use std::process;
use std::time::Duration;

use config::Config;
use enasolar2mqtt::connection::ConnectionManager;
use enasolar2mqtt::fetcher::XmlFetcher;
use enasolar2mqtt::mqtt_wrapper::MqttWrapper;
use enasolar2mqtt::poller::{poll, Endpoint};
use enasolar2mqtt::publisher::Publisher;
use enasolar2mqtt::scheduler::Scheduler;
use enasolar2mqtt::shutdown::Shutdown;
use rumqttc_wrapper::RumqttcWrapper;

use log::{error, info, warn};

fn main() {
    let config = Config::load();
    logging::init_logger(&config.logging);
    info!("Starting EnaSolar monitor, revision {}", env!("GIT_HASH"));
    config.notes().iter().for_each(|note| info!("{note}"));

    if std::env::args().len() > 1 {
        error!("Arguments passed. Tool is configured by config.toml in its path");
    }
    if !config.is_valid() {
        error!("Invalid configuration: inverter_host, intervals and [mqtt] host/topics must be set");
        process::exit(1);
    }

    info!("inverter host: {}", config.inverter_host);
    let fetcher = match XmlFetcher::new(config.request_timeout()) {
        Ok(fetcher) => fetcher,
        Err(e) => {
            error!("Cannot create HTTP client: {e}");
            process::exit(1);
        }
    };

    let (client, events) = RumqttcWrapper::new(&config.mqtt);
    let publisher = Publisher::new(client.clone(), &config.mqtt.topic);

    let mut scheduler = Scheduler::new();
    for (endpoint, interval) in [
        (Endpoint::Meters, config.meters_interval()),
        (Endpoint::Data, config.data_interval()),
    ] {
        let fetcher = fetcher.clone();
        let publisher = publisher.clone();
        let host = config.inverter_host.clone();
        let job = move || {
            poll(&fetcher, &publisher, &host, endpoint);
        };
        if let Err(e) = scheduler.add_job(endpoint.file_name(), interval, job) {
            error!("Cannot schedule polling of {}: {e}", endpoint.file_name());
            process::exit(1);
        }
    }

    let shutdown = Shutdown::new();
    let handler = {
        let shutdown = shutdown.clone();
        let client = client.clone();
        move || {
            info!("Shutdown requested");
            shutdown.trigger();
            if let Err(e) = client.disconnect() {
                warn!("Clean disconnect failed: {e}");
            }
        }
    };
    if let Err(e) = ctrlc::set_handler(handler) {
        warn!("Cannot install shutdown handler: {e}");
    }

    info!(
        "Attempting connection to MQTT broker {}:{}...",
        config.mqtt.host,
        config.mqtt.port()
    );
    let mut manager = ConnectionManager::new(client, &config.mqtt.presence_topic)
        .with_retry_delay(Duration::from_secs(config.mqtt.retry_delay_secs));
    let result = manager.run(events, &shutdown.token());

    // in-flight polls are not waited for
    scheduler.shutdown(false);

    if let Err(e) = result {
        error!(
            "Cannot connect to MQTT broker at {}:{}: {e}",
            config.mqtt.host,
            config.mqtt.port()
        );
        process::exit(2);
    }
    info!("EnaSolar monitor stopped");
}
