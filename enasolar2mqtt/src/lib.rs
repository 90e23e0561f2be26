// externally visible interfaces
pub mod connection;
pub mod document;
pub mod fetcher;
pub mod metric_collector;
pub mod metrics;
pub mod mqtt_config;
pub mod mqtt_wrapper;
pub mod poller;
pub mod publisher;
pub mod scheduler;
pub mod shutdown;
