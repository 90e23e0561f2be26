use std::time::Duration;

use enasolar2mqtt::{
    connection::TransportEvent,
    mqtt_config::MqttConfig,
    mqtt_wrapper::{self},
};
use log::warn;
use rumqttc::{
    tokio_rustls::rustls::{ClientConfig, RootCertStore},
    Client, ConnectReturnCode, Connection, ConnectionError, Event, Incoming, LastWill,
    MqttOptions, Outgoing, Transport,
};

#[derive(Clone)]
pub struct RumqttcWrapper {
    client: Client,
}

fn match_qos(qos: mqtt_wrapper::QoS) -> rumqttc::QoS {
    match qos {
        mqtt_wrapper::QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
        mqtt_wrapper::QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
        mqtt_wrapper::QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
    }
}

impl mqtt_wrapper::MqttWrapper for RumqttcWrapper {
    fn publish<S, V>(
        &self,
        topic: S,
        qos: mqtt_wrapper::QoS,
        retain: bool,
        payload: V,
    ) -> anyhow::Result<()>
    where
        S: Clone + Into<String>,
        V: Clone + Into<Vec<u8>>,
    {
        // try publishing up to three times, the request queue may be full
        // while the event loop is reconnecting
        if self
            .client
            .try_publish(topic.clone(), match_qos(qos), retain, payload.clone())
            .is_ok()
        {
            return Ok(());
        }
        std::thread::sleep(Duration::from_millis(100));
        if self
            .client
            .try_publish(topic.clone(), match_qos(qos), retain, payload.clone())
            .is_ok()
        {
            return Ok(());
        }
        std::thread::sleep(Duration::from_millis(100));
        Ok(self
            .client
            .try_publish(topic, match_qos(qos), retain, payload)?)
    }

    fn disconnect(&self) -> anyhow::Result<()> {
        Ok(self.client.try_disconnect()?)
    }
}

impl RumqttcWrapper {
    /// Builds the client and the event stream that drives it. Nothing touches
    /// the network until the stream is polled.
    pub fn new(config: &MqttConfig) -> (Self, RumqttcEvents) {
        let mut mqttoptions = MqttOptions::new(config.client_id(), &config.host, config.port());
        mqttoptions.set_keep_alive(Duration::from_secs(config.keep_alive_secs.max(5)));
        mqttoptions.set_clean_session(true);
        // the broker flips presence to 0 if we vanish without a DISCONNECT
        mqttoptions.set_last_will(LastWill::new(
            &config.presence_topic,
            "0",
            rumqttc::QoS::AtMostOnce,
            true,
        ));

        if config.use_tls() {
            // Use rustls-native-certs to load root certificates from the operating system.
            let mut roots = RootCertStore::empty();
            let native = rustls_native_certs::load_native_certs();
            native
                .errors
                .iter()
                .for_each(|e| warn!("could not load platform certs: {e}"));
            native.certs.into_iter().for_each(|cert| {
                if let Err(e) = roots.add(cert) {
                    warn!("skipping platform cert: {e}");
                }
            });

            let client_config = ClientConfig::builder()
                .with_root_certificates(roots)
                .with_no_client_auth();

            mqttoptions.set_transport(Transport::tls_with_config(client_config.into()));
        }

        if let Some((username, password)) = config.credentials() {
            mqttoptions.set_credentials(username, password);
        }

        let (client, connection) = Client::new(mqttoptions, 512);
        (
            Self { client },
            RumqttcEvents {
                connection,
                closed: false,
            },
        )
    }
}

/// Blocking iterator over connection-relevant notifications. Every call to
/// `next` polls the rumqttc event loop, which also reconnects after errors.
pub struct RumqttcEvents {
    connection: Connection,
    closed: bool,
}

impl Iterator for RumqttcEvents {
    type Item = TransportEvent;

    fn next(&mut self) -> Option<TransportEvent> {
        if self.closed {
            return None;
        }
        loop {
            let Ok(notification) = self.connection.recv() else {
                self.closed = true;
                return Some(TransportEvent::Closed);
            };
            if let Some(event) = classify(notification) {
                return Some(event);
            }
        }
    }
}

fn return_code(code: ConnectReturnCode) -> u8 {
    match code {
        ConnectReturnCode::Success => 0,
        ConnectReturnCode::RefusedProtocolVersion => 1,
        ConnectReturnCode::BadClientId => 2,
        ConnectReturnCode::ServiceUnavailable => 3,
        ConnectReturnCode::BadUserNamePassword => 4,
        ConnectReturnCode::NotAuthorized => 5,
    }
}

/// `None` for ordinary traffic (publishes, pings, acks).
fn classify(notification: Result<Event, ConnectionError>) -> Option<TransportEvent> {
    match notification {
        Ok(Event::Incoming(Incoming::ConnAck(ack))) => {
            Some(TransportEvent::ConnAck(return_code(ack.code)))
        }
        Ok(Event::Incoming(Incoming::Disconnect)) => Some(TransportEvent::Disconnect(1)),
        Ok(Event::Outgoing(Outgoing::Disconnect)) => Some(TransportEvent::Disconnect(0)),
        Ok(_) => None,
        Err(ConnectionError::ConnectionRefused(code)) => {
            Some(TransportEvent::ConnAck(return_code(code)))
        }
        Err(ConnectionError::RequestsDone) => Some(TransportEvent::Closed),
        Err(
            e @ (ConnectionError::Io(_)
            | ConnectionError::NetworkTimeout
            | ConnectionError::FlushTimeout
            | ConnectionError::MqttState(_)),
        ) => Some(TransportEvent::SocketError(e.to_string())),
        Err(e) => Some(TransportEvent::Fault(e.to_string())),
    }
}
