//! Broker connection lifecycle.
//!
//! The MQTT client adapter turns its notification stream into
//! [`TransportEvent`]s. [`ConnectionManager::handle`] is the transition
//! function over [`ConnectionState`], [`ConnectionManager::run`] drives it and
//! owns the retry delay between reconnect attempts.

use std::time::Duration;

use log::{debug, info, warn};
use thiserror::Error;

use crate::mqtt_wrapper::{MqttWrapper, QoS};
use crate::shutdown::ShutdownToken;

pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    ShuttingDown,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    /// CONNACK with its return code, `0` is success.
    ConnAck(u8),
    /// `0` is a disconnect we asked for, anything else a lost connection.
    Disconnect(u8),
    /// The network below the MQTT session failed.
    SocketError(String),
    /// Any other client error.
    Fault(String),
    /// The client will not deliver further events.
    Closed,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Step {
    Continue,
    Backoff(Duration),
    Stop,
    Fatal(String),
}

#[derive(Debug, Error)]
#[error("cannot connect to MQTT broker: {0}")]
pub struct ConnectError(pub String);

pub fn connect_refusal_reason(code: u8) -> Option<&'static str> {
    match code {
        1 => Some("unacceptable protocol version"),
        2 => Some("identifier rejected"),
        3 => Some("server unavailable"),
        4 => Some("bad user name or password"),
        5 => Some("not authorised"),
        _ => None,
    }
}

pub struct ConnectionManager<MQTT: MqttWrapper> {
    client: MQTT,
    presence_topic: String,
    state: ConnectionState,
    retry_delay: Duration,
    // set by the first CONNACK of any kind
    broker_reached: bool,
}

impl<MQTT: MqttWrapper> ConnectionManager<MQTT> {
    pub fn new(client: MQTT, presence_topic: &str) -> Self {
        Self {
            client,
            presence_topic: presence_topic.to_string(),
            state: ConnectionState::Disconnected,
            retry_delay: DEFAULT_RETRY_DELAY,
            broker_reached: false,
        }
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    fn set_state(&mut self, new_state: ConnectionState) {
        if self.state != new_state {
            debug!("MQTT connection {:?} -> {new_state:?}", self.state);
            self.state = new_state;
        }
    }

    fn announce_presence(&self) {
        if let Err(e) = self
            .client
            .publish(self.presence_topic.as_str(), QoS::AtMostOnce, true, "1")
        {
            warn!("Failed to publish presence to {}: {e:?}", self.presence_topic);
        }
    }

    fn reconnect_later(&mut self) -> Step {
        self.set_state(ConnectionState::Reconnecting);
        Step::Backoff(self.retry_delay)
    }

    fn lost(&mut self, what: &str) -> Step {
        warn!(
            "Connection to MQTT broker lost ({what}). Will attempt to reconnect in {}s...",
            self.retry_delay.as_secs_f32()
        );
        self.reconnect_later()
    }

    fn failed(&mut self, what: &str) -> Step {
        if self.state == ConnectionState::Connected {
            return self.lost(what);
        }
        info!("MQTT server disconnected ({what}). Sleeping...");
        self.reconnect_later()
    }

    pub fn handle(&mut self, event: TransportEvent) -> Step {
        match event {
            TransportEvent::ConnAck(0) => {
                self.broker_reached = true;
                self.set_state(ConnectionState::Connected);
                info!("Successfully connected to MQTT broker");
                self.announce_presence();
                Step::Continue
            }
            TransportEvent::ConnAck(code) => {
                self.broker_reached = true;
                match connect_refusal_reason(code) {
                    Some(reason) => info!("Connection refused - {reason}"),
                    None => warn!("Connection failed - result code {code}"),
                }
                self.set_state(ConnectionState::Disconnected);
                Step::Backoff(self.retry_delay)
            }
            TransportEvent::Disconnect(0) => {
                info!("Clean disconnection from MQTT broker");
                self.set_state(ConnectionState::ShuttingDown);
                Step::Stop
            }
            TransportEvent::Disconnect(code) => self.lost(&format!("result code {code}")),
            TransportEvent::SocketError(e) | TransportEvent::Fault(e) if !self.broker_reached => {
                self.set_state(ConnectionState::Disconnected);
                Step::Fatal(e)
            }
            TransportEvent::SocketError(e) => self.failed(&e),
            TransportEvent::Fault(e) => {
                warn!("Unexpected MQTT client error: {e}");
                self.failed(&e)
            }
            TransportEvent::Closed => {
                info!("MQTT client closed");
                self.set_state(ConnectionState::ShuttingDown);
                Step::Stop
            }
        }
    }

    /// Processes `events` until a clean disconnect, the end of the stream or
    /// shutdown. Only a failure to ever reach the broker is an error.
    pub fn run<I>(&mut self, events: I, token: &ShutdownToken) -> Result<(), ConnectError>
    where
        I: IntoIterator<Item = TransportEvent>,
    {
        self.set_state(ConnectionState::Connecting);

        for event in events {
            if token.is_cancelled() {
                break;
            }

            match self.handle(event) {
                Step::Continue => {}
                Step::Backoff(delay) => {
                    if !token.sleep(delay) {
                        break;
                    }
                }
                Step::Stop => return Ok(()),
                Step::Fatal(e) => return Err(ConnectError(e)),
            }
        }

        info!("Leaving MQTT event loop");
        self.set_state(ConnectionState::ShuttingDown);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt_wrapper::recording::RecordingMqtt;
    use crate::shutdown::Shutdown;
    use log::{Level, LevelFilter, Log, Metadata, Record};
    use std::sync::{Mutex, Once};
    use std::thread::{self, ThreadId};
    use std::time::Instant;

    static CAPTURED: Mutex<Vec<(ThreadId, Level, String)>> = Mutex::new(Vec::new());
    static INSTALL: Once = Once::new();

    struct CapturingLogger;

    impl Log for CapturingLogger {
        fn enabled(&self, _: &Metadata) -> bool {
            true
        }

        fn log(&self, record: &Record) {
            CAPTURED.lock().unwrap().push((
                thread::current().id(),
                record.level(),
                record.args().to_string(),
            ));
        }

        fn flush(&self) {}
    }

    /// Records logged from the calling thread since the logger was installed.
    fn captured_logs() -> Vec<(Level, String)> {
        let me = thread::current().id();
        CAPTURED
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _, _)| *id == me)
            .map(|(_, level, message)| (*level, message.clone()))
            .collect()
    }

    fn capture_logs() {
        INSTALL.call_once(|| {
            log::set_logger(&CapturingLogger).unwrap();
            log::set_max_level(LevelFilter::Trace);
        });
    }

    fn manager(mqtt: &RecordingMqtt) -> ConnectionManager<RecordingMqtt> {
        ConnectionManager::new(mqtt.clone(), "/clients/enasolar")
            .with_retry_delay(Duration::from_millis(10))
    }

    #[test]
    fn successful_connack_announces_presence() {
        let mqtt = RecordingMqtt::default();
        let mut manager = manager(&mqtt);

        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(manager.handle(TransportEvent::ConnAck(0)), Step::Continue);
        assert_eq!(manager.state(), ConnectionState::Connected);

        let messages = mqtt.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].topic, "/clients/enasolar");
        assert_eq!(messages[0].payload, "1");
        assert!(messages[0].retain);
    }

    #[test]
    fn refused_connack_backs_off_without_presence() {
        let mqtt = RecordingMqtt::default();
        let mut manager = manager(&mqtt);

        for code in 1..=6 {
            assert_eq!(
                manager.handle(TransportEvent::ConnAck(code)),
                Step::Backoff(Duration::from_millis(10))
            );
            assert_eq!(manager.state(), ConnectionState::Disconnected);
        }
        assert!(mqtt.messages().is_empty());
    }

    #[test]
    fn refusal_reasons_cover_protocol_codes() {
        assert_eq!(connect_refusal_reason(4), Some("bad user name or password"));
        assert!((1..=5).all(|code| connect_refusal_reason(code).is_some()));
        assert_eq!(connect_refusal_reason(0), None);
        assert_eq!(connect_refusal_reason(6), None);
    }

    #[test]
    fn unexpected_disconnect_reconnects_and_clean_one_stops() {
        let mqtt = RecordingMqtt::default();
        let mut manager = ConnectionManager::new(mqtt.clone(), "presence");
        manager.handle(TransportEvent::ConnAck(0));

        assert_eq!(
            manager.handle(TransportEvent::Disconnect(1)),
            Step::Backoff(DEFAULT_RETRY_DELAY)
        );
        assert_eq!(manager.state(), ConnectionState::Reconnecting);

        assert_eq!(manager.handle(TransportEvent::Disconnect(0)), Step::Stop);
        assert_eq!(manager.state(), ConnectionState::ShuttingDown);
    }

    #[test]
    fn nonzero_disconnect_warns_before_reconnecting() {
        capture_logs();
        let mqtt = RecordingMqtt::default();
        let events = vec![TransportEvent::Disconnect(1), TransportEvent::Disconnect(0)];

        assert!(manager(&mqtt).run(events, &Shutdown::new().token()).is_ok());

        let logs = captured_logs();
        let lost = logs.iter().position(|(level, message)| {
            *level == Level::Warn
                && message.contains("lost (result code 1)")
                && message.contains("Will attempt to reconnect")
        });
        let clean = logs.iter().position(|(level, message)| {
            *level == Level::Info && message.contains("Clean disconnection")
        });
        assert!(lost.is_some(), "no reconnect warning in {logs:?}");
        assert!(lost < clean, "unexpected order in {logs:?}");
        assert!(!logs.iter().any(|(_, message)| message.contains("Sleeping")));
    }

    #[test]
    fn socket_error_before_connack_only_sleeps() {
        capture_logs();
        let mqtt = RecordingMqtt::default();
        let mut manager = manager(&mqtt);
        manager.handle(TransportEvent::ConnAck(3));

        assert!(matches!(
            manager.handle(TransportEvent::SocketError("reset".into())),
            Step::Backoff(_)
        ));
        let logs = captured_logs();
        assert!(logs.iter().any(|(level, message)| {
            *level == Level::Info && message.contains("disconnected (reset). Sleeping")
        }));
        assert!(!logs.iter().any(|(_, message)| message.contains("Will attempt")));
    }

    #[test]
    fn error_before_reaching_broker_is_fatal() {
        let mqtt = RecordingMqtt::default();
        let token = Shutdown::new().token();

        let result = manager(&mqtt).run(
            vec![TransportEvent::SocketError("connection refused".into())],
            &token,
        );
        assert!(result.is_err());

        let result = manager(&mqtt).run(vec![TransportEvent::Fault("tls".into())], &token);
        assert!(result.is_err());
    }

    #[test]
    fn errors_after_first_connack_are_retried() {
        let mqtt = RecordingMqtt::default();
        let mut manager = manager(&mqtt);
        manager.handle(TransportEvent::ConnAck(4));

        assert!(matches!(
            manager.handle(TransportEvent::SocketError("reset".into())),
            Step::Backoff(_)
        ));
        assert!(matches!(
            manager.handle(TransportEvent::Fault("unexpected packet".into())),
            Step::Backoff(_)
        ));
        assert_eq!(manager.state(), ConnectionState::Reconnecting);
    }

    #[test]
    fn run_stops_at_clean_disconnect() {
        let mqtt = RecordingMqtt::default();
        let mut manager = manager(&mqtt);
        let mut events = vec![
            TransportEvent::ConnAck(0),
            TransportEvent::Disconnect(1),
            TransportEvent::Disconnect(0),
            TransportEvent::ConnAck(0),
        ]
        .into_iter();

        assert!(manager.run(&mut events, &Shutdown::new().token()).is_ok());
        assert_eq!(manager.state(), ConnectionState::ShuttingDown);
        // no reconnect after the clean disconnect
        assert_eq!(events.next(), Some(TransportEvent::ConnAck(0)));
        assert_eq!(mqtt.messages().len(), 1);
    }

    #[test]
    fn run_leaves_when_shutdown_interrupts_backoff() {
        let mqtt = RecordingMqtt::default();
        let shutdown = Shutdown::new();
        let mut manager = ConnectionManager::new(mqtt.clone(), "presence")
            .with_retry_delay(Duration::from_secs(60));
        let trigger = shutdown.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            trigger.trigger();
        });

        let start = Instant::now();
        let events = vec![TransportEvent::ConnAck(0), TransportEvent::Disconnect(7)];
        assert!(manager.run(events, &shutdown.token()).is_ok());
        assert!(start.elapsed() < Duration::from_secs(10));
        assert_eq!(manager.state(), ConnectionState::ShuttingDown);
    }
}
