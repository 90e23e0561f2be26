#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QoS {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

pub trait MqttWrapper: Clone + Send + 'static {
    // This trait provides an interface that decouples library code from an
    // implementation of the MQTT client. On library calling code, one needs to
    // wrap the MQTT implementation, i.e. the client, in a new type that in
    // turn implements this trait.
    //
    // Implementations are cloned into every poll job, so a clone must share
    // the underlying connection and be safe to use from several threads.

    fn publish<S, V>(&self, topic: S, qos: QoS, retain: bool, payload: V) -> anyhow::Result<()>
    where
        S: Clone + Into<String>,
        V: Clone + Into<Vec<u8>>;

    fn disconnect(&self) -> anyhow::Result<()>;
}
