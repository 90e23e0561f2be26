use crate::{
    metric_collector::MetricCollector,
    metrics::{Measurement, MetricValue},
    mqtt_wrapper::{MqttWrapper, QoS},
};

use log::{debug, warn};

/// Fire-and-forget publishing of measurements below a base topic.
///
/// Values go out with QoS 0 and without the retain flag, subscribers only
/// see readings published after they subscribed.
#[derive(Clone)]
pub struct Publisher<MQTT: MqttWrapper> {
    client: MQTT,
    base_topic: String,
}

impl<MQTT: MqttWrapper> Publisher<MQTT> {
    pub fn new(client: MQTT, base_topic: &str) -> Self {
        Self {
            client,
            base_topic: base_topic.trim_end_matches('/').to_string(),
        }
    }

    pub fn topic(&self, name: &str) -> String {
        format!("{}/{}", self.base_topic, name)
    }

    pub fn publish_value(&self, name: &str, value: MetricValue) {
        let topic = self.topic(name);
        let payload = value.to_string();
        debug!("Publishing {payload} to {topic}");

        if let Err(e) = self
            .client
            .publish(topic, QoS::AtMostOnce, false, payload)
        {
            warn!("mqtt error: {e:?}")
        }
    }
}

impl<MQTT: MqttWrapper> MetricCollector for Publisher<MQTT> {
    fn publish(&self, measurement: &Measurement) {
        self.publish_value(measurement.name, measurement.value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt_wrapper::recording::RecordingMqtt;
    use std::thread;

    #[test]
    fn publishes_below_base_topic_without_retain() {
        let mqtt = RecordingMqtt::default();
        let publisher = Publisher::new(mqtt.clone(), "/enasolar/");

        publisher.publish(&Measurement::new("energytoday", MetricValue::Float(3.56)));

        let messages = mqtt.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].topic, "/enasolar/energytoday");
        assert_eq!(messages[0].payload, "3.56");
        assert_eq!(messages[0].qos, QoS::AtMostOnce);
        assert!(!messages[0].retain);
    }

    #[test]
    fn clones_publish_concurrently() {
        let mqtt = RecordingMqtt::default();
        let publisher = Publisher::new(mqtt.clone(), "solar");

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let publisher = publisher.clone();
                thread::spawn(move || {
                    for _ in 0..25 {
                        publisher.publish_value("daysproducing", MetricValue::Integer(i));
                    }
                })
            })
            .collect();
        handles.into_iter().for_each(|h| h.join().unwrap());

        assert_eq!(mqtt.messages().len(), 100);
    }
}
