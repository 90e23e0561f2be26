use crate::metrics::Measurement;

pub trait MetricCollector: Send {
    fn publish(&self, measurement: &Measurement);
}
