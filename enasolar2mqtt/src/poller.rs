use log::{debug, warn};

use crate::{
    document::ParsedDocument,
    fetcher::DocumentSource,
    metric_collector::MetricCollector,
    metrics::{extract_energy, extract_meters, Measurement},
};

/// The two status documents served by the inverter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Endpoint {
    /// Instantaneous readings, polled often.
    Meters,
    /// Energy counters, polled rarely.
    Data,
}

impl Endpoint {
    pub fn file_name(&self) -> &'static str {
        match self {
            Endpoint::Meters => "meters.xml",
            Endpoint::Data => "data.xml",
        }
    }

    pub fn url(&self, host: &str) -> String {
        format!("{}/{}", host.trim_end_matches('/'), self.file_name())
    }

    pub fn extract(&self, doc: &ParsedDocument) -> Vec<Measurement> {
        match self {
            Endpoint::Meters => extract_meters(doc),
            Endpoint::Data => extract_energy(doc),
        }
    }
}

/// One poll cycle: fetch, extract, publish. Returns the number of
/// measurements handed to the collector.
pub fn poll<S, C>(source: &S, collector: &C, host: &str, endpoint: Endpoint) -> usize
where
    S: DocumentSource + ?Sized,
    C: MetricCollector + ?Sized,
{
    let Some(doc) = source.fetch(&endpoint.url(host)) else {
        warn!(
            "Request for {} returned nothing, skipping",
            endpoint.file_name()
        );
        return 0;
    };

    let measurements = endpoint.extract(&doc);
    debug!(
        "{}: {} of {} fields recognised",
        endpoint.file_name(),
        measurements.len(),
        doc.len()
    );
    measurements
        .iter()
        .for_each(|measurement| collector.publish(measurement));
    measurements.len()
}
