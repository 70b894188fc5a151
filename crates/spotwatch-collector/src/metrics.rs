//! Metric descriptors and per-scrape readings.

use std::collections::BTreeMap;
use std::sync::Arc;

/// An immutable definition of one exported gauge.
///
/// Built once when the collector is constructed; readings reference it
/// for the lifetime of a single scrape.
#[derive(Debug, PartialEq, Eq)]
pub struct MetricDescriptor {
    /// Exposition name, e.g. `aws_instance_termination_imminent`.
    pub name: &'static str,
    pub help: &'static str,
    /// Ordered label names filled per reading.
    pub variable_labels: &'static [&'static str],
    /// Static labels attached to every sample, e.g. node labels resolved
    /// at startup. Sorted by name.
    pub extra_labels: BTreeMap<String, String>,
}

impl MetricDescriptor {
    fn new(
        name: &'static str,
        help: &'static str,
        variable_labels: &'static [&'static str],
        extra_labels: &BTreeMap<String, String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name,
            help,
            variable_labels,
            extra_labels: extra_labels.clone(),
        })
    }

    /// A reading of this gauge for the current scrape.
    ///
    /// `label_values` must match `variable_labels` in order and count.
    pub fn reading(self: &Arc<Self>, value: f64, label_values: Vec<String>) -> Reading {
        debug_assert_eq!(self.variable_labels.len(), label_values.len());
        Reading {
            descriptor: Arc::clone(self),
            value,
            label_values,
        }
    }
}

/// One gauge value emitted for exactly one scrape.
#[derive(Debug)]
pub struct Reading {
    pub descriptor: Arc<MetricDescriptor>,
    pub value: f64,
    pub label_values: Vec<String>,
}

/// The five gauges this exporter serves.
#[derive(Debug)]
pub struct Descriptors {
    /// `aws_instance_metadata_service_available{instance_id}`
    pub service_available: Arc<MetricDescriptor>,
    /// `aws_instance_metadata_service_events_available{instance_id}`
    pub events_available: Arc<MetricDescriptor>,
    /// `aws_instance_termination_imminent{instance_action,instance_id,instance_type}`
    pub termination_imminent: Arc<MetricDescriptor>,
    /// `aws_instance_termination_in{instance_id,instance_type}`
    pub termination_in: Arc<MetricDescriptor>,
    /// `aws_instance_rebalance_recommended{instance_id,instance_type}`
    pub rebalance_recommended: Arc<MetricDescriptor>,
}

impl Descriptors {
    /// Build the descriptor set, freezing `extra_labels` into every gauge.
    pub fn new(extra_labels: BTreeMap<String, String>) -> Self {
        Self {
            service_available: MetricDescriptor::new(
                "aws_instance_metadata_service_available",
                "Metadata service available",
                &["instance_id"],
                &extra_labels,
            ),
            events_available: MetricDescriptor::new(
                "aws_instance_metadata_service_events_available",
                "Metadata service events endpoint available",
                &["instance_id"],
                &extra_labels,
            ),
            termination_imminent: MetricDescriptor::new(
                "aws_instance_termination_imminent",
                "Instance is about to be terminated",
                &["instance_action", "instance_id", "instance_type"],
                &extra_labels,
            ),
            termination_in: MetricDescriptor::new(
                "aws_instance_termination_in",
                "Instance will be terminated in",
                &["instance_id", "instance_type"],
                &extra_labels,
            ),
            rebalance_recommended: MetricDescriptor::new(
                "aws_instance_rebalance_recommended",
                "Instance rebalance is recommended",
                &["instance_id", "instance_type"],
                &extra_labels,
            ),
        }
    }

    /// Descriptors in exposition order.
    pub fn all(&self) -> [&Arc<MetricDescriptor>; 5] {
        [
            &self.service_available,
            &self.events_available,
            &self.termination_imminent,
            &self.termination_in,
            &self.rebalance_recommended,
        ]
    }
}
