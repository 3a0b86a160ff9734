//! Conversions between OTLP protobuf types and the Tributary signal model.
//!
//! Decoding produces one [`Batch`] per OTLP resource block, with every item
//! holding an `Arc` to the resource and scope it was decoded under. Encoding
//! regroups consecutive items that share a resource and scope back into a
//! single block, so a batch survives an encode/decode round trip unchanged.

use super::{DecodeError, Decoded};
use crate::models::{
    AttributeValue, Attributes, Batch, HistogramValue, InstrumentationScope, LogRecord,
    MetricKind, MetricPoint, PointValue, Resource, SignalItem, Span, SpanEvent, SpanId, SpanKind,
    SpanLink, SpanStatus, StatusCode, Temporality, TraceId,
};
use crate::otlp::proto;
use std::sync::Arc;

use proto::collector::logs::v1::ExportLogsServiceRequest;
use proto::collector::metrics::v1::ExportMetricsServiceRequest;
use proto::collector::trace::v1::ExportTraceServiceRequest;

// ============================================================================
// Common values
// ============================================================================

/// Converts an OTLP `AnyValue` to an [`AttributeValue`].
#[must_use]
pub fn any_value_from_proto(value: &proto::common::v1::AnyValue) -> AttributeValue {
    use proto::common::v1::any_value::Value;

    match &value.value {
        Some(Value::StringValue(s)) => AttributeValue::String(s.clone()),
        Some(Value::BoolValue(b)) => AttributeValue::Bool(*b),
        Some(Value::IntValue(i)) => AttributeValue::Int(*i),
        Some(Value::DoubleValue(d)) => AttributeValue::Double(*d),
        Some(Value::BytesValue(b)) => AttributeValue::Bytes(b.clone()),
        Some(Value::ArrayValue(arr)) => {
            AttributeValue::Array(arr.values.iter().map(any_value_from_proto).collect())
        }
        Some(Value::KvlistValue(kv)) => AttributeValue::Map(attributes_from_proto(&kv.values)),
        #[allow(unreachable_patterns)]
        Some(_) | None => AttributeValue::Empty,
    }
}

/// Converts an [`AttributeValue`] to an OTLP `AnyValue`.
#[must_use]
pub fn any_value_to_proto(value: &AttributeValue) -> proto::common::v1::AnyValue {
    use proto::common::v1::any_value::Value;
    use proto::common::v1::{ArrayValue, KeyValueList};

    let value = match value {
        AttributeValue::Empty => None,
        AttributeValue::String(s) => Some(Value::StringValue(s.clone())),
        AttributeValue::Bool(b) => Some(Value::BoolValue(*b)),
        AttributeValue::Int(i) => Some(Value::IntValue(*i)),
        AttributeValue::Double(d) => Some(Value::DoubleValue(*d)),
        AttributeValue::Bytes(b) => Some(Value::BytesValue(b.clone())),
        AttributeValue::Array(values) => Some(Value::ArrayValue(ArrayValue {
            values: values.iter().map(any_value_to_proto).collect(),
        })),
        AttributeValue::Map(map) => Some(Value::KvlistValue(KeyValueList {
            values: attributes_to_proto(map),
        })),
    };
    proto::common::v1::AnyValue { value }
}

/// Converts OTLP key-value pairs to an attribute map. Later duplicates win.
#[must_use]
pub fn attributes_from_proto(attributes: &[proto::common::v1::KeyValue]) -> Attributes {
    attributes
        .iter()
        .map(|kv| {
            let value = kv
                .value
                .as_ref()
                .map_or(AttributeValue::Empty, any_value_from_proto);
            (kv.key.clone(), value)
        })
        .collect()
}

/// Converts an attribute map to OTLP key-value pairs.
#[must_use]
pub fn attributes_to_proto(attributes: &Attributes) -> Vec<proto::common::v1::KeyValue> {
    attributes
        .iter()
        .map(|(key, value)| proto::common::v1::KeyValue {
            key: key.clone(),
            value: Some(any_value_to_proto(value)),
        })
        .collect()
}

fn resource_from_proto(resource: Option<&proto::resource::v1::Resource>, schema_url: &str) -> Resource {
    Resource {
        attributes: resource
            .map(|r| attributes_from_proto(&r.attributes))
            .unwrap_or_default(),
        dropped_attributes_count: resource.map_or(0, |r| r.dropped_attributes_count),
        schema_url: schema_url.to_string(),
    }
}

fn resource_to_proto(resource: &Resource) -> proto::resource::v1::Resource {
    #[allow(clippy::needless_update)]
    proto::resource::v1::Resource {
        attributes: attributes_to_proto(&resource.attributes),
        dropped_attributes_count: resource.dropped_attributes_count,
        ..Default::default()
    }
}

fn scope_from_proto(
    scope: Option<&proto::common::v1::InstrumentationScope>,
    schema_url: &str,
) -> InstrumentationScope {
    match scope {
        Some(s) => InstrumentationScope {
            name: s.name.clone(),
            version: s.version.clone(),
            attributes: attributes_from_proto(&s.attributes),
            dropped_attributes_count: s.dropped_attributes_count,
            schema_url: schema_url.to_string(),
        },
        None => InstrumentationScope {
            schema_url: schema_url.to_string(),
            ..InstrumentationScope::default()
        },
    }
}

fn scope_to_proto(scope: &InstrumentationScope) -> proto::common::v1::InstrumentationScope {
    #[allow(clippy::needless_update)]
    proto::common::v1::InstrumentationScope {
        name: scope.name.clone(),
        version: scope.version.clone(),
        attributes: attributes_to_proto(&scope.attributes),
        dropped_attributes_count: scope.dropped_attributes_count,
        ..Default::default()
    }
}

fn trace_id(bytes: &[u8]) -> Result<TraceId, DecodeError> {
    TraceId::from_slice(bytes).ok_or(DecodeError::InvalidTraceId { len: bytes.len() })
}

fn span_id(bytes: &[u8]) -> Result<SpanId, DecodeError> {
    SpanId::from_slice(bytes).ok_or(DecodeError::InvalidSpanId { len: bytes.len() })
}

fn optional_trace_id(bytes: &[u8]) -> Result<Option<TraceId>, DecodeError> {
    if bytes.is_empty() {
        Ok(None)
    } else {
        trace_id(bytes).map(Some)
    }
}

fn optional_span_id(bytes: &[u8]) -> Result<Option<SpanId>, DecodeError> {
    if bytes.is_empty() {
        Ok(None)
    } else {
        span_id(bytes).map(Some)
    }
}

// ============================================================================
// Grouping for encode
// ============================================================================

/// Items of one scope inside a [`ResourceGroup`].
struct ScopeGroup<'a, T> {
    scope: &'a Arc<InstrumentationScope>,
    items: Vec<&'a T>,
}

/// A run of consecutive items sharing one resource.
struct ResourceGroup<'a, T> {
    resource: &'a Arc<Resource>,
    scopes: Vec<ScopeGroup<'a, T>>,
}

fn same<T: PartialEq>(a: &Arc<T>, b: &Arc<T>) -> bool {
    Arc::ptr_eq(a, b) || **a == **b
}

/// Groups consecutive items by resource, then by scope.
///
/// Only adjacent items are merged, so the concatenation of all groups is
/// the input order.
fn group_by_origin<T: SignalItem>(items: &[T]) -> Vec<ResourceGroup<'_, T>> {
    let mut groups: Vec<ResourceGroup<'_, T>> = Vec::new();
    for item in items {
        match groups.last_mut() {
            Some(group) if same(group.resource, item.resource()) => match group.scopes.last_mut() {
                Some(scope) if same(scope.scope, item.scope()) => scope.items.push(item),
                _ => group.scopes.push(ScopeGroup {
                    scope: item.scope(),
                    items: vec![item],
                }),
            },
            _ => groups.push(ResourceGroup {
                resource: item.resource(),
                scopes: vec![ScopeGroup {
                    scope: item.scope(),
                    items: vec![item],
                }],
            }),
        }
    }
    groups
}

// ============================================================================
// Traces
// ============================================================================

fn span_kind_from_proto(kind: i32) -> SpanKind {
    use proto::trace::v1::span::SpanKind as OtlpSpanKind;

    match OtlpSpanKind::try_from(kind) {
        Ok(OtlpSpanKind::Internal) => SpanKind::Internal,
        Ok(OtlpSpanKind::Server) => SpanKind::Server,
        Ok(OtlpSpanKind::Client) => SpanKind::Client,
        Ok(OtlpSpanKind::Producer) => SpanKind::Producer,
        Ok(OtlpSpanKind::Consumer) => SpanKind::Consumer,
        Ok(OtlpSpanKind::Unspecified) | Err(_) => SpanKind::Unspecified,
    }
}

fn span_kind_to_proto(kind: SpanKind) -> i32 {
    use proto::trace::v1::span::SpanKind as OtlpSpanKind;

    let kind = match kind {
        SpanKind::Unspecified => OtlpSpanKind::Unspecified,
        SpanKind::Internal => OtlpSpanKind::Internal,
        SpanKind::Server => OtlpSpanKind::Server,
        SpanKind::Client => OtlpSpanKind::Client,
        SpanKind::Producer => OtlpSpanKind::Producer,
        SpanKind::Consumer => OtlpSpanKind::Consumer,
    };
    kind as i32
}

fn status_from_proto(status: Option<&proto::trace::v1::Status>) -> SpanStatus {
    use proto::trace::v1::status::StatusCode as OtlpStatusCode;

    let Some(status) = status else {
        return SpanStatus::default();
    };
    let code = match OtlpStatusCode::try_from(status.code) {
        Ok(OtlpStatusCode::Ok) => StatusCode::Ok,
        Ok(OtlpStatusCode::Error) => StatusCode::Error,
        Ok(OtlpStatusCode::Unset) | Err(_) => StatusCode::Unset,
    };
    SpanStatus {
        code,
        message: status.message.clone(),
    }
}

fn status_to_proto(status: &SpanStatus) -> Option<proto::trace::v1::Status> {
    use proto::trace::v1::status::StatusCode as OtlpStatusCode;

    if *status == SpanStatus::default() {
        return None;
    }
    let code = match status.code {
        StatusCode::Unset => OtlpStatusCode::Unset,
        StatusCode::Ok => OtlpStatusCode::Ok,
        StatusCode::Error => OtlpStatusCode::Error,
    };
    Some(proto::trace::v1::Status {
        message: status.message.clone(),
        code: code as i32,
    })
}

/// Converts an OTLP span into a [`Span`] attached to `resource` and `scope`.
///
/// # Errors
///
/// Returns a [`DecodeError`] if the trace ID or any span ID has the wrong length.
pub fn span_from_proto(
    span: &proto::trace::v1::Span,
    resource: &Arc<Resource>,
    scope: &Arc<InstrumentationScope>,
) -> Result<Span, DecodeError> {
    let links = span
        .links
        .iter()
        .map(|link| {
            Ok(SpanLink {
                trace_id: trace_id(&link.trace_id)?,
                span_id: span_id(&link.span_id)?,
                trace_state: link.trace_state.clone(),
                attributes: attributes_from_proto(&link.attributes),
                dropped_attributes_count: link.dropped_attributes_count,
                flags: link.flags,
            })
        })
        .collect::<Result<Vec<_>, DecodeError>>()?;

    let events = span
        .events
        .iter()
        .map(|event| SpanEvent {
            name: event.name.clone(),
            time_unix_nano: event.time_unix_nano,
            attributes: attributes_from_proto(&event.attributes),
            dropped_attributes_count: event.dropped_attributes_count,
        })
        .collect();

    Ok(Span {
        resource: Arc::clone(resource),
        scope: Arc::clone(scope),
        trace_id: trace_id(&span.trace_id)?,
        span_id: span_id(&span.span_id)?,
        parent_span_id: optional_span_id(&span.parent_span_id)?,
        trace_state: span.trace_state.clone(),
        flags: span.flags,
        name: span.name.clone(),
        kind: span_kind_from_proto(span.kind),
        start_time_unix_nano: span.start_time_unix_nano,
        end_time_unix_nano: span.end_time_unix_nano,
        attributes: attributes_from_proto(&span.attributes),
        dropped_attributes_count: span.dropped_attributes_count,
        events,
        dropped_events_count: span.dropped_events_count,
        links,
        dropped_links_count: span.dropped_links_count,
        status: status_from_proto(span.status.as_ref()),
    })
}

fn span_to_proto(span: &Span) -> proto::trace::v1::Span {
    use proto::trace::v1::span::{Event, Link};

    #[allow(clippy::needless_update)]
    proto::trace::v1::Span {
        trace_id: span.trace_id.to_vec(),
        span_id: span.span_id.to_vec(),
        trace_state: span.trace_state.clone(),
        parent_span_id: span.parent_span_id.map(SpanId::to_vec).unwrap_or_default(),
        flags: span.flags,
        name: span.name.clone(),
        kind: span_kind_to_proto(span.kind),
        start_time_unix_nano: span.start_time_unix_nano,
        end_time_unix_nano: span.end_time_unix_nano,
        attributes: attributes_to_proto(&span.attributes),
        dropped_attributes_count: span.dropped_attributes_count,
        events: span
            .events
            .iter()
            .map(|e| Event {
                time_unix_nano: e.time_unix_nano,
                name: e.name.clone(),
                attributes: attributes_to_proto(&e.attributes),
                dropped_attributes_count: e.dropped_attributes_count,
            })
            .collect(),
        dropped_events_count: span.dropped_events_count,
        links: span
            .links
            .iter()
            .map(|l| Link {
                trace_id: l.trace_id.to_vec(),
                span_id: l.span_id.to_vec(),
                trace_state: l.trace_state.clone(),
                attributes: attributes_to_proto(&l.attributes),
                dropped_attributes_count: l.dropped_attributes_count,
                flags: l.flags,
            })
            .collect(),
        dropped_links_count: span.dropped_links_count,
        status: status_to_proto(&span.status),
        ..Default::default()
    }
}

/// Decodes an OTLP trace export request into batches, one per resource block.
///
/// # Errors
///
/// Returns a [`DecodeError`] if any span carries a malformed ID. The whole
/// request is rejected in that case.
pub fn decode_traces(request: &ExportTraceServiceRequest) -> Result<Decoded, DecodeError> {
    let mut batches = Vec::with_capacity(request.resource_spans.len());

    for resource_spans in &request.resource_spans {
        let resource = Arc::new(resource_from_proto(
            resource_spans.resource.as_ref(),
            &resource_spans.schema_url,
        ));
        let mut spans = Vec::new();

        for scope_spans in &resource_spans.scope_spans {
            let scope = Arc::new(scope_from_proto(
                scope_spans.scope.as_ref(),
                &scope_spans.schema_url,
            ));
            for span in &scope_spans.spans {
                spans.push(span_from_proto(span, &resource, &scope)?);
            }
        }

        if !spans.is_empty() {
            batches.push(Batch::Traces(spans));
        }
    }

    Ok(Decoded {
        batches,
        rejected: 0,
    })
}

/// Builds an OTLP trace export request from spans.
#[must_use]
pub fn spans_to_request(spans: &[Span]) -> ExportTraceServiceRequest {
    use proto::trace::v1::{ResourceSpans, ScopeSpans};

    let resource_spans = group_by_origin(spans)
        .into_iter()
        .map(|group| ResourceSpans {
            resource: Some(resource_to_proto(group.resource)),
            schema_url: group.resource.schema_url.clone(),
            scope_spans: group
                .scopes
                .into_iter()
                .map(|scope| ScopeSpans {
                    scope: Some(scope_to_proto(scope.scope)),
                    schema_url: scope.scope.schema_url.clone(),
                    spans: scope.items.into_iter().map(span_to_proto).collect(),
                })
                .collect(),
        })
        .collect();

    ExportTraceServiceRequest { resource_spans }
}

// ============================================================================
// Metrics
// ============================================================================

fn temporality_from_proto(value: i32) -> Temporality {
    use proto::metrics::v1::AggregationTemporality;

    match AggregationTemporality::try_from(value) {
        Ok(AggregationTemporality::Delta) => Temporality::Delta,
        Ok(AggregationTemporality::Cumulative) => Temporality::Cumulative,
        Ok(AggregationTemporality::Unspecified) | Err(_) => Temporality::Unspecified,
    }
}

fn temporality_to_proto(temporality: Temporality) -> i32 {
    use proto::metrics::v1::AggregationTemporality;

    let value = match temporality {
        Temporality::Unspecified => AggregationTemporality::Unspecified,
        Temporality::Delta => AggregationTemporality::Delta,
        Temporality::Cumulative => AggregationTemporality::Cumulative,
    };
    value as i32
}

/// Identity fields shared by every point of one OTLP metric.
struct MetricIdentity<'a> {
    metric: &'a proto::metrics::v1::Metric,
    resource: &'a Arc<Resource>,
    scope: &'a Arc<InstrumentationScope>,
}

impl MetricIdentity<'_> {
    fn point(&self, kind: MetricKind, value: PointValue) -> MetricPoint {
        let mut point = MetricPoint::new(
            Arc::clone(self.resource),
            Arc::clone(self.scope),
            self.metric.name.clone(),
            kind,
            value,
        );
        point.description.clone_from(&self.metric.description);
        point.unit.clone_from(&self.metric.unit);
        point
    }

    /// Converts number data points, counting points without a value as rejected.
    fn number_points(
        &self,
        kind: MetricKind,
        data_points: &[proto::metrics::v1::NumberDataPoint],
        out: &mut Vec<MetricPoint>,
    ) -> usize {
        use proto::metrics::v1::number_data_point::Value;

        let mut rejected = 0;
        for dp in data_points {
            let value = match dp.value {
                Some(Value::AsInt(i)) => PointValue::Int(i),
                Some(Value::AsDouble(d)) => PointValue::Double(d),
                None => {
                    rejected += 1;
                    continue;
                }
            };
            let mut point = self.point(kind, value);
            point.start_time_unix_nano = dp.start_time_unix_nano;
            point.time_unix_nano = dp.time_unix_nano;
            point.attributes = attributes_from_proto(&dp.attributes);
            point.flags = dp.flags;
            out.push(point);
        }
        rejected
    }

    fn histogram_points(
        &self,
        kind: MetricKind,
        data_points: &[proto::metrics::v1::HistogramDataPoint],
        out: &mut Vec<MetricPoint>,
    ) {
        for dp in data_points {
            let mut point = self.point(
                kind,
                PointValue::Histogram(HistogramValue {
                    count: dp.count,
                    sum: dp.sum,
                    bucket_counts: dp.bucket_counts.clone(),
                    explicit_bounds: dp.explicit_bounds.clone(),
                    min: dp.min,
                    max: dp.max,
                }),
            );
            point.start_time_unix_nano = dp.start_time_unix_nano;
            point.time_unix_nano = dp.time_unix_nano;
            point.attributes = attributes_from_proto(&dp.attributes);
            point.flags = dp.flags;
            out.push(point);
        }
    }
}

/// Decodes an OTLP metrics export request into batches, one per resource block.
///
/// Exponential histograms and summaries have no representation in the
/// signal model; their data points are counted in [`Decoded::rejected`]
/// instead of failing the request.
///
/// # Errors
///
/// Currently infallible for well-formed protobuf; the `Result` keeps the
/// signature aligned with the other signals.
pub fn decode_metrics(request: &ExportMetricsServiceRequest) -> Result<Decoded, DecodeError> {
    use proto::metrics::v1::metric::Data;

    let mut batches = Vec::with_capacity(request.resource_metrics.len());
    let mut rejected = 0;

    for resource_metrics in &request.resource_metrics {
        let resource = Arc::new(resource_from_proto(
            resource_metrics.resource.as_ref(),
            &resource_metrics.schema_url,
        ));
        let mut points = Vec::new();

        for scope_metrics in &resource_metrics.scope_metrics {
            let scope = Arc::new(scope_from_proto(
                scope_metrics.scope.as_ref(),
                &scope_metrics.schema_url,
            ));
            for metric in &scope_metrics.metrics {
                let identity = MetricIdentity {
                    metric,
                    resource: &resource,
                    scope: &scope,
                };
                match &metric.data {
                    Some(Data::Gauge(gauge)) => {
                        rejected += identity.number_points(MetricKind::Gauge, &gauge.data_points, &mut points);
                    }
                    Some(Data::Sum(sum)) => {
                        let kind = MetricKind::Sum {
                            temporality: temporality_from_proto(sum.aggregation_temporality),
                            monotonic: sum.is_monotonic,
                        };
                        rejected += identity.number_points(kind, &sum.data_points, &mut points);
                    }
                    Some(Data::Histogram(histogram)) => {
                        let kind = MetricKind::Histogram {
                            temporality: temporality_from_proto(histogram.aggregation_temporality),
                        };
                        identity.histogram_points(kind, &histogram.data_points, &mut points);
                    }
                    Some(Data::ExponentialHistogram(histogram)) => {
                        rejected += histogram.data_points.len();
                    }
                    Some(Data::Summary(summary)) => {
                        rejected += summary.data_points.len();
                    }
                    None => rejected += 1,
                }
            }
        }

        if !points.is_empty() {
            batches.push(Batch::Metrics(points));
        }
    }

    Ok(Decoded { batches, rejected })
}

fn number_point_to_proto(point: &MetricPoint) -> proto::metrics::v1::NumberDataPoint {
    use proto::metrics::v1::number_data_point::Value;

    let value = match &point.value {
        PointValue::Int(i) => Some(Value::AsInt(*i)),
        PointValue::Double(d) => Some(Value::AsDouble(*d)),
        PointValue::Histogram(_) => None,
    };
    #[allow(clippy::needless_update)]
    proto::metrics::v1::NumberDataPoint {
        attributes: attributes_to_proto(&point.attributes),
        start_time_unix_nano: point.start_time_unix_nano,
        time_unix_nano: point.time_unix_nano,
        value,
        exemplars: Vec::new(),
        flags: point.flags,
        ..Default::default()
    }
}

fn histogram_point_to_proto(point: &MetricPoint) -> proto::metrics::v1::HistogramDataPoint {
    let histogram = match &point.value {
        PointValue::Histogram(h) => h.clone(),
        PointValue::Int(_) | PointValue::Double(_) => HistogramValue::default(),
    };
    #[allow(clippy::needless_update)]
    proto::metrics::v1::HistogramDataPoint {
        attributes: attributes_to_proto(&point.attributes),
        start_time_unix_nano: point.start_time_unix_nano,
        time_unix_nano: point.time_unix_nano,
        count: histogram.count,
        sum: histogram.sum,
        bucket_counts: histogram.bucket_counts,
        explicit_bounds: histogram.explicit_bounds,
        exemplars: Vec::new(),
        flags: point.flags,
        min: histogram.min,
        max: histogram.max,
        ..Default::default()
    }
}

/// Builds one OTLP metric from consecutive points of the same metric.
fn metric_to_proto(points: &[&MetricPoint]) -> proto::metrics::v1::Metric {
    use proto::metrics::v1::{metric::Data, Gauge, Histogram, Sum};

    let first = points[0];
    let data = match first.kind {
        MetricKind::Gauge => Data::Gauge(Gauge {
            data_points: points.iter().map(|p| number_point_to_proto(p)).collect(),
        }),
        MetricKind::Sum {
            temporality,
            monotonic,
        } => Data::Sum(Sum {
            data_points: points.iter().map(|p| number_point_to_proto(p)).collect(),
            aggregation_temporality: temporality_to_proto(temporality),
            is_monotonic: monotonic,
        }),
        MetricKind::Histogram { temporality } => Data::Histogram(Histogram {
            data_points: points.iter().map(|p| histogram_point_to_proto(p)).collect(),
            aggregation_temporality: temporality_to_proto(temporality),
        }),
    };
    #[allow(clippy::needless_update)]
    proto::metrics::v1::Metric {
        name: first.name.clone(),
        description: first.description.clone(),
        unit: first.unit.clone(),
        data: Some(data),
        ..Default::default()
    }
}

/// Builds an OTLP metrics export request from points.
#[must_use]
pub fn points_to_request(points: &[MetricPoint]) -> ExportMetricsServiceRequest {
    use proto::metrics::v1::{ResourceMetrics, ScopeMetrics};

    let resource_metrics = group_by_origin(points)
        .into_iter()
        .map(|group| ResourceMetrics {
            resource: Some(resource_to_proto(group.resource)),
            schema_url: group.resource.schema_url.clone(),
            scope_metrics: group
                .scopes
                .into_iter()
                .map(|scope| {
                    let mut metrics = Vec::new();
                    let mut run: Vec<&MetricPoint> = Vec::new();
                    for point in scope.items {
                        if run.last().is_some_and(|last| !last.same_metric(point)) {
                            metrics.push(metric_to_proto(&run));
                            run.clear();
                        }
                        run.push(point);
                    }
                    if !run.is_empty() {
                        metrics.push(metric_to_proto(&run));
                    }
                    ScopeMetrics {
                        scope: Some(scope_to_proto(scope.scope)),
                        schema_url: scope.scope.schema_url.clone(),
                        metrics,
                    }
                })
                .collect(),
        })
        .collect();

    ExportMetricsServiceRequest { resource_metrics }
}

// ============================================================================
// Logs
// ============================================================================

/// Converts an OTLP log record into a [`LogRecord`] attached to `resource` and `scope`.
///
/// # Errors
///
/// Returns a [`DecodeError`] if a non-empty trace or span ID has the wrong length.
pub fn log_record_from_proto(
    record: &proto::logs::v1::LogRecord,
    resource: &Arc<Resource>,
    scope: &Arc<InstrumentationScope>,
) -> Result<LogRecord, DecodeError> {
    Ok(LogRecord {
        resource: Arc::clone(resource),
        scope: Arc::clone(scope),
        time_unix_nano: record.time_unix_nano,
        observed_time_unix_nano: record.observed_time_unix_nano,
        severity_number: record.severity_number,
        severity_text: record.severity_text.clone(),
        body: record
            .body
            .as_ref()
            .map_or(AttributeValue::Empty, any_value_from_proto),
        event_name: record.event_name.clone(),
        attributes: attributes_from_proto(&record.attributes),
        dropped_attributes_count: record.dropped_attributes_count,
        trace_id: optional_trace_id(&record.trace_id)?,
        span_id: optional_span_id(&record.span_id)?,
        flags: record.flags,
    })
}

fn log_record_to_proto(record: &LogRecord) -> proto::logs::v1::LogRecord {
    let body = match &record.body {
        AttributeValue::Empty => None,
        other => Some(any_value_to_proto(other)),
    };
    #[allow(clippy::needless_update)]
    proto::logs::v1::LogRecord {
        time_unix_nano: record.time_unix_nano,
        observed_time_unix_nano: record.observed_time_unix_nano,
        severity_number: record.severity_number,
        severity_text: record.severity_text.clone(),
        body,
        attributes: attributes_to_proto(&record.attributes),
        dropped_attributes_count: record.dropped_attributes_count,
        flags: record.flags,
        trace_id: record.trace_id.map(TraceId::to_vec).unwrap_or_default(),
        span_id: record.span_id.map(SpanId::to_vec).unwrap_or_default(),
        event_name: record.event_name.clone(),
        ..Default::default()
    }
}

/// Decodes an OTLP logs export request into batches, one per resource block.
///
/// # Errors
///
/// Returns a [`DecodeError`] if any record carries a malformed trace or span ID.
pub fn decode_logs(request: &ExportLogsServiceRequest) -> Result<Decoded, DecodeError> {
    let mut batches = Vec::with_capacity(request.resource_logs.len());

    for resource_logs in &request.resource_logs {
        let resource = Arc::new(resource_from_proto(
            resource_logs.resource.as_ref(),
            &resource_logs.schema_url,
        ));
        let mut records = Vec::new();

        for scope_logs in &resource_logs.scope_logs {
            let scope = Arc::new(scope_from_proto(
                scope_logs.scope.as_ref(),
                &scope_logs.schema_url,
            ));
            for record in &scope_logs.log_records {
                records.push(log_record_from_proto(record, &resource, &scope)?);
            }
        }

        if !records.is_empty() {
            batches.push(Batch::Logs(records));
        }
    }

    Ok(Decoded {
        batches,
        rejected: 0,
    })
}

/// Builds an OTLP logs export request from records.
#[must_use]
pub fn logs_to_request(records: &[LogRecord]) -> ExportLogsServiceRequest {
    use proto::logs::v1::{ResourceLogs, ScopeLogs};

    let resource_logs = group_by_origin(records)
        .into_iter()
        .map(|group| ResourceLogs {
            resource: Some(resource_to_proto(group.resource)),
            schema_url: group.resource.schema_url.clone(),
            scope_logs: group
                .scopes
                .into_iter()
                .map(|scope| ScopeLogs {
                    scope: Some(scope_to_proto(scope.scope)),
                    schema_url: scope.scope.schema_url.clone(),
                    log_records: scope.items.into_iter().map(log_record_to_proto).collect(),
                })
                .collect(),
        })
        .collect();

    ExportLogsServiceRequest { resource_logs }
}

#[cfg(test)]
#[path = "conversions_test.rs"]
mod conversions_test;
