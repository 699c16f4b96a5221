use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pulse_filtering::{
    BuildOptions, ChannelReporter, ChannelSink, CollectionLoop, ConfigurationErrorKind,
    EngineConfig, LiveMetricsEngine, ManualClock, MemorySink, NullSink, OperationalizedMetric,
    QuotaConfig,
};
use pulse_types::{
    AggregationType, CollectionConfigurationInfo, FilterConjunctionGroupInfo, FilterInfo,
    OperationalizedMetricInfo, Predicate, RequestTelemetry, TelemetryDocument, TelemetryType,
};

fn metric(id: &str, projection: &str, aggregation: AggregationType) -> OperationalizedMetricInfo {
    OperationalizedMetricInfo {
        id: id.into(),
        telemetry_type: TelemetryType::Request,
        projection: projection.into(),
        aggregation,
        filter_groups: vec![],
    }
}

fn request(ms: u64) -> TelemetryDocument {
    RequestTelemetry {
        name: "GET /orders".into(),
        duration: Duration::from_millis(ms),
        ..Default::default()
    }
    .into()
}

fn engine_with(sink: Arc<MemorySink>) -> LiveMetricsEngine {
    LiveMetricsEngine::with_options(
        BuildOptions::new(QuotaConfig::unlimited(), Arc::new(ManualClock::default())),
        sink,
    )
}

#[test]
fn concurrent_folds_are_counted_exactly_once() {
    const THREADS: usize = 8;
    const PER_THREAD: usize = 2_500;

    let (metric, errors) =
        OperationalizedMetric::new(&metric("count", "Count()", AggregationType::Count));
    assert!(errors.is_empty());
    let metric = metric.unwrap();

    std::thread::scope(|scope| {
        for _ in 0..THREADS {
            scope.spawn(|| {
                let document = request(1);
                for _ in 0..PER_THREAD {
                    metric.fold(&document);
                }
            });
        }
    });

    let first = metric.drain_and_reset(chrono::Utc::now());
    assert_eq!(first.value, (THREADS * PER_THREAD) as f64);
    assert_eq!(first.count, (THREADS * PER_THREAD) as u64);

    let second = metric.drain_and_reset(chrono::Utc::now());
    assert_eq!(second.value, 0.0);
}

#[test]
fn drains_during_folding_never_lose_or_duplicate() {
    const DOCUMENTS: usize = 20_000;

    let (metric, _) = OperationalizedMetric::new(&metric("sum", "Duration", AggregationType::Sum));
    let metric = metric.unwrap();
    let done = AtomicBool::new(false);

    let drained: f64 = std::thread::scope(|scope| {
        let drainer = scope.spawn(|| {
            let mut total = 0.0;
            while !done.load(Ordering::Acquire) {
                total += metric.drain_and_reset(chrono::Utc::now()).value;
                std::thread::yield_now();
            }
            total
        });
        scope.spawn(|| {
            let document = request(2);
            for _ in 0..DOCUMENTS {
                metric.fold(&document);
            }
            done.store(true, Ordering::Release);
        });
        drainer.join().unwrap()
    });

    let remainder = metric.drain_and_reset(chrono::Utc::now()).value;
    assert_eq!(drained + remainder, (DOCUMENTS * 2) as f64);
}

#[test]
fn average_over_a_window() {
    let sink = Arc::new(MemorySink::new());
    let engine = engine_with(sink);
    engine.update_configuration(&CollectionConfigurationInfo {
        etag: "v1".into(),
        metrics: vec![metric("avg", "Duration", AggregationType::Average)],
        document_streams: vec![],
    });

    for ms in [2, 4, 6] {
        engine.on_telemetry(&request(ms));
    }
    let report = engine.collect().pop().unwrap();
    assert_eq!(report.metrics.len(), 1);
    assert!((report.metrics[0].value - 4.0).abs() < 1e-9);
    assert_eq!(report.metrics[0].count, 3);
}

#[test]
fn metric_filters_select_documents() {
    let sink = Arc::new(MemorySink::new());
    let engine = engine_with(sink);
    let mut slow = metric("slow", "Count()", AggregationType::Count);
    slow.filter_groups = vec![FilterConjunctionGroupInfo::new(vec![FilterInfo::new(
        "Duration",
        Predicate::GreaterThan,
        "00:00:00.500",
    )])];
    engine.update_configuration(&CollectionConfigurationInfo {
        etag: "v1".into(),
        metrics: vec![slow, metric("max", "Duration", AggregationType::Max)],
        document_streams: vec![],
    });

    for ms in [100, 600, 900, 300] {
        engine.on_telemetry(&request(ms));
    }
    let report = engine.collect().pop().unwrap();
    assert_eq!(report.metrics[0].value, 2.0);
    assert_eq!(report.metrics[1].value, 900.0);
}

#[test]
fn configuration_without_etag_is_applied() {
    let engine = engine_with(Arc::new(MemorySink::new()));
    let info = CollectionConfigurationInfo::from_json(
        r#"{ "Metrics": [
            { "Id": "count", "TelemetryType": "Request", "Projection": "Count()", "Aggregation": "Count" }
        ] }"#,
    )
    .unwrap();

    assert!(engine.update_configuration(&info).applied);
    engine.on_telemetry(&request(1));

    let report = engine.collect().pop().unwrap();
    assert_eq!(report.metrics.len(), 1);
    assert_eq!(report.metrics[0].value, 1.0);
}

#[test]
fn repush_with_same_metric_keeps_folded_documents() {
    let engine = engine_with(Arc::new(MemorySink::new()));
    let config = |etag: &str| CollectionConfigurationInfo {
        etag: etag.into(),
        metrics: vec![metric("count", "Count()", AggregationType::Count)],
        document_streams: vec![],
    };
    engine.update_configuration(&config("v1"));
    let stale = engine.active();
    for _ in 0..4 {
        engine.on_telemetry(&request(1));
    }

    engine.update_configuration(&config("v2"));
    // a producer still holding the v1 snapshot
    stale.on_telemetry(&request(1), &NullSink);

    let reports = engine.collect();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].etag, "v2");
    assert_eq!(reports[0].metrics[0].value, 5.0);
}

#[test]
fn dropped_metric_is_reported_under_previous_etag() {
    let engine = engine_with(Arc::new(MemorySink::new()));
    engine.update_configuration(&CollectionConfigurationInfo {
        etag: "v1".into(),
        metrics: vec![metric("count", "Count()", AggregationType::Count)],
        document_streams: vec![],
    });
    for _ in 0..5 {
        engine.on_telemetry(&request(1));
    }
    engine.update_configuration(&CollectionConfigurationInfo {
        etag: "v2".into(),
        metrics: vec![metric("max", "Duration", AggregationType::Max)],
        document_streams: vec![],
    });

    let reports = engine.collect();
    let summary: Vec<_> = reports
        .iter()
        .map(|r| (r.etag.as_str(), r.metrics.iter().map(|m| (m.metric_id.as_str(), m.count)).collect::<Vec<_>>()))
        .collect();
    assert_eq!(summary, vec![("v1", vec![("count", 5)]), ("v2", vec![("max", 0)])]);
}

#[test]
fn swap_under_load_is_all_or_nothing() {
    let engine = Arc::new(LiveMetricsEngine::new(
        &EngineConfig::default(),
        Arc::new(NullSink),
    ));
    let config = |etag: &str, ids: &[&str]| CollectionConfigurationInfo {
        etag: etag.into(),
        metrics: ids
            .iter()
            .map(|id| metric(id, "Count()", AggregationType::Count))
            .collect(),
        document_streams: vec![],
    };
    let old = config("old", &["a", "b"]);
    let new = config("new", &["c", "d", "e"]);
    engine.update_configuration(&old);

    let stop = AtomicBool::new(false);
    std::thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| {
                while !stop.load(Ordering::Acquire) {
                    let active = engine.active();
                    let ids: Vec<&str> = active.metrics().iter().map(|m| m.id()).collect();
                    match active.etag() {
                        "old" => assert_eq!(ids, ["a", "b"]),
                        "new" => assert_eq!(ids, ["c", "d", "e"]),
                        other => panic!("unexpected etag {other}"),
                    }
                    let outcome = active.on_telemetry(&request(1), &NullSink);
                    assert_eq!(outcome.metrics_folded, ids.len());
                }
            });
        }
        for round in 0..200 {
            let next = if round % 2 == 0 { &new } else { &old };
            assert!(engine.update_configuration(next).applied);
        }
        stop.store(true, Ordering::Release);
    });
}

#[test]
fn configuration_errors_are_reported_per_item() {
    let engine = engine_with(Arc::new(MemorySink::new()));
    let info = CollectionConfigurationInfo::from_json(
        r#"{
            "ETag": "v3",
            "Metrics": [
                { "Id": "ok", "TelemetryType": "Request", "Projection": "Duration", "Aggregation": "Max" },
                { "Id": "pc", "TelemetryType": "PerformanceCounter", "Projection": "Value", "Aggregation": "Avg" },
                { "Id": "name", "TelemetryType": "Request", "Projection": "Name", "Aggregation": "Sum" },
                { "Id": "ok", "TelemetryType": "Request", "Projection": "Count()", "Aggregation": "Count" }
            ],
            "DocumentStreams": [
                {
                    "Id": "s1",
                    "DocumentFilterGroups": [
                        {
                            "TelemetryType": "Request",
                            "Filters": { "Filters": [
                                { "FieldName": "Name", "Predicate": "GreaterThan", "Comparand": "a" }
                            ]}
                        }
                    ]
                }
            ]
        }"#,
    )
    .unwrap();

    let update = engine.update_configuration(&info);
    assert!(update.applied);
    assert_eq!(update.etag, "v3");

    let kinds: Vec<_> = update.errors.iter().map(|e| (e.item_id.as_str(), e.kind)).collect();
    assert_eq!(
        kinds,
        vec![
            ("s1", ConfigurationErrorKind::DocumentStreamFilterFailure),
            ("pc", ConfigurationErrorKind::MetricUnsupportedTelemetryType),
            ("name", ConfigurationErrorKind::MetricProjectionFailure),
            ("ok", ConfigurationErrorKind::MetricDuplicateId),
        ]
    );
    for error in &update.errors {
        assert_eq!(error.data.get("ETag").map(String::as_str), Some("v3"));
    }

    let active = engine.active();
    assert_eq!(active.metrics().len(), 1);
    assert_eq!(active.document_streams().len(), 1);
}

#[test]
fn channel_sink_receives_matches() {
    let (sink, mut rx) = ChannelSink::new(16);
    let engine = LiveMetricsEngine::new(&EngineConfig::default(), Arc::new(sink));
    let info = CollectionConfigurationInfo::from_json(
        r#"{
            "ETag": "v1",
            "DocumentStreams": [
                { "Id": "orders", "DocumentFilterGroups": [
                    { "TelemetryType": "Request",
                      "Filters": { "Filters": [
                          { "FieldName": "Name", "Predicate": "Contains", "Comparand": "ORDERS" }
                      ]}}
                ]}
            ]
        }"#,
    )
    .unwrap();
    engine.update_configuration(&info);

    engine.on_telemetry(&request(5));
    let received = rx.try_recv().unwrap();
    assert_eq!(received.stream_ids, vec!["orders".to_string()]);
    assert_eq!(received.document, request(5));
}

#[tokio::test(start_paused = true)]
async fn collection_loop_reports_each_window() {
    let engine = Arc::new(engine_with(Arc::new(MemorySink::new())));
    engine.update_configuration(&CollectionConfigurationInfo {
        etag: "loop".into(),
        metrics: vec![metric("sum", "Duration", AggregationType::Sum)],
        document_streams: vec![],
    });

    let (reporter, mut rx) = ChannelReporter::new();
    let handle = CollectionLoop::spawn(engine.clone(), Duration::from_millis(1000), reporter);

    engine.on_telemetry(&request(10));
    engine.on_telemetry(&request(15));
    let first = rx.recv().await.unwrap();
    assert_eq!(first.etag, "loop");
    assert_eq!(first.metrics[0].value, 25.0);

    engine.on_telemetry(&request(7));
    let second = rx.recv().await.unwrap();
    assert_eq!(second.metrics[0].value, 7.0);

    handle.stop().await;
}
