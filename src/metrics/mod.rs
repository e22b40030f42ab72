
use lazy_static::lazy_static;
use prometheus::exponential_buckets;
use prometheus::register_histogram_vec;
use prometheus::HistogramVec;
use prometheus::IntCounter;
use prometheus::IntCounterVec;
use prometheus::Opts;
use prometheus::Registry;
use tokio::sync::watch;
use tracing::error;
use tracing::info;
use tracing::warn;
use warp::Filter;
use warp::Rejection;
use warp::Reply;

lazy_static! {
    /// Inbound messages dropped by the dispatcher, by error kind.
    pub static ref DISPATCH_ERRORS_METRIC: IntCounterVec = IntCounterVec::new(
        Opts::new("dispatch_errors", "Inbound messages dropped by the dispatcher"),
        &["kind"]
    )
    .expect("metric can not be created");

    pub static ref LOG_MESSAGES_FLUSHED: IntCounter = IntCounter::new(
        "log_messages_flushed",
        "Log writes sent by the log buffer pool"
    )
    .expect("metric can not be created");

    pub static ref LOG_BATCH_SIZE_METRIC: HistogramVec = register_histogram_vec!(
        "log_batch_size",
        "Histogram of log batch sizes per topic",
        &["topic"],
        exponential_buckets(1.0, 2.0, 12).unwrap()
    )
    .expect("metric can not be created");

    pub static ref QUERY_OUTCOME_METRIC: IntCounterVec = IntCounterVec::new(
        Opts::new("store_query_outcome", "Resolved store queries by outcome"),
        &["outcome"]
    )
    .expect("metric can not be created");

    pub static ref STORE_MUTATIONS_METRIC: IntCounterVec = IntCounterVec::new(
        Opts::new("store_mutations", "Committed store mutations"),
        &["store", "role"]
    )
    .expect("metric can not be created");

    pub static ref REGISTRY: Registry = Registry::new();
}

pub fn register_custom_metrics(registry: &Registry) {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(DISPATCH_ERRORS_METRIC.clone()),
        Box::new(LOG_MESSAGES_FLUSHED.clone()),
        Box::new(QUERY_OUTCOME_METRIC.clone()),
        Box::new(STORE_MUTATIONS_METRIC.clone()),
    ];
    for collector in collectors {
        if let Err(e) = registry.register(collector) {
            warn!("collector can not be registered: {}", e);
        }
    }
}

pub async fn start_server(
    port: u16,
    mut shutdown_signal: watch::Receiver<()>,
) {
    register_custom_metrics(&REGISTRY);

    let metrics_route = warp::path!("metrics").and_then(metrics_handler);

    info!(port, "serving metrics");
    let (_, server) = warp::serve(metrics_route).bind_with_graceful_shutdown(([0, 0, 0, 0], port), async move {
        let _ = shutdown_signal.changed().await;
    });
    server.await;
}

async fn metrics_handler() -> Result<impl Reply, Rejection> {
    Ok(gather_metrics_body())
}

/// Text exposition of the crate registry followed by the default one.
pub fn gather_metrics_body() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();

    let mut res = String::new();
    for families in [REGISTRY.gather(), prometheus::gather()] {
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&families, &mut buffer) {
            error!("could not encode metrics: {}", e);
            continue;
        }
        match String::from_utf8(buffer) {
            Ok(v) => res.push_str(&v),
            Err(e) => error!("metrics could not be from_utf8'd: {}", e),
        }
    }
    res
}
