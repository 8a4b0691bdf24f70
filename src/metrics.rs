use prometheus::{
    register_histogram, register_histogram_vec, register_int_counter, register_int_counter_vec,
    register_int_gauge, Histogram, HistogramVec, IntCounter, IntCounterVec, IntGauge,
};

lazy_static::lazy_static! {
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "gondola_http_requests_total", "Total HTTP requests", &["method", "path", "status"]
    ).unwrap();
    pub static ref HTTP_REQUEST_DURATION: HistogramVec = register_histogram_vec!(
        "gondola_http_request_duration_seconds", "HTTP request duration", &["method", "path"],
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    ).unwrap();

    pub static ref FETCHES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "gondola_fetches_total", "Completed fetch runs", &["status"]
    ).unwrap();
    pub static ref FETCH_OBJECTS_TOTAL: IntCounter = register_int_counter!(
        "gondola_fetch_objects_total", "Objects cataloged across all fetches"
    ).unwrap();
    pub static ref FETCH_RUNNING: IntGauge = register_int_gauge!(
        "gondola_fetch_running", "1 while a fetch is in flight"
    ).unwrap();

    pub static ref MANIFEST_LOADS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "gondola_manifest_loads_total", "Manifest load attempts", &["status"]
    ).unwrap();
    pub static ref LINK_RUNS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "gondola_link_runs_total", "Object link runs", &["status"]
    ).unwrap();
    pub static ref LINK_DURATION: Histogram = register_histogram!(
        "gondola_link_duration_seconds", "Link run duration",
        vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0]
    ).unwrap();

    pub static ref QUERIES_TOTAL: IntCounter = register_int_counter!(
        "gondola_queries_total", "Object page queries served"
    ).unwrap();
    pub static ref QUERY_DURATION: Histogram = register_histogram!(
        "gondola_query_duration_seconds", "Object query duration",
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
    ).unwrap();
}

/// Forces registration of every metric at startup so `/metrics` exposes the
/// full set before the first request touches each code path.
pub fn init() {
    lazy_static::initialize(&HTTP_REQUESTS_TOTAL);
    lazy_static::initialize(&HTTP_REQUEST_DURATION);
    lazy_static::initialize(&FETCHES_TOTAL);
    lazy_static::initialize(&FETCH_OBJECTS_TOTAL);
    lazy_static::initialize(&FETCH_RUNNING);
    lazy_static::initialize(&MANIFEST_LOADS_TOTAL);
    lazy_static::initialize(&LINK_RUNS_TOTAL);
    lazy_static::initialize(&LINK_DURATION);
    lazy_static::initialize(&QUERIES_TOTAL);
    lazy_static::initialize(&QUERY_DURATION);
}
