//! End-to-end engine tests over a real on-disk cache: build a small artifact
//! set with the build pipeline, then query it through `FsStore`.

use flowcache_build::{build_cache, CacheWriter, GeoIndex};
use flowcache_model::geo::{GeoEntity, StateMeta};
use flowcache_model::record::{Attribution, Demographics, FlowRecord};
use flowcache_query::{
    ArtifactStore, EngineConfig, FeatureFilter, FlowEngine, FlowFilter, FsStore, Metric,
    QueryError, StoreError, ValueType,
};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::{mpsc, Semaphore};

fn county(geoid: &str, name: &str, lon: f64, lat: f64) -> GeoEntity {
    GeoEntity {
        geoid: geoid.to_string(),
        state: geoid[..2].to_string(),
        state_name: flowcache_model::geo::state_name(&geoid[..2])
            .unwrap_or("")
            .to_string(),
        name: name.to_string(),
        lon: Some(lon),
        lat: Some(lat),
    }
}

fn counties() -> Vec<GeoEntity> {
    vec![
        county("06037", "Los Angeles", -118.2, 34.05),
        county("06075", "San Francisco", -122.4, 37.77),
        county("36061", "New York", -74.0, 40.7),
    ]
}

fn states() -> Vec<StateMeta> {
    let state = |code: &str, name: &str, lon: f64, lat: f64| StateMeta {
        code: code.to_string(),
        name: name.to_string(),
        lon: Some(lon),
        lat: Some(lat),
    };
    vec![
        state("06", "California", -119.4, 36.7),
        state("36", "New York", -75.5, 43.0),
        state("48", "Texas", -99.0, 31.0),
    ]
}

fn record(origin: &str, dest: &str, observed: f64, predicted: f64) -> FlowRecord {
    FlowRecord {
        origin: origin.to_string(),
        dest: dest.to_string(),
        observed,
        predicted,
        demographics: Demographics::default(),
        attribution: None,
    }
}

fn with_attr(mut r: FlowRecord, values: Vec<f64>) -> FlowRecord {
    r.attribution = Some(Attribution {
        base_value: 0.5,
        values,
    });
    r
}

fn records() -> Vec<FlowRecord> {
    let mut tagged = record("36", "06037", 50.0, 50.0);
    tagged.demographics.age = Some("age_25_34".to_string());
    vec![
        with_attr(record("36", "06037", 500.0, 480.0), vec![2.0, -0.5]),
        with_attr(record("48", "06037", 120.0, 150.0), vec![0.1, 3.0]),
        with_attr(record("48", "06075", 300.0, 280.0), vec![-1.0, 0.2]),
        record("EUR", "06037", 80.0, 70.0),
        record("06", "36061", 200.0, 210.0),
        tagged,
    ]
}

fn build_fixture(dir: &TempDir) {
    let schema = vec!["median_income".to_string(), "unemployment".to_string()];
    let geo = GeoIndex::new(counties(), states());
    let output = build_cache(&records(), &schema, &geo);
    CacheWriter::new(dir.path())
        .write_all(&output, &counties())
        .unwrap();
}

async fn ready_engine(dir: &TempDir) -> FlowEngine {
    let engine = FlowEngine::new(
        Arc::new(FsStore::new(dir.path())),
        EngineConfig::default(),
    );
    engine.init().await.unwrap();
    engine
}

fn values(arcs: &[flowcache_query::FlowArc]) -> Vec<f64> {
    arcs.iter().map(|a| a.value).collect()
}

#[tokio::test]
async fn inbound_state_query_is_ranked() {
    let dir = TempDir::new().unwrap();
    build_fixture(&dir);
    let engine = ready_engine(&dir).await;

    let filter = FlowFilter {
        state: Some("6".to_string()), // un-normalized on purpose
        ..Default::default()
    };
    let arcs = engine.query(&filter).await.unwrap();

    assert_eq!(values(&arcs), vec![500.0, 300.0, 120.0, 80.0, 50.0]);
    assert_eq!(arcs[0].origin, "36");
    assert_eq!(arcs[0].origin_position, [-75.5, 43.0]);
    assert_eq!(arcs[0].dest_position, [-118.2, 34.05]);
}

#[tokio::test]
async fn top_n_and_min_value_bound_the_results() {
    let dir = TempDir::new().unwrap();
    build_fixture(&dir);
    let engine = ready_engine(&dir).await;

    let capped = engine
        .query(&FlowFilter {
            state: Some("06".to_string()),
            top_n: Some(2),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(values(&capped), vec![500.0, 300.0]);

    // the threshold is inclusive
    let floored = engine
        .query(&FlowFilter {
            state: Some("06".to_string()),
            min_value: Some(120.0),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(values(&floored), vec![500.0, 300.0, 120.0]);
}

#[tokio::test]
async fn county_scope_serves_from_the_adjacency_index() {
    let dir = TempDir::new().unwrap();
    build_fixture(&dir);
    let engine = ready_engine(&dir).await;

    let arcs = engine
        .query(&FlowFilter {
            county: Some("6037".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(values(&arcs), vec![500.0, 120.0, 80.0, 50.0]);
    assert!(arcs.iter().all(|a| a.dest == "06037"));
}

#[tokio::test]
async fn outbound_needs_a_state_context() {
    let dir = TempDir::new().unwrap();
    build_fixture(&dir);
    let engine = ready_engine(&dir).await;

    let no_state = engine
        .query(&FlowFilter {
            metric: Some(Metric::Out),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(no_state.is_empty());

    let from_ca = engine
        .query(&FlowFilter {
            metric: Some(Metric::Out),
            state: Some("06".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(values(&from_ca), vec![200.0]);
    assert_eq!(from_ca[0].dest, "36061");
    assert_eq!(from_ca[0].dest_position, [-74.0, 40.7]);
}

#[tokio::test]
async fn outbound_from_a_region_origin() {
    let dir = TempDir::new().unwrap();
    build_fixture(&dir);
    let engine = ready_engine(&dir).await;

    let arcs = engine
        .query(&FlowFilter {
            metric: Some(Metric::Out),
            state: Some("EUR".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(values(&arcs), vec![80.0]);
    assert_eq!(arcs[0].dest, "06037");
}

#[tokio::test]
async fn unknown_geography_is_empty_not_an_error() {
    let dir = TempDir::new().unwrap();
    build_fixture(&dir);
    let engine = ready_engine(&dir).await;

    let arcs = engine
        .query(&FlowFilter {
            state: Some("99".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(arcs.is_empty());
}

#[tokio::test]
async fn predicted_value_type_reorders() {
    let dir = TempDir::new().unwrap();
    build_fixture(&dir);
    let engine = ready_engine(&dir).await;

    let arcs = engine
        .query(&FlowFilter {
            state: Some("06".to_string()),
            value_type: Some(ValueType::Predicted),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(values(&arcs), vec![480.0, 280.0, 150.0, 70.0, 50.0]);
    // observed rides along for tooltips
    assert_eq!(arcs[0].observed, 500.0);
}

#[tokio::test]
async fn demographic_tags_filter_rows() {
    let dir = TempDir::new().unwrap();
    build_fixture(&dir);
    let engine = ready_engine(&dir).await;

    let sliced = engine
        .query(&FlowFilter {
            state: Some("06".to_string()),
            age: Some("age_25_34".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(values(&sliced), vec![50.0]);
    assert_eq!(sliced[0].age.as_deref(), Some("age_25_34"));

    // "all" is the unfiltered sentinel
    let all = engine
        .query(&FlowFilter {
            state: Some("06".to_string()),
            age: Some("all".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(all.len(), 5);
}

#[tokio::test]
async fn feature_percentile_keeps_high_magnitude_rows() {
    let dir = TempDir::new().unwrap();
    build_fixture(&dir);
    let engine = ready_engine(&dir).await;

    let arcs = engine
        .query(&FlowFilter {
            state: Some("06".to_string()),
            feature: Some(FeatureFilter {
                index: 1,
                min_percentile: 75.0,
            }),
            ..Default::default()
        })
        .await
        .unwrap();

    // |unemployment| magnitudes: 0.5, 3.0, 0.2, and two rows without
    // attribution rows counting as 0.0; the 75th percentile keeps the top two
    assert_eq!(values(&arcs), vec![500.0, 120.0]);
}

#[tokio::test]
async fn out_of_schema_feature_index_is_ignored() {
    let dir = TempDir::new().unwrap();
    build_fixture(&dir);
    let engine = ready_engine(&dir).await;

    let arcs = engine
        .query(&FlowFilter {
            state: Some("06".to_string()),
            feature: Some(FeatureFilter {
                index: 9,
                min_percentile: 99.0,
            }),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(arcs.len(), 5);
}

#[tokio::test]
async fn net_metric_is_summary_only() {
    let dir = TempDir::new().unwrap();
    build_fixture(&dir);
    let engine = ready_engine(&dir).await;

    let err = engine
        .query(&FlowFilter {
            metric: Some(Metric::Net),
            state: Some("06".to_string()),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, QueryError::NetNotRowLevel));

    let totals = engine.state_net_totals("6", ValueType::Observed).unwrap();
    assert_eq!(totals.inbound, 1050.0);
    assert_eq!(totals.outbound, 200.0);
    assert_eq!(totals.net, 850.0);
}

#[tokio::test]
async fn county_inbound_totals_and_names() {
    let dir = TempDir::new().unwrap();
    build_fixture(&dir);
    let engine = ready_engine(&dir).await;

    assert_eq!(
        engine
            .county_inbound_total("6037", ValueType::Observed)
            .unwrap(),
        750.0
    );
    assert_eq!(engine.county_name("06037").unwrap(), "Los Angeles");
    // unknown geoids fall back to the geoid itself
    assert_eq!(engine.county_name("99999").unwrap(), "99999");
}

#[tokio::test]
async fn equivalent_filters_share_one_memoized_result() {
    let dir = TempDir::new().unwrap();
    build_fixture(&dir);
    let engine = ready_engine(&dir).await;

    let base = FlowFilter {
        state: Some("06".to_string()),
        ..Default::default()
    };
    let first = engine.query(&base).await.unwrap();
    let second = engine.query(&base).await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));

    // normalization happens before memoization
    let un_normalized = engine
        .query(&FlowFilter {
            state: Some("6".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(Arc::ptr_eq(&first, &un_normalized));

    let different = engine
        .query(&FlowFilter {
            state: Some("06".to_string()),
            top_n: Some(1),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(!Arc::ptr_eq(&first, &different));
}

#[tokio::test]
async fn query_before_init_fails() {
    let dir = TempDir::new().unwrap();
    build_fixture(&dir);
    let engine = FlowEngine::new(
        Arc::new(FsStore::new(dir.path())),
        EngineConfig::default(),
    );

    let err = engine.query(&FlowFilter::default()).await.unwrap_err();
    assert!(matches!(err, QueryError::NotInitialized));
}

#[tokio::test]
async fn reset_returns_to_the_uninitialized_state() {
    let dir = TempDir::new().unwrap();
    build_fixture(&dir);
    let engine = ready_engine(&dir).await;

    let filter = FlowFilter {
        state: Some("06".to_string()),
        ..Default::default()
    };
    let before = engine.query(&filter).await.unwrap();

    engine.reset();
    let err = engine.query(&filter).await.unwrap_err();
    assert!(matches!(err, QueryError::NotInitialized));

    engine.init().await.unwrap();
    let after = engine.query(&filter).await.unwrap();
    assert_eq!(*before, *after);
    assert!(!Arc::ptr_eq(&before, &after)); // memo did not survive the reset
}

/// Holds partition fetches behind a semaphore so a test can interleave
/// engine lifecycle calls with an in-flight load.
struct GatedStore {
    inner: FsStore,
    gate: Arc<Semaphore>,
    started: mpsc::UnboundedSender<String>,
}

#[async_trait::async_trait]
impl ArtifactStore for GatedStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        if key.starts_with("flows/") {
            let _ = self.started.send(key.to_string());
            let permit = self.gate.acquire().await.expect("gate closed");
            permit.forget();
        }
        self.inner.get(key).await
    }
}

#[tokio::test]
async fn reset_during_a_partition_load_discards_the_stale_result() {
    let dir = TempDir::new().unwrap();
    build_fixture(&dir);

    let gate = Arc::new(Semaphore::new(0));
    let (started, mut loads) = mpsc::unbounded_channel();
    let engine = Arc::new(FlowEngine::new(
        Arc::new(GatedStore {
            inner: FsStore::new(dir.path()),
            gate: gate.clone(),
            started,
        }),
        EngineConfig::default(),
    ));
    engine.init().await.unwrap();

    let filter = FlowFilter {
        state: Some("06".to_string()),
        ..Default::default()
    };
    let in_flight = tokio::spawn({
        let engine = engine.clone();
        let filter = filter.clone();
        async move { engine.query(&filter).await }
    });
    loads.recv().await.unwrap(); // the partition fetch is in flight

    engine.reset();
    gate.add_permits(1);
    let straggler = in_flight.await.unwrap().unwrap();
    assert_eq!(straggler.len(), 5); // the caller still gets its answer

    // but the result computed against the old build must not have been
    // memoized across the reset
    engine.init().await.unwrap();
    gate.add_permits(1);
    let fresh = engine.query(&filter).await.unwrap();
    assert!(!Arc::ptr_eq(&straggler, &fresh));
    assert_eq!(*straggler, *fresh);
}

#[tokio::test]
async fn concurrent_first_queries_share_one_result() {
    let dir = TempDir::new().unwrap();
    build_fixture(&dir);
    let engine = ready_engine(&dir).await;

    let filter = FlowFilter {
        state: Some("06".to_string()),
        ..Default::default()
    };
    // both miss the memo, both load, but they converge on one object
    let (a, b) = tokio::join!(engine.query(&filter), engine.query(&filter));
    let (a, b) = (a.unwrap(), b.unwrap());
    assert!(Arc::ptr_eq(&a, &b));
}

#[tokio::test]
async fn attribution_partition_exposed_per_state() {
    let dir = TempDir::new().unwrap();
    build_fixture(&dir);
    let engine = ready_engine(&dir).await;

    let attr = engine.attribution_for_state("6").await.unwrap();
    assert_eq!(attr.rows.len(), 3);
    assert_eq!(engine.get_feature_schema().unwrap().len(), 2);
}

#[tokio::test]
async fn init_is_idempotent_and_concurrent() {
    let dir = TempDir::new().unwrap();
    build_fixture(&dir);
    let engine = Arc::new(FlowEngine::new(
        Arc::new(FsStore::new(dir.path())),
        EngineConfig::default(),
    ));

    let (a, b) = tokio::join!(engine.init(), engine.init());
    a.unwrap();
    b.unwrap();
    engine.init().await.unwrap();

    assert_eq!(engine.get_geo_metadata().unwrap().len(), 3);
    assert_eq!(engine.get_summary().unwrap().total_rows, 6);
}
