//! HTTP API tests.

mod common;

use std::sync::{Arc, Mutex};

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use bigdecimal::BigDecimal;
use chrono::{DateTime, TimeZone, Utc};
use tower::ServiceExt;

use common::{TestChain, far_future, seed_market_data};
use revenued::api::{AppState, create_router};
use revenued::chain::MATURITY_DELAY;
use revenued::error::{Error, Result, StorageError};
use revenued::stats::{ContractState, Period, Provider, StatStore, Values};
use revenued::storage::Store;
use revenued::types::Currency;

fn app(store: Arc<dyn StatStore>) -> Router {
    let provider = Provider::new(store);
    create_router(Arc::new(AppState { provider }))
}

async fn get(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, body)
}

/// StatStore stub with canned responses; records the requested bounds.
struct MockStats {
    state: ContractState,
    period_states: Vec<ContractState>,
    requests: Mutex<Vec<(DateTime<Utc>, DateTime<Utc>, Period)>>,
    fail: bool,
}

impl MockStats {
    fn new() -> Self {
        MockStats {
            state: ContractState::default(),
            period_states: Vec::new(),
            requests: Mutex::new(Vec::new()),
            fail: false,
        }
    }
}

impl StatStore for MockStats {
    fn metrics(&self, timestamp: DateTime<Utc>) -> Result<ContractState> {
        if self.fail {
            return Err(Error::Storage(StorageError::Corruption("boom".into())));
        }
        Ok(ContractState { timestamp, ..self.state.clone() })
    }

    fn periods(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        period: Period,
    ) -> Result<Vec<ContractState>> {
        if self.fail {
            return Err(Error::Storage(StorageError::Corruption("boom".into())));
        }
        self.requests.lock().unwrap().push((start, end, period));
        Ok(self.period_states.clone())
    }
}

fn state_with_revenue_usd(timestamp: DateTime<Utc>, revenue_usd: i64) -> ContractState {
    ContractState {
        active: 1,
        revenue: Values { usd: BigDecimal::from(revenue_usd), ..Default::default() },
        timestamp,
        ..Default::default()
    }
}

#[tokio::test]
async fn revenue_returns_current_state() {
    let mut mock = MockStats::new();
    mock.state.active = 7;
    mock.state.payout.sc = Currency::coins(42);

    let (status, body) = get(app(Arc::new(mock)), "/metrics/revenue").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["active"], 7);
    assert_eq!(body["payout"]["sc"], Currency::coins(42).to_string());
}

#[tokio::test]
async fn revenue_accepts_rfc3339_timestamp() {
    let mock = MockStats::new();
    let (status, body) =
        get(app(Arc::new(mock)), "/metrics/revenue?timestamp=2023-06-14T10:00:00Z").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["timestamp"], "2023-06-14T10:00:00Z");
}

#[tokio::test]
async fn periods_requires_start_and_end() {
    let (status, body) = get(app(Arc::new(MockStats::new())), "/metrics/revenue/hourly").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid argument: start and end are required");
}

#[tokio::test]
async fn periods_rejects_invalid_period() {
    let uri = "/metrics/revenue/yearly?start=2023-06-14T00:00:00Z&end=2023-06-15T00:00:00Z";
    let (status, body) = get(app(Arc::new(MockStats::new())), uri).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid argument: invalid period \"yearly\"");
}

#[tokio::test]
async fn periods_rejects_end_before_start() {
    let uri = "/metrics/revenue/hourly?start=2023-06-15T00:00:00Z&end=2023-06-14T00:00:00Z";
    let (status, body) = get(app(Arc::new(MockStats::new())), uri).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid argument: end must be after start");
}

#[tokio::test]
async fn periods_widens_bounds_to_boundaries() {
    let mock = Arc::new(MockStats::new());
    let uri = "/metrics/revenue/hourly?start=2023-06-14T10:30:00Z&end=2023-06-14T12:10:00Z";
    let (status, _) = get(app(mock.clone()), uri).await;
    assert_eq!(status, StatusCode::OK);

    let requests = mock.requests.lock().unwrap();
    let (start, end, period) = requests[0];
    assert_eq!(start, Utc.with_ymd_and_hms(2023, 6, 14, 10, 0, 0).unwrap());
    assert_eq!(end, Utc.with_ymd_and_hms(2023, 6, 14, 13, 0, 0).unwrap());
    assert_eq!(period, Period::Hourly);
}

#[tokio::test]
async fn periods_widens_daily_bounds() {
    let mock = Arc::new(MockStats::new());
    let uri = "/metrics/revenue/daily?start=2023-06-14T10:30:00Z&end=2023-06-16T12:10:00Z";
    let (status, _) = get(app(mock.clone()), uri).await;
    assert_eq!(status, StatusCode::OK);

    let requests = mock.requests.lock().unwrap();
    let (start, end, period) = requests[0];
    assert_eq!(start, Utc.with_ymd_and_hms(2023, 6, 14, 0, 0, 0).unwrap());
    assert_eq!(end, Utc.with_ymd_and_hms(2023, 6, 17, 0, 0, 0).unwrap());
    assert_eq!(period, Period::Daily);
}

#[tokio::test]
async fn web3index_reports_cumulative_scalars_and_daily_deltas() {
    let day = Utc.with_ymd_and_hms(2023, 6, 1, 0, 0, 0).unwrap();
    let mut mock = MockStats::new();
    // cumulative daily revenue of 10, 15, 15, 40 USD
    mock.period_states = vec![
        state_with_revenue_usd(day, 10),
        state_with_revenue_usd(day + chrono::Duration::days(1), 15),
        state_with_revenue_usd(day + chrono::Duration::days(2), 15),
        state_with_revenue_usd(day + chrono::Duration::days(3), 40),
    ];
    mock.state = state_with_revenue_usd(day, 40);

    let (status, body) = get(app(Arc::new(mock)), "/integrations/web3index/revenue").await;
    assert_eq!(status, StatusCode::OK);

    assert_eq!(body["revenue"]["now"], 40.0);
    assert_eq!(body["revenue"]["ninetyDaysAgo"], 40.0);

    let days = body["days"].as_array().unwrap();
    assert_eq!(days.len(), 3);
    assert_eq!(days[0]["date"], (day + chrono::Duration::days(1)).timestamp());
    assert_eq!(days[0]["revenue"], 5.0);
    assert_eq!(days[1]["revenue"], 0.0);
    assert_eq!(days[2]["revenue"], 25.0);
}

#[tokio::test]
async fn store_errors_surface_as_500() {
    let mut mock = MockStats::new();
    mock.fail = true;
    let (status, _) = get(app(Arc::new(mock)), "/metrics/revenue").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn revenue_route_serves_indexed_chain() {
    let store = Arc::new(Store::in_memory().unwrap());
    seed_market_data(&store);
    let mut chain = TestChain::new();
    chain.mine(&*store, MATURITY_DELAY + 4);
    let tip = chain.tip();
    chain.form_contract(Currency::coins(200), Currency::coins(200), tip + 1000, tip + 1010);
    chain.mine_blocks(&*store, 1);

    let uri = format!(
        "/metrics/revenue?timestamp={}",
        far_future().to_rfc3339().replace('+', "%2B")
    );
    let (status, body) = get(app(store as Arc<dyn StatStore>), &uri).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["active"], 1);
    assert_eq!(body["valid"], 0);
    assert_eq!(body["missed"], 0);
}
