use std::sync::Arc;

use annotations::{PointSetBuilder, SurfaceEvent, SyncError, SyncReport};
use axum::extract::{Path as AxumPath, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use foundation::LocationRecord;
use geocode::{ConfigError, ResolutionFailure};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use crate::sessions::{RegistryFull, Session, SessionRegistry};

#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionRegistry>,
    /// Service-wide builder backing `/geocode`, with its own cache.
    pub geocode: Arc<PointSetBuilder>,
}

#[derive(Debug, Deserialize)]
pub struct AddressQuery {
    pub address: String,
}

#[derive(Debug, Deserialize)]
pub struct SyncBody {
    pub records: Vec<LocationRecord>,
}

#[derive(Debug, Deserialize)]
pub struct RefreshBody {
    pub context: String,
}

#[derive(Debug)]
pub enum ApiError {
    UnknownSession(String),
    BlankAddress,
    NoUpstream,
    NotConfigured(ConfigError),
    Unresolved(ResolutionFailure),
    TooManySessions(RegistryFull),
    /// A failed cycle. Operations applied before a surface failure still
    /// have to be replayed by the client.
    Cycle(SyncError),
}

impl From<RegistryFull> for ApiError {
    fn from(err: RegistryFull) -> Self {
        ApiError::TooManySessions(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::UnknownSession(_) | Self::NoUpstream => StatusCode::NOT_FOUND,
            Self::BlankAddress => StatusCode::BAD_REQUEST,
            Self::NotConfigured(_) => StatusCode::CONFLICT,
            Self::Unresolved(ResolutionFailure::NotFound) => StatusCode::NOT_FOUND,
            Self::Unresolved(_) => StatusCode::BAD_GATEWAY,
            Self::TooManySessions(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Cycle(error) => match error {
                SyncError::Configuration(_) | SyncError::Surface { .. } => StatusCode::CONFLICT,
                SyncError::Source(_) => StatusCode::BAD_GATEWAY,
            },
        };

        let body = match self {
            Self::UnknownSession(id) => json!({ "error": format!("unknown session {id}") }),
            Self::BlankAddress => json!({ "error": "address is blank" }),
            Self::NoUpstream => json!({ "error": "no upstream record source configured" }),
            Self::NotConfigured(err) => json!({ "error": err.to_string() }),
            Self::Unresolved(failure) => json!({ "error": failure.to_string() }),
            Self::TooManySessions(err) => json!({ "error": err.to_string() }),
            Self::Cycle(error) => {
                let operations = match &error {
                    SyncError::Surface { operations, .. } => operations.clone(),
                    _ => Vec::new(),
                };
                json!({ "error": error.to_string(), "operations": operations })
            }
        };
        (status, Json(body)).into_response()
    }
}

pub async fn healthz(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "status": "ok", "sessions": state.sessions.len() }))
}

pub async fn get_geocode(
    State(state): State<AppState>,
    Query(query): Query<AddressQuery>,
) -> Result<Json<Value>, ApiError> {
    state.geocode.readiness().map_err(ApiError::NotConfigured)?;
    let coordinate = state
        .geocode
        .resolve_address(&query.address)
        .await
        .ok_or(ApiError::BlankAddress)?
        .map_err(ApiError::Unresolved)?;
    Ok(Json(json!({ "address": query.address, "coordinate": coordinate })))
}

pub async fn delete_geocode(
    State(state): State<AppState>,
    Query(query): Query<AddressQuery>,
) -> Result<Json<Value>, ApiError> {
    let context =
        geocode::ResolutionContext::for_address(&query.address).ok_or(ApiError::BlankAddress)?;
    let busted = state.geocode.cache().bust(&context);
    Ok(Json(json!({ "busted": busted })))
}

pub async fn sync_session(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
    Json(body): Json<SyncBody>,
) -> Result<Json<Value>, ApiError> {
    let session = state.sessions.get_or_create(&id)?;
    cycle_response(session.sync(&body.records).await)
}

pub async fn refresh_session(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
    Json(body): Json<RefreshBody>,
) -> Result<Json<Value>, ApiError> {
    if !state.sessions.has_source() {
        return Err(ApiError::NoUpstream);
    }
    let session = state.sessions.get_or_create(&id)?;
    cycle_response(session.refresh(&body.context).await)
}

pub async fn post_event(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
    Json(event): Json<SurfaceEvent>,
) -> Result<Json<Value>, ApiError> {
    let session = lookup(&state, id)?;
    let interaction = session.dispatch(&event);
    let events: Vec<_> = session.drain_events().into_iter().map(|e| e.event).collect();
    Ok(Json(json!({ "interaction": interaction, "events": events })))
}

pub async fn delete_session_cache(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
    Query(query): Query<AddressQuery>,
) -> Result<Json<Value>, ApiError> {
    let session = lookup(&state, id)?;
    if geocode::ResolutionContext::for_address(&query.address).is_none() {
        return Err(ApiError::BlankAddress);
    }
    Ok(Json(json!({ "busted": session.bust_address(&query.address) })))
}

pub async fn get_stats(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> Result<Json<Value>, ApiError> {
    let session = lookup(&state, id)?;
    Ok(Json(json!({
        "cycle": session.latest_cycle(),
        "annotations": session.annotations().len(),
        "cache_entries": session.cache().len(),
        "interaction": session.interaction(),
        "counters": session.counters().snapshot(),
    })))
}

pub async fn delete_session(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> Result<StatusCode, ApiError> {
    if state.sessions.remove(&id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::UnknownSession(id))
    }
}

fn lookup(state: &AppState, id: String) -> Result<Arc<Session>, ApiError> {
    state.sessions.get(&id).ok_or(ApiError::UnknownSession(id))
}

/// The operations in the body are exactly the ones this cycle applied.
fn cycle_response(result: Result<SyncReport, SyncError>) -> Result<Json<Value>, ApiError> {
    match result {
        Ok(report) => Ok(Json(json!({
            "cycle": report.cycle,
            "outcome": report.outcome,
            "report": { "build": report.build, "reconcile": report.reconcile },
            "operations": report.operations,
        }))),
        Err(error) => {
            warn!(%error, "cycle failed");
            Err(ApiError::Cycle(error))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use annotations::{BuilderConfig, PointSetBuilder, StaticRecordSource, SurfaceEvent};
    use axum::extract::{Path as AxumPath, Query, State};
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use axum::Json;
    use foundation::{Coordinate, LocationRecord};
    use geocode::{ResolutionCache, TableResolver};
    use serde_json::json;

    use super::{
        delete_geocode, delete_session, get_geocode, get_stats, post_event, refresh_session,
        sync_session, AddressQuery, AppState, RefreshBody, SyncBody,
    };
    use crate::sessions::{RegistryLimits, SessionRegistry};

    fn state(with_source: bool) -> AppState {
        state_with_limits(with_source, RegistryLimits::default())
    }

    fn state_with_limits(with_source: bool, limits: RegistryLimits) -> AppState {
        let resolver = Arc::new(
            TableResolver::new().with_entry("1 Harbour Rd", Coordinate::new(10.0, 20.0)),
        );
        let source = with_source.then(|| {
            Arc::new(StaticRecordSource::new().with_context(
                "port",
                vec![LocationRecord::new("p", "pier", "1 harbour rd", None)],
            )) as Arc<dyn annotations::RecordSource>
        });
        AppState {
            sessions: Arc::new(SessionRegistry::new(
                resolver.clone(),
                BuilderConfig::default(),
                source,
                limits,
            )),
            geocode: Arc::new(PointSetBuilder::new(
                resolver,
                Arc::new(ResolutionCache::new()),
                BuilderConfig::default(),
            )),
        }
    }

    fn address(a: &str) -> Query<AddressQuery> {
        Query(AddressQuery {
            address: a.to_string(),
        })
    }

    #[tokio::test]
    async fn sync_returns_operations_for_replay() {
        let state = state(false);
        let body = SyncBody {
            records: vec![
                LocationRecord::new("a", "alpha", "1 Harbour Rd", None),
                LocationRecord::new("b", "beta", "", Some(Coordinate::new(1.0, 1.0))),
                LocationRecord::new("z", "null island", "", Some(Coordinate::new(0.0, 0.0))),
            ],
        };
        let Json(v) = sync_session(State(state.clone()), AxumPath("s1".into()), Json(body))
            .await
            .unwrap();
        assert_eq!(v["cycle"], json!(1));
        assert_eq!(v["outcome"], json!("applied"));
        assert_eq!(v["operations"].as_array().unwrap().len(), 2);
        assert_eq!(v["operations"][0]["op"], json!("create"));

        let Json(stats) = get_stats(State(state), AxumPath("s1".into())).await.unwrap();
        assert_eq!(stats["annotations"], json!(2));
        assert_eq!(stats["counters"]["cycles_applied"], json!(1));
    }

    #[tokio::test]
    async fn concurrent_syncs_report_only_their_own_operations() {
        let state = state(false);
        let sync = |id: &'static str, lon: f64| {
            let state = state.clone();
            async move {
                let records = vec![LocationRecord::new(id, id, "", Some(Coordinate::new(1.0, lon)))];
                sync_session(State(state), AxumPath("shared".into()), Json(SyncBody { records }))
                    .await
                    .unwrap()
                    .0
            }
        };
        let (a, b) = tokio::join!(sync("a", 1.0), sync("b", 2.0));

        // Each cycle replaces the whole set: one create, plus one remove
        // for whichever ran second.
        let (first, second) = if a["cycle"] == json!(1) { (a, b) } else { (b, a) };
        let first_ops = first["operations"].as_array().unwrap();
        let second_ops = second["operations"].as_array().unwrap();
        assert_eq!(first_ops.len(), 1);
        assert_eq!(first_ops[0]["op"], json!("create"));
        assert_eq!(second_ops.len(), 2);
        assert_eq!(second_ops[0]["op"], json!("remove"));
        assert_eq!(second_ops[1]["op"], json!("create"));
    }

    #[tokio::test]
    async fn full_registry_is_503() {
        let state = state_with_limits(
            false,
            RegistryLimits {
                max_sessions: 1,
                ..RegistryLimits::default()
            },
        );
        let body = || Json(SyncBody { records: vec![] });
        sync_session(State(state.clone()), AxumPath("a".into()), body())
            .await
            .unwrap();
        let err = sync_session(State(state), AxumPath("b".into()), body())
            .await
            .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn unknown_session_is_404() {
        let err = get_stats(State(state(false)), AxumPath("nope".into()))
            .await
            .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);

        let err = delete_session(State(state(false)), AxumPath("nope".into()))
            .await
            .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn refresh_without_upstream_is_404() {
        let err = refresh_session(
            State(state(false)),
            AxumPath("s".into()),
            Json(RefreshBody {
                context: "port".into(),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn refresh_with_upstream_places_markers() {
        let Json(v) = refresh_session(
            State(state(true)),
            AxumPath("s".into()),
            Json(RefreshBody {
                context: "port".into(),
            }),
        )
        .await
        .unwrap();
        assert_eq!(v["report"]["build"]["resolved"], json!(1));
    }

    #[tokio::test]
    async fn events_follow_owned_handles() {
        let state = state(false);
        let records = vec![LocationRecord::new("b", "beta", "", Some(Coordinate::new(1.0, 1.0)))];
        let Json(v) = sync_session(
            State(state.clone()),
            AxumPath("s".into()),
            Json(SyncBody { records }),
        )
        .await
        .unwrap();
        let handle = serde_json::from_value(v["operations"][0]["handle"].clone()).unwrap();

        let Json(v) = post_event(
            State(state),
            AxumPath("s".into()),
            Json(SurfaceEvent::Hover { handle }),
        )
        .await
        .unwrap();
        assert_eq!(v["interaction"]["hovered"], json!("b"));
        assert_eq!(v["events"], json!([{ "type": "hovered", "id": "b" }]));
    }

    #[tokio::test]
    async fn geocode_endpoint_resolves_and_busts() {
        let state = state(false);
        let Json(v) = get_geocode(State(state.clone()), address("1 harbour rd."))
            .await
            .unwrap();
        assert_eq!(v["coordinate"]["latitude"], json!(10.0));

        let err = get_geocode(State(state.clone()), address("nowhere"))
            .await
            .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);

        let err = get_geocode(State(state.clone()), address("  "))
            .await
            .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);

        let Json(v) = delete_geocode(State(state), address("1 Harbour Rd")).await.unwrap();
        assert_eq!(v["busted"], json!(true));
    }
}
