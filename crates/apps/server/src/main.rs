mod api;
mod config;
mod sessions;

use std::sync::Arc;
use std::time::Duration;

use annotations::{HttpRecordSource, PointSetBuilder, RecordSource};
use axum::http::Method;
use axum::routing::{delete, get, post};
use axum::Router;
use geocode::{GeoResolver, HttpGeocoder, ResolutionCache, TableResolver, Throttled};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::AppState;
use crate::config::ServiceConfig;
use crate::sessions::SessionRegistry;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = ServiceConfig::from_env();
    let resolver = build_resolver(&config).await;
    if let Err(err) = resolver.readiness() {
        error!("geocoder unusable, every cycle will fail: {err}");
    }
    let source = build_source(&config);

    let sessions = Arc::new(SessionRegistry::new(
        resolver.clone(),
        config.builder,
        source,
        config.sessions,
    ));
    spawn_idle_sweep(sessions.clone());

    let state = AppState {
        sessions,
        geocode: Arc::new(PointSetBuilder::new(
            resolver,
            Arc::new(ResolutionCache::new()),
            config.builder,
        )),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_headers(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS]);

    let app = Router::new()
        .route("/healthz", get(api::healthz))
        .route(
            "/geocode",
            get(api::get_geocode).delete(api::delete_geocode),
        )
        .route("/sessions/:id", delete(api::delete_session))
        .route("/sessions/:id/sync", post(api::sync_session))
        .route("/sessions/:id/refresh", post(api::refresh_session))
        .route("/sessions/:id/events", post(api::post_event))
        .route("/sessions/:id/cache", delete(api::delete_session_cache))
        .route("/sessions/:id/stats", get(api::get_stats))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = match tokio::net::TcpListener::bind(config.addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!("failed to bind {}: {err}", config.addr);
            return;
        }
    };
    info!("marker service listening on http://{}", config.addr);
    if let Err(err) = axum::serve(listener, app).await {
        error!("server stopped: {err}");
    }
}

fn spawn_idle_sweep(sessions: Arc<SessionRegistry>) {
    let idle = sessions.limits().idle_timeout;
    if idle.is_zero() {
        return;
    }
    let period = (idle / 4).max(Duration::from_secs(1));
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(period);
        loop {
            tick.tick().await;
            let evicted = sessions.evict_idle();
            if evicted > 0 {
                info!("evicted {evicted} idle sessions, {} live", sessions.len());
            }
        }
    });
}

/// An address table, when configured and readable, replaces the HTTP
/// geocoder entirely.
async fn build_resolver(config: &ServiceConfig) -> Arc<dyn GeoResolver> {
    if let Some(path) = &config.geocoder_table {
        let table = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| e.to_string())
            .and_then(|text| TableResolver::from_json(&text).map_err(|e| e.to_string()));
        match table {
            Ok(table) => {
                info!("serving {} addresses from {path:?}", table.len());
                return Arc::new(table);
            }
            Err(err) => warn!("address table {path:?} unusable, falling back to http: {err}"),
        }
    }

    info!(
        "geocoding via {} at {}/s (burst {})",
        config.geocoder.base_url, config.throttle.rate_per_second, config.throttle.burst
    );
    Arc::new(Throttled::new(
        HttpGeocoder::new(config.geocoder.clone()),
        config.throttle,
    ))
}

fn build_source(config: &ServiceConfig) -> Option<Arc<dyn RecordSource>> {
    let url = config.records_url.as_ref()?;
    match HttpRecordSource::new(url.clone(), config.geocoder.timeout) {
        Ok(source) => {
            info!("record source at {url}");
            Some(Arc::new(source))
        }
        Err(err) => {
            warn!("record source disabled: {err}");
            None
        }
    }
}
