use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use sqlx::postgres::PgPoolOptions;
use tenant_gate_access::{
    AccountStore, ClientResolver, FlowPolicy, LoginFlow, MemoryStore, Reconciler, StateCodec,
    StaticTenantSource, TenantSource, TokenVerifier,
};
use tenant_gate_server::auth::db::PgAccountStore;
use tenant_gate_server::auth::directory::DirectoryTenantSource;
use tenant_gate_server::auth::oidc::OidcProvider;
use tenant_gate_server::auth::verifier::{
    HttpJwksFetcher, IntrospectionVerifier, JwksVerifier, RealmUrls,
};
use tenant_gate_server::auth::{self, AppState, CookiePolicy};
use tenant_gate_server::config::{ServerConfig, TenantSourceKind, VerificationMode};
use tenant_gate_server::error::StartupError;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run().await {
        tracing::error!(error = %e, "server stopped");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), StartupError> {
    let config = ServerConfig::load().map_err(|e| StartupError::Config {
        details: e.to_string(),
    })?;
    tracing::info!("Loaded configuration");

    // No redirects: discovery and token calls must hit the configured host.
    let http = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .timeout(config.http_timeout())
        .build()
        .map_err(|e| StartupError::HttpClient {
            details: e.to_string(),
        })?;

    let store = account_store(&config).await?;
    let flow = login_flow(&config, http, store)?;
    let cookies = CookiePolicy::new(
        config.session.cookie_name.clone(),
        time::Duration::seconds(config.session.ttl_secs),
        config.session.insecure_cookies,
    );
    if config.session.insecure_cookies {
        tracing::warn!("insecure cookies enabled; only use this over plain-HTTP development");
    }

    let app_state = Arc::new(AppState::new(flow, cookies));
    let app = Router::new()
        .route("/api/login", get(auth::login))
        .route("/login/callback", get(auth::callback))
        .route("/api/session", get(auth::session))
        .route("/api/refresh", post(auth::refresh))
        .route("/logout", post(auth::logout))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(app_state);

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .map_err(|e| StartupError::Serve {
            details: format!("failed to bind {}: {e}", config.listen_addr),
        })?;
    tracing::info!("listening on http://{}", config.listen_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .map_err(|e| StartupError::Serve {
        details: e.to_string(),
    })
}

async fn account_store(config: &ServerConfig) -> Result<Arc<dyn AccountStore>, StartupError> {
    let Some(url) = config.database.url.as_deref() else {
        tracing::warn!("database.url not set; accounts are kept in memory and lost on restart");
        return Ok(Arc::new(MemoryStore::new()));
    };

    let database = |e: &dyn std::fmt::Display| StartupError::Database {
        details: e.to_string(),
    };
    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(url)
        .await
        .map_err(|e| database(&e))?;

    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| database(&e))?;

    Ok(Arc::new(PgAccountStore::new(pool)))
}

fn login_flow(
    config: &ServerConfig,
    http: reqwest::Client,
    store: Arc<dyn AccountStore>,
) -> Result<LoginFlow, StartupError> {
    let tenants: Arc<dyn TenantSource> = match config.tenancy.source {
        TenantSourceKind::Static => {
            Arc::new(StaticTenantSource::new(config.tenancy.tenants.clone()))
        }
        TenantSourceKind::Directory => {
            let base = config
                .tenancy
                .directory_url
                .clone()
                .ok_or_else(|| StartupError::Config {
                    details: "tenancy.directory_url is not set".to_string(),
                })?;
            Arc::new(DirectoryTenantSource::new(http.clone(), base))
        }
    };

    let realms = RealmUrls::new(&config.verification.keycloak_url);
    let verifier: Arc<dyn TokenVerifier> = match config.verification.mode {
        VerificationMode::Local => Arc::new(JwksVerifier::new(
            realms,
            Arc::new(HttpJwksFetcher::new(http.clone())),
            std::time::Duration::from_secs(config.verification.leeway_secs),
        )),
        VerificationMode::Introspection => {
            let missing = || StartupError::Config {
                details: "introspection credentials are not set".to_string(),
            };
            let client_id = config.introspection_client_id().ok_or_else(missing)?;
            let client_secret = config
                .verification
                .client_secret
                .clone()
                .ok_or_else(missing)?;
            Arc::new(IntrospectionVerifier::new(
                http.clone(),
                realms,
                client_id.to_string(),
                client_secret,
            ))
        }
    };

    let resolver = ClientResolver::new(tenants, Arc::new(OidcProvider::new(http)))
        .with_tenant_ttl(config.tenancy.cache_ttl())
        .with_client_id_override(
            config
                .access
                .public_client_id
                .clone()
                .filter(|id| !id.is_empty()),
        );
    let reconciler = Reconciler::new(store.clone(), config.access.privilege_policy())
        .with_session_ttl(config.session_ttl());
    let policy = FlowPolicy {
        allow_list: config
            .access
            .allow_list()
            .map_err(|report| StartupError::Config {
                details: report.to_string(),
            })?,
        post_logout_redirect: config.post_logout_redirect.clone(),
    };

    Ok(LoginFlow::new(
        resolver,
        StateCodec::new(config.state_secret.clone()),
        verifier,
        store,
        reconciler,
        policy,
    ))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
