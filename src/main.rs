use portal_rbac::{
    api::{create_router, AppState},
    audit::AuditLog,
    authz::{LevelGate, PrivilegeValidator, StoreIdentityProvider},
    catalog::RoleCatalog,
    config::Config,
    engine::AssignmentEngine,
    observability::init_tracing,
    store::{create_pool, run_migrations, PostgresStore},
};
use std::net::SocketAddr;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::load()?;
    config.validate()?;

    // Initialize tracing/logging
    init_tracing(&config.observability);

    tracing::info!("Starting portal RBAC service");
    tracing::info!("Configuration loaded: {:?}", config.server);

    // Create database connection pool
    let pool = create_pool(&config.database).await?;
    tracing::info!("Database connection pool created");

    // Run database migrations
    run_migrations(&pool).await?;
    tracing::info!("Database migrations completed");

    // Wire the core: one store behind every trait seam
    let store = Arc::new(PostgresStore::new(pool));
    let catalog = Arc::new(RoleCatalog::new(store.clone()));
    let validator = PrivilegeValidator::new(catalog.clone());
    let audit = Arc::new(AuditLog::new(
        store.clone(),
        config.audit.default_page_size,
        config.audit.max_page_size,
        config.audit.export_max_rows,
    ));
    let engine = Arc::new(AssignmentEngine::new(
        catalog.clone(),
        validator,
        audit.clone(),
        store.clone(),
    ));

    let state = AppState {
        engine,
        audit,
        catalog: catalog.clone(),
        identity: Arc::new(StoreIdentityProvider::new(store)),
        gate: Arc::new(LevelGate::new(
            catalog,
            config.access.manage_min_level,
            config.access.audit_min_level,
        )),
    };

    // Create router
    let app = create_router(state);

    // Bind server
    let addr = SocketAddr::new(config.server.host.parse()?, config.server.port);
    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!("Portal RBAC service is ready to accept requests");

    axum::serve(listener, app)
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    Ok(())
}
