//! Database connection management
//!
//! Pool construction and the startup DDL for the sync tables. Tables only
//! carry their key columns here; everything else is added at runtime by
//! schema evolution.

use crate::config::DatabaseConfig;
use crate::store::queries::SqlBuilder;
use crate::store::TableRef;
use crate::sync::header::{EntityDescriptor, MATERIAL, STYLE};
use crate::sync::log::SYNC_LOG;
use crate::tables::{
    APP_CONFIG, PLAN_DEPENDENCIES, TIMELINE, TIMELINE_ASSIGNMENT, TRACKING_FOLDER, TRACKING_PLAN,
    TRACKING_PLAN_STYLE,
};
use deadpool_postgres::{Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime};
use thiserror::Error;
use tokio_postgres::NoTls;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum DbError {
    #[error("Failed to create pool: {0}")]
    CreatePool(#[from] deadpool_postgres::CreatePoolError),

    #[error("Failed to get pool connection: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    #[error("Database error: {0}")]
    Postgres(#[from] tokio_postgres::Error),
}

/// Build the pool and check it with `SELECT 1`
pub async fn create_pool(config: &DatabaseConfig) -> Result<Pool, DbError> {
    let mut cfg = Config::new();
    cfg.host = Some(config.host.clone());
    cfg.port = Some(config.port);
    cfg.user = Some(config.user.clone());
    cfg.password = Some(config.password.clone());
    cfg.dbname = Some(config.database.clone());
    cfg.manager = Some(ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    });
    cfg.pool = Some(PoolConfig::new(config.max_pool_size));

    let pool = if config.use_tls {
        let certs = rustls_native_certs::load_native_certs();
        let mut root_store = rustls::RootCertStore::empty();
        for cert in certs.certs {
            root_store.add(cert).ok();
        }

        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();
        let tls = tokio_postgres_rustls::MakeRustlsConnect::new(tls_config);

        cfg.create_pool(Some(Runtime::Tokio1), tls)?
    } else {
        cfg.create_pool(Some(Runtime::Tokio1), NoTls)?
    };

    let client = pool.get().await?;
    client.query_one("SELECT 1 as ok", &[]).await?;

    info!(
        "Database connection successful ({}:{}/{}, TLS: {})",
        config.host, config.port, config.database, config.use_tls
    );
    Ok(pool)
}

/// Create schemas and tables that do not exist yet
pub async fn bootstrap(pool: &Pool) -> Result<(), DbError> {
    let client = pool.get().await?;
    let statements = bootstrap_statements();
    for sql in &statements {
        debug!("Bootstrap: {}", sql.lines().next().unwrap_or_default());
        client.batch_execute(sql).await?;
    }
    info!("Database tables initialized ({} statements)", statements.len());
    Ok(())
}

fn table(t: &TableRef) -> String {
    SqlBuilder::qualified(t)
}

fn ident(name: &str) -> String {
    SqlBuilder::quote_ident(name)
}

fn header_tables(descriptor: &EntityDescriptor) -> Vec<String> {
    let mut out = vec![format!(
        "CREATE TABLE IF NOT EXISTS {} (
            id TEXT PRIMARY KEY DEFAULT gen_random_uuid()::text,
            {} TEXT UNIQUE NOT NULL,
            deleted BOOLEAN NOT NULL DEFAULT false,
            raw_beproduct_data JSONB,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )",
        table(&descriptor.table),
        ident(descriptor.id_column)
    )];

    for collection in descriptor.collections {
        let parent = ident(descriptor.parent_column);
        let key = ident(collection.kind.unique_key());
        out.push(format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id TEXT PRIMARY KEY DEFAULT gen_random_uuid()::text,
                {parent} TEXT NOT NULL,
                {key} TEXT,
                deleted BOOLEAN NOT NULL DEFAULT false,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                UNIQUE ({parent}, {key})
            )",
            table(&collection.table)
        ));
    }
    out
}

fn bootstrap_statements() -> Vec<String> {
    let mut out = vec![
        "CREATE SCHEMA IF NOT EXISTS pim".to_string(),
        "CREATE SCHEMA IF NOT EXISTS ops".to_string(),
        "CREATE SCHEMA IF NOT EXISTS config".to_string(),
    ];
    out.extend(header_tables(&MATERIAL));
    out.extend(header_tables(&STYLE));

    out.push(format!(
        "CREATE TABLE IF NOT EXISTS {} (
            id TEXT PRIMARY KEY,
            name TEXT,
            brand TEXT,
            style_folder_id TEXT,
            style_folder_name TEXT,
            active BOOLEAN NOT NULL DEFAULT true,
            raw_payload JSONB
        )",
        table(&TRACKING_FOLDER)
    ));
    out.push(format!(
        "CREATE TABLE IF NOT EXISTS {} (
            id TEXT PRIMARY KEY,
            folder_id TEXT,
            name TEXT,
            start_date DATE,
            end_date DATE,
            active BOOLEAN NOT NULL DEFAULT true,
            raw_payload JSONB
        )",
        table(&TRACKING_PLAN)
    ));
    out.push(format!(
        "CREATE TABLE IF NOT EXISTS {} (
            id TEXT PRIMARY KEY,
            plan_id TEXT,
            style_header_id TEXT,
            active BOOLEAN NOT NULL DEFAULT true,
            raw_payload JSONB
        )",
        table(&TRACKING_PLAN_STYLE)
    ));
    out.push(format!(
        "CREATE TABLE IF NOT EXISTS {} (
            id TEXT PRIMARY KEY,
            plan_style_id TEXT NOT NULL,
            template_item_id TEXT,
            status TEXT NOT NULL DEFAULT 'Not Started',
            plan_date DATE,
            rev_date DATE,
            final_date DATE,
            due_date DATE,
            start_date DATE,
            late BOOLEAN NOT NULL DEFAULT false,
            row_number INTEGER,
            depends_on TEXT,
            dependency_uuid TEXT,
            relationship TEXT,
            raw_payload JSONB,
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            UNIQUE (plan_style_id, id)
        )",
        table(&TIMELINE)
    ));
    out.push(format!(
        "CREATE TABLE IF NOT EXISTS {} (
            id TEXT PRIMARY KEY DEFAULT gen_random_uuid()::text,
            timeline_id TEXT NOT NULL,
            assignee_id TEXT,
            source_user_id TEXT,
            UNIQUE (timeline_id, assignee_id)
        )",
        table(&TIMELINE_ASSIGNMENT)
    ));
    out.push(format!(
        "CREATE TABLE IF NOT EXISTS {} (
            id TEXT PRIMARY KEY,
            plan_id TEXT NOT NULL,
            row_number INTEGER,
            department TEXT,
            action_description TEXT,
            short_description TEXT,
            share_with TEXT,
            page TEXT,
            days NUMERIC,
            depends_on TEXT,
            duration NUMERIC,
            duration_unit TEXT,
            relationship TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )",
        table(&PLAN_DEPENDENCIES)
    ));
    out.push(format!(
        "CREATE TABLE IF NOT EXISTS {} (
            id TEXT PRIMARY KEY,
            entity_type TEXT NOT NULL,
            entity_id TEXT,
            action TEXT NOT NULL,
            payload JSONB,
            payload_sha256 TEXT,
            status TEXT NOT NULL,
            error TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )",
        table(&SYNC_LOG)
    ));
    out.push(format!(
        "CREATE TABLE IF NOT EXISTS {} (
            id TEXT PRIMARY KEY DEFAULT gen_random_uuid()::text,
            category TEXT NOT NULL,
            key TEXT NOT NULL,
            value TEXT,
            is_active BOOLEAN NOT NULL DEFAULT true,
            allowed_for JSONB,
            config_type TEXT,
            data_type TEXT,
            last_synced_at TIMESTAMPTZ,
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            UNIQUE (category, key)
        )",
        table(&APP_CONFIG)
    ));

    out.push(format!(
        "CREATE INDEX IF NOT EXISTS idx_timeline_plan_style ON {} (plan_style_id)",
        table(&TIMELINE)
    ));
    out.push(format!(
        "CREATE INDEX IF NOT EXISTS idx_plan_dependencies_plan ON {} (plan_id)",
        table(&PLAN_DEPENDENCIES)
    ));
    out.push(format!(
        "CREATE INDEX IF NOT EXISTS idx_sync_log_entity ON {} (entity_type, entity_id)",
        table(&SYNC_LOG)
    ));
    out
}
