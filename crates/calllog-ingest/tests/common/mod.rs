//! Shared helpers for database integration tests
//!
//! Each test starts its own PostgreSQL container through `testcontainers`
//! and connects with the crate's own pool builder.

#![allow(dead_code)]

use anyhow::{Context, Result};
use calllog_common::config::{DatabaseConfig, IngestSettings};
use calllog_ingest::{db, Pipeline};
use sqlx::PgPool;
use std::path::{Path, PathBuf};
use testcontainers::{core::IntoContainerPort, runners::AsyncRunner, ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tracing::info;

pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,calllog_ingest=debug,sqlx=warn")),
        )
        .with_test_writer()
        .try_init();
}

/// PostgreSQL container with a connected pool
pub struct TestPostgres {
    _container: ContainerAsync<Postgres>,
    pool: PgPool,
}

impl TestPostgres {
    pub async fn start() -> Result<Self> {
        info!("Starting PostgreSQL test container...");

        let container = Postgres::default()
            .with_tag("16-alpine")
            .start()
            .await
            .context("Failed to start PostgreSQL container")?;

        let host = container.get_host().await.context("Failed to get container host")?;
        let port = container
            .get_host_port_ipv4(5432.tcp())
            .await
            .context("Failed to get container port")?;

        let config = DatabaseConfig {
            user: "postgres".to_string(),
            password: "postgres".to_string(),
            host: host.to_string(),
            port,
            name: "postgres".to_string(),
            max_connections: 5,
            connect_timeout_secs: 30,
        };

        let pool = db::create_pool(&config)
            .await
            .context("Failed to connect to PostgreSQL")?;

        Ok(Self {
            _container: container,
            pool,
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn pipeline(&self, settings: IngestSettings) -> Result<Pipeline> {
        Ok(Pipeline::new(self.pool.clone(), settings)?)
    }

    pub async fn count_rows(&self, table: &str) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM \"{}\"", table);
        Ok(sqlx::query_scalar(&sql).fetch_one(&self.pool).await?)
    }
}

/// Settings pointing at `dir` with a given batch size
pub fn settings(dir: &Path, chunk_size: usize) -> IngestSettings {
    IngestSettings {
        chunk_size,
        csv_dir: dir.to_path_buf(),
        ..IngestSettings::default()
    }
}

pub fn write_file(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, bytes).expect("write fixture");
    path
}

/// A small export with the platform's usual header
pub const SAMPLE_CSV: &str = "\
Date Appel,Heure Appel,Numero Telephone,Duree Appel,Agent,COMMENTAIRE
2024-03-05,08:15:30,01 23 45 67 89,125,Martin,rappeler
2024-03-05,09:00:00,06-11-22-33-44,abc,Durand,
05/03/2024,10:30,NA,60.0,Petit,\"avec, virgule\"
";
