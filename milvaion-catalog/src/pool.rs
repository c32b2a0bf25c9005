use crate::error::CatalogResult;
use milvaion_common::config::CatalogConfig;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

#[derive(Clone)]
pub struct CatalogPool {
    pub(crate) pool: PgPool,
}

impl CatalogPool {
    pub async fn configured(config: &CatalogConfig) -> CatalogResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.connection_string())
            .await?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> CatalogResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn raw(&self) -> &PgPool {
        &self.pool
    }
}
