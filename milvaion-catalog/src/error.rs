use milvaion_common::SafeDisplay;

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("occurrence not found: {0}")]
    OccurrenceNotFound(milvaion_common::model::OccurrenceId),
    #[error("job not found: {0}")]
    JobNotFound(milvaion_common::model::JobId),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl SafeDisplay for CatalogError {
    fn to_safe_string(&self) -> String {
        match self {
            CatalogError::OccurrenceNotFound(_) | CatalogError::JobNotFound(_) => self.to_string(),
            CatalogError::Database(_) => "database error".to_string(),
            CatalogError::Migration(_) => "migration error".to_string(),
        }
    }
}

pub type CatalogResult<T> = Result<T, CatalogError>;
