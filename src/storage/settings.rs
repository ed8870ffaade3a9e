use serde::de::DeserializeOwned;
use serde::Serialize;

use super::schema::Database;
use super::types::StorageError;

impl Database {
    // ========================================================================
    // Settings Operations
    // ========================================================================

    /// Get a setting by key. Values are stored as JSON.
    pub async fn get_setting(&self, key: &str) -> Result<Option<serde_json::Value>, StorageError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(self.pool()?)
            .await?;

        row.map(|(value,)| serde_json::from_str(&value).map_err(StorageError::from))
            .transpose()
    }

    /// Set a setting (UPSERT).
    pub async fn set_setting(&self, key: &str, value: &serde_json::Value) -> Result<(), StorageError> {
        let encoded = serde_json::to_string(value)?;

        let (_guard, mut tx) = self.begin_write().await?;
        sqlx::query(
            r#"
            INSERT INTO settings (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
        "#,
        )
        .bind(key)
        .bind(encoded)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(())
    }

    /// Typed read. A stored value of the wrong shape is an `Encoding` error.
    pub async fn get_setting_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
        self.get_setting(key)
            .await?
            .map(|value| serde_json::from_value(value).map_err(StorageError::from))
            .transpose()
    }

    /// Typed write.
    pub async fn set_setting_as<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StorageError> {
        let value = serde_json::to_value(value)?;
        self.set_setting(key, &value).await
    }
}
