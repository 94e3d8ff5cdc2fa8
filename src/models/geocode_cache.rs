use chrono::{DateTime, Utc};
use sqlx::PgPool;

/// One persisted forward-geocoding result, keyed by normalized address.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct GeocodeCacheEntry {
    pub address_key: String,
    pub latitude: f64,
    pub longitude: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GeocodeCacheEntry {
    pub async fn get(pool: &PgPool, key: &str) -> Result<Option<GeocodeCacheEntry>, sqlx::Error> {
        sqlx::query_as::<_, GeocodeCacheEntry>(
            "SELECT address_key, latitude, longitude, created_at, updated_at FROM geocode_cache WHERE address_key = $1",
        )
        .bind(key)
        .fetch_optional(pool)
        .await
    }

    /// Last writer wins when two resolvers race on the same key.
    pub async fn put(
        pool: &PgPool,
        key: &str,
        latitude: f64,
        longitude: f64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO geocode_cache (address_key, latitude, longitude) VALUES ($1, $2, $3) \
             ON CONFLICT (address_key) DO UPDATE SET latitude = EXCLUDED.latitude, longitude = EXCLUDED.longitude, updated_at = NOW()",
        )
        .bind(key)
        .bind(latitude)
        .bind(longitude)
        .execute(pool)
        .await?;
        Ok(())
    }
}
