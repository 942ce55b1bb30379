//! PostgreSQL request store.
//!
//! Candidate lists live in a `UUID[]` column so a record and its candidates
//! commit together. Distance filtering runs in Rust with the same haversine
//! function the in-memory store uses; SQL only narrows by a latitude band.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use tracing::{debug, info, instrument};

use super::RequestStore;
use crate::common::{GeoPoint, OwnerId, RequestId, EARTH_RADIUS_MILES};
use crate::domains::requests::error::{RequestError, Result};
use crate::domains::requests::models::{
    Address, GameRequest, GameSystem, NewRequest, RequestPatch, Role, UpdateOutcome,
};

const COLUMNS: &str = "id, owner_id, name, system, role, travel_range, street, city, state, \
                       postal_code, longitude, latitude, candidate_dms, created_at, updated_at";

#[derive(Debug, FromRow)]
struct GameRequestRow {
    id: RequestId,
    owner_id: OwnerId,
    name: String,
    system: String,
    role: String,
    travel_range: i32,
    street: String,
    city: String,
    state: String,
    postal_code: String,
    longitude: Option<f64>,
    latitude: Option<f64>,
    candidate_dms: Vec<RequestId>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<GameRequestRow> for GameRequest {
    type Error = RequestError;

    fn try_from(row: GameRequestRow) -> Result<Self> {
        let role = row.role.parse::<Role>()?;
        let travel_range = u32::try_from(row.travel_range).map_err(RequestError::storage)?;
        let coordinates = match (row.longitude, row.latitude) {
            (Some(lng), Some(lat)) => Some(GeoPoint::new(lng, lat)),
            _ => None,
        };

        Ok(GameRequest {
            id: row.id,
            owner: row.owner_id,
            name: row.name,
            system: row.system.parse()?,
            role,
            travel_range,
            address: Address {
                street: row.street,
                city: row.city,
                state: row.state,
                postal_code: row.postal_code,
            },
            coordinates,
            candidate_dms: row.candidate_dms.into_iter().collect(),
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn into_requests(rows: Vec<GameRequestRow>) -> Result<Vec<GameRequest>> {
    rows.into_iter().map(GameRequest::try_from).collect()
}

/// Map a unique-constraint violation on (owner_id, system) to `Conflict`.
fn conflict_or(e: sqlx::Error, owner: OwnerId, system: GameSystem) -> RequestError {
    if let sqlx::Error::Database(db) = &e {
        if db.is_unique_violation() {
            return RequestError::Conflict { owner, system };
        }
    }
    e.into()
}

pub struct PostgresRequestStore {
    pool: PgPool,
}

impl PostgresRequestStore {
    /// Connect with a fresh pool and run migrations.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        let store = Self::from_pool(pool);
        store.migrate().await?;
        Ok(store)
    }

    /// Reuse an existing pool. Call `migrate` if the schema may be missing.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(RequestError::storage)?;
        info!("game_requests migrations applied");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl RequestStore for PostgresRequestStore {
    async fn find(&self, id: RequestId) -> Result<Option<GameRequest>> {
        let row = sqlx::query_as::<_, GameRequestRow>(&format!(
            "SELECT {COLUMNS} FROM game_requests WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(GameRequest::try_from).transpose()
    }

    #[instrument(skip(self, new), fields(owner = %new.owner, system = %new.system))]
    async fn create(&self, new: NewRequest) -> Result<GameRequest> {
        new.validate()?;
        let (owner, system) = (new.owner, new.system);
        let request = GameRequest::from_new(new);

        sqlx::query(
            "INSERT INTO game_requests (id, owner_id, name, system, role, travel_range, street,
                                        city, state, postal_code, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(request.id)
        .bind(request.owner)
        .bind(&request.name)
        .bind(request.system.as_str())
        .bind(request.role.as_str())
        .bind(request.travel_range as i32)
        .bind(&request.address.street)
        .bind(&request.address.city)
        .bind(&request.address.state)
        .bind(&request.address.postal_code)
        .bind(request.created_at)
        .bind(request.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| conflict_or(e, owner, system))?;

        debug!(request_id = %request.id, "Inserted game request");
        Ok(request)
    }

    async fn update(&self, id: RequestId, patch: RequestPatch) -> Result<UpdateOutcome> {
        patch.changes.validate()?;
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, GameRequestRow>(&format!(
            "SELECT {COLUMNS} FROM game_requests WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(RequestError::NotFound(id))?;

        let mut request = GameRequest::try_from(row)?;
        let changed = request.apply(&patch);
        if changed.is_empty() {
            tx.rollback().await?;
            return Ok(UpdateOutcome { request, changed });
        }

        let candidates: Vec<RequestId> = request.candidate_dms.iter().copied().collect();
        sqlx::query(
            "UPDATE game_requests
             SET name = $2, system = $3, role = $4, travel_range = $5, street = $6, city = $7,
                 state = $8, postal_code = $9, longitude = $10, latitude = $11,
                 candidate_dms = $12, updated_at = $13
             WHERE id = $1",
        )
        .bind(id)
        .bind(&request.name)
        .bind(request.system.as_str())
        .bind(request.role.as_str())
        .bind(request.travel_range as i32)
        .bind(&request.address.street)
        .bind(&request.address.city)
        .bind(&request.address.state)
        .bind(&request.address.postal_code)
        .bind(request.coordinates.map(|p| p.longitude))
        .bind(request.coordinates.map(|p| p.latitude))
        .bind(candidates)
        .bind(request.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| conflict_or(e, request.owner, request.system))?;

        tx.commit().await?;
        Ok(UpdateOutcome { request, changed })
    }

    async fn delete(&self, id: RequestId) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let deleted = sqlx::query("DELETE FROM game_requests WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        if deleted.rows_affected() == 0 {
            return Err(RequestError::NotFound(id));
        }

        let purged = sqlx::query(
            "UPDATE game_requests
             SET candidate_dms = array_remove(candidate_dms, $1), updated_at = NOW()
             WHERE $1 = ANY(candidate_dms)",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!(request_id = %id, purged = purged.rows_affected(), "Deleted game request");
        Ok(())
    }

    async fn find_within(
        &self,
        system: GameSystem,
        role: Role,
        center: &GeoPoint,
        radius_miles: f64,
    ) -> Result<Vec<GameRequest>> {
        // Great-circle distance is never shorter than the latitude difference,
        // so this band cannot drop a match.
        let band = (radius_miles / EARTH_RADIUS_MILES).to_degrees() + 0.01;

        let rows = sqlx::query_as::<_, GameRequestRow>(&format!(
            "SELECT {COLUMNS} FROM game_requests
             WHERE system = $1 AND role = $2
               AND latitude IS NOT NULL AND longitude IS NOT NULL
               AND latitude BETWEEN $3 AND $4
             ORDER BY id"
        ))
        .bind(system.as_str())
        .bind(role.as_str())
        .bind(center.latitude - band)
        .bind(center.latitude + band)
        .fetch_all(&self.pool)
        .await?;

        Ok(into_requests(rows)?
            .into_iter()
            .filter(|r| {
                r.coordinates
                    .map(|point| center.within_miles(&point, radius_miles))
                    .unwrap_or(false)
            })
            .collect())
    }

    async fn find_by_candidate(&self, dm_id: RequestId) -> Result<Vec<GameRequest>> {
        let rows = sqlx::query_as::<_, GameRequestRow>(&format!(
            "SELECT {COLUMNS} FROM game_requests WHERE $1 = ANY(candidate_dms) ORDER BY id"
        ))
        .bind(dm_id)
        .fetch_all(&self.pool)
        .await?;

        into_requests(rows)
    }

    async fn list_by_owner(&self, owner: OwnerId) -> Result<Vec<GameRequest>> {
        let rows = sqlx::query_as::<_, GameRequestRow>(&format!(
            "SELECT {COLUMNS} FROM game_requests WHERE owner_id = $1 ORDER BY id"
        ))
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;

        into_requests(rows)
    }
}
