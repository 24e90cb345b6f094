//! Postgres-backed plan store.
//!
//! Plans live in a single `merge_plans` table:
//!
//! ```sql
//! CREATE TABLE merge_plans (
//!     id            BIGSERIAL PRIMARY KEY,
//!     plan_id       UUID        NOT NULL,
//!     plan_type     TEXT        NOT NULL,
//!     plan          JSONB       NOT NULL,
//!     created_time  TIMESTAMPTZ NOT NULL
//! );
//! ```
//!
//! The merge engine is synchronous, so the store owns a current-thread Tokio
//! runtime and blocks on each query.

use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use clinic_core::PlanId;

use super::{PersistedPlan, PlanStore, PlanType};
use crate::error::StoreError;

const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS merge_plans (
    id            BIGSERIAL PRIMARY KEY,
    plan_id       UUID        NOT NULL,
    plan_type     TEXT        NOT NULL,
    plan          JSONB       NOT NULL,
    created_time  TIMESTAMPTZ NOT NULL
)
"#;

const CREATE_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS merge_plans_plan_id_type ON merge_plans (plan_id, plan_type)";

pub struct PostgresPlanStore {
    pool: PgPool,
    runtime: tokio::runtime::Runtime,
}

impl PostgresPlanStore {
    /// Connect and make sure the table exists.
    pub fn connect(database_url: &str) -> Result<Self, StoreError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| StoreError::Storage(format!("tokio runtime: {e}")))?;

        let pool = runtime
            .block_on(PgPoolOptions::new().max_connections(4).connect(database_url))
            .map_err(|e| map_sqlx_error("connect", e))?;

        let store = Self { pool, runtime };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<(), StoreError> {
        self.runtime.block_on(async {
            sqlx::query(CREATE_TABLE)
                .execute(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("create_table", e))?;
            sqlx::query(CREATE_INDEX)
                .execute(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("create_index", e))?;
            Ok(())
        })
    }
}

impl PlanStore for PostgresPlanStore {
    #[instrument(skip(self, plan), fields(plan_id = %plan.plan_id, plan_type = %plan.plan_type), err)]
    fn insert_plan(&self, plan: PersistedPlan) -> Result<(), StoreError> {
        self.runtime.block_on(async {
            sqlx::query(
                r#"
                INSERT INTO merge_plans (plan_id, plan_type, plan, created_time)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(plan.plan_id.as_uuid())
            .bind(plan.plan_type.as_str())
            .bind(&plan.plan)
            .bind(plan.created_time)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("insert_plan", e))?;
            Ok(())
        })
    }

    #[instrument(skip(self), fields(plan_id = %plan_id), err)]
    fn find_plans(&self, plan_id: PlanId, plan_type: Option<PlanType>) -> Result<Vec<PersistedPlan>, StoreError> {
        let rows = self.runtime.block_on(async {
            sqlx::query(
                r#"
                SELECT plan_id, plan_type, plan, created_time
                FROM merge_plans
                WHERE plan_id = $1 AND ($2::TEXT IS NULL OR plan_type = $2)
                ORDER BY id ASC
                "#,
            )
            .bind(plan_id.as_uuid())
            .bind(plan_type.map(|t| t.as_str()))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_plans", e))
        })?;

        rows.into_iter()
            .map(|row| {
                let plan_id: Uuid = row.try_get("plan_id").map_err(|e| map_sqlx_error("decode", e))?;
                let plan_type: String = row.try_get("plan_type").map_err(|e| map_sqlx_error("decode", e))?;
                let plan: serde_json::Value = row.try_get("plan").map_err(|e| map_sqlx_error("decode", e))?;
                let created_time: DateTime<Utc> =
                    row.try_get("created_time").map_err(|e| map_sqlx_error("decode", e))?;
                Ok(PersistedPlan {
                    plan_id: PlanId::from_uuid(plan_id),
                    plan_type: plan_type.parse()?,
                    plan,
                    created_time,
                })
            })
            .collect()
    }

    fn list_plan_ids(&self) -> Result<Vec<PlanId>, StoreError> {
        let rows = self.runtime.block_on(async {
            sqlx::query(
                r#"
                SELECT plan_id, MIN(id) AS first_id
                FROM merge_plans
                GROUP BY plan_id
                ORDER BY first_id ASC
                "#,
            )
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_plan_ids", e))
        })?;

        rows.into_iter()
            .map(|row| {
                row.try_get::<Uuid, _>("plan_id")
                    .map(PlanId::from_uuid)
                    .map_err(|e| map_sqlx_error("decode", e))
            })
            .collect()
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            StoreError::Serialization(format!("{operation}: {err}"))
        }
        other => StoreError::Storage(format!("{operation}: {other}")),
    }
}
