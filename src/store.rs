//! Persistence of profiles, goal history, logged meals and the product catalogue.
//!
//! Data lives in SQLite. Every write is a single statement or a transaction,
//! so a failed write leaves the database as it was and there is no in-process
//! copy that could drift from it.

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{FromRow, Row};

use crate::domain::{
    ConsumptionEntry, Gender, Goal, GoalVersionEntry, Profile, normalize_product_name,
};
use crate::error::StoreError;

/// Maximum number of catalogue suggestions returned by a prefix search.
pub const DEFAULT_SEARCH_LIMIT: usize = 5;

/// Data access needed by reports and profile updates.
#[async_trait]
pub trait NutritionStore: Send + Sync {
    /// Returns the profile of a known user.
    async fn profile(&self, user_id: i64) -> Result<Option<Profile>, StoreError>;

    /// Registers a user with an empty profile. Returns true if the user is new.
    async fn ensure_user(&self, user_id: i64) -> Result<bool, StoreError>;

    /// Replaces the profile of a user, registering the user if needed.
    async fn update_profile(&self, user_id: i64, profile: &Profile) -> Result<(), StoreError>;

    /// Sets or clears the cached daily calorie goal.
    async fn set_current_goal(&self, user_id: i64, goal: Option<u32>) -> Result<(), StoreError>;

    /// Upserts the goal effective from `effective_date`.
    async fn append_goal_history(
        &self,
        user_id: i64,
        effective_date: NaiveDate,
        daily_calorie_goal: u32,
    ) -> Result<(), StoreError>;

    /// Sets the cached goal and upserts its history entry as one unit: either
    /// both are written or neither is.
    async fn record_goal(
        &self,
        user_id: i64,
        effective_date: NaiveDate,
        daily_calorie_goal: u32,
    ) -> Result<(), StoreError>;

    /// Latest entry before `start` (at most one) plus every entry in
    /// `[start, end]`, ascending by date.
    async fn goal_history(
        &self,
        user_id: i64,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<GoalVersionEntry>, StoreError>;

    /// Records a logged meal.
    async fn add_consumption(
        &self,
        user_id: i64,
        entry: &ConsumptionEntry,
    ) -> Result<(), StoreError>;

    /// Meals logged in `[start, end_exclusive)`, ascending by timestamp.
    async fn consumption_entries(
        &self,
        user_id: i64,
        start: DateTime<Utc>,
        end_exclusive: DateTime<Utc>,
    ) -> Result<Vec<ConsumptionEntry>, StoreError>;

    /// Remembers a product's energy density. Returns the normalized name.
    async fn remember_product(
        &self,
        user_id: i64,
        name: &str,
        calories_per_100g: u32,
    ) -> Result<String, StoreError>;

    /// Energy density of a remembered product.
    async fn product_calories(&self, user_id: i64, name: &str) -> Result<Option<u32>, StoreError>;

    /// Remembered products whose normalized name starts with `query`.
    async fn search_products(
        &self,
        user_id: i64,
        query: &str,
        limit: usize,
    ) -> Result<Vec<(String, u32)>, StoreError>;
}

const SET_CURRENT_GOAL: &str = r#"
    INSERT INTO users (user_id, daily_calorie_goal) VALUES (?1, ?2)
    ON CONFLICT(user_id) DO UPDATE SET daily_calorie_goal = excluded.daily_calorie_goal
"#;

const UPSERT_GOAL_HISTORY: &str = r#"
    INSERT INTO goal_history (user_id, effective_date, daily_calorie_goal) VALUES (?1, ?2, ?3)
    ON CONFLICT(user_id, effective_date) DO UPDATE SET daily_calorie_goal = excluded.daily_calorie_goal
"#;

/// One row of the `users` table.
#[derive(Debug, FromRow)]
struct UserRow {
    weight_kg: Option<f64>,
    height_cm: Option<i64>,
    gender: Option<String>,
    goal: Option<String>,
    daily_calorie_goal: Option<i64>,
    timezone: Option<String>,
}

impl UserRow {
    fn into_profile(self) -> Result<Profile, StoreError> {
        Ok(Profile {
            weight_kg: self.weight_kg,
            height_cm: self
                .height_cm
                .map(|cm| column_u32("height_cm", cm))
                .transpose()?,
            gender: self
                .gender
                .map(|g| parse_column::<Gender>("gender", g))
                .transpose()?,
            goal: self
                .goal
                .map(|g| parse_column::<Goal>("goal", g))
                .transpose()?,
            daily_calorie_goal: self
                .daily_calorie_goal
                .map(|kcal| column_u32("daily_calorie_goal", kcal))
                .transpose()?,
            timezone: self.timezone,
        })
    }
}

fn column_u32(column: &'static str, value: i64) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(|_| StoreError::InvalidColumn {
        column,
        value: value.to_string(),
    })
}

fn parse_column<T: FromStr>(column: &'static str, value: String) -> Result<T, StoreError> {
    value
        .parse()
        .map_err(|_| StoreError::InvalidColumn { column, value })
}

fn entry_from_row(row: &SqliteRow) -> Result<ConsumptionEntry, StoreError> {
    let eaten_at: i64 = row.try_get("eaten_at")?;
    let timestamp =
        DateTime::from_timestamp_millis(eaten_at).ok_or_else(|| StoreError::InvalidColumn {
            column: "eaten_at",
            value: eaten_at.to_string(),
        })?;

    Ok(ConsumptionEntry {
        product_name: row.try_get("product_name")?,
        weight_grams: column_u32("weight_grams", row.try_get("weight_grams")?)?,
        calories_consumed: column_u32("calories_consumed", row.try_get("calories_consumed")?)?,
        timestamp,
    })
}

/// SQLite-backed store.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Opens the database file at `path`, creating it and its tables if needed.
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let store = Self::connect_with(options, SqlitePoolOptions::new()).await?;
        store.migrate().await?;
        Ok(store)
    }

    /// Creates an empty private database that lives as long as the store.
    #[cfg(test)]
    pub async fn in_memory() -> Result<Self, StoreError> {
        // Every connection to :memory: is a separate database, so keep exactly one
        let pool_options = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None);
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let store = Self::connect_with(options, pool_options).await?;
        store.migrate().await?;
        Ok(store)
    }

    /// Connects without touching the schema.
    pub async fn connect_with(
        options: SqliteConnectOptions,
        pool_options: SqlitePoolOptions,
    ) -> Result<Self, StoreError> {
        let pool = pool_options.connect_with(options).await?;
        Ok(Self { pool })
    }

    /// Creates missing tables and indexes.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                user_id INTEGER PRIMARY KEY,
                weight_kg REAL,
                height_cm INTEGER,
                gender TEXT,
                goal TEXT,
                daily_calorie_goal INTEGER,
                timezone TEXT,
                created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS goal_history (
                user_id INTEGER NOT NULL,
                effective_date TEXT NOT NULL,
                daily_calorie_goal INTEGER NOT NULL CHECK (daily_calorie_goal > 0),
                PRIMARY KEY (user_id, effective_date)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS food_entries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                product_name TEXT NOT NULL,
                weight_grams INTEGER NOT NULL,
                calories_consumed INTEGER NOT NULL,
                eaten_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_food_entries_user_time ON food_entries(user_id, eaten_at)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS user_products (
                user_id INTEGER NOT NULL,
                product_name TEXT NOT NULL,
                calories_per_100g INTEGER NOT NULL,
                PRIMARY KEY (user_id, product_name)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Number of registered users.
    pub async fn user_count(&self) -> Result<i64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM users")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("n")?)
    }

    /// Total number of logged meals across users.
    pub async fn entry_count(&self) -> Result<i64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM food_entries")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("n")?)
    }
}

#[async_trait]
impl NutritionStore for SqliteStore {
    async fn profile(&self, user_id: i64) -> Result<Option<Profile>, StoreError> {
        let row: Option<UserRow> = sqlx::query_as(
            r#"
            SELECT weight_kg, height_cm, gender, goal, daily_calorie_goal, timezone
            FROM users WHERE user_id = ?
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(UserRow::into_profile).transpose()
    }

    async fn ensure_user(&self, user_id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("INSERT INTO users (user_id) VALUES (?) ON CONFLICT(user_id) DO NOTHING")
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        let created = result.rows_affected() == 1;
        if created {
            log::info!("Registered user {}", user_id);
        }
        Ok(created)
    }

    async fn update_profile(&self, user_id: i64, profile: &Profile) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO users (user_id, weight_kg, height_cm, gender, goal, daily_calorie_goal, timezone)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET
                weight_kg = excluded.weight_kg,
                height_cm = excluded.height_cm,
                gender = excluded.gender,
                goal = excluded.goal,
                daily_calorie_goal = excluded.daily_calorie_goal,
                timezone = excluded.timezone
            "#,
        )
        .bind(user_id)
        .bind(profile.weight_kg)
        .bind(profile.height_cm.map(i64::from))
        .bind(profile.gender.map(|g| g.as_str()))
        .bind(profile.goal.map(|g| g.as_str()))
        .bind(profile.daily_calorie_goal.map(i64::from))
        .bind(profile.timezone.as_deref())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn set_current_goal(&self, user_id: i64, goal: Option<u32>) -> Result<(), StoreError> {
        sqlx::query(SET_CURRENT_GOAL)
            .bind(user_id)
            .bind(goal.map(i64::from))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn append_goal_history(
        &self,
        user_id: i64,
        effective_date: NaiveDate,
        daily_calorie_goal: u32,
    ) -> Result<(), StoreError> {
        sqlx::query(UPSERT_GOAL_HISTORY)
            .bind(user_id)
            .bind(effective_date)
            .bind(i64::from(daily_calorie_goal))
            .execute(&self.pool)
            .await?;

        log::info!(
            "Goal history for {} from {}: {} kcal",
            user_id,
            effective_date,
            daily_calorie_goal
        );
        Ok(())
    }

    async fn record_goal(
        &self,
        user_id: i64,
        effective_date: NaiveDate,
        daily_calorie_goal: u32,
    ) -> Result<(), StoreError> {
        // Dropping the transaction on an early return rolls it back
        let mut tx = self.pool.begin().await?;

        sqlx::query(SET_CURRENT_GOAL)
            .bind(user_id)
            .bind(i64::from(daily_calorie_goal))
            .execute(&mut *tx)
            .await?;

        sqlx::query(UPSERT_GOAL_HISTORY)
            .bind(user_id)
            .bind(effective_date)
            .bind(i64::from(daily_calorie_goal))
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        log::info!(
            "Goal for {} set to {} kcal from {}",
            user_id,
            daily_calorie_goal,
            effective_date
        );
        Ok(())
    }

    async fn goal_history(
        &self,
        user_id: i64,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<GoalVersionEntry>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT effective_date, daily_calorie_goal FROM (
                SELECT effective_date, daily_calorie_goal FROM goal_history
                WHERE user_id = ?1 AND effective_date < ?2
                ORDER BY effective_date DESC
                LIMIT 1
            )
            UNION ALL
            SELECT effective_date, daily_calorie_goal FROM goal_history
            WHERE user_id = ?1 AND effective_date >= ?2 AND effective_date <= ?3
            ORDER BY effective_date
            "#,
        )
        .bind(user_id)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(GoalVersionEntry::new(
                    row.try_get("effective_date")?,
                    column_u32("daily_calorie_goal", row.try_get("daily_calorie_goal")?)?,
                ))
            })
            .collect()
    }

    async fn add_consumption(
        &self,
        user_id: i64,
        entry: &ConsumptionEntry,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO food_entries (user_id, product_name, weight_grams, calories_consumed, eaten_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(user_id)
        .bind(&entry.product_name)
        .bind(i64::from(entry.weight_grams))
        .bind(i64::from(entry.calories_consumed))
        .bind(entry.timestamp.timestamp_millis())
        .execute(&self.pool)
        .await?;

        log::info!(
            "User {} logged {} ({} g, {} kcal)",
            user_id,
            entry.product_name,
            entry.weight_grams,
            entry.calories_consumed
        );
        Ok(())
    }

    async fn consumption_entries(
        &self,
        user_id: i64,
        start: DateTime<Utc>,
        end_exclusive: DateTime<Utc>,
    ) -> Result<Vec<ConsumptionEntry>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT product_name, weight_grams, calories_consumed, eaten_at FROM food_entries
            WHERE user_id = ? AND eaten_at >= ? AND eaten_at < ?
            ORDER BY eaten_at, id
            "#,
        )
        .bind(user_id)
        .bind(start.timestamp_millis())
        .bind(end_exclusive.timestamp_millis())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(entry_from_row).collect()
    }

    async fn remember_product(
        &self,
        user_id: i64,
        name: &str,
        calories_per_100g: u32,
    ) -> Result<String, StoreError> {
        let normalized = normalize_product_name(name);

        sqlx::query(
            r#"
            INSERT INTO user_products (user_id, product_name, calories_per_100g) VALUES (?, ?, ?)
            ON CONFLICT(user_id, product_name) DO UPDATE SET calories_per_100g = excluded.calories_per_100g
            "#,
        )
        .bind(user_id)
        .bind(&normalized)
        .bind(i64::from(calories_per_100g))
        .execute(&self.pool)
        .await?;

        Ok(normalized)
    }

    async fn product_calories(&self, user_id: i64, name: &str) -> Result<Option<u32>, StoreError> {
        let calories: Option<i64> = sqlx::query_scalar(
            "SELECT calories_per_100g FROM user_products WHERE user_id = ? AND product_name = ?",
        )
        .bind(user_id)
        .bind(normalize_product_name(name))
        .fetch_optional(&self.pool)
        .await?;

        calories
            .map(|kcal| column_u32("calories_per_100g", kcal))
            .transpose()
    }

    async fn search_products(
        &self,
        user_id: i64,
        query: &str,
        limit: usize,
    ) -> Result<Vec<(String, u32)>, StoreError> {
        let prefix = normalize_product_name(query);

        let rows = sqlx::query(
            r#"
            SELECT product_name, calories_per_100g FROM user_products
            WHERE user_id = ?1 AND substr(product_name, 1, length(?2)) = ?2
            ORDER BY product_name
            LIMIT ?3
            "#,
        )
        .bind(user_id)
        .bind(&prefix)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok((
                    row.try_get("product_name")?,
                    column_u32("calories_per_100g", row.try_get("calories_per_100g")?)?,
                ))
            })
            .collect()
    }
}
