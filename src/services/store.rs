use std::collections::HashSet;

use async_trait::async_trait;
use sqlx::{Sqlite, Transaction};
use tracing::debug;

use crate::{
    db::DbPool,
    error::StoreError,
    models::{
        destination::{Destination, DestinationChange, DestinationFilter, DestinationRow},
        group::{Group, UNCATEGORIZED},
    },
};

/// Durable destination records as seen by the trip monitor.
#[async_trait]
pub trait DestinationStore: Send + Sync {
    async fn fetch(&self, filter: DestinationFilter) -> Result<Vec<Destination>, StoreError>;

    /// Applies every change in one write. Missing rows are skipped.
    async fn save(&self, changes: &[DestinationChange]) -> Result<(), StoreError>;
}

const SELECT_DESTINATIONS: &str = r#"
    SELECT d.id, d.group_id, g.name AS group_name, d.name, d.address,
           d.latitude, d.longitude, d.target_arrival_time, d.last_geocoded, d.order_index
    FROM destinations d
    LEFT JOIN groups g ON g.id = d.group_id
"#;

#[derive(Clone)]
pub struct SqliteStore {
    db: DbPool,
}

impl SqliteStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    pub async fn list_groups(&self) -> Result<Vec<Group>, StoreError> {
        let groups = sqlx::query_as::<_, Group>(
            "SELECT id, name, order_index FROM groups ORDER BY order_index, name",
        )
        .fetch_all(&self.db)
        .await?;
        Ok(groups)
    }

    pub async fn get_group(&self, id: &str) -> Result<Group, StoreError> {
        sqlx::query_as::<_, Group>("SELECT id, name, order_index FROM groups WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.db)
            .await?
            .ok_or(StoreError::NotFound)
    }

    pub async fn create_group(&self, name: &str) -> Result<Group, StoreError> {
        let mut group = Group::new(name.trim());
        group.order_index =
            sqlx::query_scalar("SELECT COALESCE(MAX(order_index) + 1, 0) FROM groups")
                .fetch_one(&self.db)
                .await?;
        sqlx::query("INSERT INTO groups (id, name, order_index) VALUES (?1, ?2, ?3)")
            .bind(&group.id)
            .bind(&group.name)
            .bind(group.order_index)
            .execute(&self.db)
            .await?;
        Ok(group)
    }

    pub async fn rename_group(&self, id: &str, name: &str) -> Result<Group, StoreError> {
        let result = sqlx::query("UPDATE groups SET name = ?1 WHERE id = ?2")
            .bind(name.trim())
            .bind(id)
            .execute(&self.db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        self.get_group(id).await
    }

    /// Deletes the group together with every destination it owns.
    pub async fn delete_group(&self, id: &str) -> Result<(), StoreError> {
        let mut tx = self.db.begin().await?;
        sqlx::query("DELETE FROM destinations WHERE group_id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM groups WHERE id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        tx.commit().await?;
        Ok(())
    }

    /// Makes sure the fallback group exists and owns every ungrouped destination.
    pub async fn ensure_uncategorized(&self) -> Result<Group, StoreError> {
        let existing = sqlx::query_as::<_, Group>(
            "SELECT id, name, order_index FROM groups WHERE name = ?1 ORDER BY order_index LIMIT 1",
        )
        .bind(UNCATEGORIZED)
        .fetch_optional(&self.db)
        .await?;
        let group = match existing {
            Some(group) => group,
            None => {
                debug!("creating {UNCATEGORIZED} group");
                self.create_group(UNCATEGORIZED).await?
            }
        };

        let adopted = sqlx::query(
            r#"UPDATE destinations SET group_id = ?1
               WHERE group_id IS NULL OR group_id NOT IN (SELECT id FROM groups)"#,
        )
        .bind(&group.id)
        .execute(&self.db)
        .await?;
        if adopted.rows_affected() > 0 {
            debug!(count = adopted.rows_affected(), "assigned ungrouped destinations");
        }
        Ok(group)
    }

    pub async fn get_destination(&self, id: &str) -> Result<Destination, StoreError> {
        let sql = format!("{SELECT_DESTINATIONS} WHERE d.id = ?1");
        sqlx::query_as::<_, DestinationRow>(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await?
            .map(Destination::from)
            .ok_or(StoreError::NotFound)
    }

    /// Inserts at the end of the owning group's manual order.
    pub async fn insert_destination(
        &self,
        destination: &Destination,
    ) -> Result<Destination, StoreError> {
        let order_index: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(order_index) + 1, 0) FROM destinations WHERE group_id IS ?1",
        )
        .bind(&destination.group_id)
        .fetch_one(&self.db)
        .await?;

        sqlx::query(
            r#"INSERT INTO destinations
               (id, group_id, name, address, latitude, longitude, target_arrival_time, last_geocoded, order_index)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"#,
        )
        .bind(&destination.id)
        .bind(&destination.group_id)
        .bind(&destination.name)
        .bind(&destination.address)
        .bind(destination.coordinate.map(|c| c.latitude))
        .bind(destination.coordinate.map(|c| c.longitude))
        .bind(destination.target_arrival_time)
        .bind(destination.last_geocoded)
        .bind(order_index)
        .execute(&self.db)
        .await?;

        self.get_destination(&destination.id).await
    }

    pub async fn update_destination(
        &self,
        destination: &Destination,
    ) -> Result<Destination, StoreError> {
        let result = sqlx::query(
            r#"UPDATE destinations
               SET group_id = ?2, name = ?3, address = ?4, latitude = ?5, longitude = ?6,
                   target_arrival_time = ?7, last_geocoded = ?8, order_index = ?9
               WHERE id = ?1"#,
        )
        .bind(&destination.id)
        .bind(&destination.group_id)
        .bind(&destination.name)
        .bind(&destination.address)
        .bind(destination.coordinate.map(|c| c.latitude))
        .bind(destination.coordinate.map(|c| c.longitude))
        .bind(destination.target_arrival_time)
        .bind(destination.last_geocoded)
        .bind(destination.order_index)
        .execute(&self.db)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        self.get_destination(&destination.id).await
    }

    pub async fn delete_destination(&self, id: &str) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM destinations WHERE id = ?1")
            .bind(id)
            .execute(&self.db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Moves the destination at `from` to position `to` and reindexes the group 0..n.
    pub async fn move_destination(
        &self,
        group_id: &str,
        from: usize,
        to: usize,
    ) -> Result<Vec<Destination>, StoreError> {
        let mut items = self
            .fetch(DestinationFilter::InGroup(group_id.to_string()))
            .await?;
        if from >= items.len() {
            return Err(StoreError::NotFound);
        }
        let moved = items.remove(from);
        items.insert(to.min(items.len()), moved);

        let mut tx = self.db.begin().await?;
        write_order(&mut tx, &mut items).await?;
        tx.commit().await?;
        Ok(items)
    }

    /// Repairs a group whose order indices are duplicated or never initialised.
    pub async fn normalize_order(&self, group_id: &str) -> Result<bool, StoreError> {
        let mut items = self
            .fetch(DestinationFilter::InGroup(group_id.to_string()))
            .await?;
        if items.is_empty() {
            return Ok(false);
        }
        let unique: HashSet<i64> = items.iter().map(|d| d.order_index).collect();
        let all_zero = items.len() > 1 && items.iter().all(|d| d.order_index == 0);
        if unique.len() == items.len() && !all_zero {
            return Ok(false);
        }

        items.sort_by_key(|d| d.name.to_lowercase());
        let mut tx = self.db.begin().await?;
        write_order(&mut tx, &mut items).await?;
        tx.commit().await?;
        Ok(true)
    }
}

async fn write_order(
    tx: &mut Transaction<'_, Sqlite>,
    items: &mut [Destination],
) -> Result<(), StoreError> {
    for (index, destination) in items.iter_mut().enumerate() {
        destination.order_index = index as i64;
        sqlx::query("UPDATE destinations SET order_index = ?1 WHERE id = ?2")
            .bind(destination.order_index)
            .bind(&destination.id)
            .execute(&mut **tx)
            .await?;
    }
    Ok(())
}

#[async_trait]
impl DestinationStore for SqliteStore {
    async fn fetch(&self, filter: DestinationFilter) -> Result<Vec<Destination>, StoreError> {
        let rows = match filter {
            DestinationFilter::All => {
                let sql = format!("{SELECT_DESTINATIONS} ORDER BY g.order_index, d.order_index");
                sqlx::query_as::<_, DestinationRow>(&sql)
                    .fetch_all(&self.db)
                    .await?
            }
            DestinationFilter::WithTarget => {
                let sql = format!(
                    "{SELECT_DESTINATIONS} WHERE d.target_arrival_time IS NOT NULL ORDER BY d.target_arrival_time, d.id"
                );
                sqlx::query_as::<_, DestinationRow>(&sql)
                    .fetch_all(&self.db)
                    .await?
            }
            DestinationFilter::InGroup(group_id) => {
                let sql = format!(
                    "{SELECT_DESTINATIONS} WHERE d.group_id = ?1 ORDER BY d.order_index, d.name"
                );
                sqlx::query_as::<_, DestinationRow>(&sql)
                    .bind(group_id)
                    .fetch_all(&self.db)
                    .await?
            }
        };
        Ok(rows.into_iter().map(Destination::from).collect())
    }

    async fn save(&self, changes: &[DestinationChange]) -> Result<(), StoreError> {
        if changes.is_empty() {
            return Ok(());
        }
        let mut tx = self.db.begin().await?;
        for change in changes {
            match change {
                DestinationChange::ClearTarget { id } => {
                    sqlx::query("UPDATE destinations SET target_arrival_time = NULL WHERE id = ?1")
                        .bind(id)
                        .execute(&mut *tx)
                        .await?;
                }
                DestinationChange::SetCoordinate {
                    id,
                    coordinate,
                    geocoded_at,
                } => {
                    sqlx::query(
                        "UPDATE destinations SET latitude = ?1, longitude = ?2, last_geocoded = ?3 WHERE id = ?4",
                    )
                    .bind(coordinate.latitude)
                    .bind(coordinate.longitude)
                    .bind(geocoded_at)
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
                }
            }
        }
        tx.commit().await?;
        debug!(count = changes.len(), "saved destination changes");
        Ok(())
    }
}
