use ::duckdb::{Row, ToSql};
use serde::Serialize;

use crate::{AccessMode, Warehouse, WarehouseError};

/// A watchlist entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityRecord {
    pub entity_id: String,
    pub entity_class: String,
    pub code: String,
    pub market: String,
    pub name: Option<String>,
}

impl Warehouse {
    /// Add an entity to the watchlist, refreshing its market and keeping a
    /// known display name when the new one is absent.
    pub fn register_entity(&self, entity: &EntityRecord) -> Result<(), WarehouseError> {
        let connection = self.manager.acquire(AccessMode::ReadWrite)?;
        let params: [&dyn ToSql; 5] = [
            &entity.entity_id,
            &entity.entity_class,
            &entity.code,
            &entity.market,
            &entity.name,
        ];
        connection.execute(
            "INSERT INTO entities (entity_id, entity_class, code, market, name) \
             VALUES (?, ?, ?, ?, ?) \
             ON CONFLICT (entity_id) DO UPDATE SET \
             market = excluded.market, \
             name = COALESCE(excluded.name, entities.name)",
            params.as_slice(),
        )?;
        Ok(())
    }

    /// Remove an entity from the watchlist. Stored observations are kept.
    pub fn unregister_entity(&self, entity_id: &str) -> Result<bool, WarehouseError> {
        let connection = self.manager.acquire(AccessMode::ReadWrite)?;
        let params: [&dyn ToSql; 1] = [&entity_id];
        let removed = connection.execute(
            "DELETE FROM entities WHERE entity_id = ?",
            params.as_slice(),
        )?;
        Ok(removed > 0)
    }

    /// Update the display name of a watched entity; unwatched ids are ignored.
    pub fn refresh_entity_name(&self, entity_id: &str, name: &str) -> Result<bool, WarehouseError> {
        let connection = self.manager.acquire(AccessMode::ReadWrite)?;
        let params: [&dyn ToSql; 2] = [&name, &entity_id];
        let updated = connection.execute(
            "UPDATE entities SET name = ? WHERE entity_id = ?",
            params.as_slice(),
        )?;
        Ok(updated > 0)
    }

    /// Watchlist entries, optionally restricted to one class.
    pub fn list_entities(
        &self,
        entity_class: Option<&str>,
    ) -> Result<Vec<EntityRecord>, WarehouseError> {
        let connection = self.manager.acquire(AccessMode::ReadOnly)?;
        let rows = match entity_class {
            Some(entity_class) => {
                let mut statement = connection.prepare(
                    "SELECT entity_id, entity_class, code, market, name FROM entities \
                     WHERE entity_class = ? ORDER BY entity_id",
                )?;
                let params: [&dyn ToSql; 1] = [&entity_class];
                let rows = statement.query_map(params.as_slice(), read_entity)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
            None => {
                let mut statement = connection.prepare(
                    "SELECT entity_id, entity_class, code, market, name FROM entities \
                     ORDER BY entity_id",
                )?;
                let rows = statement.query_map([], read_entity)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
        };
        Ok(rows)
    }
}

fn read_entity(row: &Row<'_>) -> Result<EntityRecord, ::duckdb::Error> {
    Ok(EntityRecord {
        entity_id: row.get(0)?,
        entity_class: row.get(1)?,
        code: row.get(2)?,
        market: row.get(3)?,
        name: row.get(4)?,
    })
}
