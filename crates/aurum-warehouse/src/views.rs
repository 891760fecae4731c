//! Database views backing the "latest" queries.

use ::duckdb::Connection;

/// Create the views used by the reconciliation queries.
///
/// - `v_latest_observations`: the highest-period row of every entity
///
/// # Errors
/// Returns an error if the view creation SQL fails to execute.
pub fn create_views(connection: &Connection) -> Result<(), ::duckdb::Error> {
    connection.execute_batch(
        r"
CREATE OR REPLACE VIEW v_latest_observations AS
SELECT *
FROM observations
QUALIFY ROW_NUMBER() OVER (PARTITION BY entity_id ORDER BY period_ord DESC) = 1;

",
    )
}
