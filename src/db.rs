use rocket_db_pools::{Database, sqlx};

#[derive(Database)]
#[database("jobtrack_db")]
pub struct TrackerDb(sqlx::PgPool);
