pub mod error;
pub mod models;
pub mod schema;

use diesel_async::pooled_connection::deadpool;
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::AsyncPgConnection;
pub use error::DatabaseError;

pub type Pool = deadpool::Pool<AsyncPgConnection>;

// https://github.com/tokio-rs/axum/tree/main/examples/diesel-async-postgres

pub fn get_database_connection(
    database_url: &str,
    max_connections: usize,
) -> Result<Pool, DatabaseError> {
    let config = AsyncDieselConnectionManager::<AsyncPgConnection>::new(database_url);
    Ok(Pool::builder(config).max_size(max_connections).build()?)
}

