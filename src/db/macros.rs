//! Backend dispatch over [`DbPool`](crate::db::pool::DbPool).

/// Run the same body against whichever pool a [`DbPool`] holds.
///
/// The body is type-checked once per backend, so generic helpers resolve to
/// that backend's row, argument and result types.
///
/// ```ignore
/// let closed = with_pool!(&pool, |p| p.is_closed());
/// ```
#[macro_export]
macro_rules! with_pool {
    ($pool:expr, |$p:ident| $body:expr) => {
        match $pool {
            $crate::db::pool::DbPool::MySql($p) => $body,
            $crate::db::pool::DbPool::Postgres($p) => $body,
            $crate::db::pool::DbPool::SQLite($p) => $body,
        }
    };
}

pub use with_pool;

#[cfg(test)]
mod tests {
    use crate::db::pool::DbPool;
    use sqlx::sqlite::SqlitePoolOptions;

    #[tokio::test]
    async fn test_body_runs_against_held_pool() {
        let pool = DbPool::SQLite(
            SqlitePoolOptions::new()
                .connect_lazy("sqlite::memory:")
                .unwrap(),
        );
        let size = with_pool!(&pool, |p| p.options().get_max_connections());
        assert_eq!(size, 10);
        assert!(!with_pool!(&pool, |p| p.is_closed()));
    }
}
