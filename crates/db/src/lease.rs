//! Exclusive GPU lease backed by a PostgreSQL session advisory lock.
//!
//! At most one lease exists per database at any time, across every process
//! sharing it. The lock lives on the session of the connection the lease
//! owns: claiming and executing happen while the lease is held, and if the
//! holder dies the session ends and the lock goes with it.

use sqlx::pool::PoolConnection;
use sqlx::{PgConnection, PgPool, Postgres};

/// First key of the two-key advisory lock (`"COSM"` in ASCII).
pub const LEASE_NAMESPACE: i32 = 0x434F_534D;

/// A held GPU lease. Dropping it without [`GpuLease::release`] closes the
/// underlying connection, which also releases the lock.
pub struct GpuLease {
    conn: PoolConnection<Postgres>,
    released: bool,
}

impl GpuLease {
    /// Try to take the lease without waiting.
    ///
    /// Returns `None` when another session holds it.
    pub async fn try_acquire(pool: &PgPool) -> Result<Option<Self>, sqlx::Error> {
        let mut conn = pool.acquire().await?;
        let acquired: bool =
            sqlx::query_scalar("SELECT pg_try_advisory_lock($1, hashtext(current_database()))")
                .bind(LEASE_NAMESPACE)
                .fetch_one(&mut *conn)
                .await?;

        if acquired {
            tracing::debug!("GPU lease acquired");
            Ok(Some(Self {
                conn,
                released: false,
            }))
        } else {
            Ok(None)
        }
    }

    /// The session holding the lock. Claims must run on this connection.
    pub fn conn(&mut self) -> &mut PgConnection {
        &mut self.conn
    }

    /// Explicitly unlock and return the connection to the pool.
    pub async fn release(mut self) -> Result<(), sqlx::Error> {
        let unlocked: bool =
            sqlx::query_scalar("SELECT pg_advisory_unlock($1, hashtext(current_database()))")
                .bind(LEASE_NAMESPACE)
                .fetch_one(&mut *self.conn)
                .await?;
        if !unlocked {
            tracing::warn!("GPU lease was not held by this session at release");
        }
        self.released = true;
        tracing::debug!("GPU lease released");
        Ok(())
    }

    /// Whether any session currently holds the lease for this database.
    pub async fn is_held(pool: &PgPool) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT EXISTS ( \
                 SELECT 1 FROM pg_locks \
                 WHERE locktype = 'advisory' AND granted \
                   AND database = (SELECT oid FROM pg_database WHERE datname = current_database()) \
                   AND classid = $1::int4::oid \
                   AND objid = hashtext(current_database())::oid \
                   AND objsubid = 2 \
             )",
        )
        .bind(LEASE_NAMESPACE)
        .fetch_one(pool)
        .await
    }
}

impl Drop for GpuLease {
    fn drop(&mut self) {
        if !self.released {
            // Never hand a locked session back to the pool.
            self.conn.close_on_drop();
        }
    }
}

impl std::fmt::Debug for GpuLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuLease")
            .field("released", &self.released)
            .finish()
    }
}
