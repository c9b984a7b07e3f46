//! The database and related types.

pub mod blacklist;
pub mod mailing;
pub mod messages;
mod schema;
pub mod tracking;

use std::sync::Arc;

use diesel::{
    self,
    connection::SimpleConnection,
    prelude::*,
    r2d2::{self, ConnectionManager, CustomizeConnection, Pool, PooledConnection},
};
use futures::{
    future::{err, poll_fn, Either},
    prelude::*,
};
use tokio_threadpool::blocking;

use {Error, Result};

pub use db::blacklist::BlacklistEntry;
pub use db::mailing::{Audience, ListChoice, Mailing, UnsubscribeView};
pub use db::messages::Message;

/// The model name of the built-in list contacts.
pub const CONTACT_MODEL: &str = "mailing.contact";

/// The model name that blacklist entries log their messages under.
pub const BLACKLIST_MODEL: &str = "mailing.blacklist";

const SCHEMA: &str = include_str!("schema.sql");

no_arg_sql_function!(
    last_insert_rowid,
    diesel::sql_types::Integer,
    "The rowid of the most recent successful INSERT on this connection."
);

/// A pooled connection, for synchronous use.
pub type Conn = PooledConnection<ConnectionManager<SqliteConnection>>;

/// A pool of connections to the database.
#[derive(Clone)]
pub struct DB {
    pool: Arc<Pool<ConnectionManager<SqliteConnection>>>,
}

impl DB {
    /// Connects to the database with the given number of connections, creating any missing
    /// tables.
    ///
    /// An in-memory database (`:memory:`) is private to a connection, so it needs a pool size of
    /// one.
    pub fn connect(database_url: &str, pool_size: u32) -> Result<DB> {
        let pool = Pool::builder()
            .max_size(pool_size)
            .connection_customizer(Box::new(Pragmas))
            .build(ConnectionManager::new(database_url))?;
        pool.get()?.batch_execute(SCHEMA)?;
        debug!("Connected to {} ({} connections).", database_url, pool_size);
        Ok(DB {
            pool: Arc::new(pool),
        })
    }

    /// Checks a connection out of the pool, for synchronous use.
    pub fn conn(&self) -> Result<Conn> {
        self.pool.get().map_err(Error::from)
    }

    /// Runs a query on a pooled connection. The query runs as blocking work when on a Tokio
    /// thread pool, and inline otherwise.
    fn async_query<E, F, T>(&self, func: F) -> impl Future<Item = T, Error = Error>
    where
        E: Into<Error>,
        F: Fn(&SqliteConnection) -> ::std::result::Result<T, E>,
    {
        match self.pool.get() {
            Ok(conn) => Either::A(poll_fn(move || {
                match blocking(|| func(&*conn).map_err(|e| -> Error { e.into() })) {
                    Ok(Async::Ready(r)) => r.map(Async::Ready),
                    Ok(Async::NotReady) => Ok(Async::NotReady),
                    Err(_) => func(&*conn).map(Async::Ready).map_err(|e| e.into()),
                }
            })),
            Err(e) => Either::B(err(e.into())),
        }
    }
}

/// Per-connection settings.
#[derive(Debug)]
struct Pragmas;

impl CustomizeConnection<SqliteConnection, r2d2::Error> for Pragmas {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> ::std::result::Result<(), r2d2::Error> {
        conn.batch_execute("PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;")
            .map_err(r2d2::Error::QueryError)
    }
}

/// Returns the id of the row the connection last inserted.
fn inserted_id(conn: &SqliteConnection) -> QueryResult<i32> {
    diesel::select(last_insert_rowid).get_result(conn)
}

#[cfg(test)]
pub mod test_util {
    use super::*;

    /// A fresh in-memory database.
    pub fn memory_db() -> DB {
        DB::connect(":memory:", 1).unwrap()
    }
}
