//! The global suppression list.

use diesel::{self, prelude::*};
use futures::prelude::*;

use db::mailing::{find_mailing, Mailing};
use db::schema::blacklist;
use db::{messages, BLACKLIST_MODEL, DB};
use util::normalize_email;
use Error;

/// An address on the blacklist. Inactive entries are kept so their history survives.
#[derive(Clone, Debug, Eq, PartialEq, Queryable)]
pub struct BlacklistEntry {
    pub id: i32,
    pub email: String,
    pub active: bool,
}

impl DB {
    /// Checks whether an address is actively blacklisted.
    pub fn blacklist_active(&self, email: String) -> impl Future<Item = bool, Error = Error> {
        self.async_query(move |conn| is_blacklisted(conn, &email))
    }

    /// Blacklists an address on behalf of a mailing's recipient, logging why on the entry.
    /// Returns `None` if the address can't be normalized.
    pub fn blacklist_add(
        &self,
        mailing_id: i32,
        email: String,
        description: &'static str,
    ) -> impl Future<Item = Option<BlacklistEntry>, Error = Error> {
        self.async_query(move |conn| {
            conn.transaction::<_, diesel::result::Error, _>(|| {
                let entry = add(conn, &email)?;
                if let Some(ref entry) = entry {
                    let mailing = find_mailing(conn, mailing_id)?;
                    log_action(conn, entry, mailing.as_ref(), description)?;
                }
                Ok(entry)
            })
        })
    }

    /// Takes an address off the blacklist on behalf of a mailing's recipient, logging why on the
    /// entry. Returns `None` if the address can't be normalized.
    pub fn blacklist_remove(
        &self,
        mailing_id: i32,
        email: String,
        description: &'static str,
    ) -> impl Future<Item = Option<BlacklistEntry>, Error = Error> {
        self.async_query(move |conn| {
            conn.transaction::<_, diesel::result::Error, _>(|| {
                let entry = remove(conn, &email)?;
                if let Some(ref entry) = entry {
                    let mailing = find_mailing(conn, mailing_id)?;
                    log_action(conn, entry, mailing.as_ref(), description)?;
                }
                Ok(entry)
            })
        })
    }
}

/// Finds the entry for an address, active or not.
pub fn find(conn: &SqliteConnection, email: &str) -> QueryResult<Option<BlacklistEntry>> {
    match normalize_email(email) {
        Some(normalized) => blacklist::table
            .filter(blacklist::email.eq(&normalized))
            .first(conn)
            .optional(),
        None => Ok(None),
    }
}

/// Checks whether an address is actively blacklisted.
pub fn is_blacklisted(conn: &SqliteConnection, email: &str) -> QueryResult<bool> {
    find(conn, email).map(|entry| entry.map(|e| e.active).unwrap_or(false))
}

/// Blacklists an address, reactivating its entry if it has one.
pub fn add(conn: &SqliteConnection, email: &str) -> QueryResult<Option<BlacklistEntry>> {
    set_active(conn, email, true)
}

/// Deactivates an address's entry. An address with no entry gets an inactive one, so the
/// request is still recorded.
pub fn remove(conn: &SqliteConnection, email: &str) -> QueryResult<Option<BlacklistEntry>> {
    set_active(conn, email, false)
}

fn set_active(
    conn: &SqliteConnection,
    email: &str,
    active: bool,
) -> QueryResult<Option<BlacklistEntry>> {
    let normalized = match normalize_email(email) {
        Some(normalized) => normalized,
        None => return Ok(None),
    };

    let updated = diesel::update(blacklist::table.filter(blacklist::email.eq(&normalized)))
        .set(blacklist::active.eq(active))
        .execute(conn)?;
    if updated == 0 {
        diesel::insert_into(blacklist::table)
            .values((
                blacklist::email.eq(&normalized),
                blacklist::active.eq(active),
            ))
            .execute(conn)?;
    }
    info!(
        "{} {} the blacklist.",
        normalized,
        if active { "added to" } else { "removed from" }
    );

    blacklist::table
        .filter(blacklist::email.eq(&normalized))
        .first(conn)
        .map(Some)
}

/// Logs a blacklist change on the entry, naming the audience of the mailing it came from.
pub fn log_action(
    conn: &SqliteConnection,
    entry: &BlacklistEntry,
    mailing: Option<&Mailing>,
    description: &str,
) -> QueryResult<()> {
    let body = match mailing {
        Some(mailing) => format!("{} ({})", description, mailing.audience.display_name()),
        None => description.to_string(),
    };
    messages::post(conn, BLACKLIST_MODEL, entry.id, &body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use db::test_util::memory_db;

    #[test]
    fn adding_twice_keeps_one_active_entry() {
        let db = memory_db();
        let conn = db.conn().unwrap();
        let first = add(&conn, "Alice@Example.com").unwrap().unwrap();
        let second = add(&conn, "alice@example.com").unwrap().unwrap();
        assert_eq!(first, second);
        assert!(second.active);
        assert_eq!(second.email, "alice@example.com");

        let count = blacklist::table.count().get_result::<i64>(&*conn).unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn removing_an_unknown_address_records_an_inactive_entry() {
        let db = memory_db();
        let conn = db.conn().unwrap();
        let entry = remove(&conn, "bob@example.com").unwrap().unwrap();
        assert!(!entry.active);
        assert!(!is_blacklisted(&conn, "bob@example.com").unwrap());

        add(&conn, "bob@example.com").unwrap();
        assert!(is_blacklisted(&conn, "bob@example.com").unwrap());
        remove(&conn, "bob@example.com").unwrap();
        assert!(!is_blacklisted(&conn, "bob@example.com").unwrap());
    }

    #[test]
    fn invalid_addresses_are_ignored() {
        let db = memory_db();
        let conn = db.conn().unwrap();
        assert_eq!(add(&conn, "not an address").unwrap(), None);
        assert!(!is_blacklisted(&conn, "not an address").unwrap());
    }

    #[test]
    fn actions_are_logged_with_the_audience() {
        let db = memory_db();
        let conn = db.conn().unwrap();
        let entry = add(&conn, "alice@example.com").unwrap().unwrap();
        let mailing = Mailing {
            id: 1,
            subject: "Hello".to_string(),
            audience: ::db::Audience::Contacts,
            list_ids: vec![],
        };
        log_action(&conn, &entry, Some(&mailing), "Blacklisted.").unwrap();
        log_action(&conn, &entry, None, "Blacklisted.").unwrap();

        let log = messages::for_record(&conn, BLACKLIST_MODEL, entry.id).unwrap();
        let bodies = log.into_iter().map(|m| m.body).collect::<Vec<_>>();
        assert_eq!(
            bodies,
            vec!["Blacklisted. (Mailing List Contact)", "Blacklisted."]
        );
    }
}
