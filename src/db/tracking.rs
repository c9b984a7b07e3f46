//! Open and click tracking.

use diesel::{
    self,
    dsl::sql,
    prelude::*,
    sql_types::{Nullable, Text},
};
use futures::prelude::*;
use url::Url;

use db::schema::{link_clicks, link_trackers, mail_traces};
use db::{inserted_id, DB};
use util::base62;
use {Error, Result};

impl DB {
    /// Marks a sent mail as opened. Returns whether the mail exists.
    pub fn set_opened(&self, trace_id: i32) -> impl Future<Item = bool, Error = Error> {
        self.async_query(move |conn| set_opened(conn, trace_id))
    }

    /// Records a click on a tracked link, returning the URL it points to.
    pub fn add_click(
        &self,
        code: String,
        ip: Option<String>,
        country_code: Option<String>,
        trace_id: Option<i32>,
    ) -> impl Future<Item = Option<String>, Error = Error> {
        self.async_query(move |conn| {
            conn.transaction(|| {
                add_click(
                    conn,
                    &code,
                    ip.as_ref().map(|s| s.as_str()),
                    country_code.as_ref().map(|s| s.as_str()),
                    trace_id,
                )
            })
        })
    }
}

/// Marks a sent mail as opened (and so not bounced). Returns whether the mail exists.
pub fn set_opened(conn: &SqliteConnection, trace_id: i32) -> QueryResult<bool> {
    diesel::update(mail_traces::table.find(trace_id))
        .set((
            mail_traces::opened_at.eq(sql::<Nullable<Text>>("CURRENT_TIMESTAMP")),
            mail_traces::bounced.eq(false),
        ))
        .execute(conn)
        .map(|n| n > 0)
}

/// Records a click on the link with the given code, returning the URL the link points to, or
/// `None` if no link has the code.
///
/// Repeat clicks from the same IP are only counted once. When the click came from a sent mail,
/// the mail is marked clicked.
pub fn add_click(
    conn: &SqliteConnection,
    code: &str,
    ip: Option<&str>,
    country_code: Option<&str>,
    trace_id: Option<i32>,
) -> QueryResult<Option<String>> {
    let tracker = link_trackers::table
        .filter(link_trackers::code.eq(code))
        .select((link_trackers::id, link_trackers::url))
        .first::<(i32, String)>(conn)
        .optional()?;
    let (tracker_id, url) = match tracker {
        Some(tracker) => tracker,
        None => return Ok(None),
    };

    let trace = match trace_id {
        Some(trace_id) => mail_traces::table
            .find(trace_id)
            .select((mail_traces::id, mail_traces::mailing_id))
            .first::<(i32, i32)>(conn)
            .optional()?,
        None => None,
    };

    let mut seen = link_clicks::table
        .filter(link_clicks::tracker_id.eq(tracker_id))
        .into_boxed();
    seen = match ip {
        Some(ip) => seen.filter(link_clicks::ip.eq(ip)),
        None => seen.filter(link_clicks::ip.is_null()),
    };
    let again = seen.count().get_result::<i64>(conn)?;
    if again == 0 {
        diesel::insert_into(link_clicks::table)
            .values((
                link_clicks::tracker_id.eq(tracker_id),
                link_clicks::trace_id.eq(trace.map(|(id, _)| id)),
                link_clicks::mailing_id.eq(trace.map(|(_, mailing_id)| mailing_id)),
                link_clicks::ip.eq(ip),
                link_clicks::country_code.eq(country_code),
            ))
            .execute(conn)?;
    } else {
        debug!("Repeat click on {} from {:?}.", code, ip);
    }

    if let Some((trace_id, _)) = trace {
        diesel::update(mail_traces::table.find(trace_id))
            .set(mail_traces::clicked_at.eq(sql::<Nullable<Text>>("CURRENT_TIMESTAMP")))
            .execute(conn)?;
    }
    Ok(Some(url))
}

/// Returns the number of clicks counted on the link with the given code.
pub fn click_count(conn: &SqliteConnection, code: &str) -> QueryResult<i64> {
    link_clicks::table
        .inner_join(link_trackers::table)
        .filter(link_trackers::code.eq(code))
        .count()
        .get_result(conn)
}

/// Gets the code tracking a URL, creating a tracker if there isn't one. Codes are the tracker's
/// ID in base 62.
pub fn track_link(conn: &SqliteConnection, url: &str) -> QueryResult<String> {
    conn.transaction::<_, diesel::result::Error, _>(|| {
        let existing = link_trackers::table
            .filter(link_trackers::url.eq(url))
            .select((link_trackers::id, link_trackers::code))
            .first::<(i32, Option<String>)>(conn)
            .optional()?;
        let id = match existing {
            Some((_, Some(code))) => return Ok(code),
            Some((id, None)) => id,
            None => {
                diesel::insert_into(link_trackers::table)
                    .values(link_trackers::url.eq(url))
                    .execute(conn)?;
                inserted_id(conn)?
            }
        };

        let code = base62(id as u64);
        diesel::update(link_trackers::table.find(id))
            .set(link_trackers::code.eq(&code))
            .execute(conn)?;
        Ok(code)
    })
}

/// The URL that redirects to a tracked link, counting the click against a sent mail.
pub fn click_url(base_url: &Url, code: &str, trace_id: i32) -> Result<Url> {
    base_url
        .join(&format!("r/{}/m/{}", code, trace_id))
        .map_err(Error::from)
}

/// Records a sent mail, returning its ID.
pub fn create_trace(
    conn: &SqliteConnection,
    mailing_id: i32,
    model: &str,
    res_id: i32,
    email: &str,
) -> QueryResult<i32> {
    diesel::insert_into(mail_traces::table)
        .values((
            mail_traces::mailing_id.eq(mailing_id),
            mail_traces::model.eq(model),
            mail_traces::res_id.eq(res_id),
            mail_traces::email.eq(email),
        ))
        .execute(conn)?;
    inserted_id(conn)
}

/// Returns when a sent mail was opened and clicked, if it was.
pub fn trace_status(
    conn: &SqliteConnection,
    trace_id: i32,
) -> QueryResult<(Option<String>, Option<String>)> {
    mail_traces::table
        .find(trace_id)
        .select((mail_traces::opened_at, mail_traces::clicked_at))
        .first(conn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use db::mailing::{create_mailing, Audience};
    use db::test_util::memory_db;

    #[test]
    fn opening_marks_the_trace() {
        let db = memory_db();
        let conn = db.conn().unwrap();
        let mailing = create_mailing(&conn, "Hello", &Audience::Contacts, &[]).unwrap();
        let trace = create_trace(&conn, mailing, "mailing.contact", 1, "a@example.com").unwrap();

        assert_eq!(trace_status(&conn, trace).unwrap().0, None);
        assert!(set_opened(&conn, trace).unwrap());
        assert!(trace_status(&conn, trace).unwrap().0.is_some());
        assert!(!set_opened(&conn, trace + 1).unwrap());
    }

    #[test]
    fn tracking_a_url_twice_reuses_the_code() {
        let db = memory_db();
        let conn = db.conn().unwrap();
        let first = track_link(&conn, "https://example.com/a").unwrap();
        let second = track_link(&conn, "https://example.com/b").unwrap();
        assert_ne!(first, second);
        assert_eq!(track_link(&conn, "https://example.com/a").unwrap(), first);
    }

    #[test]
    fn clicks_are_counted_once_per_ip() {
        let db = memory_db();
        let conn = db.conn().unwrap();
        let mailing = create_mailing(&conn, "Hello", &Audience::Contacts, &[]).unwrap();
        let trace = create_trace(&conn, mailing, "mailing.contact", 1, "a@example.com").unwrap();
        let code = track_link(&conn, "https://example.com/").unwrap();

        let url = add_click(&conn, &code, Some("10.0.0.1"), Some("FR"), Some(trace)).unwrap();
        assert_eq!(url, Some("https://example.com/".to_string()));
        add_click(&conn, &code, Some("10.0.0.1"), None, None).unwrap();
        add_click(&conn, &code, Some("10.0.0.2"), None, Some(trace + 100)).unwrap();
        assert_eq!(click_count(&conn, &code).unwrap(), 2);
        assert!(trace_status(&conn, trace).unwrap().1.is_some());
    }

    #[test]
    fn unknown_codes_have_no_url() {
        let db = memory_db();
        let conn = db.conn().unwrap();
        assert_eq!(add_click(&conn, "nope", None, None, None).unwrap(), None);
    }

    #[test]
    fn click_urls() {
        let base = Url::parse("https://mail.example.com/").unwrap();
        assert_eq!(
            click_url(&base, "1a", 5).unwrap().as_str(),
            "https://mail.example.com/r/1a/m/5"
        );
    }
}
