//! The activity log attached to records.

use diesel::{self, prelude::*};

use db::schema::messages;

/// A message logged on a record.
#[derive(Clone, Debug, Eq, PartialEq, Queryable)]
pub struct Message {
    pub id: i32,
    pub model: String,
    pub res_id: i32,
    pub body: String,
    pub created_at: String,
}

/// Logs a message on the record `res_id` of `model`.
pub fn post(conn: &SqliteConnection, model: &str, res_id: i32, body: &str) -> QueryResult<()> {
    diesel::insert_into(messages::table)
        .values((
            messages::model.eq(model),
            messages::res_id.eq(res_id),
            messages::body.eq(body),
        ))
        .execute(conn)
        .map(|_| ())
}

/// Returns the messages logged on a record, oldest first.
pub fn for_record(conn: &SqliteConnection, model: &str, res_id: i32) -> QueryResult<Vec<Message>> {
    messages::table
        .filter(messages::model.eq(model))
        .filter(messages::res_id.eq(res_id))
        .order(messages::id)
        .load(conn)
}
