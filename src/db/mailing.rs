//! Mailings, contact lists, and subscriptions.

use std::collections::BTreeMap;

use diesel::{self, prelude::*};
use futures::prelude::*;

use db::schema::{contacts, list_subscriptions, mailing_contact_lists, mailing_lists, mailings,
                 recipients};
use db::{blacklist, inserted_id, messages, CONTACT_MODEL, DB};
use util::normalize_email;
use Error;

/// Who a mailing is sent to.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Audience {
    /// The built-in list contacts.
    Contacts,

    /// The records of some other model, kept as recipients.
    Model(String),
}

impl Audience {
    pub fn from_model(model: &str) -> Audience {
        if model == CONTACT_MODEL {
            Audience::Contacts
        } else {
            Audience::Model(model.to_string())
        }
    }

    pub fn model(&self) -> &str {
        match *self {
            Audience::Contacts => CONTACT_MODEL,
            Audience::Model(ref model) => model,
        }
    }

    /// A human-readable name, used in log messages.
    pub fn display_name(&self) -> &str {
        match *self {
            Audience::Contacts => "Mailing List Contact",
            Audience::Model(ref model) => model,
        }
    }
}

/// A bulk-email campaign.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Mailing {
    pub id: i32,
    pub subject: String,
    pub audience: Audience,

    /// The contact lists the mailing was sent to.
    pub list_ids: Vec<i32>,
}

/// A list shown on the subscription-management page.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ListChoice {
    pub id: i32,
    pub name: String,
    pub opted_out: bool,
}

/// The outcome of following an unsubscribe link.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum UnsubscribeView {
    /// The recipient is a list contact. They were opted out of the mailing's lists, and may now
    /// manage their subscriptions.
    Manage {
        /// The public lists the address is subscribed to.
        lists: Vec<ListChoice>,

        /// The names of the mailing's public lists, comma-separated.
        unsubscribed_from: String,
    },

    /// The address was added to the blacklist.
    Blacklisted {
        /// The names of the lists the address is still opted into.
        opted_in: Vec<String>,
    },
}

impl DB {
    /// Gets a mailing by ID.
    pub fn get_mailing(&self, id: i32) -> impl Future<Item = Option<Mailing>, Error = Error> {
        self.async_query(move |conn| find_mailing(conn, id))
    }

    /// Opts an address into some lists and out of others.
    pub fn update_list_membership(
        &self,
        email: String,
        opt_in_ids: Vec<i32>,
        opt_out_ids: Vec<i32>,
    ) -> impl Future<Item = (), Error = Error> {
        self.async_query(move |conn| {
            conn.transaction::<_, diesel::result::Error, _>(|| {
                update_opt_out(conn, &email, &opt_in_ids, false)?;
                update_opt_out(conn, &email, &opt_out_ids, true)?;
                Ok(())
            })
        })
    }

    /// Handles an unsubscribe link for a mailing.
    pub fn unsubscribe_from_mailing(
        &self,
        mailing: Mailing,
        email: String,
    ) -> impl Future<Item = UnsubscribeView, Error = Error> {
        self.async_query(move |conn| {
            conn.transaction(|| unsubscribe_from_mailing(conn, &mailing, &email))
        })
    }

    /// Posts feedback onto the mailing's audience records for an address, returning how many
    /// records it was posted to.
    pub fn post_feedback(
        &self,
        mailing: Mailing,
        email: String,
        feedback: String,
    ) -> impl Future<Item = usize, Error = Error> {
        self.async_query(move |conn| {
            conn.transaction(|| post_feedback(conn, &mailing, &email, &feedback))
        })
    }
}

/// Gets a mailing by ID.
pub fn find_mailing(conn: &SqliteConnection, id: i32) -> QueryResult<Option<Mailing>> {
    let row = mailings::table
        .find(id)
        .select((mailings::id, mailings::subject, mailings::audience))
        .first::<(i32, String, String)>(conn)
        .optional()?;
    match row {
        Some((id, subject, audience)) => {
            let list_ids = mailing_contact_lists::table
                .filter(mailing_contact_lists::mailing_id.eq(id))
                .select(mailing_contact_lists::list_id)
                .order(mailing_contact_lists::list_id)
                .load(conn)?;
            Ok(Some(Mailing {
                id,
                subject,
                audience: Audience::from_model(&audience),
                list_ids,
            }))
        }
        None => Ok(None),
    }
}

/// Sets the opt-out flag of every contact with the given address on the given lists. Lists the
/// address isn't subscribed to are left alone. Each contact that changed gets a message naming
/// the lists. Returns the number of subscriptions changed.
pub fn update_opt_out(
    conn: &SqliteConnection,
    email: &str,
    list_ids: &[i32],
    opt_out: bool,
) -> QueryResult<usize> {
    if list_ids.is_empty() {
        return Ok(0);
    }
    let normalized = match normalize_email(email) {
        Some(normalized) => normalized,
        None => return Ok(0),
    };

    let contact_ids = contacts::table
        .filter(contacts::email_normalized.eq(&normalized))
        .select(contacts::id)
        .order(contacts::id)
        .load::<i32>(conn)?;
    if contact_ids.is_empty() {
        return Ok(0);
    }

    let changed = list_subscriptions::table
        .inner_join(mailing_lists::table)
        .filter(list_subscriptions::contact_id.eq_any(&contact_ids))
        .filter(list_subscriptions::list_id.eq_any(list_ids))
        .filter(list_subscriptions::opt_out.ne(opt_out))
        .select((
            list_subscriptions::id,
            list_subscriptions::contact_id,
            mailing_lists::name,
        ))
        .order(list_subscriptions::id)
        .load::<(i32, i32, String)>(conn)?;
    if changed.is_empty() {
        return Ok(0);
    }

    let ids = changed.iter().map(|&(id, _, _)| id).collect::<Vec<_>>();
    diesel::update(list_subscriptions::table.filter(list_subscriptions::id.eq_any(&ids)))
        .set(list_subscriptions::opt_out.eq(opt_out))
        .execute(conn)?;

    for contact_id in contact_ids {
        let names = changed
            .iter()
            .filter(|&&(_, c, _)| c == contact_id)
            .map(|&(_, _, ref name)| name.as_str())
            .collect::<Vec<_>>();
        if names.is_empty() {
            continue;
        }
        let body = if opt_out {
            format!(
                "The recipient unsubscribed from {} mailing list(s)",
                names.join(", ")
            )
        } else {
            format!(
                "The recipient subscribed to {} mailing list(s)",
                names.join(", ")
            )
        };
        messages::post(conn, CONTACT_MODEL, contact_id, &body)?;
    }
    Ok(changed.len())
}

/// Handles an unsubscribe link. List contacts are opted out of the mailing's lists; any other
/// audience gets the address blacklisted.
pub fn unsubscribe_from_mailing(
    conn: &SqliteConnection,
    mailing: &Mailing,
    email: &str,
) -> QueryResult<UnsubscribeView> {
    let normalized = normalize_email(email);
    match mailing.audience {
        Audience::Contacts => {
            update_opt_out(conn, email, &mailing.list_ids, true)?;

            let subscriptions = match normalized {
                Some(ref normalized) => list_subscriptions::table
                    .inner_join(contacts::table)
                    .inner_join(mailing_lists::table)
                    .filter(contacts::email_normalized.eq(normalized))
                    .select((
                        mailing_lists::id,
                        mailing_lists::name,
                        mailing_lists::is_public,
                        list_subscriptions::opt_out,
                    ))
                    .load::<(i32, String, bool, bool)>(conn)?,
                None => Vec::new(),
            };

            // With several contacts for one address, a list only counts as opted out if no
            // contact is still opted in to it.
            let mut lists = BTreeMap::new();
            for (id, name, is_public, opt_out) in subscriptions {
                if !is_public {
                    continue;
                }
                let choice = lists.entry(id).or_insert_with(|| ListChoice {
                    id,
                    name,
                    opted_out: true,
                });
                choice.opted_out &= opt_out;
            }
            let mut lists = lists.into_iter().map(|(_, l)| l).collect::<Vec<_>>();
            lists.sort_by(|l, r| l.name.cmp(&r.name).then(l.id.cmp(&r.id)));

            let unsubscribed_from = mailing_lists::table
                .filter(mailing_lists::id.eq_any(&mailing.list_ids))
                .filter(mailing_lists::is_public.eq(true))
                .select(mailing_lists::name)
                .order(mailing_lists::id)
                .load::<String>(conn)?
                .join(", ");

            Ok(UnsubscribeView::Manage {
                lists,
                unsubscribed_from,
            })
        }
        Audience::Model(_) => {
            let opted_in = match normalized {
                Some(ref normalized) => list_subscriptions::table
                    .inner_join(contacts::table)
                    .inner_join(mailing_lists::table)
                    .filter(contacts::email_normalized.eq(normalized))
                    .filter(list_subscriptions::opt_out.eq(false))
                    .select(mailing_lists::name)
                    .distinct()
                    .order(mailing_lists::name)
                    .load::<String>(conn)?,
                None => Vec::new(),
            };

            if let Some(entry) = blacklist::add(conn, email)? {
                blacklist::log_action(
                    conn,
                    &entry,
                    Some(mailing),
                    "Requested blacklisting via unsubscribe link.",
                )?;
            }
            Ok(UnsubscribeView::Blacklisted { opted_in })
        }
    }
}

/// Posts feedback onto every audience record of the mailing with the given address. Returns the
/// number of records posted to.
pub fn post_feedback(
    conn: &SqliteConnection,
    mailing: &Mailing,
    email: &str,
    feedback: &str,
) -> QueryResult<usize> {
    let normalized = match normalize_email(email) {
        Some(normalized) => normalized,
        None => return Ok(0),
    };
    let ids = match mailing.audience {
        Audience::Contacts => contacts::table
            .filter(contacts::email_normalized.eq(&normalized))
            .select(contacts::id)
            .order(contacts::id)
            .load::<i32>(conn)?,
        Audience::Model(ref model) => recipients::table
            .filter(recipients::model.eq(model))
            .filter(recipients::email_normalized.eq(&normalized))
            .select(recipients::id)
            .order(recipients::id)
            .load::<i32>(conn)?,
    };

    let body = format!("Feedback from {}: {}", email, feedback);
    for &id in &ids {
        messages::post(conn, mailing.audience.model(), id, &body)?;
    }
    Ok(ids.len())
}

/// Creates a mailing sent to the given lists, returning its ID.
pub fn create_mailing(
    conn: &SqliteConnection,
    subject: &str,
    audience: &Audience,
    list_ids: &[i32],
) -> QueryResult<i32> {
    diesel::insert_into(mailings::table)
        .values((
            mailings::subject.eq(subject),
            mailings::audience.eq(audience.model()),
        ))
        .execute(conn)?;
    let id = inserted_id(conn)?;
    for &list_id in list_ids {
        diesel::insert_into(mailing_contact_lists::table)
            .values((
                mailing_contact_lists::mailing_id.eq(id),
                mailing_contact_lists::list_id.eq(list_id),
            ))
            .execute(conn)?;
    }
    Ok(id)
}

/// Creates a contact list, returning its ID.
pub fn create_list(conn: &SqliteConnection, name: &str, is_public: bool) -> QueryResult<i32> {
    diesel::insert_into(mailing_lists::table)
        .values((
            mailing_lists::name.eq(name),
            mailing_lists::is_public.eq(is_public),
        ))
        .execute(conn)?;
    inserted_id(conn)
}

/// Creates a list contact, returning its ID.
pub fn create_contact(conn: &SqliteConnection, name: &str, email: &str) -> QueryResult<i32> {
    diesel::insert_into(contacts::table)
        .values((
            contacts::name.eq(name),
            contacts::email.eq(email),
            contacts::email_normalized.eq(normalize_email(email)),
        ))
        .execute(conn)?;
    inserted_id(conn)
}

/// Subscribes a contact to a list, returning the subscription's ID.
pub fn add_subscription(
    conn: &SqliteConnection,
    contact_id: i32,
    list_id: i32,
    opt_out: bool,
) -> QueryResult<i32> {
    diesel::insert_into(list_subscriptions::table)
        .values((
            list_subscriptions::contact_id.eq(contact_id),
            list_subscriptions::list_id.eq(list_id),
            list_subscriptions::opt_out.eq(opt_out),
        ))
        .execute(conn)?;
    inserted_id(conn)
}

/// Creates an audience record of some model other than the list contacts, returning its ID.
pub fn create_recipient(
    conn: &SqliteConnection,
    model: &str,
    name: &str,
    email: &str,
) -> QueryResult<i32> {
    diesel::insert_into(recipients::table)
        .values((
            recipients::model.eq(model),
            recipients::name.eq(name),
            recipients::email.eq(email),
            recipients::email_normalized.eq(normalize_email(email)),
        ))
        .execute(conn)?;
    inserted_id(conn)
}

/// Returns the IDs of the lists an address is opted into, across all its contacts.
pub fn opted_in_list_ids(conn: &SqliteConnection, email: &str) -> QueryResult<Vec<i32>> {
    let normalized = match normalize_email(email) {
        Some(normalized) => normalized,
        None => return Ok(Vec::new()),
    };
    list_subscriptions::table
        .inner_join(contacts::table)
        .filter(contacts::email_normalized.eq(&normalized))
        .filter(list_subscriptions::opt_out.eq(false))
        .select(list_subscriptions::list_id)
        .distinct()
        .order(list_subscriptions::list_id)
        .load(conn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use db::test_util::memory_db;

    #[test]
    fn opt_out_only_touches_existing_subscriptions() {
        let db = memory_db();
        let conn = db.conn().unwrap();
        let news = create_list(&conn, "News", true).unwrap();
        let deals = create_list(&conn, "Deals", true).unwrap();
        let alice = create_contact(&conn, "Alice", "Alice@Example.com").unwrap();
        add_subscription(&conn, alice, news, false).unwrap();

        let changed = update_opt_out(&conn, "alice@example.com", &[news, deals], true).unwrap();
        assert_eq!(changed, 1);
        assert_eq!(opted_in_list_ids(&conn, "alice@example.com").unwrap(), Vec::<i32>::new());

        // Already opted out; nothing changes and nothing is logged.
        let changed = update_opt_out(&conn, "alice@example.com", &[news], true).unwrap();
        assert_eq!(changed, 0);

        let log = messages::for_record(&conn, CONTACT_MODEL, alice).unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].body, "The recipient unsubscribed from News mailing list(s)");
    }

    #[test]
    fn unsubscribing_a_contact_opts_out_of_the_mailing_lists() {
        let db = memory_db();
        let conn = db.conn().unwrap();
        let news = create_list(&conn, "News", true).unwrap();
        let deals = create_list(&conn, "Deals", true).unwrap();
        let staff = create_list(&conn, "Staff", false).unwrap();
        let alice = create_contact(&conn, "Alice", "alice@example.com").unwrap();
        add_subscription(&conn, alice, news, false).unwrap();
        add_subscription(&conn, alice, deals, false).unwrap();
        add_subscription(&conn, alice, staff, false).unwrap();
        let id = create_mailing(&conn, "Hello", &Audience::Contacts, &[news, staff]).unwrap();
        let mailing = find_mailing(&conn, id).unwrap().unwrap();

        let view = unsubscribe_from_mailing(&conn, &mailing, "alice@example.com").unwrap();
        assert_eq!(
            view,
            UnsubscribeView::Manage {
                lists: vec![
                    ListChoice {
                        id: deals,
                        name: "Deals".to_string(),
                        opted_out: false,
                    },
                    ListChoice {
                        id: news,
                        name: "News".to_string(),
                        opted_out: true,
                    },
                ],
                unsubscribed_from: "News".to_string(),
            }
        );
        assert_eq!(opted_in_list_ids(&conn, "alice@example.com").unwrap(), vec![deals]);
    }

    #[test]
    fn a_list_opted_into_by_any_contact_is_not_opted_out() {
        let db = memory_db();
        let conn = db.conn().unwrap();
        let news = create_list(&conn, "News", true).unwrap();
        let first = create_contact(&conn, "Alice", "alice@example.com").unwrap();
        let second = create_contact(&conn, "Alice (work)", "alice@example.com").unwrap();
        add_subscription(&conn, first, news, true).unwrap();
        add_subscription(&conn, second, news, false).unwrap();
        let id = create_mailing(&conn, "Hello", &Audience::Contacts, &[]).unwrap();
        let mailing = find_mailing(&conn, id).unwrap().unwrap();

        match unsubscribe_from_mailing(&conn, &mailing, "alice@example.com").unwrap() {
            UnsubscribeView::Manage { lists, .. } => {
                assert_eq!(lists.len(), 1);
                assert!(!lists[0].opted_out);
            }
            other => panic!("unexpected view {:?}", other),
        }
    }

    #[test]
    fn unsubscribing_another_audience_blacklists() {
        let db = memory_db();
        let conn = db.conn().unwrap();
        let news = create_list(&conn, "News", true).unwrap();
        let alice = create_contact(&conn, "Alice", "alice@example.com").unwrap();
        add_subscription(&conn, alice, news, false).unwrap();
        let audience = Audience::from_model("res.partner");
        let id = create_mailing(&conn, "Hello", &audience, &[]).unwrap();
        let mailing = find_mailing(&conn, id).unwrap().unwrap();

        let view = unsubscribe_from_mailing(&conn, &mailing, "Alice@example.com").unwrap();
        assert_eq!(
            view,
            UnsubscribeView::Blacklisted {
                opted_in: vec!["News".to_string()],
            }
        );
        assert!(blacklist::is_blacklisted(&conn, "alice@example.com").unwrap());
        let entry = blacklist::find(&conn, "alice@example.com").unwrap().unwrap();
        let log = messages::for_record(&conn, ::db::BLACKLIST_MODEL, entry.id).unwrap();
        assert_eq!(
            log[0].body,
            "Requested blacklisting via unsubscribe link. (res.partner)"
        );
    }

    #[test]
    fn feedback_goes_to_each_matching_record() {
        let db = memory_db();
        let conn = db.conn().unwrap();
        let audience = Audience::from_model("res.partner");
        let id = create_mailing(&conn, "Hello", &audience, &[]).unwrap();
        let mailing = find_mailing(&conn, id).unwrap().unwrap();
        assert_eq!(post_feedback(&conn, &mailing, "bob@example.com", "hi").unwrap(), 0);

        let first = create_recipient(&conn, "res.partner", "Bob", "bob@example.com").unwrap();
        let second = create_recipient(&conn, "res.partner", "Bob", "BOB@example.com").unwrap();
        create_recipient(&conn, "res.users", "Bob", "bob@example.com").unwrap();
        create_contact(&conn, "Bob", "bob@example.com").unwrap();

        assert_eq!(post_feedback(&conn, &mailing, "bob@example.com", "hi").unwrap(), 2);
        for &id in &[first, second] {
            let log = messages::for_record(&conn, "res.partner", id).unwrap();
            assert_eq!(log.len(), 1);
            assert_eq!(log[0].body, "Feedback from bob@example.com: hi");
        }
    }
}
