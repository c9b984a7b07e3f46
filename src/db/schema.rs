table! {
    mailings (id) {
        id -> Integer,
        subject -> Text,
        audience -> Text,
    }
}

table! {
    mailing_lists (id) {
        id -> Integer,
        name -> Text,
        is_public -> Bool,
    }
}

table! {
    mailing_contact_lists (mailing_id, list_id) {
        mailing_id -> Integer,
        list_id -> Integer,
    }
}

table! {
    contacts (id) {
        id -> Integer,
        name -> Text,
        email -> Text,
        email_normalized -> Nullable<Text>,
    }
}

table! {
    list_subscriptions (id) {
        id -> Integer,
        contact_id -> Integer,
        list_id -> Integer,
        opt_out -> Bool,
    }
}

table! {
    recipients (id) {
        id -> Integer,
        model -> Text,
        name -> Text,
        email -> Text,
        email_normalized -> Nullable<Text>,
    }
}

table! {
    blacklist (id) {
        id -> Integer,
        email -> Text,
        active -> Bool,
    }
}

table! {
    messages (id) {
        id -> Integer,
        model -> Text,
        res_id -> Integer,
        body -> Text,
        created_at -> Text,
    }
}

table! {
    mail_traces (id) {
        id -> Integer,
        mailing_id -> Integer,
        model -> Text,
        res_id -> Integer,
        email -> Text,
        opened_at -> Nullable<Text>,
        clicked_at -> Nullable<Text>,
        bounced -> Bool,
    }
}

table! {
    link_trackers (id) {
        id -> Integer,
        code -> Nullable<Text>,
        url -> Text,
    }
}

table! {
    link_clicks (id) {
        id -> Integer,
        tracker_id -> Integer,
        trace_id -> Nullable<Integer>,
        mailing_id -> Nullable<Integer>,
        ip -> Nullable<Text>,
        country_code -> Nullable<Text>,
        created_at -> Text,
    }
}

joinable!(mailing_contact_lists -> mailings (mailing_id));
joinable!(mailing_contact_lists -> mailing_lists (list_id));
joinable!(list_subscriptions -> contacts (contact_id));
joinable!(list_subscriptions -> mailing_lists (list_id));
joinable!(link_clicks -> link_trackers (tracker_id));

allow_tables_to_appear_in_same_query!(
    mailings,
    mailing_lists,
    mailing_contact_lists,
    contacts,
    list_subscriptions,
    recipients,
    blacklist,
    messages,
    mail_traces,
    link_trackers,
    link_clicks,
);
