use std::net::SocketAddr;

use futures::{
    future::{ok, Either},
    prelude::*,
};
use warp::http::{
    header::{HeaderValue, CONTENT_TYPE, LOCATION},
    status::StatusCode,
    Response,
};

use db::UnsubscribeView;
use util::log_err;
use web::rpc::{FeedbackParams, Outcome, RecipientParams, UnsubscribeParams};
use web::App;
use Error;

/// A transparent 1x1 GIF.
pub const BLANK_GIF: &[u8] = &[
    0x47, 0x49, 0x46, 0x38, 0x39, 0x61, 0x01, 0x00, 0x01, 0x00, 0x80, 0x00, 0x00, 0xdb, 0xdf, 0xef,
    0x00, 0x00, 0x00, 0x21, 0xf9, 0x04, 0x01, 0x00, 0x00, 0x00, 0x00, 0x2c, 0x00, 0x00, 0x00, 0x00,
    0x01, 0x00, 0x01, 0x00, 0x00, 0x02, 0x02, 0x44, 0x01, 0x00, 0x3b,
];

#[derive(Debug, Default, Deserialize)]
pub struct UnsubscribeQuery {
    email: Option<String>,
    res_id: Option<String>,
    token: Option<String>,
}

pub fn unsubscribe_page(
    mailing_id: i32,
    params: UnsubscribeQuery,
    app: App,
) -> impl Future<Item = Response<String>, Error = Error> {
    let App {
        db,
        signer,
        settings,
        render,
    } = app;

    db.get_mailing(mailing_id).and_then(move |mailing| {
        let mailing = match mailing {
            Some(mailing) => mailing,
            None => return Either::A(ok(redirect(StatusCode::FOUND, &settings.home_url))),
        };

        let res_id = params.res_id.as_ref().and_then(|s| s.trim().parse().ok());
        let valid = signer.verify(
            Some(mailing_id),
            res_id,
            params.email.as_ref().map(|s| s.as_str()),
            params.token.as_ref().map(|s| s.as_str()),
        );
        if !valid {
            warn!("Rejected an unsubscribe link for mailing {}.", mailing_id);
            let mut res = render("access-denied.html", context!{});
            *res.status_mut() = StatusCode::FORBIDDEN;
            return Either::A(ok(res));
        }

        let email = params.email.unwrap_or_default();
        let token = params.token.unwrap_or_default();
        let show_blacklist_button = settings.show_blacklist_buttons;
        Either::B(
            db.unsubscribe_from_mailing(mailing, email.clone())
                .map(move |view| match view {
                    UnsubscribeView::Manage {
                        lists,
                        unsubscribed_from,
                    } => render(
                        "unsubscribe.html",
                        context! {
                            email: email,
                            mailing_id: mailing_id,
                            res_id: res_id,
                            token: token,
                            lists: lists,
                            unsubscribed_list: unsubscribed_from,
                            show_blacklist_button: show_blacklist_button,
                        },
                    ),
                    UnsubscribeView::Blacklisted { opted_in } => render(
                        "unsubscribed.html",
                        context! {
                            email: email,
                            mailing_id: mailing_id,
                            res_id: res_id,
                            token: token,
                            lists: opted_in,
                            show_blacklist_button: show_blacklist_button,
                        },
                    ),
                }),
        )
    })
}

pub fn unsubscribe(
    params: UnsubscribeParams,
    app: App,
) -> impl Future<Item = Outcome, Error = Error> {
    let mailing_id = match params.recipient.mailing_id {
        Some(id) => id,
        None => return Either::A(ok(Outcome::Error)),
    };
    let App { db, signer, .. } = app;

    Either::B(db.get_mailing(mailing_id).and_then(move |mailing| {
        if mailing.is_none() {
            return Either::A(ok(Outcome::Error));
        }
        if !authorized(&signer, &params.recipient) {
            return Either::A(ok(Outcome::Unauthorized));
        }
        let UnsubscribeParams {
            recipient,
            opt_in_ids,
            opt_out_ids,
        } = params;
        Either::B(
            db.update_list_membership(recipient.email.unwrap_or_default(), opt_in_ids, opt_out_ids)
                .map(|()| Outcome::Done(true)),
        )
    }))
}

pub fn track_open(
    trace_id: Option<i32>,
    app: App,
) -> impl Future<Item = Response<Vec<u8>>, Error = Error> {
    let trace_id = match trace_id {
        Some(trace_id) => trace_id,
        None => return Either::A(ok(blank_gif())),
    };
    Either::B(app.db.set_opened(trace_id).then(move |r| {
        match r {
            Ok(true) => {}
            Ok(false) => debug!("Open tracked for unknown mail {}.", trace_id),
            Err(e) => log_err(e.into()),
        }
        Ok::<_, Error>(blank_gif())
    }))
}

pub fn click(
    code: String,
    trace_id: i32,
    remote: Option<SocketAddr>,
    country_code: Option<String>,
    app: App,
) -> impl Future<Item = Response<String>, Error = Error> {
    let ip = remote.map(|addr| addr.ip().to_string());
    let trace_id = if trace_id > 0 { Some(trace_id) } else { None };
    app.db
        .add_click(code.clone(), ip, country_code, trace_id)
        .map(move |url| match url {
            Some(url) => {
                debug!("Redirecting {} to {}.", code, url);
                redirect(StatusCode::MOVED_PERMANENTLY, &url)
            }
            None => not_found(),
        })
}

pub fn blacklist_check(
    params: RecipientParams,
    app: App,
) -> impl Future<Item = Outcome, Error = Error> {
    if !authorized(&app.signer, &params) {
        return Either::A(ok(Outcome::Unauthorized));
    }
    match params.email {
        Some(email) => Either::B(app.db.blacklist_active(email).map(Outcome::Done)),
        None => Either::A(ok(Outcome::Error)),
    }
}

pub fn blacklist_add(
    params: RecipientParams,
    app: App,
) -> impl Future<Item = Outcome, Error = Error> {
    if !authorized(&app.signer, &params) {
        return Either::A(ok(Outcome::Unauthorized));
    }
    match (params.mailing_id, params.email) {
        (Some(mailing_id), Some(email)) => Either::B(
            app.db
                .blacklist_add(
                    mailing_id,
                    email,
                    "Requested blacklisting via unsubscription page.",
                )
                .map(|entry| entry.map_or(Outcome::Error, |_| Outcome::Done(true))),
        ),
        _ => Either::A(ok(Outcome::Error)),
    }
}

pub fn blacklist_remove(
    params: RecipientParams,
    app: App,
) -> impl Future<Item = Outcome, Error = Error> {
    if !authorized(&app.signer, &params) {
        return Either::A(ok(Outcome::Unauthorized));
    }
    match (params.mailing_id, params.email) {
        (Some(mailing_id), Some(email)) => Either::B(
            app.db
                .blacklist_remove(
                    mailing_id,
                    email,
                    "Requested de-blacklisting via unsubscription page.",
                )
                .map(|entry| entry.map_or(Outcome::Error, |_| Outcome::Done(true))),
        ),
        _ => Either::A(ok(Outcome::Error)),
    }
}

pub fn feedback(params: FeedbackParams, app: App) -> impl Future<Item = Outcome, Error = Error> {
    let mailing_id = match (params.recipient.mailing_id, params.recipient.email()) {
        (Some(id), Some(email)) if !email.is_empty() => id,
        _ => return Either::A(ok(Outcome::Error)),
    };
    let App { db, signer, .. } = app;

    Either::B(db.get_mailing(mailing_id).and_then(move |mailing| {
        let mailing = match mailing {
            Some(mailing) => mailing,
            None => return Either::A(ok(Outcome::Error)),
        };
        if !authorized(&signer, &params.recipient) {
            return Either::A(ok(Outcome::Unauthorized));
        }
        let FeedbackParams {
            recipient,
            feedback,
        } = params;
        Either::B(
            db.post_feedback(mailing, recipient.email.unwrap_or_default(), feedback)
                .map(|posted| Outcome::Done(posted > 0)),
        )
    }))
}

/// Answers every request with a 404. The path is reserved as a placeholder in mail bodies.
pub fn not_found() -> Response<String> {
    let mut res = Response::new(String::new());
    *res.status_mut() = StatusCode::NOT_FOUND;
    res
}

fn authorized(signer: &::token::Signer, params: &RecipientParams) -> bool {
    let valid = signer.verify(
        params.mailing_id,
        params.res_id,
        params.email(),
        params.token(),
    );
    if !valid {
        warn!(
            "Rejected a token for mailing {:?}, record {:?}.",
            params.mailing_id, params.res_id
        );
    }
    valid
}

fn blank_gif() -> Response<Vec<u8>> {
    let mut res = Response::new(BLANK_GIF.to_vec());
    res.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("image/gif"));
    res
}

fn redirect(status: StatusCode, location: &str) -> Response<String> {
    let mut res = Response::new(String::new());
    *res.status_mut() = status;
    match HeaderValue::from_str(location) {
        Ok(value) => {
            res.headers_mut().insert(LOCATION, value);
        }
        Err(_) => {
            warn!("Can't redirect to {:?}.", location);
            *res.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
        }
    }
    res
}
