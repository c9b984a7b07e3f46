//! The web-serving parts.

mod endpoints;
pub mod rpc;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use futures::prelude::*;
use serde_json::Value;
use tera::{self, Context, Tera};
use url::Url;
use warp::{
    self,
    filters::BoxedFilter,
    http::{
        header::{HeaderValue, CONTENT_TYPE},
        status::StatusCode,
        Response,
    },
    reject, Filter, Rejection,
};

use token::Signer;
use web::endpoints::*;
use web::rpc::{reply, FeedbackParams, RecipientParams, RpcRequest, UnsubscribeParams};
use {log_err, Error, Result, DB};

pub use web::endpoints::BLANK_GIF;

/// Renders a page to a response.
pub type Render = Arc<dyn Fn(&str, Context) -> Response<String> + Send + Sync>;

/// Settings the endpoints need from the command line.
#[derive(Clone, Debug)]
pub struct Settings {
    /// The URL the service is reachable at, used to build links.
    pub base_url: Url,

    /// Where to send visitors of unsubscribe links for mailings that don't exist.
    pub home_url: String,

    /// Whether to offer the blacklist buttons on the unsubscribe pages.
    pub show_blacklist_buttons: bool,
}

/// Everything a request needs. Cheaply clonable.
#[derive(Clone)]
pub struct App {
    pub db: DB,
    pub signer: Signer,
    pub settings: Arc<Settings>,
    pub render: Render,
}

impl App {
    /// Creates an `App`, loading the page templates.
    pub fn new(db: DB, signer: Signer, settings: Settings) -> Result<App> {
        let render = renderer(Arc::new(settings.base_url.clone()))?;
        Ok(App {
            db,
            signer,
            settings: Arc::new(settings),
            render,
        })
    }
}

fn renderer(base_url: Arc<Url>) -> Result<Render> {
    let mut tera = Tera::default();
    tera.register_global_function(
        "relative_url",
        Box::new(move |args: HashMap<String, Value>| -> tera::Result<Value> {
            let s = match args.get("path") {
                Some(path) => try_get_value!("relative_url", "path", String, path),
                None => return Err("relative_url needs a `path`".into()),
            };
            let url = base_url.join(&s).map_err(|e| e.to_string())?;
            Ok(Value::String(url.to_string()))
        }),
    );
    tera.add_raw_templates(vec![
        ("base.html", include_str!("base.html")),
        ("unsubscribe.html", include_str!("unsubscribe.html")),
        ("unsubscribed.html", include_str!("unsubscribed.html")),
        ("access-denied.html", include_str!("access-denied.html")),
    ])?;

    Ok(Arc::new(move |name: &str, context: Context| -> Response<String> {
        match tera.render(name, &context) {
            Ok(html) => {
                let mut res = Response::new(html);
                res.headers_mut()
                    .insert(CONTENT_TYPE, HeaderValue::from_static("text/html"));
                res
            }
            Err(e) => {
                let s = e
                    .iter()
                    .map(|e| e.to_string())
                    .collect::<Vec<String>>()
                    .join("\n");
                error!("{}", s);

                let mut res = Response::new(s);
                res.headers_mut()
                    .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
                *res.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                res
            }
        }
    }))
}

/// Logs a handler's error, turning it into a 500.
fn internal(err: Error) -> Rejection {
    log_err(err.into());
    reject::server_error()
}

/// Returns all the routes.
pub fn routes(app: App) -> BoxedFilter<(impl warp::Reply,)> {
    let app = warp::any().map(move || app.clone());
    let country_code = warp::header::<String>("x-country-code")
        .map(Some)
        .or(warp::any().map(|| None::<String>))
        .unify();

    let unsubscribe_page_route = path!("mail" / "mailing" / i32 / "unsubscribe")
        .and(warp::index())
        .and(warp::get2())
        .and(
            warp::query::<UnsubscribeQuery>()
                .or(warp::any().map(UnsubscribeQuery::default))
                .unify(),
        )
        .and(app.clone())
        .and_then(|mailing_id, params, app| {
            unsubscribe_page(mailing_id, params, app).map_err(internal)
        });

    let unsubscribe_route = path!("mail" / "mailing" / "unsubscribe")
        .and(warp::index())
        .and(warp::post2())
        .and(warp::body::json())
        .and(app.clone())
        .and_then(|req: RpcRequest<UnsubscribeParams>, app| {
            let id = req.id;
            unsubscribe(req.params, app)
                .map(move |outcome| reply(id, outcome))
                .map_err(internal)
        });

    let track_open_route = path!("mail" / "track" / String / "blank.gif")
        .and(warp::index())
        .and(warp::get2())
        .and(app.clone())
        .and_then(|trace_id: String, app| {
            let trace_id = trace_id.parse::<i32>().ok().filter(|&id| id > 0);
            track_open(trace_id, app).map_err(internal)
        });

    let click_route = path!("r" / String / "m" / i32)
        .and(warp::index())
        .and(warp::get2())
        .and(warp::addr::remote())
        .and(country_code)
        .and(app.clone())
        .and_then(
            |code, trace_id, remote: Option<SocketAddr>, country_code, app| {
                click(code, trace_id, remote, country_code, app).map_err(internal)
            },
        );

    let blacklist_check_route = path!("mailing" / "blacklist" / "check")
        .and(warp::index())
        .and(warp::post2())
        .and(warp::body::json())
        .and(app.clone())
        .and_then(|req: RpcRequest<RecipientParams>, app| {
            let id = req.id;
            blacklist_check(req.params, app)
                .map(move |outcome| reply(id, outcome))
                .map_err(internal)
        });

    let blacklist_add_route = path!("mailing" / "blacklist" / "add")
        .and(warp::index())
        .and(warp::post2())
        .and(warp::body::json())
        .and(app.clone())
        .and_then(|req: RpcRequest<RecipientParams>, app| {
            let id = req.id;
            blacklist_add(req.params, app)
                .map(move |outcome| reply(id, outcome))
                .map_err(internal)
        });

    let blacklist_remove_route = path!("mailing" / "blacklist" / "remove")
        .and(warp::index())
        .and(warp::post2())
        .and(warp::body::json())
        .and(app.clone())
        .and_then(|req: RpcRequest<RecipientParams>, app| {
            let id = req.id;
            blacklist_remove(req.params, app)
                .map(move |outcome| reply(id, outcome))
                .map_err(internal)
        });

    let feedback_route = path!("mailing" / "feedback")
        .and(warp::index())
        .and(warp::post2())
        .and(warp::body::json())
        .and(app.clone())
        .and_then(|req: RpcRequest<FeedbackParams>, app| {
            let id = req.id;
            feedback(req.params, app)
                .map(move |outcome| reply(id, outcome))
                .map_err(internal)
        });

    let placeholder_route = path!("unsubscribe_from_list")
        .and(warp::index())
        .map(not_found);

    let status_route = path!("status").and(warp::index()).and(warp::get2()).map(|| {
        let mut res = Response::new("".to_string());
        *res.status_mut() = StatusCode::NO_CONTENT;
        res
    });

    let css_route = path!("main.css").and(warp::index()).map(|| {
        let mut res = Response::new(include_str!("main.css").to_string());
        res.headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("text/css"));
        res
    });

    unsubscribe_page_route
        .or(unsubscribe_route)
        .or(track_open_route)
        .or(click_route)
        .or(blacklist_check_route)
        .or(blacklist_add_route)
        .or(blacklist_remove_route)
        .or(feedback_route)
        .or(placeholder_route)
        .or(status_route)
        .or(css_route)
        .boxed()
}
