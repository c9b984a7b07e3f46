#[macro_use]
extern crate diesel;
extern crate failure;
extern crate futures;
extern crate hex;
extern crate hmac;
#[macro_use]
extern crate log;
extern crate serde;
#[macro_use]
extern crate serde_derive;
#[cfg_attr(test, macro_use)]
extern crate serde_json;
extern crate sha2;
#[macro_use]
extern crate tera;
extern crate tokio_threadpool;
extern crate url;
#[macro_use]
extern crate warp;

#[macro_use]
mod macros;

pub mod db;
mod errors;
pub mod token;
pub mod util;
pub mod web;

pub use db::DB;
pub use errors::{Error, ErrorKind, Result};
pub use token::Signer;
pub use util::log_err;
pub use web::{routes, App, Settings};
