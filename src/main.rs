extern crate dotenv;
#[macro_use]
extern crate failure;
#[cfg(not(debug_assertions))]
#[macro_use]
extern crate human_panic;
#[macro_use]
extern crate log;
extern crate mailing_endpoints;
#[macro_use]
extern crate structopt;
extern crate syslog;
extern crate tokio;
extern crate url;
extern crate warp;

use std::net::{SocketAddr, ToSocketAddrs};
use std::process::exit;

use failure::Error;
use mailing_endpoints::{
    db::tracking::{click_url, track_link},
    log_err, routes, App, Settings, Signer, DB,
};
use structopt::StructOpt;
use url::Url;

fn main() {
    dotenv::dotenv().ok();
    let options = Options::from_args();
    options.setup_panic();
    options.start_logger();

    if let Err(err) = run(options) {
        log_err(err);
        exit(1);
    }
}

fn run(options: Options) -> Result<(), Error> {
    let signer = Signer::new(&options.secret)?;
    match options.command {
        Command::Serve => {
            let serve_addr = options.serve_addr()?;
            let db = DB::connect(&options.database_url, options.pool_size)?;
            let app = App::new(
                db,
                signer,
                Settings {
                    base_url: options.base_url,
                    home_url: options.home_url,
                    show_blacklist_buttons: options.show_blacklist_buttons,
                },
            )?;

            info!("Serving on {}.", serve_addr);
            tokio::run(warp::serve(routes(app)).bind(serve_addr));
        }
        Command::UnsubscribeUrl {
            mailing_id,
            res_id,
            ref email,
        } => {
            let url = signer.unsubscribe_url(&options.base_url, mailing_id, res_id, email)?;
            println!("{}", url);
        }
        Command::TrackLink { ref url, trace } => {
            let db = DB::connect(&options.database_url, 1)?;
            let code = track_link(&*db.conn()?, url.as_str())?;
            println!("{}", click_url(&options.base_url, &code, trace.unwrap_or(0))?);
        }
    }
    Ok(())
}

#[derive(Debug, StructOpt)]
#[structopt(raw(setting = "::structopt::clap::AppSettings::ColoredHelp"))]
struct Options {
    /// Turns off message output.
    #[structopt(short = "q", long = "quiet")]
    quiet: bool,

    /// Increases the verbosity. Default verbosity is errors and warnings.
    #[structopt(short = "v", long = "verbose", parse(from_occurrences))]
    verbose: usize,

    /// The base URL the service is reachable at, used to build unsubscribe and click links.
    #[structopt(short = "b", long = "base-url", env = "BASE_URL")]
    base_url: Url,

    /// The path of the SQLite database.
    #[structopt(short = "d", long = "db", env = "DATABASE_URL")]
    database_url: String,

    /// The number of database connections to keep.
    #[structopt(long = "pool-size", env = "POOL_SIZE", default_value = "4")]
    pool_size: u32,

    /// The secret unsubscribe tokens are signed with.
    #[structopt(long = "secret", env = "MAILING_SECRET")]
    secret: String,

    /// Where unsubscribe links to missing mailings redirect to.
    #[structopt(long = "home-url", env = "HOME_URL", default_value = "/web")]
    home_url: String,

    /// Offers the blacklist buttons on the unsubscribe pages.
    #[structopt(long = "show-blacklist-buttons")]
    show_blacklist_buttons: bool,

    /// The host to serve on.
    #[structopt(short = "H", long = "host", env = "HOST", default_value = "::")]
    host: String,

    /// The port to serve on.
    #[structopt(short = "p", long = "port", env = "PORT", default_value = "8000")]
    port: u16,

    /// The syslog server to send logs to.
    #[structopt(short = "s", long = "syslog-server", env = "SYSLOG_SERVER")]
    syslog_server: Option<String>,

    #[structopt(subcommand)]
    command: Command,
}

#[derive(Debug, StructOpt)]
enum Command {
    /// Serves the mailing endpoints.
    #[structopt(name = "serve")]
    Serve,

    /// Prints the unsubscribe link for a recipient of a mailing.
    #[structopt(name = "unsubscribe-url")]
    UnsubscribeUrl {
        /// The ID of the mailing.
        mailing_id: i32,

        /// The ID of the recipient's record.
        res_id: i32,

        /// The recipient's address.
        email: String,
    },

    /// Prints a click-tracking link for a URL, creating its tracker if needed.
    #[structopt(name = "track-link")]
    TrackLink {
        /// The URL to track.
        url: Url,

        /// The sent mail to count clicks against.
        #[structopt(short = "t", long = "trace")]
        trace: Option<i32>,
    },
}

impl Options {
    /// Get the address to serve on.
    fn serve_addr(&self) -> Result<SocketAddr, Error> {
        let addrs = (&self.host as &str, self.port)
            .to_socket_addrs()?
            .collect::<Vec<_>>();
        if addrs.is_empty() {
            bail!("No matching address exists")
        } else {
            Ok(addrs[0])
        }
    }

    /// Sets up the panic handler.
    #[cfg(debug_assertions)]
    fn setup_panic(&self) {}

    /// Sets up the panic handler.
    #[cfg(not(debug_assertions))]
    fn setup_panic(&self) {
        if self.verbose == 0 {
            setup_panic!();
        }
    }

    /// Sets up logging as specified by the `-q`, `-s`, and `-v` flags.
    fn start_logger(&self) {
        if !self.quiet {
            let log_level = match self.verbose {
                0 => log::LevelFilter::Warn,
                1 => log::LevelFilter::Info,
                2 => log::LevelFilter::Debug,
                _ => log::LevelFilter::Trace,
            };

            let r = if let Some(ref server) = self.syslog_server {
                syslog::init_tcp(
                    server,
                    "mailing-endpoints".to_string(),
                    syslog::Facility::LOG_DAEMON,
                    log_level,
                )
            } else {
                syslog::init(
                    syslog::Facility::LOG_DAEMON,
                    log_level,
                    Some("mailing-endpoints"),
                )
            };

            if let Err(err) = r {
                error!("Warning: logging couldn't start: {}", err);
            }
        }
    }
}
