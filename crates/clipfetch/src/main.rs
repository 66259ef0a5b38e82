//! Clipfetch.
//!
//! Clipfetch is a web service that resolves links to short-video pages into the metadata of the
//! video: where to download it, its title and its author. It can optionally remove the
//! watermark from the video. Results are cached, and concurrent requests for the same video are
//! coalesced into a single fetch.

#![warn(missing_debug_implementations, clippy::all)]

mod cli;
mod endpoints;
mod healthcheck;
mod logging;
mod server;
mod service;

fn main() {
    match cli::execute() {
        Ok(()) => std::process::exit(0),
        Err(error) => {
            logging::ensure_log_error(&error);
            std::process::exit(1);
        }
    }
}
