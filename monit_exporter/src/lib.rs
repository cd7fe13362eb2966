//! A Prometheus exporter for the Monit process supervisor.
//!
//! Each scrape of the exporter fetches Monit's XML status document, decodes it
//! into a typed service inventory and renders one gauge family per observed
//! dimension. The binary found elsewhere in this project wires these pieces to
//! an HTTP listener; the library is usable on its own for embedding.

#![deny(clippy::all)]
#![deny(clippy::cargo)]
#![deny(clippy::pedantic)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]
#![deny(clippy::dbg_macro)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]
#![deny(missing_copy_implementations)]
#![deny(missing_debug_implementations)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::multiple_crate_versions)]

use bytes::Bytes;
use http_body_util::{BodyExt, Full, combinators::BoxBody};

pub mod collector;
pub mod config;
pub mod httpd;
pub mod monit;

pub(crate) fn full<T: Into<Bytes>>(chunk: T) -> BoxBody<Bytes, hyper::Error> {
    Full::new(chunk.into())
        .map_err(|never| match never {})
        .boxed()
}
