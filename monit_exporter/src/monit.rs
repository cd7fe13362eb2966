//! Talk to Monit
//!
//! Monit exposes its view of the supervised services as an XML document at
//! `/_status?format=xml&level=full`. The [`client`] module fetches that
//! document and the [`status`] module decodes it.
//!

pub mod client;
pub mod status;

pub use client::Client;
pub use status::{Monit, Service, parse};
