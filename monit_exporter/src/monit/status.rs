//! Monit XML status document
//!
//! The types here mirror the `<monit>` document Monit serves from
//! `/_status?format=xml`. Only the service inventory feeds metrics, server and
//! platform detail is kept for completeness. Per-type subrecords (`block`,
//! `inode`, `port`, `system`, `link`) are `Option`s: a subrecord Monit did not
//! report is `None`, never a zero-valued stand-in.

use std::{borrow::Cow, fmt, str::FromStr};

use encoding_rs::Encoding;
use quick_xml::{Reader, events::Event};
use serde::{Deserialize, Deserializer};
use tracing::{debug, error};

#[derive(thiserror::Error, Debug)]
/// Errors produced by [`parse`]
///
/// Every variant describes a malformed document.
pub enum Error {
    /// The document is not well-formed XML.
    #[error("Malformed Monit XML: {0}")]
    Syntax(#[from] quick_xml::Error),
    /// The document is well-formed but does not fit the status schema.
    #[error("Failed to decode Monit XML: {0}")]
    Decode(#[from] quick_xml::de::DeError),
    /// The root element is not `<monit>`.
    #[error("Expected <monit> root element, found <{0}>")]
    UnexpectedRoot(String),
    /// The document holds no element at all.
    #[error("Document has no root element")]
    MissingRoot,
    /// The XML declaration names an encoding we do not know.
    #[error("Unsupported document encoding: {0}")]
    UnsupportedEncoding(String),
    /// The bytes are not valid in the document's encoding.
    #[error("Document is not valid {0}")]
    InvalidEncoding(&'static str),
    /// The XML declaration could not be read.
    #[error("Invalid XML declaration: {0}")]
    InvalidDeclaration(String),
}

/// The `<monit>` root element.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Monit {
    /// Details of the Monit daemon itself
    pub server: Server,
    /// Details of the host Monit runs on
    pub platform: Platform,
    /// Supervised services, in document order
    #[serde(rename = "service")]
    pub services: Vec<Service>,
}

/// The `<server>` element.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Server {
    /// Unique id of this Monit instance
    pub id: String,
    /// Start time of this Monit process
    #[serde(deserialize_with = "lenient")]
    pub incarnation: i64,
    /// Monit version
    pub version: String,
    /// Seconds since Monit started
    #[serde(deserialize_with = "lenient")]
    pub uptime: i64,
    /// Polling cycle in seconds
    #[serde(deserialize_with = "lenient")]
    pub poll: i32,
    /// Delay before the first cycle in seconds
    #[serde(rename = "startdelay")]
    #[serde(deserialize_with = "lenient")]
    pub start_delay: i32,
    /// Host name Monit believes it runs on
    #[serde(rename = "localhostname")]
    pub local_hostname: String,
    /// Path of the Monit control file
    #[serde(rename = "controlfile")]
    pub control_file: String,
    /// Monit's embedded HTTP server
    pub httpd: Httpd,
}

/// The `<httpd>` element.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Httpd {
    /// Listen address
    pub address: String,
    /// Listen port
    #[serde(deserialize_with = "lenient")]
    pub port: i32,
    /// Non-zero when TLS is enabled
    #[serde(deserialize_with = "lenient")]
    pub ssl: i32,
}

/// The `<platform>` element.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Platform {
    /// Operating system name
    pub name: String,
    /// Operating system release
    pub release: String,
    /// Operating system version
    pub version: String,
    /// Hardware architecture
    pub machine: String,
    /// Number of CPUs
    #[serde(deserialize_with = "lenient")]
    pub cpu: i32,
    /// Total memory in kilobytes
    #[serde(deserialize_with = "lenient")]
    pub memory: i64,
    /// Total swap in kilobytes
    #[serde(deserialize_with = "lenient")]
    pub swap: i64,
}

/// The `<service>` element.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Service {
    /// Monit's integer service type, see [`Service::kind`]
    #[serde(rename = "@type")]
    #[serde(deserialize_with = "lenient")]
    pub kind: i32,
    /// Service name
    pub name: String,
    /// Collection timestamp, seconds part
    #[serde(deserialize_with = "lenient")]
    pub collected_sec: i64,
    /// Collection timestamp, microseconds part
    #[serde(deserialize_with = "lenient")]
    pub collected_usec: i64,
    /// Bitmask of failed checks, zero when healthy
    #[serde(deserialize_with = "lenient")]
    pub status: i32,
    /// Bitmask of checks with a hint
    #[serde(deserialize_with = "lenient")]
    pub status_hint: i32,
    /// 0 not monitored, 1 monitored, 2 initializing
    #[serde(deserialize_with = "lenient")]
    pub monitor: i32,
    /// Monitoring mode
    #[serde(rename = "monitormode")]
    #[serde(deserialize_with = "lenient")]
    pub monitor_mode: i32,
    /// Action taken on reboot
    #[serde(rename = "onreboot")]
    #[serde(deserialize_with = "lenient")]
    pub on_reboot: i32,
    /// Action queued for this service
    #[serde(rename = "pendingaction")]
    #[serde(deserialize_with = "lenient")]
    pub pending_action: i32,
    /// Filesystem type
    #[serde(rename = "fstype")]
    pub fs_type: String,
    /// Filesystem mount flags
    #[serde(rename = "fsflags")]
    pub fs_flags: String,
    /// Permission bits
    pub mode: String,
    /// Owner uid
    #[serde(deserialize_with = "lenient")]
    pub uid: i32,
    /// Owner gid
    #[serde(deserialize_with = "lenient")]
    pub gid: i32,
    /// Filesystem block usage
    pub block: Option<Block>,
    /// Filesystem inode usage
    pub inode: Option<Inode>,
    /// Port probes, see [`Service::port`]
    #[serde(rename = "port")]
    pub ports: Vec<Port>,
    /// Host-level resource usage
    pub system: Option<System>,
    /// Network interface counters
    pub link: Option<Link>,
}

impl Service {
    /// The port probe this service reports, if any.
    ///
    /// Monit may list several `<port>` elements for one remote host. The last
    /// one wins, as it would for any other repeated sample.
    #[must_use]
    pub fn port(&self) -> Option<&Port> {
        self.ports.last()
    }
}

/// The `<block>` element of a filesystem service.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Block {
    /// Used space in percent
    #[serde(deserialize_with = "lenient")]
    pub percent: f64,
    /// Used space
    #[serde(deserialize_with = "lenient")]
    pub usage: f64,
    /// Total space
    #[serde(deserialize_with = "lenient")]
    pub total: f64,
}

/// The `<inode>` element of a filesystem service.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Inode {
    /// Used inodes in percent
    #[serde(deserialize_with = "lenient")]
    pub percent: f64,
    /// Used inodes
    #[serde(deserialize_with = "lenient")]
    pub usage: i64,
    /// Total inodes
    #[serde(deserialize_with = "lenient")]
    pub total: i64,
}

/// The `<port>` element of a remote host service.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Port {
    /// Probed host
    pub hostname: String,
    /// Probed port
    #[serde(rename = "portnumber")]
    #[serde(deserialize_with = "lenient")]
    pub port_number: i32,
    /// Request path, for protocols that have one
    pub request: String,
    /// Application protocol
    pub protocol: String,
    /// Transport, `TCP` or `UDP`
    #[serde(rename = "type")]
    pub transport: String,
    /// Probe latency in seconds
    #[serde(rename = "responsetime")]
    #[serde(deserialize_with = "lenient")]
    pub response_time: f64,
    /// TLS certificate state
    pub certificate: Certificate,
}

/// The `<certificate>` element of a port probe.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Certificate {
    /// Days of validity left
    #[serde(deserialize_with = "lenient")]
    pub valid: i32,
}

/// The `<system>` element of the system service.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct System {
    /// Load averages
    pub load: Load,
    /// CPU split
    pub cpu: Cpu,
    /// Memory usage
    pub memory: Memory,
    /// Swap usage
    pub swap: Memory,
}

/// The `<load>` element.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Load {
    /// One minute load average
    #[serde(deserialize_with = "lenient")]
    pub avg01: f64,
    /// Five minute load average
    #[serde(deserialize_with = "lenient")]
    pub avg05: f64,
    /// Fifteen minute load average
    #[serde(deserialize_with = "lenient")]
    pub avg15: f64,
}

/// The `<cpu>` element.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Cpu {
    /// User time in percent
    #[serde(deserialize_with = "lenient")]
    pub user: f64,
    /// Kernel time in percent
    #[serde(deserialize_with = "lenient")]
    pub system: f64,
    /// I/O wait in percent
    #[serde(deserialize_with = "lenient")]
    pub wait: f64,
}

/// The `<memory>` and `<swap>` elements.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Memory {
    /// Usage in percent
    #[serde(deserialize_with = "lenient")]
    pub percent: f64,
    /// Usage in kilobytes
    #[serde(deserialize_with = "lenient")]
    pub kilobyte: i64,
}

/// The `<link>` element of a network service.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Link {
    /// Link state
    #[serde(deserialize_with = "lenient")]
    pub state: i32,
    /// Link speed in bits per second
    #[serde(deserialize_with = "lenient")]
    pub speed: i64,
    /// Non-zero for full duplex
    #[serde(deserialize_with = "lenient")]
    pub duplex: i32,
    /// Inbound counters
    pub download: Traffic,
    /// Outbound counters
    pub upload: Traffic,
}

/// The `<download>` and `<upload>` elements.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Traffic {
    /// Packet counts
    pub packets: Tally,
    /// Byte counts
    pub bytes: Tally,
    /// Error counts
    pub errors: Tally,
}

/// A `now`/`total` pair.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Tally {
    /// Per-second rate
    #[serde(deserialize_with = "lenient")]
    pub now: i64,
    /// Running total
    #[serde(deserialize_with = "lenient")]
    pub total: i64,
}

/// Read a number from element or attribute text. Empty or blank text reads as
/// zero, Monit leaves some numeric elements empty.
fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr + Default,
    T::Err: fmt::Display,
{
    let text = String::deserialize(deserializer)?;
    let text = text.trim();
    if text.is_empty() {
        return Ok(T::default());
    }
    text.parse().map_err(serde::de::Error::custom)
}

/// Decode a Monit status document.
///
/// The document's encoding is taken from its byte-order mark, then its XML
/// declaration, falling back to UTF-8. Monit commonly declares ISO-8859-1.
///
/// # Errors
///
/// Returns an error if the document is malformed, see [`Error`].
pub fn parse(body: &[u8]) -> Result<Monit, Error> {
    debug!("parsing Monit status ({len} bytes)", len = body.len());

    let text = transcode(body)?;
    check_root(&text)?;
    let monit: Monit = quick_xml::de::from_str(&text).map_err(|err| {
        error!("Monit XML decoding failed: {err}");
        Error::Decode(err)
    })?;

    debug!(
        "parsed Monit status, services count={count}",
        count = monit.services.len()
    );
    Ok(monit)
}

fn transcode(body: &[u8]) -> Result<Cow<'_, str>, Error> {
    let (encoding, payload) = match Encoding::for_bom(body) {
        Some((encoding, bom_length)) => (encoding, &body[bom_length..]),
        None => (declared_encoding(body)?, body),
    };
    encoding
        .decode_without_bom_handling_and_without_replacement(payload)
        .ok_or(Error::InvalidEncoding(encoding.name()))
}

/// Read the `encoding` pseudo-attribute of the XML declaration, if any.
///
/// The declaration is ASCII in every encoding Monit can emit, so the raw bytes
/// are read as-is.
fn declared_encoding(body: &[u8]) -> Result<&'static Encoding, Error> {
    let mut reader = Reader::from_reader(body);
    let mut buf = Vec::new();
    let Event::Decl(decl) = reader.read_event_into(&mut buf)? else {
        return Ok(encoding_rs::UTF_8);
    };
    match decl.encoding() {
        None => Ok(encoding_rs::UTF_8),
        Some(Err(err)) => Err(Error::InvalidDeclaration(err.to_string())),
        Some(Ok(label)) => Encoding::for_label(&label)
            .map(Encoding::output_encoding)
            .ok_or_else(|| {
                Error::UnsupportedEncoding(String::from_utf8_lossy(&label).into_owned())
            }),
    }
}

fn check_root(text: &str) -> Result<(), Error> {
    let mut reader = Reader::from_str(text);
    loop {
        match reader.read_event()? {
            Event::Start(element) | Event::Empty(element) => {
                let name = element.local_name();
                if name.as_ref() == b"monit" {
                    return Ok(());
                }
                return Err(Error::UnexpectedRoot(
                    String::from_utf8_lossy(name.as_ref()).into_owned(),
                ));
            }
            Event::Eof => return Err(Error::MissingRoot),
            _ => {}
        }
    }
}
