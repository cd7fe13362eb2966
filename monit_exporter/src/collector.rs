//! Monit scrape collector
//!
//! Every call to [`Exporter::collect`] is one scrape: fetch Monit's status
//! document, decode it, and render one gauge family per observed dimension as
//! Prometheus text exposition. Each scrape records into a fresh recorder, so a
//! series Monit stopped reporting disappears on the next scrape instead of
//! lingering with its last value.
//!
//! All labeled families carry the labels `service_name`, `service_type` and
//! `service_monitor_status`, in that order. Upstream failures never surface as
//! errors from [`Exporter::collect`]; they are logged and reflected by
//! `monit_exporter_up` reading 0.

use std::fmt;

use metrics::{describe_gauge, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::{
    config::Config,
    monit::{self, Client, Monit},
};

/// Reachability of the Monit endpoint, 1 or 0.
pub const UP: &str = "monit_exporter_up";
/// The `status` bitmask of a service.
pub const SERVICE_CHECK: &str = "monit_exporter_service_check";
/// Filesystem block usage.
pub const BLOCK_USAGE: &str = "monit_service_block_usage_bytes";
/// Filesystem block capacity.
pub const BLOCK_TOTAL: &str = "monit_service_block_total_bytes";
/// Filesystem block usage in percent.
pub const BLOCK_PERCENT: &str = "monit_service_block_usage_percent";
/// Filesystem inode usage.
pub const INODE_USAGE: &str = "monit_service_inode_usage";
/// Filesystem inode capacity.
pub const INODE_TOTAL: &str = "monit_service_inode_total";
/// Filesystem inode usage in percent.
pub const INODE_PERCENT: &str = "monit_service_inode_usage_percent";
/// Port probe latency.
pub const PORT_RESPONSE: &str = "monit_service_port_response_seconds";
/// One minute load average.
pub const LOADAVG_01: &str = "monit_service_system_loadavg_01";
/// Five minute load average.
pub const LOADAVG_05: &str = "monit_service_system_loadavg_05";
/// Fifteen minute load average.
pub const LOADAVG_15: &str = "monit_service_system_loadavg_15";
/// CPU time in user space.
pub const CPU_USER: &str = "monit_service_system_cpu_user_percent";
/// CPU time in kernel space.
pub const CPU_SYSTEM: &str = "monit_service_system_cpu_system_percent";
/// CPU time waiting on I/O.
pub const CPU_WAIT: &str = "monit_service_system_cpu_wait_percent";
/// Memory usage in percent.
pub const MEMORY_PERCENT: &str = "monit_service_system_memory_usage_percent";
/// Memory usage in kilobytes.
pub const MEMORY_KILOBYTES: &str = "monit_service_system_memory_usage_kilobytes";
/// Swap usage in percent.
pub const SWAP_PERCENT: &str = "monit_service_system_swap_usage_percent";
/// Swap usage in kilobytes.
pub const SWAP_KILOBYTES: &str = "monit_service_system_swap_usage_kilobytes";

/// A gauge family this collector may emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Family {
    /// Fully qualified metric name
    pub name: &'static str,
    /// `# HELP` text
    pub help: &'static str,
}

const FAMILIES: &[Family] = &[
    Family {
        name: UP,
        help: "Indicates whether the Monit endpoint is reachable (1) or not (0).",
    },
    Family {
        name: SERVICE_CHECK,
        help: "Indicates the status field from Monit.",
    },
    Family {
        name: BLOCK_USAGE,
        help: "Block usage for filesystem-based services.",
    },
    Family {
        name: BLOCK_TOTAL,
        help: "Block total capacity for filesystem-based services.",
    },
    Family {
        name: BLOCK_PERCENT,
        help: "Block usage percentage for filesystem-based services.",
    },
    Family {
        name: INODE_USAGE,
        help: "Inode usage for filesystem-based services.",
    },
    Family {
        name: INODE_TOTAL,
        help: "Total number of inodes for filesystem-based services.",
    },
    Family {
        name: INODE_PERCENT,
        help: "Inode usage percentage for filesystem-based services.",
    },
    Family {
        name: PORT_RESPONSE,
        help: "Response time in seconds for port-based checks.",
    },
    Family {
        name: LOADAVG_01,
        help: "1-minute load average for system-based services.",
    },
    Family {
        name: LOADAVG_05,
        help: "5-minute load average for system-based services.",
    },
    Family {
        name: LOADAVG_15,
        help: "15-minute load average for system-based services.",
    },
    Family {
        name: CPU_USER,
        help: "CPU usage in user space (percent).",
    },
    Family {
        name: CPU_SYSTEM,
        help: "CPU usage in kernel space (percent).",
    },
    Family {
        name: CPU_WAIT,
        help: "CPU usage waiting for I/O (percent).",
    },
    Family {
        name: MEMORY_PERCENT,
        help: "Memory usage percentage for system-based services.",
    },
    Family {
        name: MEMORY_KILOBYTES,
        help: "Memory usage in kilobytes for system-based services.",
    },
    Family {
        name: SWAP_PERCENT,
        help: "Swap usage percentage for system-based services.",
    },
    Family {
        name: SWAP_KILOBYTES,
        help: "Swap usage in kilobytes for system-based services.",
    },
];

#[derive(thiserror::Error, Debug)]
/// Errors produced by [`ExporterBuilder`] and the scrape pipeline
pub enum Error {
    /// The exporter was built without a configuration.
    #[error("Exporter requires a configuration")]
    ConfigMissing,
    /// Fetching the status document failed.
    #[error(transparent)]
    Client(#[from] monit::client::Error),
    /// Decoding the status document failed.
    #[error(transparent)]
    Status(#[from] monit::status::Error),
}

/// Monit's service type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceType {
    /// 0
    Filesystem,
    /// 1
    Directory,
    /// 2
    File,
    /// 3
    Process,
    /// 4
    RemoteHost,
    /// 5
    System,
    /// 6
    Fifo,
    /// 7
    Program,
    /// 8
    Network,
    /// Any code outside the table above
    Unknown(i32),
}

impl From<i32> for ServiceType {
    fn from(code: i32) -> Self {
        match code {
            0 => Self::Filesystem,
            1 => Self::Directory,
            2 => Self::File,
            3 => Self::Process,
            4 => Self::RemoteHost,
            5 => Self::System,
            6 => Self::Fifo,
            7 => Self::Program,
            8 => Self::Network,
            other => Self::Unknown(other),
        }
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Filesystem => "Filesystem",
            Self::Directory => "Directory",
            Self::File => "File",
            Self::Process => "Process",
            Self::RemoteHost => "Remote host",
            Self::System => "System",
            Self::Fifo => "Fifo",
            Self::Program => "Program",
            Self::Network => "Network",
            Self::Unknown(_) => "unknown",
        };
        f.write_str(name)
    }
}

/// Builder for [`Exporter`].
#[derive(Debug, Default)]
pub struct ExporterBuilder {
    config: Option<Config>,
}

impl ExporterBuilder {
    /// Create a new exporter builder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the exporter configuration
    #[must_use]
    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Build the exporter
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigMissing`] if no configuration was set, or
    /// [`Error::Client`] if the HTTP client cannot be constructed.
    pub fn build(self) -> Result<Exporter, Error> {
        let Some(config) = self.config else {
            error!("exporter requested without a configuration");
            return Err(Error::ConfigMissing);
        };
        debug!(
            "creating exporter, listen_address={listen_address} upstream_url={upstream_url}",
            listen_address = config.listen_address,
            upstream_url = config.upstream_url,
        );

        let client = Client::new(&config)?;
        Ok(Exporter {
            client,
            scrape_lock: Mutex::new(()),
        })
    }
}

/// Scrapes Monit and renders the result as Prometheus metrics.
///
/// Scrapes are serialized: a [`Exporter::collect`] call arriving while another
/// is in flight waits for it to finish.
#[derive(Debug)]
pub struct Exporter {
    client: Client,
    scrape_lock: Mutex<()>,
}

impl Exporter {
    /// Every family this exporter may emit, in declaration order.
    #[must_use]
    pub fn describe() -> &'static [Family] {
        FAMILIES
    }

    /// Run one scrape and return its Prometheus text exposition.
    ///
    /// This never fails. A fetch or decode failure yields a document holding
    /// only `monit_exporter_up 0`.
    pub async fn collect(&self) -> String {
        let _guard = self.scrape_lock.lock().await;

        let status = match self.scrape().await {
            Ok(status) => Some(status),
            Err(err) => {
                warn!("Monit scrape failed: {err}");
                None
            }
        };

        let recorder = PrometheusBuilder::new().build_recorder();
        metrics::with_local_recorder(&recorder, || {
            for family in FAMILIES {
                describe_gauge!(family.name, family.help);
            }
            if let Some(status) = &status {
                gauge!(UP).set(1.0);
                emit(status);
            } else {
                gauge!(UP).set(0.0);
            }
        });
        recorder.handle().render()
    }

    async fn scrape(&self) -> Result<Monit, Error> {
        let body = self.client.fetch().await?;
        let status = monit::parse(&body)?;
        info!(
            "scraped Monit, services count={count}",
            count = status.services.len()
        );
        Ok(status)
    }
}

/// Record one gauge per observed dimension of every service in `monit`.
///
/// Samples go to the current `metrics` recorder. Subrecord families are only
/// touched for services that reported the subrecord. Services are visited in
/// document order, so a later duplicate label set overwrites an earlier one.
pub fn emit(monit: &Monit) {
    for service in &monit.services {
        let service_type = ServiceType::from(service.kind);
        if let ServiceType::Unknown(code) = service_type {
            warn!(
                "unknown service type, service_type={code} service_name={name}",
                name = service.name
            );
        }
        debug!(
            "service_name={name} service_type={service_type} service_monitor_status={monitor} service_status={status}",
            name = service.name,
            monitor = service.monitor,
            status = service.status,
        );

        let labels = vec![
            ("service_name", service.name.clone()),
            ("service_type", service_type.to_string()),
            ("service_monitor_status", service.monitor.to_string()),
        ];

        gauge!(SERVICE_CHECK, &labels).set(f64::from(service.status));

        if let Some(block) = service.block {
            gauge!(BLOCK_USAGE, &labels).set(block.usage);
            gauge!(BLOCK_TOTAL, &labels).set(block.total);
            gauge!(BLOCK_PERCENT, &labels).set(block.percent);
        }

        if let Some(inode) = service.inode {
            gauge!(INODE_USAGE, &labels).set(inode.usage as f64);
            gauge!(INODE_TOTAL, &labels).set(inode.total as f64);
            gauge!(INODE_PERCENT, &labels).set(inode.percent);
        }

        if let Some(port) = service.port() {
            gauge!(PORT_RESPONSE, &labels).set(port.response_time);
        }

        if let Some(system) = service.system {
            gauge!(LOADAVG_01, &labels).set(system.load.avg01);
            gauge!(LOADAVG_05, &labels).set(system.load.avg05);
            gauge!(LOADAVG_15, &labels).set(system.load.avg15);
            gauge!(CPU_USER, &labels).set(system.cpu.user);
            gauge!(CPU_SYSTEM, &labels).set(system.cpu.system);
            gauge!(CPU_WAIT, &labels).set(system.cpu.wait);
            gauge!(MEMORY_PERCENT, &labels).set(system.memory.percent);
            gauge!(MEMORY_KILOBYTES, &labels).set(system.memory.kilobyte as f64);
            gauge!(SWAP_PERCENT, &labels).set(system.swap.percent);
            gauge!(SWAP_KILOBYTES, &labels).set(system.swap.kilobyte as f64);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashSet,
        net::SocketAddr,
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
        time::Duration,
    };

    use metrics::{Key, Label};
    use metrics_util::{
        CompositeKey, MetricKind,
        debugging::{DebugValue, DebuggingRecorder},
    };
    use warp::Filter;

    use super::*;

    const S1_BODY: &str = r#"<?xml version="1.0"?><monit><server><version>5.26.0</version></server><platform/>
<service type="5"><name>host1</name><status>0</status><monitor>1</monitor>
<system><load><avg01>0.1</avg01><avg05>0.2</avg05><avg15>0.3</avg15></load>
<cpu><user>1.5</user><system>0.5</system><wait>0.0</wait></cpu>
<memory><percent>42.0</percent><kilobyte>100000</kilobyte></memory>
<swap><percent>0.0</percent><kilobyte>0</kilobyte></swap></system></service></monit>"#;

    const S2_BODY: &str = r#"<monit>
<service type="0"><name>rootfs</name><status>0</status><monitor>1</monitor>
<block><percent>50</percent><usage>500</usage><total>1000</total></block></service>
<service type="42"><name>mystery</name><status>2</status><monitor>1</monitor></service>
</monit>"#;

    const S5_BODY: &str = "<monit/>";

    type Snapshot = std::collections::HashMap<
        CompositeKey,
        (
            Option<metrics::Unit>,
            Option<metrics::SharedString>,
            DebugValue,
        ),
    >;

    fn emit_into_snapshot(body: &str) -> Snapshot {
        let monit = monit::parse(body.as_bytes()).expect("document should parse");
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        metrics::with_local_recorder(&recorder, || emit(&monit));
        snapshotter.snapshot().into_hashmap()
    }

    fn gauge_key(name: &'static str, service: &str, kind: &str, monitor: &str) -> CompositeKey {
        CompositeKey::new(
            MetricKind::Gauge,
            Key::from_parts(
                name,
                vec![
                    Label::new("service_name", service.to_string()),
                    Label::new("service_type", kind.to_string()),
                    Label::new("service_monitor_status", monitor.to_string()),
                ],
            ),
        )
    }

    fn gauge_value(snapshot: &Snapshot, key: &CompositeKey) -> f64 {
        match snapshot.get(key).expect("metric not found").2 {
            DebugValue::Gauge(value) => value.into_inner(),
            _ => panic!("unexpected metric type"),
        }
    }

    fn family_count(snapshot: &Snapshot, name: &str) -> usize {
        snapshot
            .keys()
            .filter(|key| key.key().name() == name)
            .count()
    }

    #[test]
    fn system_service_emits_system_families() {
        let snapshot = emit_into_snapshot(S1_BODY);

        let expected = [
            (SERVICE_CHECK, 0.0),
            (LOADAVG_01, 0.1),
            (LOADAVG_05, 0.2),
            (LOADAVG_15, 0.3),
            (CPU_USER, 1.5),
            (CPU_SYSTEM, 0.5),
            (CPU_WAIT, 0.0),
            (MEMORY_PERCENT, 42.0),
            (MEMORY_KILOBYTES, 100_000.0),
            (SWAP_PERCENT, 0.0),
            (SWAP_KILOBYTES, 0.0),
        ];
        assert_eq!(snapshot.len(), expected.len());
        for (name, value) in expected {
            let key = gauge_key(name, "host1", "System", "1");
            assert_eq!(gauge_value(&snapshot, &key), value, "{name}");
        }

        for name in [
            BLOCK_USAGE,
            BLOCK_TOTAL,
            BLOCK_PERCENT,
            INODE_USAGE,
            INODE_TOTAL,
            INODE_PERCENT,
            PORT_RESPONSE,
        ] {
            assert_eq!(family_count(&snapshot, name), 0, "{name}");
        }
    }

    #[test]
    fn unknown_service_type_still_reports_status() {
        let snapshot = emit_into_snapshot(S2_BODY);

        assert_eq!(family_count(&snapshot, BLOCK_USAGE), 1);
        let usage = gauge_key(BLOCK_USAGE, "rootfs", "Filesystem", "1");
        assert_eq!(gauge_value(&snapshot, &usage), 500.0);
        let total = gauge_key(BLOCK_TOTAL, "rootfs", "Filesystem", "1");
        assert_eq!(gauge_value(&snapshot, &total), 1000.0);
        let percent = gauge_key(BLOCK_PERCENT, "rootfs", "Filesystem", "1");
        assert_eq!(gauge_value(&snapshot, &percent), 50.0);

        let check = gauge_key(SERVICE_CHECK, "mystery", "unknown", "1");
        assert_eq!(gauge_value(&snapshot, &check), 2.0);
        assert_eq!(family_count(&snapshot, SERVICE_CHECK), 2);
        assert_eq!(family_count(&snapshot, INODE_USAGE), 0);
        // rootfs: check + 3 block, mystery: check
        assert_eq!(snapshot.len(), 5);
    }

    #[test]
    fn monitor_value_is_rendered_verbatim() {
        let body = r#"<monit><service type="3"><name>sshd</name><status>0</status><monitor>7</monitor></service></monit>"#;
        let snapshot = emit_into_snapshot(body);

        let key = gauge_key(SERVICE_CHECK, "sshd", "Process", "7");
        assert_eq!(gauge_value(&snapshot, &key), 0.0);
    }

    #[test]
    fn reported_zero_subrecords_are_emitted() {
        let body = r#"<monit><service type="0"><name>data</name><status>0</status><monitor>1</monitor>
<block><percent>0</percent><usage>0</usage><total>0</total></block>
<inode><percent>0</percent><usage>0</usage><total>0</total></inode></service></monit>"#;
        let snapshot = emit_into_snapshot(body);

        assert_eq!(family_count(&snapshot, BLOCK_TOTAL), 1);
        assert_eq!(family_count(&snapshot, INODE_TOTAL), 1);
        let key = gauge_key(INODE_TOTAL, "data", "Filesystem", "1");
        assert_eq!(gauge_value(&snapshot, &key), 0.0);
    }

    #[test]
    fn remote_host_reports_last_port() {
        let body = r#"<monit><service type="4"><name>upstream</name><status>0</status><monitor>1</monitor>
<port><portnumber>80</portnumber><responsetime>0.010</responsetime></port>
<port><portnumber>443</portnumber><responsetime>0.025</responsetime></port></service></monit>"#;
        let snapshot = emit_into_snapshot(body);

        assert_eq!(family_count(&snapshot, PORT_RESPONSE), 1);
        let key = gauge_key(PORT_RESPONSE, "upstream", "Remote host", "1");
        assert_eq!(gauge_value(&snapshot, &key), 0.025);
    }

    #[test]
    fn duplicate_label_sets_keep_last_value() {
        let body = r#"<monit>
<service type="7"><name>job</name><status>1</status><monitor>1</monitor></service>
<service type="7"><name>job</name><status>4</status><monitor>1</monitor></service>
</monit>"#;
        let snapshot = emit_into_snapshot(body);

        assert_eq!(snapshot.len(), 1);
        let key = gauge_key(SERVICE_CHECK, "job", "Program", "1");
        assert_eq!(gauge_value(&snapshot, &key), 4.0);
    }

    #[test]
    fn service_type_table() {
        let names: Vec<String> = (0..=8)
            .map(|code| ServiceType::from(code).to_string())
            .collect();
        assert_eq!(
            names,
            [
                "Filesystem",
                "Directory",
                "File",
                "Process",
                "Remote host",
                "System",
                "Fifo",
                "Program",
                "Network"
            ]
        );
        assert_eq!(ServiceType::from(9), ServiceType::Unknown(9));
        assert_eq!(ServiceType::from(-1).to_string(), "unknown");
    }

    #[test]
    fn describe_lists_every_family_once() {
        let families = Exporter::describe();
        assert_eq!(families.len(), 19);

        let names: HashSet<&str> = families.iter().map(|family| family.name).collect();
        assert_eq!(names.len(), families.len());
        assert!(names.contains(UP));
        assert!(names.contains(SWAP_KILOBYTES));
        assert!(families.iter().all(|family| family.name.starts_with("monit_")));
        assert!(families.iter().all(|family| !family.help.is_empty()));
    }

    #[test]
    fn build_requires_config() {
        assert!(matches!(
            ExporterBuilder::new().build(),
            Err(Error::ConfigMissing)
        ));
        assert!(
            ExporterBuilder::new()
                .config(Config::default())
                .build()
                .is_ok()
        );
    }

    /// Value of the `name` sample carrying exactly `labels`, in any order.
    fn sample(rendered: &str, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
        let mut wanted: Vec<String> = labels
            .iter()
            .map(|(key, value)| format!("{key}=\"{value}\""))
            .collect();
        wanted.sort();

        rendered
            .lines()
            .filter(|line| !line.starts_with('#'))
            .find_map(|line| {
                let (series, value) = line.rsplit_once(' ')?;
                let (series_name, mut found) = match series.split_once('{') {
                    Some((series_name, block)) => (
                        series_name,
                        block
                            .strip_suffix('}')?
                            .split(',')
                            .map(str::to_string)
                            .collect::<Vec<_>>(),
                    ),
                    None => (series, Vec::new()),
                };
                found.sort();
                (series_name == name && found == wanted)
                    .then(|| value.parse().ok())
                    .flatten()
            })
    }

    fn has_series(rendered: &str, name: &str) -> bool {
        rendered
            .lines()
            .any(|line| line.strip_prefix(name).is_some_and(|rest| rest.starts_with('{')))
    }

    fn labeled_samples(rendered: &str) -> usize {
        rendered
            .lines()
            .filter(|line| !line.starts_with('#') && line.contains('{'))
            .count()
    }

    fn exporter_for(addr: SocketAddr) -> Exporter {
        let config = Config {
            upstream_url: format!("http://{addr}/_status?format=xml&level=full"),
            ..Config::default()
        };
        ExporterBuilder::new()
            .config(config)
            .build()
            .expect("exporter should build")
    }

    fn serve_body(body: &'static str) -> SocketAddr {
        let route = warp::path("_status").map(move || body);
        let (addr, serve_fut) = warp::serve(route).bind_ephemeral(([127, 0, 0, 1], 0));
        tokio::spawn(serve_fut);
        addr
    }

    const HOST1: &[(&str, &str)] = &[
        ("service_name", "host1"),
        ("service_type", "System"),
        ("service_monitor_status", "1"),
    ];

    #[tokio::test]
    async fn collect_renders_system_service() {
        let exporter = exporter_for(serve_body(S1_BODY));
        let rendered = exporter.collect().await;

        assert_eq!(sample(&rendered, UP, &[]), Some(1.0));
        assert_eq!(sample(&rendered, SERVICE_CHECK, HOST1), Some(0.0));
        assert_eq!(sample(&rendered, LOADAVG_01, HOST1), Some(0.1));
        assert_eq!(sample(&rendered, CPU_USER, HOST1), Some(1.5));
        assert_eq!(sample(&rendered, MEMORY_PERCENT, HOST1), Some(42.0));
        assert!(rendered.contains("# HELP monit_exporter_up"));
        for name in [BLOCK_USAGE, INODE_USAGE, PORT_RESPONSE] {
            assert!(!has_series(&rendered, name), "{name}");
        }
    }

    #[tokio::test]
    async fn collect_reports_down_on_upstream_error() {
        let route = warp::path("_status").map(|| {
            warp::reply::with_status("busy", warp::http::StatusCode::SERVICE_UNAVAILABLE)
        });
        let (addr, serve_fut) = warp::serve(route).bind_ephemeral(([127, 0, 0, 1], 0));
        tokio::spawn(serve_fut);

        let rendered = exporter_for(addr).collect().await;
        assert_eq!(sample(&rendered, UP, &[]), Some(0.0));
        assert_eq!(labeled_samples(&rendered), 0);
    }

    #[tokio::test]
    async fn collect_reports_down_on_malformed_document() {
        let exporter = exporter_for(serve_body("<monit><service"));
        let rendered = exporter.collect().await;

        assert_eq!(sample(&rendered, UP, &[]), Some(0.0));
        assert_eq!(labeled_samples(&rendered), 0);
    }

    #[tokio::test]
    async fn collect_reports_up_for_empty_inventory() {
        let exporter = exporter_for(serve_body(S5_BODY));
        let rendered = exporter.collect().await;

        assert_eq!(sample(&rendered, UP, &[]), Some(1.0));
        assert_eq!(labeled_samples(&rendered), 0);
    }

    #[tokio::test]
    async fn collect_drops_series_missing_from_later_scrape() {
        let hits = Arc::new(AtomicUsize::new(0));
        let route_hits = Arc::clone(&hits);
        let route = warp::path("_status").map(move || {
            if route_hits.fetch_add(1, Ordering::SeqCst) == 0 {
                S1_BODY
            } else {
                S5_BODY
            }
        });
        let (addr, serve_fut) = warp::serve(route).bind_ephemeral(([127, 0, 0, 1], 0));
        tokio::spawn(serve_fut);

        let exporter = exporter_for(addr);
        let first = exporter.collect().await;
        assert_eq!(sample(&first, LOADAVG_01, HOST1), Some(0.1));

        let second = exporter.collect().await;
        assert_eq!(sample(&second, UP, &[]), Some(1.0));
        assert_eq!(sample(&second, LOADAVG_01, HOST1), None);
        assert_eq!(labeled_samples(&second), 0);
    }

    #[tokio::test]
    async fn collect_is_repeatable_for_unchanged_upstream() {
        let exporter = exporter_for(serve_body(S2_BODY));
        let sorted_lines = |rendered: &str| {
            let mut lines: Vec<String> = rendered
                .lines()
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect();
            lines.sort();
            lines
        };
        let first = exporter.collect().await;
        let second = exporter.collect().await;
        assert_eq!(sorted_lines(&first), sorted_lines(&second));
    }

    #[tokio::test]
    async fn concurrent_collects_are_serialized() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let hits = Arc::new(AtomicUsize::new(0));

        let route = {
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            let hits = Arc::clone(&hits);
            warp::path("_status").and_then(move || {
                let in_flight = Arc::clone(&in_flight);
                let peak = Arc::clone(&peak);
                let hits = Arc::clone(&hits);
                async move {
                    let current = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(current, Ordering::SeqCst);
                    hits.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, warp::Rejection>(S1_BODY)
                }
            })
        };
        let (addr, serve_fut) = warp::serve(route).bind_ephemeral(([127, 0, 0, 1], 0));
        tokio::spawn(serve_fut);

        let exporter = Arc::new(exporter_for(addr));
        let first = tokio::spawn({
            let exporter = Arc::clone(&exporter);
            async move { exporter.collect().await }
        });
        let second = tokio::spawn({
            let exporter = Arc::clone(&exporter);
            async move { exporter.collect().await }
        });
        let first = first.await.expect("scrape task should not panic");
        let second = second.await.expect("scrape task should not panic");

        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(sample(&first, UP, &[]), Some(1.0));
        assert_eq!(sample(&second, UP, &[]), Some(1.0));
    }
}
