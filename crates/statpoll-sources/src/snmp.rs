//! SNMP IF-MIB interface statistics.
//!
//! One fetch walks `ifIndex`, keeps interfaces whose `ifType` is in the
//! configured filter and reads the error/discard gauges and the 64-bit
//! traffic counters for each. The snapshot is shaped
//! `{interface_name: {stat_name: value}}`.

use serde_json::{Map, Value};
use statpoll_collector::catalog::{
    CatalogError, StatDefinition, Unit, ValueKind, VersionedCatalog, COUNTER64_MODULUS,
};
use statpoll_collector::snapshot::{PathSegment, Snapshot};
use statpoll_collector::source::{FetchFailure, SourceAdapter};
use statpoll_common::path::sanitize_component;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub const DEFAULT_PORT: u16 = 161;
pub const DEFAULT_COMMUNITY: &str = "public";
/// `ethernetCsmacd`.
pub const DEFAULT_IF_TYPES: &[i64] = &[6];

pub const IF_INDEX_OID: &[u32] = &[1, 3, 6, 1, 2, 1, 2, 2, 1, 1];
pub const IF_TYPE_OID: &[u32] = &[1, 3, 6, 1, 2, 1, 2, 2, 1, 3];
pub const IF_NAME_OID: &[u32] = &[1, 3, 6, 1, 2, 1, 31, 1, 1, 1, 1];

/// 32-bit error and discard columns, reported as gauges.
pub const GAUGE_OIDS: &[(&str, &[u32])] = &[
    ("ifInDiscards", &[1, 3, 6, 1, 2, 1, 2, 2, 1, 13]),
    ("ifInErrors", &[1, 3, 6, 1, 2, 1, 2, 2, 1, 14]),
    ("ifOutDiscards", &[1, 3, 6, 1, 2, 1, 2, 2, 1, 19]),
    ("ifOutErrors", &[1, 3, 6, 1, 2, 1, 2, 2, 1, 20]),
];

/// 64-bit high-capacity counters from `ifXTable`.
pub const COUNTER_OIDS: &[(&str, &[u32])] = &[
    ("ifInOctets", &[1, 3, 6, 1, 2, 1, 31, 1, 1, 1, 6]),
    ("ifInUcastPkts", &[1, 3, 6, 1, 2, 1, 31, 1, 1, 1, 7]),
    ("ifInMulticastPkts", &[1, 3, 6, 1, 2, 1, 31, 1, 1, 1, 8]),
    ("ifInBroadcastPkts", &[1, 3, 6, 1, 2, 1, 31, 1, 1, 1, 9]),
    ("ifOutOctets", &[1, 3, 6, 1, 2, 1, 31, 1, 1, 1, 10]),
    ("ifOutUcastPkts", &[1, 3, 6, 1, 2, 1, 31, 1, 1, 1, 11]),
    ("ifOutMulticastPkts", &[1, 3, 6, 1, 2, 1, 31, 1, 1, 1, 12]),
    ("ifOutBroadcastPkts", &[1, 3, 6, 1, 2, 1, 31, 1, 1, 1, 13]),
];

const OCTET_VIEWS: &[(Unit, &str)] = &[(Unit::Megabits, "Mbit"), (Unit::Megabytes, "Mbyte")];

/// Upper bound on rows read by one walk.
const MAX_WALK_ROWS: usize = 4096;

/// Owned form of an SNMP varbind value.
#[derive(Debug, Clone, PartialEq)]
pub enum SnmpValue {
    Integer(i64),
    Unsigned(u64),
    Text(String),
    /// `Null`, an exception varbind or an error status.
    Missing,
    Other,
}

impl SnmpValue {
    fn as_i64(&self) -> Option<i64> {
        match self {
            SnmpValue::Integer(v) => Some(*v),
            SnmpValue::Unsigned(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    fn into_json(self) -> Option<Value> {
        match self {
            SnmpValue::Integer(v) => Some(Value::from(v)),
            SnmpValue::Unsigned(v) => Some(Value::from(v)),
            SnmpValue::Text(s) => Some(Value::from(s)),
            SnmpValue::Missing | SnmpValue::Other => None,
        }
    }
}

/// One open SNMP session. Dropped at the end of each fetch.
pub trait SnmpTransport {
    fn get(&mut self, oid: &[u32]) -> Result<SnmpValue, FetchFailure>;

    /// The first `(oid, value)` after `oid` in agent order, or `None` at the
    /// end of the MIB view.
    fn get_next(&mut self, oid: &[u32]) -> Result<Option<(Vec<u32>, SnmpValue)>, FetchFailure>;
}

/// Opens sessions for the adapter.
pub trait SnmpConnector: Send + Sync {
    fn connect(&self) -> Result<Box<dyn SnmpTransport>, FetchFailure>;
}

/// SNMPv2c over UDP.
pub struct UdpConnector {
    address: String,
    community: Vec<u8>,
    timeout: Duration,
}

impl UdpConnector {
    pub fn new(host: &str, port: u16, community: &str, timeout: Duration) -> Self {
        Self {
            address: format!("{host}:{port}"),
            community: community.as_bytes().to_vec(),
            timeout,
        }
    }
}

impl SnmpConnector for UdpConnector {
    fn connect(&self) -> Result<Box<dyn SnmpTransport>, FetchFailure> {
        let session = snmp::SyncSession::new(
            self.address.as_str(),
            &self.community,
            Some(self.timeout),
            0,
        )
        .map_err(|e| FetchFailure::Transport(format!("{}: {e}", self.address)))?;
        Ok(Box::new(UdpTransport { session }))
    }
}

struct UdpTransport {
    session: snmp::SyncSession,
}

fn snmp_error(err: snmp::SnmpError) -> FetchFailure {
    FetchFailure::Snmp(format!("{err:?}"))
}

fn convert(value: snmp::Value<'_>) -> SnmpValue {
    use snmp::Value as V;
    match value {
        V::Integer(v) => SnmpValue::Integer(v),
        V::Counter32(v) | V::Unsigned32(v) | V::Timeticks(v) => SnmpValue::Unsigned(u64::from(v)),
        V::Counter64(v) => SnmpValue::Unsigned(v),
        V::OctetString(bytes) => SnmpValue::Text(String::from_utf8_lossy(bytes).into_owned()),
        V::Null => SnmpValue::Missing,
        _ => SnmpValue::Other,
    }
}

impl SnmpTransport for UdpTransport {
    fn get(&mut self, oid: &[u32]) -> Result<SnmpValue, FetchFailure> {
        let mut pdu = self.session.get(oid).map_err(snmp_error)?;
        if pdu.error_status != 0 {
            return Ok(SnmpValue::Missing);
        }
        Ok(pdu
            .varbinds
            .next()
            .map(|(_, value)| convert(value))
            .unwrap_or(SnmpValue::Missing))
    }

    fn get_next(&mut self, oid: &[u32]) -> Result<Option<(Vec<u32>, SnmpValue)>, FetchFailure> {
        let mut pdu = self.session.getnext(oid).map_err(snmp_error)?;
        if pdu.error_status != 0 {
            return Ok(None);
        }
        let Some((name, value)) = pdu.varbinds.next() else {
            return Ok(None);
        };
        let mut buf = [0u32; 128];
        let name = name.read_name(&mut buf).map_err(snmp_error)?;
        Ok(Some((name.to_vec(), convert(value))))
    }
}

/// Set once the fetch that owns a session has been abandoned. The blocking
/// reader checks it before every request and stops early.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn check(&self, started: Instant) -> Result<(), FetchFailure> {
        if self.is_cancelled() {
            return Err(FetchFailure::Timeout(started.elapsed()));
        }
        Ok(())
    }
}

/// Cancels the blocking reader when the fetch future is dropped, including
/// when the cycle deadline expires.
struct CancelOnDrop(CancelFlag);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

/// Interface table adapter for one device.
pub struct SnmpInterfaceAdapter {
    name: String,
    connector: Arc<dyn SnmpConnector>,
    if_types: Vec<i64>,
    /// Held by the blocking reader while its session is open, so a reader
    /// left over from an abandoned fetch never overlaps the next one.
    session_lock: Arc<Mutex<()>>,
}

impl SnmpInterfaceAdapter {
    pub fn new(device: &str, connector: Arc<dyn SnmpConnector>, if_types: Vec<i64>) -> Self {
        Self {
            name: format!("snmp_interface:{device}"),
            connector,
            if_types,
            session_lock: Arc::new(Mutex::new(())),
        }
    }
}

#[async_trait::async_trait]
impl SourceAdapter for SnmpInterfaceAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> Result<Snapshot, FetchFailure> {
        let connector = Arc::clone(&self.connector);
        let if_types = self.if_types.clone();
        let session_lock = Arc::clone(&self.session_lock);
        let cancel = CancelFlag::new();
        let _guard = CancelOnDrop(cancel.clone());

        tokio::task::spawn_blocking(move || {
            let _session = session_lock.lock().unwrap_or_else(|p| p.into_inner());
            if cancel.is_cancelled() {
                return Err(FetchFailure::Timeout(Duration::ZERO));
            }
            let mut transport = connector.connect()?;
            read_interfaces(transport.as_mut(), &if_types, &cancel)
        })
        .await
        .map_err(|e| FetchFailure::Transport(format!("SNMP worker failed: {e}")))?
    }
}

fn with_index(base: &[u32], index: u32) -> Vec<u32> {
    let mut oid = base.to_vec();
    oid.push(index);
    oid
}

/// Interface description as a path component: quotes removed, everything
/// else outside `[A-Za-z0-9_]` replaced by `_`.
pub fn interface_name(raw: &str) -> String {
    let unquoted: String = raw.chars().filter(|c| *c != '"' && *c != '\'').collect();
    sanitize_component(&unquoted)
}

/// All `(oid, value)` rows under `oid`, in agent order.
fn walk(
    transport: &mut dyn SnmpTransport,
    oid: &[u32],
    cancel: &CancelFlag,
    started: Instant,
) -> Result<Vec<(Vec<u32>, SnmpValue)>, FetchFailure> {
    let mut rows = Vec::new();
    let mut cursor = oid.to_vec();

    for _ in 0..MAX_WALK_ROWS {
        cancel.check(started)?;
        let Some((name, value)) = transport.get_next(&cursor)? else {
            break;
        };
        if !name.starts_with(oid) || name <= cursor || value == SnmpValue::Missing {
            break;
        }
        cursor = name;
        rows.push((cursor.clone(), value));
    }

    Ok(rows)
}

fn checked_get(
    transport: &mut dyn SnmpTransport,
    oid: &[u32],
    cancel: &CancelFlag,
    started: Instant,
) -> Result<SnmpValue, FetchFailure> {
    cancel.check(started)?;
    transport.get(oid)
}

/// Reads the interface table into a snapshot.
///
/// Missing columns are left out of the snapshot; any transport error aborts
/// the whole fetch, and so does `cancel`.
pub fn read_interfaces(
    transport: &mut dyn SnmpTransport,
    if_types: &[i64],
    cancel: &CancelFlag,
) -> Result<Snapshot, FetchFailure> {
    let started = Instant::now();
    let mut interfaces = Map::new();

    for (_, index) in walk(transport, IF_INDEX_OID, cancel, started)? {
        let Some(index) = index.as_i64().and_then(|i| u32::try_from(i).ok()) else {
            continue;
        };

        let if_type = checked_get(transport, &with_index(IF_TYPE_OID, index), cancel, started)?;
        if !if_type.as_i64().is_some_and(|t| if_types.contains(&t)) {
            continue;
        }

        let name = match checked_get(transport, &with_index(IF_NAME_OID, index), cancel, started)? {
            SnmpValue::Text(raw) if !raw.is_empty() => interface_name(&raw),
            _ => index.to_string(),
        };

        let mut stats = Map::new();
        for (stat, base) in GAUGE_OIDS.iter().chain(COUNTER_OIDS) {
            if let Some(value) =
                checked_get(transport, &with_index(base, index), cancel, started)?.into_json()
            {
                stats.insert(stat.to_string(), value);
            }
        }

        if interfaces.insert(name.clone(), Value::Object(stats)).is_some() {
            tracing::debug!(interface = %name, index, "duplicate interface name, keeping last");
        }
    }

    Ok(Snapshot::new(Value::Object(interfaces)))
}

/// Gauges per interface, each octet counter as megabit and megabyte views,
/// and the packet counters as plain deltas.
pub fn catalog() -> Result<VersionedCatalog, CatalogError> {
    let column = |stat: &str| [PathSegment::Any, PathSegment::from(stat)];

    let mut stats = Vec::new();
    for (stat, _) in GAUGE_OIDS {
        stats.push(StatDefinition::new(*stat, ValueKind::Gauge, column(*stat)));
    }
    for (stat, _) in COUNTER_OIDS {
        if stat.ends_with("Octets") {
            for (unit, suffix) in OCTET_VIEWS {
                stats.push(
                    StatDefinition::new(stat.replace("Octets", suffix), ValueKind::Counter, column(*stat))
                        .with_unit(*unit)
                        .wrapping_at(COUNTER64_MODULUS),
                );
            }
        } else {
            stats.push(
                StatDefinition::new(*stat, ValueKind::Counter, column(*stat))
                    .wrapping_at(COUNTER64_MODULUS),
            );
        }
    }
    VersionedCatalog::fixed(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::AtomicUsize;

    type Table = Vec<(u32, i64, &'static str, u64)>;

    /// In-memory agent keyed by full OID.
    #[derive(Default)]
    struct FakeAgent {
        table: HashMap<Vec<u32>, SnmpValue>,
        fail_on: Option<Vec<u32>>,
    }

    impl FakeAgent {
        fn set(&mut self, base: &[u32], index: u32, value: SnmpValue) {
            self.table.insert(with_index(base, index), value);
        }

        fn interface(&mut self, index: u32, if_type: i64, name: &str, octets_in: u64) {
            self.set(IF_INDEX_OID, index, SnmpValue::Integer(i64::from(index)));
            self.set(IF_TYPE_OID, index, SnmpValue::Integer(if_type));
            self.set(IF_NAME_OID, index, SnmpValue::Text(name.to_string()));
            self.set(GAUGE_OIDS[1].1, index, SnmpValue::Unsigned(0));
            self.set(COUNTER_OIDS[0].1, index, SnmpValue::Unsigned(octets_in));
        }
    }

    impl SnmpTransport for FakeAgent {
        fn get(&mut self, oid: &[u32]) -> Result<SnmpValue, FetchFailure> {
            if self.fail_on.as_deref() == Some(oid) {
                return Err(FetchFailure::Snmp("Timeout".to_string()));
            }
            Ok(self.table.get(oid).cloned().unwrap_or(SnmpValue::Missing))
        }

        fn get_next(
            &mut self,
            oid: &[u32],
        ) -> Result<Option<(Vec<u32>, SnmpValue)>, FetchFailure> {
            Ok(self
                .table
                .iter()
                .filter(|(k, _)| k.as_slice() > oid)
                .min_by(|a, b| a.0.cmp(b.0))
                .map(|(k, v)| (k.clone(), v.clone())))
        }
    }

    #[test]
    fn keeps_only_matching_interface_types() {
        let mut agent = FakeAgent::default();
        agent.interface(1, 24, "lo", 5);
        agent.interface(2, 6, "eth0", 1_000);

        let snapshot = read_interfaces(&mut agent, DEFAULT_IF_TYPES, &CancelFlag::new()).unwrap();
        let value = snapshot.as_value();
        assert!(value.get("lo").is_none());
        assert_eq!(value["eth0"]["ifInOctets"], 1_000);
        assert_eq!(value["eth0"]["ifInErrors"], 0);
        assert!(value["eth0"].get("ifOutOctets").is_none());
    }

    #[test]
    fn interface_names_are_sanitized() {
        let mut agent = FakeAgent::default();
        agent.interface(7, 6, "\"GigabitEthernet0/1\"", 1);
        let snapshot = read_interfaces(&mut agent, &[6], &CancelFlag::new()).unwrap();
        assert!(snapshot.as_value().get("GigabitEthernet0_1").is_some());
    }

    #[test]
    fn unnamed_interface_falls_back_to_index() {
        let mut agent = FakeAgent::default();
        agent.interface(3, 6, "", 1);
        let snapshot = read_interfaces(&mut agent, &[6], &CancelFlag::new()).unwrap();
        assert!(snapshot.as_value().get("3").is_some());
    }

    #[test]
    fn transport_error_aborts_fetch() {
        let mut agent = FakeAgent::default();
        agent.interface(2, 6, "eth0", 1);
        agent.fail_on = Some(with_index(IF_NAME_OID, 2));
        assert!(matches!(
            read_interfaces(&mut agent, &[6], &CancelFlag::new()),
            Err(FetchFailure::Snmp(_))
        ));
    }

    #[test]
    fn cancelled_read_stops_before_the_next_request() {
        let mut agent = FakeAgent::default();
        agent.interface(1, 6, "eth0", 1);
        let cancel = CancelFlag::new();
        cancel.cancel();
        assert!(matches!(
            read_interfaces(&mut agent, &[6], &cancel),
            Err(FetchFailure::Timeout(_))
        ));
    }

    #[test]
    fn catalog_has_two_views_per_octet_counter() {
        let resolved = catalog().unwrap().resolve(None);
        for name in ["ifInMbit", "ifInMbyte", "ifOutMbit", "ifOutMbyte"] {
            let def = resolved.get(name).expect(name);
            assert_eq!(def.kind, ValueKind::Counter);
            assert_eq!(def.wrap, Some(COUNTER64_MODULUS));
            assert!(def.unit.is_some());
        }
        assert!(resolved.get("ifInOctets").is_none());
        assert_eq!(resolved.get("ifInErrors").unwrap().kind, ValueKind::Gauge);
        assert_eq!(resolved.len(), GAUGE_OIDS.len() + COUNTER_OIDS.len() + 2);
    }

    struct FakeConnector(Table);

    impl SnmpConnector for FakeConnector {
        fn connect(&self) -> Result<Box<dyn SnmpTransport>, FetchFailure> {
            let mut agent = FakeAgent::default();
            for (index, if_type, name, octets) in &self.0 {
                agent.interface(*index, *if_type, name, *octets);
            }
            Ok(Box::new(agent))
        }
    }

    #[tokio::test]
    async fn adapter_runs_on_blocking_pool() {
        let adapter = SnmpInterfaceAdapter::new(
            "sw1",
            Arc::new(FakeConnector(vec![(1, 6, "eth0", 42)])),
            vec![6],
        );
        assert_eq!(adapter.name(), "snmp_interface:sw1");
        let snapshot = adapter.fetch().await.unwrap();
        assert_eq!(snapshot.as_value()["eth0"]["ifInOctets"], 42);
    }

    /// Hands out one prepared interface table per session.
    struct ScriptedConnector(Mutex<VecDeque<Table>>);

    impl SnmpConnector for ScriptedConnector {
        fn connect(&self) -> Result<Box<dyn SnmpTransport>, FetchFailure> {
            let rows = self
                .0
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| FetchFailure::Transport("no more sessions".into()))?;
            FakeConnector(rows).connect()
        }
    }

    #[tokio::test]
    async fn shipped_catalog_derives_octet_views_across_wrap() {
        use statpoll_collector::cycle::PollingCollector;
        use statpoll_collector::Collector;
        use statpoll_common::path::MetricPath;
        use statpoll_common::types::MemorySink;

        let mebibyte = 1_048_576u64;
        let connector = ScriptedConnector(Mutex::new(
            [
                vec![(1, 6, "eth0", u64::MAX - (mebibyte - 1))],
                vec![(1, 6, "eth0", mebibyte)],
            ]
            .into(),
        ));
        let adapter = SnmpInterfaceAdapter::new("sw1", Arc::new(connector), vec![6]);
        let mut collector = PollingCollector::new(
            "snmp_interface:sw1",
            Box::new(adapter),
            Arc::new(catalog().unwrap()),
            MetricPath::new("devices", "sw1", "interface"),
        );
        let sink = MemorySink::new();

        let first = collector.collect(&sink).await;
        assert!(!first.fetch_failed);
        sink.take();

        let second = collector.collect(&sink).await;
        assert!(!second.fetch_failed);
        let samples: HashMap<String, f64> =
            sink.take().into_iter().map(|s| (s.path, s.value)).collect();

        assert_eq!(samples["devices.sw1.interface.eth0.ifInMbyte"], 2.0);
        assert_eq!(samples["devices.sw1.interface.eth0.ifInMbit"], 16.0);
        assert_eq!(samples["devices.sw1.interface.eth0.ifInErrors"], 0.0);
        assert!(!samples.contains_key("devices.sw1.interface.eth0.ifInOctets"));
        assert!(!samples.contains_key("devices.sw1.interface.eth0.ifOutMbit"));
    }

    #[derive(Default)]
    struct SessionStats {
        live: AtomicUsize,
        max_live: AtomicUsize,
        requests: AtomicUsize,
    }

    /// Agent that answers every request after a delay.
    struct SlowAgent {
        inner: FakeAgent,
        stats: Arc<SessionStats>,
    }

    impl SnmpTransport for SlowAgent {
        fn get(&mut self, oid: &[u32]) -> Result<SnmpValue, FetchFailure> {
            self.stats.requests.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(100));
            self.inner.get(oid)
        }

        fn get_next(
            &mut self,
            oid: &[u32],
        ) -> Result<Option<(Vec<u32>, SnmpValue)>, FetchFailure> {
            self.stats.requests.fetch_add(1, Ordering::SeqCst);
            self.inner.get_next(oid)
        }
    }

    impl Drop for SlowAgent {
        fn drop(&mut self) {
            self.stats.live.fetch_sub(1, Ordering::SeqCst);
        }
    }

    struct SlowConnector(Arc<SessionStats>);

    impl SnmpConnector for SlowConnector {
        fn connect(&self) -> Result<Box<dyn SnmpTransport>, FetchFailure> {
            let live = self.0.live.fetch_add(1, Ordering::SeqCst) + 1;
            self.0.max_live.fetch_max(live, Ordering::SeqCst);
            let mut inner = FakeAgent::default();
            for index in 1..=20 {
                inner.interface(index, 6, &format!("eth{index}"), 1);
            }
            Ok(Box::new(SlowAgent {
                inner,
                stats: Arc::clone(&self.0),
            }))
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn timed_out_fetch_releases_its_session() {
        use statpoll_collector::cycle::PollingCollector;
        use statpoll_collector::Collector;
        use statpoll_common::path::MetricPath;
        use statpoll_common::types::MemorySink;

        let stats = Arc::new(SessionStats::default());
        let adapter =
            SnmpInterfaceAdapter::new("slow", Arc::new(SlowConnector(Arc::clone(&stats))), vec![6]);
        let mut collector = PollingCollector::new(
            "snmp_interface:slow",
            Box::new(adapter),
            Arc::new(catalog().unwrap()),
            MetricPath::new("devices", "slow", "interface"),
        )
        .with_fetch_timeout(Duration::from_millis(300));
        let sink = MemorySink::new();

        for _ in 0..3 {
            assert!(collector.collect(&sink).await.fetch_failed);
        }

        for _ in 0..50 {
            if stats.live.load(Ordering::SeqCst) == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(stats.live.load(Ordering::SeqCst), 0);
        assert_eq!(stats.max_live.load(Ordering::SeqCst), 1);

        let settled = stats.requests.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(stats.requests.load(Ordering::SeqCst), settled);
        assert!(sink.take().is_empty());
    }
}
