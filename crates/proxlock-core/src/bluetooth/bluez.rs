//! BlueZ radio backend (Linux, via `bluer`).
//!
//! Every request is served on its own task so the request loop never waits
//! on D-Bus. Long-lived work (discovery, the per-peer connection watcher and
//! notification streams) is tracked so a stop or disconnect can abort it.
//!
//! BlueZ only refreshes a device's RSSI from advertisements seen during
//! discovery. Once a peer is subscribed, a per-peer signal monitor keeps a
//! duplicate-data discovery session open and records each RSSI change with
//! its arrival time. `ReadRssi` answers from that record and reports
//! `RssiUnavailable` when it is older than [`RSSI_MAX_AGE`], so a badge that
//! stops advertising is never reported at its last cached strength.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use bluer::gatt::remote::{Characteristic, Service};
use bluer::{
    Adapter, AdapterEvent, AdapterProperty, Address, Device, DeviceEvent, DeviceProperty,
    DiscoveryFilter, DiscoveryTransport, Session,
};
use futures::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{LinkError, LinkResult, RadioEvent, RadioRequest};
use crate::types::PeerId;

const SERVICES_RESOLVE_POLL: Duration = Duration::from_millis(100);
const SERVICES_RESOLVE_ATTEMPTS: u32 = 50;

/// Oldest RSSI reading `ReadRssi` will report.
pub const RSSI_MAX_AGE: Duration = Duration::from_secs(3);

/// An RSSI value and when BlueZ reported it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SignalReading {
    rssi: i16,
    at: Instant,
}

/// Answer a `ReadRssi` from the latest monitored reading.
fn fresh_rssi(reading: Option<SignalReading>, now: Instant) -> LinkResult<i16> {
    match reading {
        Some(reading) if now.saturating_duration_since(reading.at) <= RSSI_MAX_AGE => {
            Ok(reading.rssi)
        }
        _ => Err(LinkError::RssiUnavailable),
    }
}

impl From<bluer::Error> for LinkError {
    fn from(err: bluer::Error) -> Self {
        Self::Operation {
            message: err.to_string(),
        }
    }
}

/// Open a BlueZ session and serve `requests` on the default adapter.
///
/// # Errors
///
/// Returns an error if the Bluetooth daemon cannot be reached or there is
/// no adapter.
pub async fn spawn(
    requests: mpsc::UnboundedReceiver<RadioRequest>,
    events: mpsc::UnboundedSender<RadioEvent>,
) -> LinkResult<JoinHandle<()>> {
    let session = Session::new()
        .await
        .map_err(|e| LinkError::SessionInitFailed {
            message: e.to_string(),
        })?;
    let adapter = session.default_adapter().await.map_err(|e| {
        warn!(error = %e, "No default Bluetooth adapter");
        LinkError::AdapterNotFound
    })?;
    let powered = adapter.is_powered().await?;
    info!(adapter = adapter.name(), powered, "Using Bluetooth adapter");

    let backend = Backend {
        _session: session,
        adapter,
        events,
        scan: None,
        peer_tasks: HashMap::new(),
        signal: HashMap::new(),
    };
    Ok(tokio::spawn(backend.run(requests, powered)))
}

fn parse_address(peer: &PeerId) -> LinkResult<Address> {
    peer.as_str()
        .parse::<Address>()
        .map_err(|_| LinkError::InvalidAddress {
            address: peer.to_string(),
        })
}

struct Backend {
    _session: Session,
    adapter: Adapter,
    events: mpsc::UnboundedSender<RadioEvent>,
    scan: Option<JoinHandle<()>>,
    peer_tasks: HashMap<PeerId, Vec<JoinHandle<()>>>,
    signal: HashMap<PeerId, watch::Receiver<Option<SignalReading>>>,
}

impl Backend {
    async fn run(mut self, mut requests: mpsc::UnboundedReceiver<RadioRequest>, powered: bool) {
        emit(&self.events, RadioEvent::PowerChanged(powered));

        let adapter_events = match self.adapter.events().await {
            Ok(stream) => stream,
            Err(e) => {
                error!(error = %e, "Failed to watch adapter, radio backend stopping");
                return;
            }
        };
        let mut adapter_events = Box::pin(adapter_events);

        loop {
            tokio::select! {
                request = requests.recv() => match request {
                    Some(request) => self.on_request(request),
                    None => break,
                },
                Some(event) = adapter_events.next() => {
                    if let AdapterEvent::PropertyChanged(AdapterProperty::Powered(on)) = event {
                        info!(powered = on, "Adapter power changed");
                        if !on {
                            self.abort_all();
                        }
                        emit(&self.events, RadioEvent::PowerChanged(on));
                    }
                }
            }
        }
        self.abort_all();
        debug!("BlueZ backend stopped");
    }

    fn on_request(&mut self, request: RadioRequest) {
        debug!(?request, "Radio request");
        match request {
            RadioRequest::StartScan { service } => {
                self.stop_scan();
                let adapter = self.adapter.clone();
                let events = self.events.clone();
                self.scan = Some(tokio::spawn(async move {
                    if let Err(e) = scan(&adapter, service, &events).await {
                        warn!(error = %e, "Discovery failed");
                    }
                }));
            }
            RadioRequest::StopScan => self.stop_scan(),
            RadioRequest::Connect { peer } => {
                let device = match self.device(&peer) {
                    Ok(device) => device,
                    Err(error) => {
                        emit(&self.events, RadioEvent::ConnectFailed { peer, error });
                        return;
                    }
                };
                let events = self.events.clone();
                let task = tokio::spawn(connect_and_watch(device, peer.clone(), events));
                self.peer_tasks.entry(peer).or_default().push(task);
            }
            RadioRequest::Disconnect { peer } => {
                self.abort_peer(&peer);
                let Ok(device) = self.device(&peer) else {
                    return;
                };
                let events = self.events.clone();
                tokio::spawn(async move {
                    if let Err(e) = device.disconnect().await {
                        debug!(%peer, error = %e, "Disconnect failed");
                    }
                    emit(&events, RadioEvent::Disconnected { peer });
                });
            }
            RadioRequest::DiscoverServices { peer, .. } => {
                let device = self.device(&peer);
                let events = self.events.clone();
                tokio::spawn(async move {
                    let result = match device {
                        Ok(device) => service_uuids(&device).await,
                        Err(e) => Err(e),
                    };
                    emit(&events, RadioEvent::ServicesDiscovered { peer, result });
                });
            }
            RadioRequest::DiscoverCharacteristics { peer, service } => {
                let device = self.device(&peer);
                let events = self.events.clone();
                tokio::spawn(async move {
                    let result = match device {
                        Ok(device) => characteristic_uuids(&device, service).await,
                        Err(e) => Err(e),
                    };
                    emit(
                        &events,
                        RadioEvent::CharacteristicsDiscovered {
                            peer,
                            service,
                            result,
                        },
                    );
                });
            }
            RadioRequest::Subscribe {
                peer,
                service,
                characteristic,
            } => {
                let device = self.device(&peer);
                if let Ok(device) = &device {
                    self.monitor_signal(&peer, device.clone(), service);
                }
                let events = self.events.clone();
                let task = tokio::spawn(subscribe(
                    device,
                    peer.clone(),
                    service,
                    characteristic,
                    events,
                ));
                self.peer_tasks.entry(peer).or_default().push(task);
            }
            RadioRequest::ReadRssi { peer } => {
                let reading = self
                    .signal
                    .get(&peer)
                    .and_then(|readings| *readings.borrow());
                let result = fresh_rssi(reading, Instant::now());
                emit(&self.events, RadioEvent::RssiRead { peer, result });
            }
        }
    }

    fn device(&self, peer: &PeerId) -> LinkResult<Device> {
        let address = parse_address(peer)?;
        Ok(self.adapter.device(address)?)
    }

    /// Start the signal monitor for `peer`, replacing any earlier one's record.
    fn monitor_signal(&mut self, peer: &PeerId, device: Device, service: Uuid) {
        let (readings_tx, readings_rx) = watch::channel(None);
        self.signal.insert(peer.clone(), readings_rx);
        let adapter = self.adapter.clone();
        let peer_id = peer.clone();
        let task = tokio::spawn(async move {
            if let Err(e) = track_signal(&adapter, &device, service, &readings_tx).await {
                warn!(peer = %peer_id, error = %e, "Signal monitor failed, RSSI unavailable");
            }
        });
        self.peer_tasks.entry(peer.clone()).or_default().push(task);
    }

    fn stop_scan(&mut self) {
        if let Some(scan) = self.scan.take() {
            debug!("Stopping discovery");
            scan.abort();
        }
    }

    fn abort_peer(&mut self, peer: &PeerId) {
        self.signal.remove(peer);
        if let Some(tasks) = self.peer_tasks.remove(peer) {
            for task in tasks {
                task.abort();
            }
        }
    }

    fn abort_all(&mut self) {
        self.stop_scan();
        self.signal.clear();
        for (_, tasks) in self.peer_tasks.drain() {
            for task in tasks {
                task.abort();
            }
        }
    }
}

/// Run LE discovery filtered to `service` until aborted.
async fn scan(
    adapter: &Adapter,
    service: Uuid,
    events: &mpsc::UnboundedSender<RadioEvent>,
) -> bluer::Result<()> {
    let filter = DiscoveryFilter {
        uuids: HashSet::from([service]),
        transport: DiscoveryTransport::Le,
        ..Default::default()
    };
    adapter.set_discovery_filter(filter).await?;

    info!(%service, "Discovering badges");
    let mut discovered = Box::pin(adapter.discover_devices().await?);
    while let Some(event) = discovered.next().await {
        let AdapterEvent::DeviceAdded(address) = event else {
            continue;
        };
        let device = adapter.device(address)?;
        let advertises = device
            .uuids()
            .await?
            .is_some_and(|uuids| uuids.contains(&service));
        if !advertises {
            continue;
        }
        let rssi = device.rssi().await.ok().flatten();
        emit(
            events,
            RadioEvent::Discovered {
                peer: PeerId::new(address.to_string()),
                rssi,
            },
        );
    }
    Ok(())
}

/// Keep duplicate-data LE discovery open and record every RSSI change of
/// `device` until aborted.
async fn track_signal(
    adapter: &Adapter,
    device: &Device,
    service: Uuid,
    readings: &watch::Sender<Option<SignalReading>>,
) -> bluer::Result<()> {
    let filter = DiscoveryFilter {
        uuids: HashSet::from([service]),
        transport: DiscoveryTransport::Le,
        duplicate_data: true,
        ..Default::default()
    };
    adapter.set_discovery_filter(filter).await?;

    let mut discovery = Box::pin(adapter.discover_devices().await?);
    let mut changes = Box::pin(device.events().await?);
    if let Some(rssi) = device.rssi().await? {
        readings.send_replace(Some(SignalReading {
            rssi,
            at: Instant::now(),
        }));
    }
    debug!(address = %device.address(), "Monitoring signal");

    loop {
        tokio::select! {
            event = discovery.next() => {
                if event.is_none() {
                    break;
                }
            }
            change = changes.next() => match change {
                Some(DeviceEvent::PropertyChanged(DeviceProperty::Rssi(rssi))) => {
                    readings.send_replace(Some(SignalReading {
                        rssi,
                        at: Instant::now(),
                    }));
                }
                Some(_) => {}
                None => break,
            },
        }
    }
    Ok(())
}

/// Connect, then report connection loss and service invalidation.
async fn connect_and_watch(
    device: Device,
    peer: PeerId,
    events: mpsc::UnboundedSender<RadioEvent>,
) {
    if let Err(e) = device.connect().await {
        emit(
            &events,
            RadioEvent::ConnectFailed {
                peer,
                error: e.into(),
            },
        );
        return;
    }
    emit(&events, RadioEvent::Connected { peer: peer.clone() });

    let device_events = match device.events().await {
        Ok(stream) => stream,
        Err(e) => {
            warn!(%peer, error = %e, "Cannot watch device, treating as disconnected");
            emit(&events, RadioEvent::Disconnected { peer });
            return;
        }
    };
    let mut device_events = Box::pin(device_events);
    while let Some(DeviceEvent::PropertyChanged(property)) = device_events.next().await {
        match property {
            DeviceProperty::Connected(false) => {
                emit(&events, RadioEvent::Disconnected { peer });
                return;
            }
            DeviceProperty::ServicesResolved(false) => {
                emit(
                    &events,
                    RadioEvent::ServicesInvalidated { peer: peer.clone() },
                );
            }
            _ => {}
        }
    }
    emit(&events, RadioEvent::Disconnected { peer });
}

async fn wait_for_services(device: &Device) -> LinkResult<()> {
    for _ in 0..SERVICES_RESOLVE_ATTEMPTS {
        if device.is_services_resolved().await? {
            return Ok(());
        }
        tokio::time::sleep(SERVICES_RESOLVE_POLL).await;
    }
    Err(LinkError::Operation {
        message: "services were not resolved in time".to_string(),
    })
}

async fn service_uuids(device: &Device) -> LinkResult<Vec<Uuid>> {
    wait_for_services(device).await?;
    let mut uuids = Vec::new();
    for service in device.services().await? {
        uuids.push(service.uuid().await?);
    }
    Ok(uuids)
}

async fn find_service(device: &Device, uuid: Uuid) -> LinkResult<Service> {
    for service in device.services().await? {
        if service.uuid().await? == uuid {
            return Ok(service);
        }
    }
    Err(LinkError::ServiceNotFound { uuid })
}

async fn find_characteristic(service: &Service, uuid: Uuid) -> LinkResult<Characteristic> {
    for characteristic in service.characteristics().await? {
        if characteristic.uuid().await? == uuid {
            return Ok(characteristic);
        }
    }
    Err(LinkError::CharacteristicNotFound { uuid })
}

async fn characteristic_uuids(device: &Device, service: Uuid) -> LinkResult<Vec<Uuid>> {
    let service = find_service(device, service).await?;
    let mut uuids = Vec::new();
    for characteristic in service.characteristics().await? {
        uuids.push(characteristic.uuid().await?);
    }
    Ok(uuids)
}

/// Subscribe and forward notifications until the stream ends or is aborted.
async fn subscribe(
    device: LinkResult<Device>,
    peer: PeerId,
    service: Uuid,
    characteristic: Uuid,
    events: mpsc::UnboundedSender<RadioEvent>,
) {
    let notifications = async {
        let device = device?;
        let service = find_service(&device, service).await?;
        let target = find_characteristic(&service, characteristic).await?;
        Ok::<_, LinkError>(target.notify().await?)
    }
    .await;

    let notifications = match notifications {
        Ok(stream) => {
            emit(
                &events,
                RadioEvent::Subscribed {
                    peer: peer.clone(),
                    characteristic,
                    result: Ok(()),
                },
            );
            stream
        }
        Err(error) => {
            emit(
                &events,
                RadioEvent::Subscribed {
                    peer,
                    characteristic,
                    result: Err(error),
                },
            );
            return;
        }
    };

    let mut notifications = Box::pin(notifications);
    while let Some(value) = notifications.next().await {
        emit(
            &events,
            RadioEvent::Notification {
                peer: peer.clone(),
                value,
            },
        );
    }
    debug!(%peer, "Notification stream ended");
}

fn emit(events: &mpsc::UnboundedSender<RadioEvent>, event: RadioEvent) {
    if events.send(event).is_err() {
        debug!("Radio event receiver dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(rssi: i16, at: Instant) -> Option<SignalReading> {
        Some(SignalReading { rssi, at })
    }

    #[test]
    fn test_read_rssi_reports_recent_reading() {
        let now = Instant::now();
        assert_eq!(fresh_rssi(reading(-52, now), now), Ok(-52));
        assert_eq!(
            fresh_rssi(reading(-60, now), now + RSSI_MAX_AGE),
            Ok(-60)
        );
    }

    #[test]
    fn test_read_rssi_refuses_stale_reading() {
        let now = Instant::now();
        let later = now + RSSI_MAX_AGE + Duration::from_millis(1);
        assert_eq!(
            fresh_rssi(reading(-40, now), later),
            Err(LinkError::RssiUnavailable)
        );
    }

    #[test]
    fn test_read_rssi_without_monitor_is_unavailable() {
        assert_eq!(
            fresh_rssi(None, Instant::now()),
            Err(LinkError::RssiUnavailable)
        );
    }

    #[test]
    fn test_parse_address_accepts_mac() {
        let address = parse_address(&PeerId::new("AA:BB:CC:DD:EE:FF")).unwrap();
        assert_eq!(address.to_string(), "AA:BB:CC:DD:EE:FF");
    }

    #[test]
    fn test_parse_address_rejects_garbage() {
        let err = parse_address(&PeerId::new("not-an-address")).unwrap_err();
        assert_eq!(
            err,
            LinkError::InvalidAddress {
                address: "not-an-address".into()
            }
        );
    }
}
