use chrono::Local;
use log::{error, info, warn};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::time::sleep;

use crate::config::{Config, ConnectionSettings};
use crate::devices::measurement::format_timestamp;
use crate::devices::{measurement_registers, output_registers, FriskoMeasurements, Measurement, RegisterDefinition};
use crate::modbus::{ModbusTransport, RegisterReader, TcpSession};
use crate::utils::error::ModbusError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollPhase {
    Connecting,
    Reading,
    Success,
    PartialError,
    ConnectFailed,
    Cancelled,
}

/// Phase of the running (or last) cycle plus optional free-text detail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollStatus {
    pub phase: PollPhase,
    pub detail: Option<String>,
}

impl PollStatus {
    pub fn new(phase: PollPhase) -> Self {
        Self { phase, detail: None }
    }

    pub fn with_detail(phase: PollPhase, detail: impl Into<String>) -> Self {
        Self {
            phase,
            detail: Some(detail.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(
            self.phase,
            PollPhase::PartialError | PollPhase::ConnectFailed | PollPhase::Cancelled
        )
    }
}

impl fmt::Display for PollStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.phase, &self.detail) {
            (PollPhase::Connecting, _) => write!(f, "Łączenie..."),
            (PollPhase::Reading, _) => write!(f, "Połączono - odczytywanie danych..."),
            (PollPhase::Success, _) => write!(f, "Odczyt zakończony pomyślnie"),
            (PollPhase::PartialError, Some(detail)) => write!(f, "Błędy podczas odczytu: {}", detail),
            (PollPhase::PartialError, None) => write!(f, "Błędy podczas odczytu"),
            (PollPhase::ConnectFailed, _) => write!(f, "Nie udało się połączyć z urządzeniem"),
            (PollPhase::Cancelled, _) => write!(f, "Odczyt przerwany"),
        }
    }
}

/// Runs poll cycles against one controller, one cycle at a time.
///
/// A `poll()` issued while another cycle holds the session is rejected with
/// [`ModbusError::PollInProgress`]. The session object lives as long as the
/// service, so its transaction counter keeps counting across reconnects.
pub struct PollService<T: ModbusTransport = TcpSession> {
    settings: RwLock<ConnectionSettings>,
    request_delay: Duration,
    transport: Mutex<T>,
    polling: AtomicBool,
    status: watch::Sender<Option<PollStatus>>,
}

impl PollService<TcpSession> {
    pub fn new(config: &Config) -> Self {
        info!(
            "🚀 Poll service for {}:{} (unit {}, timeout {} ms, pacing {} ms)",
            config.connection.host,
            config.connection.port,
            config.connection.unit_id,
            config.polling.timeout_ms,
            config.polling.request_delay_ms
        );
        Self::with_transport(
            TcpSession::new(config.polling.timeout()),
            config.connection.clone(),
            config.polling.request_delay(),
        )
    }
}

impl<T: ModbusTransport> PollService<T> {
    pub fn with_transport(transport: T, settings: ConnectionSettings, request_delay: Duration) -> Self {
        let (status, _) = watch::channel(None);
        Self {
            settings: RwLock::new(settings),
            request_delay,
            transport: Mutex::new(transport),
            polling: AtomicBool::new(false),
            status,
        }
    }

    pub fn settings(&self) -> ConnectionSettings {
        self.settings.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Takes effect at the start of the next cycle.
    pub fn update_settings(&self, host: impl Into<String>, port: u16) {
        let mut settings = self.settings.write().unwrap_or_else(|e| e.into_inner());
        settings.host = host.into();
        settings.port = port;
        info!("⚙️  Connection settings changed to {}:{}", settings.host, settings.port);
    }

    pub fn is_polling(&self) -> bool {
        self.polling.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> Option<PollStatus> {
        self.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<Option<PollStatus>> {
        self.status.subscribe()
    }

    pub fn clear_status(&self) {
        self.status.send_replace(None);
    }

    fn set_status(&self, status: PollStatus) {
        info!("📶 {}", status);
        self.status.send_replace(Some(status));
    }

    pub async fn poll(&self) -> Result<FriskoMeasurements, ModbusError> {
        let mut transport = self.transport.try_lock().map_err(|_| {
            warn!("Poll request rejected: a cycle is already running");
            ModbusError::PollInProgress
        })?;

        let _polling = PollingFlag::raise(&self.polling);
        let settings = self.settings();
        let snapshot = self.run_cycle(&mut *transport, &settings).await;

        Ok(snapshot)
    }

    /// Closes the session after a `poll()` future was dropped mid-cycle.
    /// Waits for a cycle that is still running.
    pub async fn cancel(&self) {
        let mut transport = self.transport.lock().await;
        transport.close().await;
        self.set_status(PollStatus::new(PollPhase::Cancelled));
    }

    /// Single register read outside a full cycle. `Ok(None)` means the read
    /// itself failed.
    pub async fn read_register(&self, address: u16) -> Result<Option<i16>, ModbusError> {
        let mut transport = self.transport.try_lock().map_err(|_| ModbusError::PollInProgress)?;
        let settings = self.settings();

        if let Err(e) = transport.open(&settings.host, settings.port).await {
            transport.close().await;
            return Err(e);
        }
        let value = RegisterReader::new(settings.unit_id)
            .read_register(&mut *transport, address)
            .await;
        transport.close().await;

        Ok(value)
    }

    async fn run_cycle(&self, transport: &mut T, settings: &ConnectionSettings) -> FriskoMeasurements {
        self.set_status(PollStatus::new(PollPhase::Connecting));

        if let Err(e) = transport.open(&settings.host, settings.port).await {
            let note = format!("Nie udało się połączyć z {}:{}: {}", settings.host, settings.port, e);
            error!("❌ {}", note);
            transport.close().await;
            self.set_status(PollStatus::with_detail(PollPhase::ConnectFailed, note.clone()));
            return FriskoMeasurements::unreachable(note, Local::now());
        }

        self.set_status(PollStatus::new(PollPhase::Reading));

        let reader = RegisterReader::new(settings.unit_id);
        let mut cycle = CycleState::default();
        let measurements = self
            .read_group(transport, &reader, measurement_registers(), &mut cycle)
            .await;
        let outputs = self
            .read_group(transport, &reader, output_registers(), &mut cycle)
            .await;

        let error = if cycle.notes.is_empty() {
            None
        } else {
            Some(cycle.notes.join(", "))
        };
        let snapshot = FriskoMeasurements {
            measurements,
            outputs,
            is_connected: transport.is_connected(),
            last_update: format_timestamp(Local::now()),
            error,
        };

        transport.close().await;

        match &snapshot.error {
            Some(error) => {
                warn!("⚠️  Cycle finished with {} failed registers", snapshot.error_count());
                self.set_status(PollStatus::with_detail(PollPhase::PartialError, error.clone()));
            }
            None => self.set_status(PollStatus::new(PollPhase::Success)),
        }

        snapshot
    }

    async fn read_group(
        &self,
        transport: &mut T,
        reader: &RegisterReader,
        registers: &'static [RegisterDefinition],
        cycle: &mut CycleState,
    ) -> Vec<Measurement> {
        let mut resolved = Vec::with_capacity(registers.len());

        for register in registers {
            if cycle.reads > 0 && !self.request_delay.is_zero() {
                sleep(self.request_delay).await;
            }
            cycle.reads += 1;

            match reader.try_read_register(transport, register.address).await {
                Ok(raw) => resolved.push(Measurement::resolved(*register, raw)),
                Err(e) => {
                    warn!("⚠️  {} ({}): {}", register.display_name, register.address, e);
                    let cause = e.cause();
                    cycle
                        .notes
                        .push(format!("{} ({}): {}", register.display_name, register.address, cause));
                    resolved.push(Measurement::failed(*register, cause));
                }
            }
        }

        resolved
    }
}

/// Keeps `is_polling()` true for as long as a cycle future is alive.
struct PollingFlag<'a>(&'a AtomicBool);

impl<'a> PollingFlag<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for PollingFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct CycleState {
    reads: usize,
    notes: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::{all_registers, CycleOutcome, READ_ERROR};
    use crate::modbus::protocol::encode_read_response;
    use crate::modbus::TransactionCounter;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex as StdMutex};
    use std::time::Instant;

    #[derive(Default)]
    struct Recorder {
        opened: Vec<(String, u16)>,
        closes: usize,
        reads: Vec<u16>,
        transaction_ids: Vec<u16>,
    }

    /// In-memory controller: registers missing from `values` time out.
    struct SimulatedController {
        values: HashMap<u16, i16>,
        refuse_connections: bool,
        open_delay: Duration,
        connected: bool,
        transactions: TransactionCounter,
        recorder: Arc<StdMutex<Recorder>>,
    }

    impl SimulatedController {
        fn new(values: HashMap<u16, i16>) -> (Self, Arc<StdMutex<Recorder>>) {
            let recorder = Arc::new(StdMutex::new(Recorder::default()));
            let controller = Self {
                values,
                refuse_connections: false,
                open_delay: Duration::ZERO,
                connected: false,
                transactions: TransactionCounter::new(),
                recorder: recorder.clone(),
            };
            (controller, recorder)
        }
    }

    #[async_trait]
    impl ModbusTransport for SimulatedController {
        async fn open(&mut self, host: &str, port: u16) -> Result<(), ModbusError> {
            self.recorder.lock().unwrap().opened.push((host.to_string(), port));
            if !self.open_delay.is_zero() {
                tokio::time::sleep(self.open_delay).await;
            }
            if self.refuse_connections {
                return Err(ModbusError::ConnectionError("Connection refused".to_string()));
            }
            self.connected = true;
            Ok(())
        }

        async fn close(&mut self) {
            self.recorder.lock().unwrap().closes += 1;
            self.connected = false;
        }

        async fn send_and_receive(
            &mut self,
            frame: &[u8],
            _expected_len: usize,
        ) -> Result<Vec<u8>, ModbusError> {
            let transaction_id = u16::from_be_bytes([frame[0], frame[1]]);
            let address = u16::from_be_bytes([frame[8], frame[9]]);
            {
                let mut recorder = self.recorder.lock().unwrap();
                recorder.reads.push(address);
                recorder.transaction_ids.push(transaction_id);
            }
            match self.values.get(&address) {
                Some(&value) => Ok(encode_read_response(transaction_id, frame[6], value).to_vec()),
                None => Err(ModbusError::Timeout),
            }
        }

        async fn receive(&mut self, _expected_len: usize) -> Result<Vec<u8>, ModbusError> {
            Err(ModbusError::Timeout)
        }

        fn is_connected(&self) -> bool {
            self.connected
        }

        fn next_transaction_id(&mut self) -> u16 {
            self.transactions.next()
        }
    }

    fn healthy_values() -> HashMap<u16, i16> {
        let mut values: HashMap<u16, i16> = all_registers().map(|r| (r.address, 0)).collect();
        values.insert(4248, -15);
        values.insert(4065, 215);
        values.insert(4069, 483);
        values.insert(4236, 1);
        values.insert(4237, 0);
        values.insert(4214, 100);
        values.insert(4101, 100);
        values.insert(4099, 1);
        values
    }

    fn service(controller: SimulatedController) -> PollService<SimulatedController> {
        PollService::with_transport(controller, ConnectionSettings::default(), Duration::ZERO)
    }

    #[tokio::test]
    async fn healthy_cycle_renders_every_register() {
        let (controller, recorder) = SimulatedController::new(healthy_values());
        let service = service(controller);

        let snapshot = service.poll().await.unwrap();

        assert_eq!(snapshot.measurements.len(), measurement_registers().len());
        assert_eq!(snapshot.outputs.len(), output_registers().len());
        assert!(snapshot.is_connected);
        assert_eq!(snapshot.error, None);
        assert_eq!(snapshot.outcome(), CycleOutcome::Success);
        assert_eq!(snapshot.last_update.len(), "2024-01-01 00:00:00".len());

        assert_eq!(snapshot.get("temperatura_zewnetrzna").unwrap().value, "-1.5");
        assert_eq!(snapshot.get("temperatura_wewnetrzna").unwrap().value, "21.5");
        assert_eq!(snapshot.get("temperatura_cwu_gora").unwrap().value, "48.3");
        assert_eq!(snapshot.get("temperatura_bufora").unwrap().value, "0.0");
        assert_eq!(snapshot.get("wejscie_ferie").unwrap().value, "ZWARTE");
        assert_eq!(snapshot.get("wejscie_party").unwrap().value, "ROZWARTE");
        assert_eq!(snapshot.get("pompa_cwu").unwrap().value, "WŁĄCZONA");
        assert_eq!(snapshot.get("sprezarka").unwrap().value, "WŁĄCZONA");
        assert_eq!(snapshot.get("alarm").unwrap().value, "WYŁĄCZONA");

        let recorder = recorder.lock().unwrap();
        assert_eq!(recorder.opened, vec![("192.168.1.99".to_string(), 502)]);
        assert_eq!(recorder.closes, 1);
        assert_eq!(service.status(), Some(PollStatus::new(PollPhase::Success)));
        assert!(!service.is_polling());
    }

    #[tokio::test]
    async fn reads_follow_catalog_order() {
        let (controller, recorder) = SimulatedController::new(healthy_values());
        let service = service(controller);

        service.poll().await.unwrap();

        let expected: Vec<u16> = all_registers().map(|r| r.address).collect();
        assert_eq!(recorder.lock().unwrap().reads, expected);
    }

    #[tokio::test]
    async fn connect_failure_still_covers_catalog() {
        let (mut controller, recorder) = SimulatedController::new(healthy_values());
        controller.refuse_connections = true;
        let service = service(controller);

        let snapshot = service.poll().await.unwrap();

        assert!(!snapshot.is_connected);
        assert_eq!(snapshot.measurements.len(), measurement_registers().len());
        assert_eq!(snapshot.outputs.len(), output_registers().len());
        assert!(snapshot.iter().all(|m| m.value == READ_ERROR));
        let error = snapshot.error.as_deref().unwrap();
        assert!(error.starts_with("Nie udało się połączyć z 192.168.1.99:502"));
        assert_eq!(snapshot.outcome(), CycleOutcome::Failed);

        let recorder = recorder.lock().unwrap();
        assert!(recorder.reads.is_empty());
        assert_eq!(recorder.closes, 1);

        let status = service.status().unwrap();
        assert_eq!(status.phase, PollPhase::ConnectFailed);
        assert_eq!(status.to_string(), "Nie udało się połączyć z urządzeniem");
    }

    #[tokio::test]
    async fn every_read_failing_marks_every_entry() {
        let (controller, recorder) = SimulatedController::new(HashMap::new());
        let service = service(controller);

        let snapshot = service.poll().await.unwrap();

        assert!(snapshot.is_connected);
        assert_eq!(snapshot.error_count(), measurement_registers().len() + output_registers().len());
        assert!(snapshot.iter().all(|m| m.value == READ_ERROR && m.error.as_deref() == Some("timeout")));

        let error = snapshot.error.as_deref().unwrap();
        assert!(error.starts_with("Temperatura zewnętrzna (4248): timeout, "));
        assert!(error.ends_with("Alarm (4099): timeout"));
        assert_eq!(snapshot.outcome(), CycleOutcome::Partial);

        assert_eq!(recorder.lock().unwrap().closes, 1);
        let status = service.status().unwrap();
        assert_eq!(status.phase, PollPhase::PartialError);
        assert!(status.to_string().starts_with("Błędy podczas odczytu: "));
    }

    #[tokio::test]
    async fn one_bad_register_does_not_abort_the_cycle() {
        let mut values = healthy_values();
        values.remove(&4121);
        let (controller, recorder) = SimulatedController::new(values);
        let service = service(controller);

        let snapshot = service.poll().await.unwrap();

        assert_eq!(snapshot.error_count(), 1);
        assert_eq!(snapshot.get("zadana_temperatura_cwu").unwrap().value, READ_ERROR);
        assert_eq!(snapshot.error.as_deref(), Some("Zadana temperatura CWU (4121): timeout"));
        assert_eq!(recorder.lock().unwrap().reads.len(), 22);
    }

    #[tokio::test]
    async fn consecutive_cycles_are_deterministic() {
        let (controller, recorder) = SimulatedController::new(healthy_values());
        let service = service(controller);

        let first = service.poll().await.unwrap();
        let second = service.poll().await.unwrap();

        assert_eq!(first.measurements, second.measurements);
        assert_eq!(first.outputs, second.outputs);
        assert_eq!(first.error, second.error);
        assert_eq!(first.is_connected, second.is_connected);

        // The counter is not reset by reconnecting
        let recorder = recorder.lock().unwrap();
        let ids: Vec<u16> = (1..=44).collect();
        assert_eq!(recorder.transaction_ids, ids);
        assert_eq!(recorder.closes, 2);
    }

    #[tokio::test]
    async fn concurrent_poll_is_rejected() {
        let (mut controller, _recorder) = SimulatedController::new(healthy_values());
        controller.open_delay = Duration::from_millis(100);
        let service = service(controller);

        let (first, second) = tokio::join!(service.poll(), service.poll());

        assert!(first.is_ok());
        assert!(matches!(second, Err(ModbusError::PollInProgress)));
        assert!(!service.is_polling());
    }

    #[tokio::test]
    async fn dropped_cycle_releases_polling_flag() {
        let (mut controller, recorder) = SimulatedController::new(healthy_values());
        controller.open_delay = Duration::from_millis(200);
        let service = service(controller);

        let (abandoned, _) = tokio::join!(
            tokio::time::timeout(Duration::from_millis(50), service.poll()),
            async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                assert!(service.is_polling());
            }
        );
        assert!(abandoned.is_err());
        assert!(!service.is_polling());

        // The session is free again
        let snapshot = service.poll().await.unwrap();
        assert_eq!(snapshot.error, None);
        assert!(!service.is_polling());
        assert_eq!(recorder.lock().unwrap().opened.len(), 2);
    }

    #[tokio::test]
    async fn cancel_closes_session_left_by_dropped_cycle() {
        let (mut controller, recorder) = SimulatedController::new(healthy_values());
        controller.open_delay = Duration::from_millis(200);
        let service = service(controller);

        let abandoned = tokio::time::timeout(Duration::from_millis(50), service.poll()).await;
        assert!(abandoned.is_err());
        assert_eq!(recorder.lock().unwrap().closes, 0);

        service.cancel().await;

        assert_eq!(recorder.lock().unwrap().closes, 1);
        let status = service.status().unwrap();
        assert_eq!(status.phase, PollPhase::Cancelled);
        assert!(status.is_error());
        assert_eq!(status.to_string(), "Odczyt przerwany");
    }

    #[tokio::test]
    async fn requests_are_paced() {
        let (controller, _recorder) = SimulatedController::new(healthy_values());
        let service =
            PollService::with_transport(controller, ConnectionSettings::default(), Duration::from_millis(5));

        let started = Instant::now();
        service.poll().await.unwrap();

        // 22 registers leave 21 gaps
        assert!(started.elapsed() >= Duration::from_millis(5 * 21));
    }

    #[tokio::test]
    async fn settings_apply_to_next_cycle() {
        let (controller, recorder) = SimulatedController::new(healthy_values());
        let service = service(controller);

        service.update_settings("10.0.0.2", 1502);
        service.poll().await.unwrap();

        assert_eq!(service.settings().unit_id, 1);
        assert_eq!(recorder.lock().unwrap().opened, vec![("10.0.0.2".to_string(), 1502)]);
    }

    #[tokio::test]
    async fn status_can_be_observed_and_cleared() {
        let (controller, _recorder) = SimulatedController::new(healthy_values());
        let service = service(controller);
        let mut updates = service.subscribe_status();

        assert_eq!(service.status(), None);
        service.poll().await.unwrap();

        assert!(updates.has_changed().unwrap());
        assert_eq!(*updates.borrow_and_update(), Some(PollStatus::new(PollPhase::Success)));

        service.clear_status();
        assert_eq!(service.status(), None);
    }

    #[tokio::test]
    async fn single_register_read() {
        let (controller, recorder) = SimulatedController::new(healthy_values());
        let service = service(controller);

        assert_eq!(service.read_register(4065).await.unwrap(), Some(215));
        assert_eq!(service.read_register(1).await.unwrap(), None);
        assert_eq!(recorder.lock().unwrap().closes, 2);
    }

    #[test]
    fn status_messages() {
        assert_eq!(PollStatus::new(PollPhase::Connecting).to_string(), "Łączenie...");
        assert_eq!(
            PollStatus::new(PollPhase::Reading).to_string(),
            "Połączono - odczytywanie danych..."
        );
        assert_eq!(
            PollStatus::with_detail(PollPhase::PartialError, "Alarm (4099): timeout").to_string(),
            "Błędy podczas odczytu: Alarm (4099): timeout"
        );
        assert!(!PollStatus::new(PollPhase::Success).is_error());
        assert!(PollStatus::new(PollPhase::ConnectFailed).is_error());
    }

    mod over_tcp {
        use super::*;
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::TcpListener;

        /// Minimal Modbus TCP controller answering single-register reads.
        /// The first reply on each connection is held back by `first_reply_delay`.
        async fn spawn_device(values: HashMap<u16, i16>, first_reply_delay: Duration) -> u16 {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let port = listener.local_addr().unwrap().port();
            tokio::spawn(async move {
                loop {
                    let Ok((mut socket, _)) = listener.accept().await else { break };
                    let values = values.clone();
                    tokio::spawn(async move {
                        let mut request = [0u8; 12];
                        let mut delay = first_reply_delay;
                        while socket.read_exact(&mut request).await.is_ok() {
                            if !delay.is_zero() {
                                tokio::time::sleep(delay).await;
                                delay = Duration::ZERO;
                            }
                            let transaction_id = u16::from_be_bytes([request[0], request[1]]);
                            let address = u16::from_be_bytes([request[8], request[9]]);
                            let reply = match values.get(&address) {
                                Some(&value) => encode_read_response(transaction_id, request[6], value).to_vec(),
                                // Illegal data address exception
                                None => vec![request[0], request[1], 0, 0, 0, 3, request[6], 0x83, 0x02],
                            };
                            if socket.write_all(&reply).await.is_err() {
                                break;
                            }
                        }
                    });
                }
            });
            port
        }

        fn tcp_service(port: u16) -> PollService<TcpSession> {
            tcp_service_with_timeout(port, Duration::from_millis(500))
        }

        fn tcp_service_with_timeout(port: u16, io_timeout: Duration) -> PollService<TcpSession> {
            PollService::with_transport(
                TcpSession::new(io_timeout),
                ConnectionSettings::new("127.0.0.1", port),
                Duration::ZERO,
            )
        }

        #[tokio::test]
        async fn full_cycle_against_simulated_device() {
            let port = spawn_device(healthy_values(), Duration::ZERO).await;
            let service = tcp_service(port);

            let snapshot = service.poll().await.unwrap();

            assert!(snapshot.is_connected);
            assert_eq!(snapshot.error, None, "unexpected errors: {:?}", snapshot.error);
            assert_eq!(snapshot.get("temperatura_zewnetrzna").unwrap().value, "-1.5");
            assert_eq!(snapshot.get("pompa_cwu").unwrap().value, "WŁĄCZONA");

            let again = service.poll().await.unwrap();
            assert_eq!(snapshot.measurements, again.measurements);
            assert_eq!(snapshot.outputs, again.outputs);
        }

        #[tokio::test]
        async fn exception_replies_are_read_errors() {
            let mut values = healthy_values();
            values.remove(&4158);
            let port = spawn_device(values, Duration::ZERO).await;
            let service = tcp_service(port);

            let started = Instant::now();
            let snapshot = service.poll().await.unwrap();

            // The exception frame is taken as-is instead of waiting out the timeout
            assert!(started.elapsed() < Duration::from_millis(500));
            let failed = snapshot.get("zadana_temperatura_bufora").unwrap();
            assert_eq!(failed.value, READ_ERROR);
            assert_eq!(failed.error.as_deref(), Some("protocol mismatch"));
            assert_eq!(snapshot.error_count(), 1);
            assert_eq!(snapshot.get("temperatura_zasilania_pc").unwrap().value, "0.0");
        }

        #[tokio::test]
        async fn late_reply_does_not_shift_later_registers() {
            // Every register answers with its own address
            let values: HashMap<u16, i16> = all_registers().map(|r| (r.address, r.address as i16)).collect();
            // The first reply lands midway through the second read's window
            let port = spawn_device(values, Duration::from_millis(300)).await;
            let service = tcp_service_with_timeout(port, Duration::from_millis(200));

            let snapshot = service.poll().await.unwrap();

            let first = &snapshot.measurements[0];
            assert_eq!(first.definition.address, 4248);
            assert_eq!(first.raw, None);
            assert_eq!(first.error.as_deref(), Some("timeout"));
            assert_eq!(snapshot.error_count(), 1);
            for measurement in snapshot.iter().skip(1) {
                assert_eq!(measurement.raw, Some(measurement.definition.address as i16), "{}", measurement.name());
            }
        }

        #[tokio::test]
        async fn unreachable_device() {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let port = listener.local_addr().unwrap().port();
            drop(listener);
            let service = tcp_service(port);

            let snapshot = service.poll().await.unwrap();

            assert!(!snapshot.is_connected);
            assert!(snapshot.error.is_some());
            assert_eq!(snapshot.error_count(), 22);
        }
    }
}
