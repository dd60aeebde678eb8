//! # Device Session
//!
//! Owns the connection to one CRSF device: the handshake state machine,
//! parameter catalogue enumeration, telemetry intake and the pacing of
//! outbound frames.
//!
//! The session is single-threaded and cooperative. An external scheduler
//! calls [`DeviceSession::tick`] and [`DeviceSession::handle_rx`] on a
//! short cadence (about 1 ms); all waiting is state carried across ticks,
//! never a blocking call. External readers observe the session only
//! through immutable [`SessionSnapshot`] values published over a watch
//! channel.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{Buf, BytesMut};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

use crate::config::{ControlsConfig, LinkConfig};
use crate::crsf::decoder::{
    decode_battery, decode_device_info, decode_frame, decode_link_stats, decode_radio_sync,
    unpack_rc_channels_legacy,
};
use crate::crsf::encoder::{encode_device_ping, encode_parameter_read, encode_rc_channels_frame};
use crate::crsf::params::{ChunkOutcome, ParameterAssembler, ParameterRecord, ParameterValue};
use crate::crsf::protocol::*;
use crate::error::{Result, TransportError};
use crate::input::AxisMapper;
use crate::serial::Transport;

/// Outbound-side connection state, driven by the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum TxState {
    #[default]
    Disconnected,
    Connecting,
    Parameters,
    Connected,
}

/// Receiver-side link state, observed from link statistics telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum RxState {
    #[default]
    Disconnected,
    Connected,
}

/// Immutable view of session state for external readers.
///
/// Every field is a value copy; nothing aliases the session's working
/// buffers.
#[derive(Debug, Clone, Default)]
pub struct SessionSnapshot {
    pub tx_state: TxState,
    pub rx_state: RxState,
    pub device_info: Option<DeviceInfo>,
    pub battery: BatteryTelemetry,
    pub link_stats: LinkStats,
    pub radio_sync: RadioSync,
    pub parameters: Arc<BTreeMap<u8, ParameterRecord>>,
}

/// Session engine for one CRSF transmitter module.
pub struct DeviceSession<T: Transport> {
    transport: T,
    mapper: AxisMapper,
    retransmit_timeout: Duration,
    stats_refresh_interval: Duration,

    tx_state: TxState,
    rx_state: RxState,
    device_info: Option<DeviceInfo>,

    parameters: BTreeMap<u8, ParameterRecord>,
    published_params: Arc<BTreeMap<u8, ParameterRecord>>,
    assembler: ParameterAssembler,
    param_idx: u8,
    current_chunk: u8,

    battery: BatteryTelemetry,
    link_stats: LinkStats,
    radio_sync: RadioSync,

    channels: RcChannels,
    throttle_value: u16,
    brake_value: u16,

    last_tx: Option<Instant>,
    last_stats_refresh: Option<Instant>,
    rx_buf: BytesMut,

    snapshot_tx: watch::Sender<SessionSnapshot>,
}

impl<T: Transport> DeviceSession<T> {
    /// Create a session around an open transport.
    pub fn new(transport: T, link: &LinkConfig, controls: &ControlsConfig) -> Self {
        let mut channels = [CRSF_CHANNEL_VALUE_CENTER; CRSF_NUM_CHANNELS];
        channels[0] = CRSF_CHANNEL_LIVENESS;

        let (snapshot_tx, _) = watch::channel(SessionSnapshot::default());

        Self {
            transport,
            mapper: AxisMapper::new(
                controls.max_throttle,
                controls.max_brake,
                controls.steer_range,
                controls.steering_center_offset,
            ),
            retransmit_timeout: Duration::from_millis(link.retransmit_timeout_ms),
            stats_refresh_interval: Duration::from_millis(link.stats_refresh_interval_ms),
            tx_state: TxState::default(),
            rx_state: RxState::default(),
            device_info: None,
            parameters: BTreeMap::new(),
            published_params: Arc::new(BTreeMap::new()),
            assembler: ParameterAssembler::new(),
            param_idx: 1,
            current_chunk: 0,
            battery: BatteryTelemetry::default(),
            link_stats: LinkStats::default(),
            radio_sync: RadioSync::default(),
            channels,
            throttle_value: CRSF_CHANNEL_VALUE_CENTER,
            brake_value: CRSF_CHANNEL_VALUE_CENTER,
            last_tx: None,
            last_stats_refresh: None,
            rx_buf: BytesMut::with_capacity(CRSF_MAX_FRAME_SIZE * 4),
            snapshot_tx,
        }
    }

    /// Subscribe to published state snapshots.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot_tx.subscribe()
    }

    pub fn tx_state(&self) -> TxState {
        self.tx_state
    }

    pub fn rx_state(&self) -> RxState {
        self.rx_state
    }

    pub fn device_info(&self) -> Option<DeviceInfo> {
        self.device_info.clone()
    }

    pub fn battery(&self) -> BatteryTelemetry {
        self.battery
    }

    pub fn link_stats(&self) -> LinkStats {
        self.link_stats
    }

    pub fn radio_sync(&self) -> RadioSync {
        self.radio_sync
    }

    /// Current parameter table (published copy).
    pub fn parameters(&self) -> Arc<BTreeMap<u8, ParameterRecord>> {
        Arc::clone(&self.published_params)
    }

    /// Update the steering channel from a raw wheel reading (0-2560).
    pub fn set_steering(&mut self, raw: u16) {
        self.channels[0] = self.mapper.steering_to_crsf(raw);
    }

    /// Update the throttle value from a raw pedal reading (0-255).
    pub fn set_throttle(&mut self, raw: u16) {
        self.throttle_value = self.mapper.throttle_to_crsf(raw);
    }

    /// Update the brake value from a raw pedal reading (0-255).
    pub fn set_brake(&mut self, raw: u16) {
        self.brake_value = self.mapper.brake_to_crsf(raw);
    }

    /// Clear the parameter table and cursor and re-enter the catalogue
    /// enumeration phase.
    pub fn request_parameter_refresh(&mut self) {
        self.parameters.clear();
        self.published_params = Arc::new(BTreeMap::new());
        self.assembler.clear();
        self.param_idx = 1;
        self.current_chunk = 0;

        if self.device_info.is_some() {
            info!("re-reading parameter catalogue");
            self.tx_state = TxState::Parameters;
        }
        self.publish();
    }

    /// Advance the state machine and perform at most one outbound write.
    ///
    /// # Errors
    ///
    /// Returns a transport error when the port has failed; the session is
    /// already transitioned to Disconnected when that happens.
    pub async fn tick(&mut self, now: Instant) -> Result<()> {
        if !self.transport.is_open() {
            self.disconnect("transport closed");
            return Err(TransportError::Closed.into());
        }

        let due = self
            .last_tx
            .map_or(true, |t| now.saturating_duration_since(t) >= self.retransmit_timeout);
        if !due {
            return Ok(());
        }

        match self.tx_state {
            TxState::Disconnected | TxState::Connecting => {
                if self.tx_state == TxState::Disconnected {
                    info!("pinging for CRSF device");
                    self.set_tx_state(TxState::Connecting);
                }
                self.write(&encode_device_ping()).await?;
                self.last_tx = Some(now);
            }

            TxState::Parameters => {
                let param_count = self.device_info.as_ref().map_or(0, |d| d.param_count);

                while self.param_idx < param_count
                    && self.parameters.contains_key(&self.param_idx)
                {
                    self.param_idx += 1;
                    self.current_chunk = 0;
                }

                if self.param_idx >= param_count {
                    info!(param_count, "parameter catalogue complete, connected");
                    self.set_tx_state(TxState::Connected);
                    self.last_stats_refresh = Some(now);
                } else {
                    let (idx, chunk) = (self.param_idx, self.current_chunk);
                    self.request_parameter(idx, chunk).await?;
                    self.last_tx = Some(now);
                }
            }

            TxState::Connected => {
                let refresh_due = self.last_stats_refresh.map_or(true, |t| {
                    now.saturating_duration_since(t) >= self.stats_refresh_interval
                });

                if refresh_due {
                    // Zero the published link numbers until a fresh
                    // sample lands; silence reads as degraded, not
                    // stale-good
                    self.link_stats.uplink_lq = 0;
                    self.link_stats.uplink_rssi_1 = 0;
                    self.link_stats.uplink_rssi_2 = 0;
                    self.publish();

                    debug!("refreshing link statistics");
                    self.write(&encode_device_ping()).await?;
                    self.last_stats_refresh = Some(now);
                } else {
                    let frame = encode_rc_channels_frame(&self.build_channels());
                    self.write(&frame).await?;
                }
                self.last_tx = Some(now);
            }
        }

        Ok(())
    }

    /// Drain and dispatch all currently available inbound bytes.
    ///
    /// # Errors
    ///
    /// Returns a transport error when the port has failed. Malformed
    /// frames are logged and dropped without error.
    pub async fn handle_rx(&mut self, now: Instant) -> Result<()> {
        let bytes = match self.transport.read_available().await {
            Ok(bytes) => bytes,
            Err(err) => {
                self.disconnect("transport read failed");
                return Err(err.into());
            }
        };

        if !bytes.is_empty() {
            self.rx_buf.extend_from_slice(&bytes);
        }

        while let Some(raw) = self.next_frame() {
            match decode_frame(&raw) {
                Ok(frame) => self.dispatch(frame, now).await?,
                Err(err) => warn!(%err, "dropping invalid frame"),
            }
        }

        Ok(())
    }

    /// Request one chunk of one parameter. No-op outside the Parameters
    /// phase.
    pub async fn request_parameter(&mut self, param_idx: u8, chunk_idx: u8) -> Result<()> {
        if self.tx_state != TxState::Parameters {
            return Ok(());
        }
        trace!(param_idx, chunk_idx, "requesting parameter chunk");
        self.write(&encode_parameter_read(param_idx, chunk_idx)).await
    }

    /// Slice the next whole frame out of the receive buffer, skipping
    /// bytes that cannot start one.
    fn next_frame(&mut self) -> Option<Vec<u8>> {
        loop {
            if self.rx_buf.len() < 5 {
                return None;
            }

            let declared = self.rx_buf[1] as usize;
            let candidate_sync = SYNC_ACCEPTED.contains(&self.rx_buf[0]);
            if !candidate_sync || declared < 2 || declared + 2 > CRSF_MAX_FRAME_SIZE {
                self.rx_buf.advance(1);
                continue;
            }

            if self.rx_buf.len() < declared + 2 {
                // Frame still arriving
                return None;
            }

            let frame = self.rx_buf.split_to(declared + 2);
            return Some(frame.to_vec());
        }
    }

    /// Route one validated frame to its decoder.
    async fn dispatch(&mut self, frame: Frame, now: Instant) -> Result<()> {
        match frame.frame_type {
            CRSF_FRAMETYPE_BATTERY_SENSOR => match decode_battery(&frame.payload) {
                Ok(battery) => {
                    trace!(
                        voltage = battery.voltage,
                        current = battery.current,
                        remaining = battery.remaining,
                        "battery telemetry"
                    );
                    self.battery = battery;
                    self.publish();
                }
                Err(err) => warn!(%err, "bad battery frame"),
            },

            CRSF_FRAMETYPE_LINK_STATISTICS => match decode_link_stats(&frame.payload) {
                Ok(mut stats) => {
                    stats.last_update = Some(now);
                    let rx_state = if stats.uplink_lq > 0 {
                        RxState::Connected
                    } else {
                        RxState::Disconnected
                    };
                    if rx_state != self.rx_state {
                        info!(lq = stats.uplink_lq, ?rx_state, "link state changed");
                    }
                    self.link_stats = stats;
                    self.rx_state = rx_state;
                    self.publish();
                }
                Err(err) => warn!(%err, "bad link statistics frame"),
            },

            CRSF_FRAMETYPE_RC_CHANNELS_PACKED => {
                // Loopback display only; not the canonical unpack
                let mut raw = vec![frame.sync, frame.length(), frame.frame_type];
                raw.extend_from_slice(&frame.payload);
                raw.push(0);
                trace!(channels = ?unpack_rc_channels_legacy(&raw), "rc channels echo");
            }

            CRSF_FRAMETYPE_DEVICE_INFO => {
                let Some((_, _, body)) = frame.extended_body() else {
                    warn!("device info frame without extended header");
                    return Ok(());
                };
                match decode_device_info(body) {
                    Ok(info) => {
                        info!(name = %info.name, param_count = info.param_count, "device info");
                        if self.tx_state == TxState::Connecting {
                            self.param_idx = 1;
                            self.current_chunk = 0;
                            self.set_tx_state(TxState::Parameters);
                        }
                        self.device_info = Some(info);
                        self.publish();
                    }
                    Err(err) => warn!(%err, "bad device info frame"),
                }
            }

            CRSF_FRAMETYPE_PARAMETER_SETTINGS_ENTRY => {
                let Some((_, _, body)) = frame.extended_body() else {
                    warn!("parameter frame without extended header");
                    return Ok(());
                };
                match self.assembler.ingest(body) {
                    Ok(ChunkOutcome::Complete(record)) => {
                        self.publish_parameter(record, now).await?;
                    }
                    Ok(ChunkOutcome::NeedChunk { index, chunk }) => {
                        // One re-request per incoming frame; the link is
                        // half duplex
                        self.request_parameter(index, chunk).await?;
                    }
                    Err(err) => warn!(%err, "parameter chunk rejected"),
                }
            }

            CRSF_FRAMETYPE_RADIO_ID => {
                let Some((_, _, body)) = frame.extended_body() else {
                    warn!("radio ID frame without extended header");
                    return Ok(());
                };
                match decode_radio_sync(body) {
                    Ok(Some(sync)) => {
                        trace!(interval_us = sync.interval_us, phase = sync.phase, "radio sync");
                        self.radio_sync = sync;
                        self.publish();
                    }
                    Ok(None) => {}
                    Err(err) => warn!(%err, "bad radio sync frame"),
                }
            }

            other => trace!("unhandled frame type 0x{:02X}", other),
        }

        Ok(())
    }

    /// Publish a completed parameter record and drive enumeration
    /// forward.
    async fn publish_parameter(&mut self, record: ParameterRecord, now: Instant) -> Result<()> {
        let index = record.index;
        let out_of_range = matches!(record.value, ParameterValue::OutOfRange);

        debug!(index, name = %record.name, "parameter published");
        self.parameters.insert(index, record);
        self.published_params = Arc::new(self.parameters.clone());
        self.current_chunk = 0;
        self.publish();

        if self.tx_state != TxState::Parameters {
            return Ok(());
        }

        if out_of_range {
            // The device says there is no such parameter; stop walking
            // the catalogue
            info!(index, "parameter index out of range, ending enumeration");
            self.set_tx_state(TxState::Connected);
            self.last_stats_refresh = Some(now);
            return Ok(());
        }

        let param_count = self.device_info.as_ref().map_or(0, |d| d.param_count);
        if (index as u16 + 1) < param_count as u16 {
            self.request_parameter(index + 1, 0).await?;
        }

        Ok(())
    }

    /// Compose the outbound channel frame values. Channel 1 carries
    /// brake when the brake pedal is pulling it below center, throttle
    /// otherwise.
    fn build_channels(&mut self) -> RcChannels {
        self.channels[1] = if self.brake_value < CRSF_CHANNEL_VALUE_CENTER {
            self.brake_value
        } else {
            self.throttle_value
        };
        self.channels
    }

    async fn write(&mut self, frame: &[u8]) -> Result<()> {
        if let Err(err) = self.transport.write(frame).await {
            self.disconnect("transport write failed");
            return Err(err.into());
        }
        Ok(())
    }

    /// Drop device-specific state after a transport failure.
    fn disconnect(&mut self, reason: &str) {
        if self.tx_state != TxState::Disconnected {
            warn!(reason, "session disconnected");
        }
        self.tx_state = TxState::Disconnected;
        self.rx_state = RxState::Disconnected;
        self.device_info = None;
        self.parameters.clear();
        self.published_params = Arc::new(BTreeMap::new());
        self.assembler.clear();
        self.param_idx = 1;
        self.current_chunk = 0;
        self.rx_buf.clear();
        self.publish();
    }

    fn set_tx_state(&mut self, state: TxState) {
        if self.tx_state != state {
            debug!(from = ?self.tx_state, to = ?state, "tx state");
            self.tx_state = state;
            self.publish();
        }
    }

    /// Push a fresh snapshot to external readers.
    fn publish(&mut self) {
        self.snapshot_tx.send_replace(SessionSnapshot {
            tx_state: self.tx_state,
            rx_state: self.rx_state,
            device_info: self.device_info.clone(),
            battery: self.battery,
            link_stats: self.link_stats,
            radio_sync: self.radio_sync,
            parameters: Arc::clone(&self.published_params),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crsf::decoder::unpack_rc_channels;
    use crate::crsf::encoder::encode_frame;
    use crate::crsf::params::PARAM_TYPE_TEXT_SELECTION;
    use crate::serial::transport::mocks::MockTransport;

    fn new_session(mock: &MockTransport) -> DeviceSession<MockTransport> {
        DeviceSession::new(
            mock.clone(),
            &LinkConfig::default(),
            &ControlsConfig::default(),
        )
    }

    fn device_info_frame(param_count: u8) -> Vec<u8> {
        let mut payload = vec![CRSF_ADDRESS_RADIO, CRSF_ADDRESS_TRANSMITTER];
        payload.extend_from_slice(b"SimLink TX\0");
        payload.extend_from_slice(b"ELRS");
        payload.extend_from_slice(&1u32.to_le_bytes());
        payload.extend_from_slice(&2u32.to_le_bytes());
        payload.push(param_count);
        payload.push(0);
        encode_frame(CRSF_ADDRESS_RADIO, CRSF_FRAMETYPE_DEVICE_INFO, &payload)
    }

    fn param_chunk_frame(index: u8, chunks_remaining: u8, chunk: &[u8]) -> Vec<u8> {
        let mut payload = vec![
            CRSF_ADDRESS_RADIO,
            CRSF_ADDRESS_TRANSMITTER,
            index,
            chunks_remaining,
        ];
        payload.extend_from_slice(chunk);
        encode_frame(
            CRSF_ADDRESS_RADIO,
            CRSF_FRAMETYPE_PARAMETER_SETTINGS_ENTRY,
            &payload,
        )
    }

    fn single_chunk_param_frame(index: u8) -> Vec<u8> {
        let mut body = vec![0x00, PARAM_TYPE_TEXT_SELECTION];
        body.extend_from_slice(format!("Param{}\0", index).as_bytes());
        body.extend_from_slice(b"Off;On\0");
        body.extend_from_slice(&[1, 0, 1, 0]);
        param_chunk_frame(index, 0, &body)
    }

    fn link_stats_frame(lq: u8) -> Vec<u8> {
        let payload = [70, 80, lq, 5, 0, 4, 2, 60, 90, 7];
        encode_frame(CRSF_SYNC_BYTE, CRSF_FRAMETYPE_LINK_STATISTICS, &payload)
    }

    fn battery_frame() -> Vec<u8> {
        // 11.6V, 12.5A, 1000mAh, 75%
        let payload = [0x00, 0x74, 0x00, 0x7D, 0x00, 0x03, 0xE8, 0x4B];
        encode_frame(CRSF_SYNC_BYTE, CRSF_FRAMETYPE_BATTERY_SENSOR, &payload)
    }

    /// Drive a session through the full handshake with `param_count`
    /// single-chunk parameters. Returns the instant of the last tick.
    async fn connect(
        session: &mut DeviceSession<MockTransport>,
        mock: &MockTransport,
        param_count: u8,
    ) -> Instant {
        let t0 = Instant::now();
        session.tick(t0).await.unwrap();

        mock.push_rx(device_info_frame(param_count));
        session.handle_rx(t0).await.unwrap();

        let t1 = t0 + Duration::from_millis(10);
        session.tick(t1).await.unwrap();

        for idx in 1..=param_count {
            mock.push_rx(single_chunk_param_frame(idx));
        }
        session.handle_rx(t1).await.unwrap();

        let t2 = t1 + Duration::from_millis(10);
        session.tick(t2).await.unwrap();
        t2
    }

    #[tokio::test]
    async fn test_handshake_to_connected() {
        let mock = MockTransport::new();
        let mut session = new_session(&mock);
        let t0 = Instant::now();

        assert_eq!(session.tx_state(), TxState::Disconnected);

        // First tick pings and moves to Connecting
        session.tick(t0).await.unwrap();
        assert_eq!(session.tx_state(), TxState::Connecting);
        let frames = mock.written_frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0][2], CRSF_FRAMETYPE_DEVICE_PING);

        // Device info answer enters the Parameters phase
        mock.push_rx(device_info_frame(3));
        session.handle_rx(t0).await.unwrap();
        assert_eq!(session.tx_state(), TxState::Parameters);
        assert_eq!(session.device_info().unwrap().param_count, 3);
        assert_eq!(session.device_info().unwrap().name, "SimLink TX");

        // Next tick requests parameter 1
        let t1 = t0 + Duration::from_millis(10);
        session.tick(t1).await.unwrap();
        let last = mock.written_frames().last().unwrap().clone();
        assert_eq!(last[2], CRSF_FRAMETYPE_PARAMETER_READ);
        assert_eq!(last[5], 1);
        assert_eq!(last[6], 0);

        // Three complete parameter sequences fill the table
        for idx in 1..=3 {
            mock.push_rx(single_chunk_param_frame(idx));
        }
        session.handle_rx(t1).await.unwrap();
        assert_eq!(session.parameters().len(), 3);

        // With every index present the session connects
        let t2 = t1 + Duration::from_millis(10);
        session.tick(t2).await.unwrap();
        assert_eq!(session.tx_state(), TxState::Connected);
    }

    #[tokio::test]
    async fn test_parameter_completion_requests_next_index() {
        let mock = MockTransport::new();
        let mut session = new_session(&mock);
        let t0 = Instant::now();

        session.tick(t0).await.unwrap();
        mock.push_rx(device_info_frame(3));
        session.handle_rx(t0).await.unwrap();

        mock.clear_written();
        mock.push_rx(single_chunk_param_frame(1));
        session.handle_rx(t0).await.unwrap();

        // Completing parameter 1 immediately requests parameter 2
        let frames = mock.written_frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0][2], CRSF_FRAMETYPE_PARAMETER_READ);
        assert_eq!(frames[0][5], 2);
    }

    #[tokio::test]
    async fn test_missing_chunk_requested_once() {
        let mock = MockTransport::new();
        let mut session = new_session(&mock);
        let t0 = Instant::now();

        session.tick(t0).await.unwrap();
        mock.push_rx(device_info_frame(9));
        session.handle_rx(t0).await.unwrap();
        mock.clear_written();

        // First chunk of a 3-chunk parameter; exactly one re-request for
        // chunk 1 (not 0) must go out
        let mut first = vec![0x00, PARAM_TYPE_TEXT_SELECTION];
        first.extend_from_slice(b"Rate\0");
        mock.push_rx(param_chunk_frame(5, 2, &first));
        session.handle_rx(t0).await.unwrap();

        let frames = mock.written_frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0][2], CRSF_FRAMETYPE_PARAMETER_READ);
        assert_eq!(frames[0][5], 5);
        assert_eq!(frames[0][6], 1);
    }

    #[tokio::test]
    async fn test_connected_tick_sends_channel_frame() {
        let mock = MockTransport::new();
        let mut session = new_session(&mock);
        let t2 = connect(&mut session, &mock, 1).await;
        assert_eq!(session.tx_state(), TxState::Connected);

        let t3 = t2 + Duration::from_millis(10);
        session.tick(t3).await.unwrap();

        let last = mock.written_frames().last().unwrap().clone();
        assert_eq!(last[0], CRSF_SYNC_BYTE);
        assert_eq!(last[2], CRSF_FRAMETYPE_RC_CHANNELS_PACKED);
        assert_eq!(last.len(), 26);

        let channels = unpack_rc_channels(&last[3..25]).unwrap();
        assert_eq!(channels[0], CRSF_CHANNEL_LIVENESS);
        assert_eq!(channels[1], CRSF_CHANNEL_VALUE_CENTER);
        assert_eq!(channels[5], CRSF_CHANNEL_VALUE_CENTER);
    }

    #[tokio::test]
    async fn test_axis_setters_shape_channel_frame() {
        let mock = MockTransport::new();
        let mut session = new_session(&mock);
        let t2 = connect(&mut session, &mock, 1).await;

        session.set_steering(2560); // full right
        session.set_throttle(255); // floored
        session.set_brake(0); // released

        session.tick(t2 + Duration::from_millis(10)).await.unwrap();
        let last = mock.written_frames().last().unwrap().clone();
        let channels = unpack_rc_channels(&last[3..25]).unwrap();
        assert_eq!(channels[0], 992 + 819);
        assert_eq!(channels[1], 1811);

        // Brake below center wins channel 1
        session.set_brake(255);
        session.tick(t2 + Duration::from_millis(20)).await.unwrap();
        let last = mock.written_frames().last().unwrap().clone();
        let channels = unpack_rc_channels(&last[3..25]).unwrap();
        assert_eq!(channels[1], 172);
    }

    #[tokio::test]
    async fn test_retransmit_timer_limits_rate() {
        let mock = MockTransport::new();
        let mut session = new_session(&mock);
        let t0 = Instant::now();

        session.tick(t0).await.unwrap();
        assert_eq!(mock.written_frames().len(), 1);

        // 1 ms later the 5 ms timer has not elapsed
        session.tick(t0 + Duration::from_millis(1)).await.unwrap();
        assert_eq!(mock.written_frames().len(), 1);

        session.tick(t0 + Duration::from_millis(10)).await.unwrap();
        assert_eq!(mock.written_frames().len(), 2);
    }

    #[tokio::test]
    async fn test_link_quality_drives_rx_state() {
        let mock = MockTransport::new();
        let mut session = new_session(&mock);
        let t0 = Instant::now();

        mock.push_rx(link_stats_frame(0));
        session.handle_rx(t0).await.unwrap();
        assert_eq!(session.rx_state(), RxState::Disconnected);

        mock.push_rx(link_stats_frame(80));
        session.handle_rx(t0).await.unwrap();
        assert_eq!(session.rx_state(), RxState::Connected);
        assert_eq!(session.link_stats().uplink_lq, 80);
        assert_eq!(session.link_stats().uplink_rssi_1, -70);
        assert!(session.link_stats().last_update.is_some());
    }

    #[tokio::test]
    async fn test_battery_telemetry_published() {
        let mock = MockTransport::new();
        let mut session = new_session(&mock);
        let snapshot_rx = session.subscribe();

        mock.push_rx(battery_frame());
        session.handle_rx(Instant::now()).await.unwrap();

        assert!((session.battery().voltage - 11.6).abs() < 0.01);
        assert_eq!(session.battery().remaining, 75);

        let snapshot = snapshot_rx.borrow().clone();
        assert_eq!(snapshot.battery.capacity, 1000);
    }

    #[tokio::test]
    async fn test_corrupt_frame_mutates_nothing() {
        let mock = MockTransport::new();
        let mut session = new_session(&mock);

        let mut frame = link_stats_frame(80);
        let last = frame.len() - 1;
        frame[last] ^= 0xFF; // break the CRC
        mock.push_rx(frame);
        mock.push_rx(vec![0x47, 0x11, 0xFF]); // plus unframed noise

        session.handle_rx(Instant::now()).await.unwrap();

        assert_eq!(session.rx_state(), RxState::Disconnected);
        assert_eq!(session.link_stats(), LinkStats::default());
        assert!(session.parameters().is_empty());
    }

    #[tokio::test]
    async fn test_frames_split_across_reads() {
        let mock = MockTransport::new();
        let mut session = new_session(&mock);
        let t0 = Instant::now();

        let frame = link_stats_frame(90);
        let (head, tail) = frame.split_at(4);

        mock.push_rx(head.to_vec());
        session.handle_rx(t0).await.unwrap();
        assert_eq!(session.rx_state(), RxState::Disconnected);

        mock.push_rx(tail.to_vec());
        session.handle_rx(t0).await.unwrap();
        assert_eq!(session.rx_state(), RxState::Connected);
    }

    #[tokio::test]
    async fn test_stats_refresh_pings_and_zeroes_link() {
        let mock = MockTransport::new();
        let mut session = new_session(&mock);
        let t2 = connect(&mut session, &mock, 1).await;

        mock.push_rx(link_stats_frame(95));
        session.handle_rx(t2).await.unwrap();
        assert_eq!(session.link_stats().uplink_lq, 95);
        mock.clear_written();

        // Past the 5 s refresh interval the session re-pings and zeroes
        // the published link numbers
        let t3 = t2 + Duration::from_secs(6);
        session.tick(t3).await.unwrap();

        let frames = mock.written_frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0][2], CRSF_FRAMETYPE_DEVICE_PING);
        assert_eq!(session.link_stats().uplink_lq, 0);
        assert_eq!(session.link_stats().uplink_rssi_1, 0);

        // The following tick resumes channel frames
        session.tick(t3 + Duration::from_millis(10)).await.unwrap();
        let last = mock.written_frames().last().unwrap().clone();
        assert_eq!(last[2], CRSF_FRAMETYPE_RC_CHANNELS_PACKED);
    }

    #[tokio::test]
    async fn test_out_of_range_parameter_ends_enumeration() {
        let mock = MockTransport::new();
        let mut session = new_session(&mock);
        let t0 = Instant::now();

        session.tick(t0).await.unwrap();
        mock.push_rx(device_info_frame(200));
        session.handle_rx(t0).await.unwrap();
        assert_eq!(session.tx_state(), TxState::Parameters);

        // Device answers the first request with the sentinel
        let body = [0x00, 127];
        mock.push_rx(param_chunk_frame(1, 0, &body));
        session.handle_rx(t0).await.unwrap();

        assert_eq!(session.tx_state(), TxState::Connected);
        assert!(matches!(
            session.parameters().get(&1).unwrap().value,
            ParameterValue::OutOfRange
        ));
    }

    #[tokio::test]
    async fn test_transport_failure_disconnects() {
        let mock = MockTransport::new();
        let mut session = new_session(&mock);
        connect(&mut session, &mock, 1).await;
        assert_eq!(session.tx_state(), TxState::Connected);

        mock.set_open(false);
        let result = session.tick(Instant::now() + Duration::from_secs(1)).await;

        assert!(result.is_err());
        assert_eq!(session.tx_state(), TxState::Disconnected);
        assert!(session.device_info().is_none());
        assert!(session.parameters().is_empty());
    }

    #[tokio::test]
    async fn test_write_failure_disconnects() {
        let mock = MockTransport::new();
        let mut session = new_session(&mock);

        mock.set_write_error(std::io::ErrorKind::BrokenPipe);
        let result = session.tick(Instant::now()).await;

        assert!(result.is_err());
        assert_eq!(session.tx_state(), TxState::Disconnected);
    }

    #[tokio::test]
    async fn test_parameter_refresh_restarts_enumeration() {
        let mock = MockTransport::new();
        let mut session = new_session(&mock);
        let t2 = connect(&mut session, &mock, 2).await;
        assert_eq!(session.parameters().len(), 2);

        session.request_parameter_refresh();
        assert_eq!(session.tx_state(), TxState::Parameters);
        assert!(session.parameters().is_empty());

        // Enumeration restarts at parameter 1
        mock.clear_written();
        session.tick(t2 + Duration::from_millis(20)).await.unwrap();
        let frames = mock.written_frames();
        assert_eq!(frames[0][2], CRSF_FRAMETYPE_PARAMETER_READ);
        assert_eq!(frames[0][5], 1);
    }

    #[tokio::test]
    async fn test_snapshot_tracks_state_changes() {
        let mock = MockTransport::new();
        let mut session = new_session(&mock);
        let snapshot_rx = session.subscribe();

        connect(&mut session, &mock, 1).await;

        let snapshot = snapshot_rx.borrow().clone();
        assert_eq!(snapshot.tx_state, TxState::Connected);
        assert_eq!(snapshot.device_info.unwrap().param_count, 1);
        assert_eq!(snapshot.parameters.len(), 1);
    }
}
