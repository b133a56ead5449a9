//! BLE command channel adapter.
//!
//! Advertises the doser service, accepts `PUSH:<decimal>` / `FLUSH` writes
//! on the command characteristic and hands them to the actuation loop
//! through [`COMMAND_QUEUE`].  Command outcomes are reported back on the
//! status characteristic.
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: Bluedroid GATT server via raw `esp_idf_svc::sys` calls.
//! - **all other targets**: simulation stubs for host-side tests.
//!
//! ## GATT Service Layout
//!
//! | Characteristic | UUID                        | Perms              |
//! |----------------|-----------------------------|--------------------|
//! | Command        | `6d640002-…-8f1b0c3d2a55`   | Write              |
//! | Status         | `6d640003-…-8f1b0c3d2a55`   | Read+Notify (CCCD) |
//!
//! ## Contexts
//!
//! The GATTS write callback runs in the Bluedroid task.  It only parses,
//! enqueues and answers; it never waits for the motor.  Link events are
//! forwarded to the main loop through [`crate::events`], which then calls
//! [`BleCommandChannel::on_link_established`] / [`BleCommandChannel::on_link_lost`].
//! The link state is also latched in [`link_up`]; the loop reconciles
//! against it with [`BleCommandChannel::maintain`], which also retries a
//! failed advertise start.
//!
//! Long writes are buffered in a [`PreparedWrite`] and only parsed when
//! the client executes them.

use log::{debug, info, warn};

use crate::app::command::{Command, CommandKind, MAX_PAYLOAD_LEN};
use crate::app::events::{AppEvent, MAX_STATUS_LEN, Status};
use crate::app::ports::EventSink;
use crate::app::queue::CommandQueue;
use crate::config::MAX_DEVICE_NAME_LEN;
use crate::error::{CommandError, CommsError};

// ───────────────────────────────────────────────────────────────
// Constants
// ───────────────────────────────────────────────────────────────

pub const SERVICE_UUID: u128 = 0x6d640001_4c2e_4f7a_9b3e_8f1b0c3d2a55;
pub const CHAR_COMMAND: u128 = 0x6d640002_4c2e_4f7a_9b3e_8f1b0c3d2a55;
pub const CHAR_STATUS: u128 = 0x6d640003_4c2e_4f7a_9b3e_8f1b0c3d2a55;

/// Legacy advertising PDU payload limit.
pub const ADV_PAYLOAD_MAX: usize = 31;

const AD_TYPE_FLAGS: u8 = 0x01;
const AD_TYPE_SHORT_NAME: u8 = 0x08;
const AD_TYPE_COMPLETE_NAME: u8 = 0x09;
const AD_TYPE_UUID128_COMPLETE: u8 = 0x07;
/// LE General Discoverable, BR/EDR not supported.
const ADV_FLAGS: u8 = 0x06;

/// Producer/consumer hand-off shared with the Bluedroid callbacks.
pub static COMMAND_QUEUE: CommandQueue = CommandQueue::new();

// ───────────────────────────────────────────────────────────────
// Connection state
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Radio stack not yet brought up.
    Idle,
    Advertising,
    Connected,
}

/// `true` while a central is connected, as last reported by the radio.
pub fn link_up() -> bool {
    BLE_LINK_UP.load(AtomicOrdering::Acquire)
}

// ───────────────────────────────────────────────────────────────
// Ingestion (callback context)
// ───────────────────────────────────────────────────────────────

/// Parse `payload` and offer it to `queue`.
///
/// Returns the accepted kind, [`CommandError::Malformed`] for anything that
/// is not `PUSH:<decimal>` / `FLUSH`, or [`CommandError::Busy`] when the
/// queue is occupied or a move is running.  Never blocks.
pub fn ingest(queue: &CommandQueue, payload: &[u8]) -> Result<CommandKind, CommandError> {
    ingest_with(queue, payload, |_| {})
}

/// [`ingest`], calling `on_accept` after the command is known to fit but
/// before the consumer can see it.  A status published from `on_accept`
/// therefore always precedes the controller's `RUN:` line.
///
/// Requires a single producer on `queue`.
pub fn ingest_with(
    queue: &CommandQueue,
    payload: &[u8],
    on_accept: impl FnOnce(CommandKind),
) -> Result<CommandKind, CommandError> {
    let cmd = Command::parse(payload);
    if !cmd.is_executable() {
        warn!("BLE: unrecognised command '{}' dropped", cmd.raw());
        return Err(CommandError::Malformed);
    }

    let kind = cmd.kind();
    if !queue.can_accept() {
        warn!("BLE: {} write rejected ({})", kind, CommandError::Busy);
        return Err(CommandError::Busy);
    }
    on_accept(kind);
    queue.try_enqueue(cmd)?;
    debug!("BLE: {} queued", kind);
    Ok(kind)
}

// ───────────────────────────────────────────────────────────────
// Long (prepared) writes
// ───────────────────────────────────────────────────────────────

/// Why a prepare-write chunk was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrepareError {
    /// Chunk offset does not continue the buffered payload.
    InvalidOffset,
    /// Reassembled payload would exceed [`MAX_PAYLOAD_LEN`].
    TooLong,
}

/// Reassembly buffer for a long write to the command characteristic.
///
/// Chunks are only buffered; nothing is parsed or enqueued until the
/// client executes the write.  A partial payload such as the first 18
/// bytes of `PUSH:0000000000001.75` must never run on its own.
#[derive(Debug, Default)]
pub struct PreparedWrite {
    buf: heapless::Vec<u8, MAX_PAYLOAD_LEN>,
    active: bool,
    broken: bool,
}

impl PreparedWrite {
    pub const fn new() -> Self {
        Self {
            buf: heapless::Vec::new(),
            active: false,
            broken: false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Buffer one chunk.  A refused chunk poisons the whole write; it is
    /// reported as malformed on execute.
    pub fn append(&mut self, offset: u16, chunk: &[u8]) -> Result<(), PrepareError> {
        if !self.active {
            self.reset();
            self.active = true;
        }
        if usize::from(offset) != self.buf.len() {
            self.broken = true;
            return Err(PrepareError::InvalidOffset);
        }
        if self.buf.extend_from_slice(chunk).is_err() {
            self.broken = true;
            return Err(PrepareError::TooLong);
        }
        Ok(())
    }

    /// Complete the long write.  `None` when nothing was buffered or the
    /// client cancelled; otherwise the outcome of ingesting the payload.
    pub fn execute(
        &mut self,
        queue: &CommandQueue,
        execute: bool,
        on_accept: impl FnOnce(CommandKind),
    ) -> Option<Result<CommandKind, CommandError>> {
        if !self.active {
            return None;
        }
        let broken = self.broken;
        let payload = core::mem::take(&mut self.buf);
        self.reset();

        if !execute {
            debug!("BLE: long write cancelled");
            return None;
        }
        if broken {
            warn!("BLE: long write discarded (bad chunk)");
            return Some(Err(CommandError::Malformed));
        }
        Some(ingest_with(queue, &payload, on_accept))
    }

    /// Drop any buffered chunks.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.active = false;
        self.broken = false;
    }
}

/// Status line acknowledging one write.
pub fn write_status(outcome: Result<CommandKind, CommandError>) -> Status {
    match outcome {
        Ok(kind) => Status::Accepted(kind),
        Err(reason) => Status::Rejected(reason),
    }
}

// ───────────────────────────────────────────────────────────────
// Advertising payloads
// ───────────────────────────────────────────────────────────────

/// Flags + device name.  Falls back to a shortened name if the complete
/// one does not fit.
pub fn advertising_payload(name: &str) -> heapless::Vec<u8, ADV_PAYLOAD_MAX> {
    let mut out = heapless::Vec::new();
    let _ = out.extend_from_slice(&[2, AD_TYPE_FLAGS, ADV_FLAGS]);

    let room = ADV_PAYLOAD_MAX - out.len() - 2;
    let (ad_type, bytes) = if name.len() <= room {
        (AD_TYPE_COMPLETE_NAME, name.as_bytes())
    } else {
        (AD_TYPE_SHORT_NAME, &name.as_bytes()[..room])
    };
    let _ = out.push(bytes.len() as u8 + 1);
    let _ = out.push(ad_type);
    let _ = out.extend_from_slice(bytes);
    out
}

/// Complete list of 128-bit service UUIDs (little-endian on air).
pub fn scan_response_payload(service: u128) -> heapless::Vec<u8, ADV_PAYLOAD_MAX> {
    let mut out = heapless::Vec::new();
    let _ = out.extend_from_slice(&[17, AD_TYPE_UUID128_COMPLETE]);
    let _ = out.extend_from_slice(&service.to_le_bytes());
    out
}

// ── ESP-IDF BLE static state ──────────────────────────────────
//
// Bluedroid callbacks are C function pointers that cannot capture Rust
// closures. These atomics bridge the callback context to the channel.

use core::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
#[cfg(target_os = "espidf")]
use core::sync::atomic::{AtomicU8, AtomicU16};

/// Latched link flag, written by the GATTS callback.  The main loop
/// reconciles against it in case a link event was dropped.
static BLE_LINK_UP: AtomicBool = AtomicBool::new(false);

#[cfg(target_os = "espidf")]
static BLE_GATTS_IF: AtomicU8 = AtomicU8::new(0);
#[cfg(target_os = "espidf")]
static BLE_CONN_ID: AtomicU16 = AtomicU16::new(0);
#[cfg(target_os = "espidf")]
static BLE_NOTIFY_ENABLED: AtomicBool = AtomicBool::new(false);
#[cfg(target_os = "espidf")]
static BLE_SVC_HANDLE: AtomicU16 = AtomicU16::new(0);
#[cfg(target_os = "espidf")]
static BLE_COMMAND_CHAR_HANDLE: AtomicU16 = AtomicU16::new(0);
#[cfg(target_os = "espidf")]
static BLE_STATUS_CHAR_HANDLE: AtomicU16 = AtomicU16::new(0);
#[cfg(target_os = "espidf")]
static BLE_STATUS_CCCD_HANDLE: AtomicU16 = AtomicU16::new(0);
#[cfg(target_os = "espidf")]
static BLE_CHAR_STEP: AtomicU8 = AtomicU8::new(0);

// Advertising starts once both raw payloads are set and a start was requested.
#[cfg(target_os = "espidf")]
const ADV_DATA_PENDING: u8 = 0b01;
#[cfg(target_os = "espidf")]
const SCAN_RSP_PENDING: u8 = 0b10;
#[cfg(target_os = "espidf")]
static BLE_ADV_CONFIG_PENDING: AtomicU8 = AtomicU8::new(ADV_DATA_PENDING | SCAN_RSP_PENDING);
#[cfg(target_os = "espidf")]
static BLE_ADV_REQUESTED: AtomicBool = AtomicBool::new(false);

// Value served on status READ.  GATTS callbacks run in the Bluedroid task
// (not ISR), so std Mutex is safe.
#[cfg(target_os = "espidf")]
static BLE_STATUS_VALUE: std::sync::Mutex<heapless::String<MAX_STATUS_LEN>> =
    std::sync::Mutex::new(heapless::String::new());

// Long-write chunks for the command characteristic, held until EXEC_WRITE.
#[cfg(target_os = "espidf")]
static BLE_PREPARED: std::sync::Mutex<PreparedWrite> = std::sync::Mutex::new(PreparedWrite::new());

#[cfg(target_os = "espidf")]
const CCCD_UUID: u16 = 0x2902;

#[cfg(target_os = "espidf")]
fn uuid128_to_esp(uuid: u128) -> esp_idf_svc::sys::esp_bt_uuid_t {
    let mut t: esp_idf_svc::sys::esp_bt_uuid_t = unsafe { core::mem::zeroed() };
    t.len = 16;
    t.uuid.uuid128 = uuid.to_le_bytes();
    t
}

#[cfg(target_os = "espidf")]
fn uuid16_to_esp(uuid: u16) -> esp_idf_svc::sys::esp_bt_uuid_t {
    let mut t: esp_idf_svc::sys::esp_bt_uuid_t = unsafe { core::mem::zeroed() };
    t.len = 2;
    t.uuid.uuid16 = uuid;
    t
}

#[cfg(target_os = "espidf")]
unsafe fn add_gatt_char(svc_handle: u16, uuid: u128, perm: u32, prop: u32) {
    use esp_idf_svc::sys::*;
    let mut char_uuid = uuid128_to_esp(uuid);
    let ret = unsafe {
        esp_ble_gatts_add_char(
            svc_handle,
            &mut char_uuid,
            perm as esp_gatt_perm_t,
            prop as esp_gatt_char_prop_t,
            core::ptr::null_mut(),
            core::ptr::null_mut(),
        )
    };
    if ret != ESP_OK as i32 {
        log::error!("BLE GATTS: add_char failed ({})", ret);
    }
}

#[cfg(target_os = "espidf")]
fn start_advertising() -> i32 {
    use esp_idf_svc::sys::*;
    let mut adv_params = esp_ble_adv_params_t {
        adv_int_min: 0x20,
        adv_int_max: 0x40,
        adv_type: esp_ble_adv_type_t_ADV_TYPE_IND,
        own_addr_type: esp_ble_addr_type_t_BLE_ADDR_TYPE_PUBLIC,
        channel_map: esp_ble_adv_channel_t_ADV_CHNL_ALL,
        adv_filter_policy: esp_ble_adv_filter_t_ADV_FILTER_ALLOW_SCAN_ANY_CON_ANY,
        ..unsafe { core::mem::zeroed() }
    };
    unsafe { esp_ble_gap_start_advertising(&mut adv_params) }
}

/// Publish `line` as the status value and notify it if the central
/// subscribed.
#[cfg(target_os = "espidf")]
fn notify_status(line: &str) {
    use esp_idf_svc::sys::*;
    if let Ok(mut value) = BLE_STATUS_VALUE.lock() {
        value.clear();
        let _ = value.push_str(line);
    }
    let handle = BLE_STATUS_CHAR_HANDLE.load(AtomicOrdering::Relaxed);
    if handle == 0
        || !BLE_LINK_UP.load(AtomicOrdering::Acquire)
        || !BLE_NOTIFY_ENABLED.load(AtomicOrdering::Acquire)
    {
        return;
    }
    let ret = unsafe {
        esp_ble_gatts_send_indicate(
            BLE_GATTS_IF.load(AtomicOrdering::Relaxed),
            BLE_CONN_ID.load(AtomicOrdering::Relaxed),
            handle,
            line.len() as u16,
            line.as_ptr().cast_mut(),
            false,
        )
    };
    if ret != ESP_OK as i32 {
        log::warn!("BLE: status notify failed ({})", ret);
    }
}

#[cfg(not(target_os = "espidf"))]
fn notify_status(line: &str) {
    debug!("BLE(sim): notify '{}'", line);
}

#[cfg(target_os = "espidf")]
unsafe extern "C" fn ble_gap_event_handler(
    event: esp_idf_svc::sys::esp_gap_ble_cb_event_t,
    param: *mut esp_idf_svc::sys::esp_ble_gap_cb_param_t,
) {
    use esp_idf_svc::sys::*;
    let cleared = match event {
        esp_gap_ble_cb_event_t_ESP_GAP_BLE_ADV_DATA_RAW_SET_COMPLETE_EVT => ADV_DATA_PENDING,
        esp_gap_ble_cb_event_t_ESP_GAP_BLE_SCAN_RSP_DATA_RAW_SET_COMPLETE_EVT => SCAN_RSP_PENDING,
        esp_gap_ble_cb_event_t_ESP_GAP_BLE_ADV_START_COMPLETE_EVT => {
            let status = unsafe { (*param).adv_start_cmpl.status };
            if status == esp_bt_status_t_ESP_BT_STATUS_SUCCESS {
                log::info!("BLE GAP: advertising started");
            } else {
                log::warn!("BLE GAP: advertising start failed (status={})", status);
            }
            return;
        }
        esp_gap_ble_cb_event_t_ESP_GAP_BLE_ADV_STOP_COMPLETE_EVT => {
            log::info!("BLE GAP: advertising stopped");
            return;
        }
        _ => return,
    };

    let pending = BLE_ADV_CONFIG_PENDING.fetch_and(!cleared, AtomicOrdering::AcqRel) & !cleared;
    if pending == 0 && BLE_ADV_REQUESTED.load(AtomicOrdering::Acquire) {
        let ret = start_advertising();
        if ret != ESP_OK as i32 {
            log::warn!("BLE GAP: start_advertising failed ({})", ret);
        }
    }
}

#[cfg(target_os = "espidf")]
unsafe fn send_write_response(
    gatts_if: esp_idf_svc::sys::esp_gatt_if_t,
    p: &esp_idf_svc::sys::esp_ble_gatts_cb_param_t_gatts_write_evt_param,
    status: esp_idf_svc::sys::esp_gatt_status_t,
) {
    use esp_idf_svc::sys::*;
    if !p.need_rsp {
        return;
    }
    let ret = unsafe {
        esp_ble_gatts_send_response(gatts_if, p.conn_id, p.trans_id, status, core::ptr::null_mut())
    };
    if ret != ESP_OK as i32 {
        log::warn!("BLE GATTS: write response failed ({})", ret);
    }
}

/// Answer one prepare-write chunk by echoing it back.
#[cfg(target_os = "espidf")]
unsafe fn send_prepare_response(
    gatts_if: esp_idf_svc::sys::esp_gatt_if_t,
    p: &esp_idf_svc::sys::esp_ble_gatts_cb_param_t_gatts_write_evt_param,
    data: &[u8],
    status: esp_idf_svc::sys::esp_gatt_status_t,
) {
    use esp_idf_svc::sys::*;
    if !p.need_rsp {
        return;
    }
    let mut rsp: esp_gatt_rsp_t = unsafe { core::mem::zeroed() };
    let value = unsafe { &mut rsp.attr_value };
    value.handle = p.handle;
    value.offset = p.offset;
    let len = data.len().min(value.value.len());
    value.value[..len].copy_from_slice(&data[..len]);
    value.len = len as u16;
    let ret = unsafe { esp_ble_gatts_send_response(gatts_if, p.conn_id, p.trans_id, status, &mut rsp) };
    if ret != ESP_OK as i32 {
        log::warn!("BLE GATTS: prepare response failed ({})", ret);
    }
}

#[cfg(target_os = "espidf")]
fn gatt_status_for(outcome: Result<CommandKind, CommandError>) -> esp_idf_svc::sys::esp_gatt_status_t {
    use esp_idf_svc::sys::*;
    match outcome {
        Ok(_) => esp_gatt_status_t_ESP_GATT_OK,
        Err(CommandError::Busy) => esp_gatt_status_t_ESP_GATT_BUSY,
        Err(CommandError::Malformed) => esp_gatt_status_t_ESP_GATT_ILLEGAL_PARAMETER,
        Err(CommandError::OutOfRange) => esp_gatt_status_t_ESP_GATT_OUT_OF_RANGE,
    }
}

/// Tail of a command write once the GATT response is out.  The `ACK:`
/// line was already published before the enqueue.
#[cfg(target_os = "espidf")]
fn report_write(outcome: Result<CommandKind, CommandError>) {
    use crate::events::{Event, push_event};
    match outcome {
        Ok(_) => {
            if !push_event(Event::CommandQueued) {
                log::warn!("BLE GATTS: event queue full, wake-up dropped");
            }
        }
        Err(_) => notify_status(&write_status(outcome).to_line()),
    }
}

#[cfg(target_os = "espidf")]
unsafe extern "C" fn ble_gatts_event_handler(
    event: esp_idf_svc::sys::esp_gatts_cb_event_t,
    gatts_if: esp_idf_svc::sys::esp_gatt_if_t,
    param: *mut esp_idf_svc::sys::esp_ble_gatts_cb_param_t,
) {
    use crate::events::{Event, push_event};
    use esp_idf_svc::sys::*;

    BLE_GATTS_IF.store(gatts_if, AtomicOrdering::Relaxed);

    match event {
        esp_gatts_cb_event_t_ESP_GATTS_REG_EVT => {
            log::info!("BLE GATTS: app registered (if={})", gatts_if);
            let mut svc_id = esp_gatt_srvc_id_t {
                id: esp_gatt_id_t {
                    uuid: uuid128_to_esp(SERVICE_UUID),
                    inst_id: 0,
                },
                is_primary: true,
            };
            // Service + 2 characteristics (2 handles each) + CCCD.
            unsafe { esp_ble_gatts_create_service(gatts_if, &mut svc_id, 8) };
        }
        esp_gatts_cb_event_t_ESP_GATTS_CREATE_EVT => {
            let svc_handle = unsafe { (*param).create.service_handle };
            BLE_SVC_HANDLE.store(svc_handle, AtomicOrdering::Relaxed);
            log::info!("BLE GATTS: service created (handle={})", svc_handle);
            unsafe {
                esp_ble_gatts_start_service(svc_handle);
                BLE_CHAR_STEP.store(1, AtomicOrdering::Relaxed);
                add_gatt_char(
                    svc_handle,
                    CHAR_COMMAND,
                    ESP_GATT_PERM_WRITE,
                    ESP_GATT_CHAR_PROP_BIT_WRITE,
                );
            }
        }
        esp_gatts_cb_event_t_ESP_GATTS_ADD_CHAR_EVT => {
            let handle = unsafe { (*param).add_char.attr_handle };
            let svc_handle = BLE_SVC_HANDLE.load(AtomicOrdering::Relaxed);
            match BLE_CHAR_STEP.load(AtomicOrdering::Relaxed) {
                1 => {
                    BLE_COMMAND_CHAR_HANDLE.store(handle, AtomicOrdering::Relaxed);
                    log::info!("BLE GATTS: command char (handle={})", handle);
                    BLE_CHAR_STEP.store(2, AtomicOrdering::Relaxed);
                    unsafe {
                        add_gatt_char(
                            svc_handle,
                            CHAR_STATUS,
                            ESP_GATT_PERM_READ,
                            ESP_GATT_CHAR_PROP_BIT_READ | ESP_GATT_CHAR_PROP_BIT_NOTIFY,
                        );
                    }
                }
                2 => {
                    BLE_STATUS_CHAR_HANDLE.store(handle, AtomicOrdering::Relaxed);
                    log::info!("BLE GATTS: status char (handle={})", handle);
                    BLE_CHAR_STEP.store(3, AtomicOrdering::Relaxed);
                    let mut cccd = uuid16_to_esp(CCCD_UUID);
                    let ret = unsafe {
                        esp_ble_gatts_add_char_descr(
                            svc_handle,
                            &mut cccd,
                            (ESP_GATT_PERM_READ | ESP_GATT_PERM_WRITE) as esp_gatt_perm_t,
                            core::ptr::null_mut(),
                            core::ptr::null_mut(),
                        )
                    };
                    if ret != ESP_OK as i32 {
                        log::error!("BLE GATTS: add CCCD failed ({})", ret);
                    }
                }
                _ => {}
            }
        }
        esp_gatts_cb_event_t_ESP_GATTS_ADD_CHAR_DESCR_EVT => {
            let handle = unsafe { (*param).add_char_descr.attr_handle };
            BLE_STATUS_CCCD_HANDLE.store(handle, AtomicOrdering::Relaxed);
            BLE_CHAR_STEP.store(4, AtomicOrdering::Relaxed);
            log::info!("BLE GATTS: status CCCD (handle={}), all registered", handle);
        }
        esp_gatts_cb_event_t_ESP_GATTS_CONNECT_EVT => {
            let conn_id = unsafe { (*param).connect.conn_id };
            BLE_CONN_ID.store(conn_id, AtomicOrdering::Relaxed);
            BLE_LINK_UP.store(true, AtomicOrdering::Release);
            log::info!("BLE GATTS: client connected (conn_id={})", conn_id);
            if !push_event(Event::LinkEstablished) {
                log::warn!("BLE GATTS: event queue full, link-up left to reconcile");
            }
        }
        esp_gatts_cb_event_t_ESP_GATTS_DISCONNECT_EVT => {
            BLE_LINK_UP.store(false, AtomicOrdering::Release);
            BLE_NOTIFY_ENABLED.store(false, AtomicOrdering::Release);
            if let Ok(mut prepared) = BLE_PREPARED.lock() {
                prepared.reset();
            }
            log::info!("BLE GATTS: client disconnected");
            if !push_event(Event::LinkLost) {
                log::warn!("BLE GATTS: event queue full, link-down left to reconcile");
            }
        }
        esp_gatts_cb_event_t_ESP_GATTS_WRITE_EVT => {
            let p = unsafe { &(*param).write };
            let data: &[u8] = if p.value.is_null() {
                &[]
            } else {
                unsafe { core::slice::from_raw_parts(p.value, p.len as usize) }
            };

            let command_handle = BLE_COMMAND_CHAR_HANDLE.load(AtomicOrdering::Relaxed);
            if p.is_prep {
                let status = if p.handle != command_handle {
                    esp_gatt_status_t_ESP_GATT_REQ_NOT_SUPPORTED
                } else {
                    match BLE_PREPARED.lock().map(|mut w| w.append(p.offset, data)) {
                        Ok(Ok(())) => esp_gatt_status_t_ESP_GATT_OK,
                        Ok(Err(PrepareError::InvalidOffset)) => esp_gatt_status_t_ESP_GATT_INVALID_OFFSET,
                        Ok(Err(PrepareError::TooLong)) => esp_gatt_status_t_ESP_GATT_INVALID_ATTR_LEN,
                        Err(_) => esp_gatt_status_t_ESP_GATT_INTERNAL_ERROR,
                    }
                };
                unsafe { send_prepare_response(gatts_if, p, data, status) };
            } else if p.handle == command_handle {
                let outcome = ingest_with(&COMMAND_QUEUE, data, |kind| {
                    notify_status(&Status::Accepted(kind).to_line());
                });
                unsafe { send_write_response(gatts_if, p, gatt_status_for(outcome)) };
                report_write(outcome);
            } else if p.handle == BLE_STATUS_CCCD_HANDLE.load(AtomicOrdering::Relaxed) {
                let enabled = data.first().is_some_and(|b| b & 0x01 != 0);
                BLE_NOTIFY_ENABLED.store(enabled, AtomicOrdering::Release);
                log::info!("BLE GATTS: status notifications {}", if enabled { "on" } else { "off" });
                unsafe { send_write_response(gatts_if, p, esp_gatt_status_t_ESP_GATT_OK) };
            } else {
                unsafe { send_write_response(gatts_if, p, esp_gatt_status_t_ESP_GATT_WRITE_NOT_PERMIT) };
            }
        }
        esp_gatts_cb_event_t_ESP_GATTS_EXEC_WRITE_EVT => {
            let p = unsafe { &(*param).exec_write };
            let execute = u32::from(p.exec_write_flag) == ESP_GATT_PREP_WRITE_EXEC;
            let outcome = BLE_PREPARED.lock().ok().and_then(|mut w| {
                w.execute(&COMMAND_QUEUE, execute, |kind| {
                    notify_status(&Status::Accepted(kind).to_line());
                })
            });
            let status = outcome.map_or(esp_gatt_status_t_ESP_GATT_OK, gatt_status_for);
            let ret = unsafe {
                esp_ble_gatts_send_response(gatts_if, p.conn_id, p.trans_id, status, core::ptr::null_mut())
            };
            if ret != ESP_OK as i32 {
                log::warn!("BLE GATTS: exec write response failed ({})", ret);
            }
            if let Some(outcome) = outcome {
                report_write(outcome);
            }
        }
        esp_gatts_cb_event_t_ESP_GATTS_READ_EVT => {
            let p = unsafe { &(*param).read };
            let mut rsp: esp_gatt_rsp_t = unsafe { core::mem::zeroed() };
            let value = unsafe { &mut rsp.attr_value };
            value.handle = p.handle;
            if p.handle == BLE_STATUS_CHAR_HANDLE.load(AtomicOrdering::Relaxed) {
                if let Ok(line) = BLE_STATUS_VALUE.lock() {
                    let bytes = line.as_bytes();
                    value.value[..bytes.len()].copy_from_slice(bytes);
                    value.len = bytes.len() as u16;
                }
            } else if p.handle == BLE_STATUS_CCCD_HANDLE.load(AtomicOrdering::Relaxed) {
                value.value[0] = u8::from(BLE_NOTIFY_ENABLED.load(AtomicOrdering::Acquire));
                value.len = 2;
            }
            unsafe {
                esp_ble_gatts_send_response(gatts_if, p.conn_id, p.trans_id, esp_gatt_status_t_ESP_GATT_OK, &mut rsp);
            }
        }
        _ => {}
    }
}

// ───────────────────────────────────────────────────────────────
// Channel (main-loop context)
// ───────────────────────────────────────────────────────────────

pub struct BleCommandChannel<'q> {
    state: ConnectionState,
    device_name: heapless::String<MAX_DEVICE_NAME_LEN>,
    queue: &'q CommandQueue,
    last_status: heapless::String<MAX_STATUS_LEN>,
    stack_up: bool,
    #[cfg(not(target_os = "espidf"))]
    sim_advertise_failures: u8,
}

impl<'q> BleCommandChannel<'q> {
    pub fn new(device_name: heapless::String<MAX_DEVICE_NAME_LEN>, queue: &'q CommandQueue) -> Self {
        Self {
            state: ConnectionState::Idle,
            device_name,
            queue,
            last_status: heapless::String::new(),
            stack_up: false,
            #[cfg(not(target_os = "espidf"))]
            sim_advertise_failures: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Current status characteristic value.  On target this includes
    /// lines published from the GATTS callback.
    #[cfg(target_os = "espidf")]
    pub fn last_status(&self) -> heapless::String<MAX_STATUS_LEN> {
        BLE_STATUS_VALUE
            .lock()
            .map(|value| value.clone())
            .unwrap_or_else(|_| self.last_status.clone())
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn last_status(&self) -> heapless::String<MAX_STATUS_LEN> {
        self.last_status.clone()
    }

    /// Bring up the radio stack (once) and start advertising.
    ///
    /// A stack failure is returned.  An advertising failure is only logged;
    /// the channel stays Idle and [`maintain`](Self::maintain) retries it.
    pub fn start(&mut self) -> Result<(), CommsError> {
        if !self.stack_up {
            self.platform_start()?;
            self.stack_up = true;
        }
        if let Err(e) = self.on_advertise_start() {
            warn!("BLE: {}, will retry", e);
        }
        Ok(())
    }

    /// Reconcile with the radio's latched link flag and restart advertising
    /// if it is not running.  Called from the main loop on every pass.
    pub fn maintain(&mut self, link_up: bool) -> Result<(), CommsError> {
        if !self.stack_up {
            return Ok(());
        }
        match (link_up, self.state) {
            (true, ConnectionState::Idle | ConnectionState::Advertising) => {
                self.on_link_established();
                Ok(())
            }
            (false, ConnectionState::Connected) => self.on_link_lost(),
            (false, ConnectionState::Idle) => self.on_advertise_start(),
            _ => Ok(()),
        }
    }

    /// Begin broadcasting the service UUID and device name.  No effect if
    /// already advertising or connected.
    pub fn on_advertise_start(&mut self) -> Result<(), CommsError> {
        if self.state != ConnectionState::Idle {
            debug!("BLE: advertise request ignored ({:?})", self.state);
            return Ok(());
        }
        self.platform_advertise()?;
        self.state = ConnectionState::Advertising;
        info!("BLE: advertising as '{}'", self.device_name);
        Ok(())
    }

    pub fn on_link_established(&mut self) {
        info!("BLE: central connected");
        self.state = ConnectionState::Connected;
    }

    /// The central went away: resume advertising without outside help.
    pub fn on_link_lost(&mut self) -> Result<(), CommsError> {
        info!("BLE: central disconnected");
        if self.state == ConnectionState::Connected {
            self.state = ConnectionState::Idle;
        }
        self.on_advertise_start()
    }

    /// Handle one command write.  Parses, enqueues, and reports the outcome
    /// on the status characteristic.  Returns immediately.
    ///
    /// This is the host-side entry point.  On target the GATTS callback
    /// runs the same [`ingest_with`] path and writes the same status value.
    pub fn on_command_write(&mut self, payload: &[u8]) -> Result<CommandKind, CommandError> {
        let queue = self.queue;
        let outcome = ingest_with(queue, payload, |kind| self.publish(Status::Accepted(kind)));
        if outcome.is_err() {
            self.publish(write_status(outcome));
        }
        outcome
    }

    /// Set and notify the status characteristic.
    pub fn publish(&mut self, status: Status) {
        self.last_status = status.to_line();
        notify_status(&self.last_status);
    }

    // ── Platform-specific ─────────────────────────────────────

    #[cfg(target_os = "espidf")]
    fn platform_start(&mut self) -> Result<(), CommsError> {
        use esp_idf_svc::sys::*;

        let check = |ret: i32, what: &str| {
            if ret == ESP_OK as i32 {
                Ok(())
            } else {
                log::error!("BLE: {} failed ({})", what, ret);
                Err(CommsError::BleInitFailed(ret))
            }
        };

        unsafe {
            // Release classic BT memory (BLE-only mode saves ~30 KB).
            esp_bt_controller_mem_release(esp_bt_mode_t_ESP_BT_MODE_CLASSIC_BT);

            let mut bt_cfg = esp_bt_controller_config_t::default();
            check(esp_bt_controller_init(&mut bt_cfg), "bt_controller_init")?;
            check(esp_bt_controller_enable(esp_bt_mode_t_ESP_BT_MODE_BLE), "bt_controller_enable")?;
            check(esp_bluedroid_init(), "bluedroid_init")?;
            check(esp_bluedroid_enable(), "bluedroid_enable")?;

            check(esp_ble_gap_register_callback(Some(ble_gap_event_handler)), "gap_register")?;
            check(esp_ble_gatts_register_callback(Some(ble_gatts_event_handler)), "gatts_register")?;
            check(esp_ble_gatts_app_register(0), "gatts_app_register")?;

            let name = std::ffi::CString::new(self.device_name.as_str())
                .map_err(|_| CommsError::BleInitFailed(ESP_ERR_INVALID_ARG as i32))?;
            check(esp_ble_gap_set_device_name(name.as_ptr()), "set_device_name")?;

            let mut adv = advertising_payload(&self.device_name);
            let mut scan_rsp = scan_response_payload(SERVICE_UUID);
            check(
                esp_ble_gap_config_adv_data_raw(adv.as_mut_ptr(), adv.len() as u32),
                "config_adv_data_raw",
            )?;
            check(
                esp_ble_gap_config_scan_rsp_data_raw(scan_rsp.as_mut_ptr(), scan_rsp.len() as u32),
                "config_scan_rsp_data_raw",
            )?;
        }

        info!("BLE(espidf): Bluedroid stack initialized");
        Ok(())
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_start(&mut self) -> Result<(), CommsError> {
        info!("BLE(sim): stack up (service {:032x})", SERVICE_UUID);
        Ok(())
    }

    #[cfg(target_os = "espidf")]
    fn platform_advertise(&mut self) -> Result<(), CommsError> {
        use esp_idf_svc::sys::ESP_OK;
        BLE_ADV_REQUESTED.store(true, AtomicOrdering::Release);
        // Still waiting on the raw payloads: the GAP callback starts it.
        if BLE_ADV_CONFIG_PENDING.load(AtomicOrdering::Acquire) != 0 {
            return Ok(());
        }
        let ret = start_advertising();
        if ret != ESP_OK as i32 {
            return Err(CommsError::AdvertiseFailed(ret));
        }
        Ok(())
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_advertise(&mut self) -> Result<(), CommsError> {
        if self.sim_advertise_failures > 0 {
            self.sim_advertise_failures -= 1;
            return Err(CommsError::AdvertiseFailed(-1));
        }
        debug!("BLE(sim): advertising '{}'", self.device_name);
        Ok(())
    }

    /// Make the next `n` advertise attempts fail.
    #[cfg(not(target_os = "espidf"))]
    pub fn sim_fail_advertise(&mut self, n: u8) {
        self.sim_advertise_failures = n;
    }
}

/// Move progress is pushed to the remote as status notifications.
impl EventSink for BleCommandChannel<'_> {
    fn emit(&mut self, event: &AppEvent) {
        if let Some(status) = event.status() {
            self.publish(status);
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Tests
// ───────────────────────────────────────────────────────────────
