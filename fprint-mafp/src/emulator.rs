//! Sensor emulator
//!
//! A match-on-chip module in software, speaking the same frames over a
//! [`MemoryTransport`]. Tests and demos script it through a
//! [`SensorHandle`]: queue finger touches, inject failure codes, corrupt
//! CRCs or preload stored templates.
//!
//! A "finger" is just a number. Two samples match when they came from the
//! same number.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use byteorder::{BigEndian, ByteOrder};
use bytes::BytesMut;
use fprint_transport::{MemoryTransport, Transport};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::codec::Decoder;
use tracing::{debug, trace, warn};

use crate::codec::FrameCodec;
use crate::command::Command;
use crate::constants::record::RECORD_SIZE;
use crate::constants::{result, DEFAULT_ADDRESS, HANDSHAKE_CODE, MAX_PAYLOAD_SIZE};
use crate::packet::{split_data, Frame, Mark};
use crate::response::TemplateTable;
use crate::template::TemplateRecord;

/// How long the emulator waits for input before checking again
const IDLE_WAIT: Duration = Duration::from_secs(60);

/// One finger placed on the sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Touch {
    pub finger: u32,
    /// Image errors reported before the image is taken
    pub image_errors: u32,
    /// Feature extraction fails once with "messy image"
    pub messy: bool,
}

impl Touch {
    pub fn finger(finger: u32) -> Self {
        Self {
            finger,
            image_errors: 0,
            messy: false,
        }
    }

    pub fn with_image_errors(mut self, errors: u32) -> Self {
        self.image_errors = errors;
        self
    }

    pub fn messy(mut self) -> Self {
        self.messy = true;
        self
    }
}

/// Emulator settings
#[derive(Debug, Clone)]
pub struct SensorEmulator {
    name: String,
    max_id: u16,
    data_chunk: usize,
    description: String,
    version: u32,
}

impl SensorEmulator {
    pub fn new() -> Self {
        Self {
            name: "mafp-emu".to_string(),
            max_id: 100,
            data_chunk: MAX_PAYLOAD_SIZE,
            description: "MAFP-EMU".to_string(),
            version: 0x0001_0000,
        }
    }

    /// Name of the host side endpoint, which drivers use as serial
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_max_id(mut self, max_id: u16) -> Self {
        self.max_id = max_id;
        self
    }

    /// Payload size of outgoing data frames; small values force multi-frame transfers
    pub fn with_data_chunk(mut self, chunk: usize) -> Self {
        self.data_chunk = chunk.clamp(1, MAX_PAYLOAD_SIZE);
        self
    }

    pub fn with_version(mut self, description: impl Into<String>, version: u32) -> Self {
        self.description = description.into();
        self.version = version;
        self
    }

    /// Start serving; returns the host side of the link and the script handle
    ///
    /// Must be called within a Tokio runtime. The emulator stops once the
    /// host side is dropped.
    pub fn spawn(self) -> (MemoryTransport, SensorHandle) {
        let (host, mut sensor) = MemoryTransport::pair(self.name.clone(), format!("{}-sensor", self.name));
        let handle = SensorHandle {
            state: Arc::new(Mutex::new(SensorState::default())),
        };

        let module = Module {
            config: self,
            state: handle.state.clone(),
            upload: None,
        };
        let task = tokio::spawn(async move {
            if let Err(e) = sensor.connect().await {
                warn!(error = %e, "Emulator could not claim its link");
                return;
            }
            module.serve(sensor).await;
        });
        handle.state.lock().task = Some(task);

        (host, handle)
    }
}

impl Default for SensorEmulator {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Default)]
struct SensorState {
    touches: VecDeque<Touch>,
    /// Finger resting on the sensor since its image was taken
    down: Option<Touch>,
    /// Last image taken
    image: Option<Touch>,
    buffers: HashMap<u8, u32>,
    merged: Option<u32>,
    slots: BTreeMap<u16, u32>,
    infos: HashMap<u16, [u8; RECORD_SIZE]>,
    failures: HashMap<Command, VecDeque<u8>>,
    area_rejects: u32,
    init_status: u8,
    table_oversize: bool,
    corrupt_after: Option<usize>,
    log: Vec<Command>,
    task: Option<JoinHandle<()>>,
}

/// Script and inspect a running emulator
#[derive(Clone)]
pub struct SensorHandle {
    state: Arc<Mutex<SensorState>>,
}

impl SensorHandle {
    /// Queue a finger touch
    pub fn touch(&self, touch: Touch) {
        self.state.lock().touches.push_back(touch);
    }

    /// Queue `count` plain touches of one finger
    pub fn touch_times(&self, finger: u32, count: usize) {
        let mut state = self.state.lock();
        state
            .touches
            .extend(std::iter::repeat(Touch::finger(finger)).take(count));
    }

    /// Touches not consumed yet
    pub fn pending_touches(&self) -> usize {
        self.state.lock().touches.len()
    }

    /// Answer the next `command` with `code` instead of handling it
    pub fn fail_next(&self, command: Command, code: u8) {
        self.state
            .lock()
            .failures
            .entry(command)
            .or_default()
            .push_back(code);
    }

    /// Report the next `count` duplicate-area tests as overlapping
    pub fn reject_areas(&self, count: u32) {
        self.state.lock().area_rejects = count;
    }

    pub fn set_init_status(&self, status: u8) {
        self.state.lock().init_status = status;
    }

    /// Answer template table requests with the oversize code
    pub fn set_table_oversize(&self, oversize: bool) {
        self.state.lock().table_oversize = oversize;
    }

    /// Flip the CRC of the next outgoing frame
    pub fn corrupt_next_crc(&self) {
        self.corrupt_crc_after(0);
    }

    /// Flip the CRC of an outgoing frame after letting `skip` frames through
    pub fn corrupt_crc_after(&self, skip: usize) {
        self.state.lock().corrupt_after = Some(skip);
    }

    /// Store a template directly, as if enrolled earlier
    pub fn preload(&self, id: u16, finger: u32, record: Option<&TemplateRecord>) {
        let mut state = self.state.lock();
        state.slots.insert(id, finger);
        if let Some(record) = record {
            state.infos.insert(id, record.encode());
        }
    }

    pub fn stored_ids(&self) -> Vec<u16> {
        self.state.lock().slots.keys().copied().collect()
    }

    pub fn stored_finger(&self, id: u16) -> Option<u32> {
        self.state.lock().slots.get(&id).copied()
    }

    /// Record kept next to a slot, if a non-empty one was written
    pub fn template_info(&self, id: u16) -> Option<TemplateRecord> {
        let state = self.state.lock();
        let raw = state.infos.get(&id)?;
        if raw.iter().all(|b| *b == 0) {
            return None;
        }
        TemplateRecord::decode(raw).ok()
    }

    /// Every command received so far, in order
    pub fn commands(&self) -> Vec<Command> {
        self.state.lock().log.clone()
    }

    pub fn count(&self, command: Command) -> usize {
        self.state.lock().log.iter().filter(|c| **c == command).count()
    }

    /// Stop the emulator task
    pub fn shutdown(&self) {
        if let Some(task) = self.state.lock().task.take() {
            task.abort();
        }
    }
}

/// Pending host-to-module data phase
struct Upload {
    id: u16,
    data: BytesMut,
}

struct Module {
    config: SensorEmulator,
    state: Arc<Mutex<SensorState>>,
    upload: Option<Upload>,
}

impl Module {
    async fn serve(mut self, mut transport: MemoryTransport) {
        let mut codec = FrameCodec::new();
        let mut rx = BytesMut::new();

        loop {
            let chunk = match transport.receive(IDLE_WAIT).await {
                Ok(chunk) => chunk,
                Err(fprint_transport::Error::ReadTimeout) => continue,
                Err(e) => {
                    debug!(error = %e, "Emulator link closed");
                    return;
                }
            };
            rx.extend_from_slice(&chunk);

            loop {
                let frame = match codec.decode(&mut rx) {
                    Ok(Some(frame)) => frame,
                    Ok(None) => break,
                    Err(e) => {
                        warn!(error = %e, "Emulator dropped malformed input");
                        rx.clear();
                        break;
                    }
                };

                for reply in self.handle(frame) {
                    let Ok(mut raw) = reply.encode() else {
                        warn!("Emulator built an oversize frame");
                        continue;
                    };
                    if self.take_corruption() {
                        let last = raw.len() - 1;
                        raw[last] ^= 0x01;
                        debug!("Emulator corrupted the CRC of {}", reply);
                    }
                    if transport.send(&raw).await.is_err() {
                        return;
                    }
                }
            }
        }
    }

    fn take_corruption(&self) -> bool {
        let mut state = self.state.lock();
        match state.corrupt_after {
            Some(0) => {
                state.corrupt_after = None;
                true
            }
            Some(n) => {
                state.corrupt_after = Some(n - 1);
                false
            }
            None => false,
        }
    }

    fn handle(&mut self, frame: Frame) -> Vec<Frame> {
        match frame.mark {
            Mark::Command => self.command(frame),
            Mark::Data | Mark::DataEnd => self.upload(frame),
            other => {
                warn!(mark = %other, "Emulator ignores unexpected frame");
                Vec::new()
            }
        }
    }

    fn upload(&mut self, frame: Frame) -> Vec<Frame> {
        let Some(upload) = self.upload.as_mut() else {
            warn!("Emulator got data without a pending upload");
            return vec![Frame::new(Mark::DataAnswer, vec![result::FAIL])];
        };
        upload.data.extend_from_slice(&frame.payload);
        if frame.mark == Mark::Data {
            return Vec::new();
        }

        let Some(upload) = self.upload.take() else {
            return Vec::new();
        };
        if upload.data.len() != RECORD_SIZE {
            return vec![Frame::new(Mark::DataAnswer, vec![result::FAIL])];
        }

        let mut record = [0u8; RECORD_SIZE];
        record.copy_from_slice(&upload.data);
        self.state.lock().infos.insert(upload.id, record);
        vec![Frame::new(Mark::DataAnswer, vec![result::SUCCESS])]
    }

    fn command(&mut self, frame: Frame) -> Vec<Frame> {
        let Some((&code, params)) = frame.payload.split_first() else {
            return vec![Frame::answer(result::FAIL, &[])];
        };
        let Ok(command) = Command::try_from(code) else {
            warn!(code, "Emulator got an unknown command");
            return vec![Frame::answer(result::FAIL, &[])];
        };
        trace!(%command, params = %hex::encode(params), "Emulator command");

        let mut state = self.state.lock();
        state.log.push(command);

        if let Some(code) = state.failures.get_mut(&command).and_then(VecDeque::pop_front) {
            debug!(%command, code, "Emulator injects a failure");
            return vec![Frame::answer(code, &[])];
        }

        let id_param = |offset: usize| {
            params
                .get(offset..offset + 2)
                .map(BigEndian::read_u16)
                .unwrap_or_default()
        };

        match command {
            Command::Handshake => {
                if params != HANDSHAKE_CODE {
                    return vec![Frame::answer(result::FAIL, &[])];
                }
                let mut boot = HANDSHAKE_CODE.to_vec();
                boot.push(1);
                let mut description = [0u8; 16];
                let text = self.config.description.as_bytes();
                let len = text.len().min(description.len());
                description[..len].copy_from_slice(&text[..len]);
                boot.extend_from_slice(&description);
                boot.extend_from_slice(&self.config.version.to_be_bytes());
                vec![Frame::answer(result::SUCCESS, &boot)]
            }

            Command::GetInitStatus => vec![Frame::answer(result::SUCCESS, &[state.init_status])],

            Command::GetMaxId => vec![Frame::answer(result::SUCCESS, &self.config.max_id.to_be_bytes())],

            Command::GetTemplateNum => {
                let used = state.slots.len() as u16;
                vec![Frame::answer(result::SUCCESS, &used.to_be_bytes())]
            }

            Command::GetTemplateTable => {
                if state.table_oversize {
                    return vec![Frame::answer(result::TPL_NUM_OVERSIZE, &[])];
                }
                let mut table = TemplateTable::new();
                for id in state.slots.keys() {
                    table.set(*id, true);
                }
                self.with_data(table.encode())
            }

            Command::GetTemplateInfo => {
                let id = id_param(0);
                if !state.slots.contains_key(&id) {
                    return vec![Frame::answer(result::NOT_FOUND, &[])];
                }
                let record = state.infos.get(&id).copied().unwrap_or([0u8; RECORD_SIZE]);
                self.with_data(record.to_vec())
            }

            Command::SaveTemplateInfo => {
                self.upload = Some(Upload {
                    id: id_param(0),
                    data: BytesMut::new(),
                });
                vec![Frame::answer(result::SUCCESS, &[])]
            }

            Command::GetImage => {
                if state.down.take().is_some() {
                    return vec![Frame::answer(result::NO_FINGER, &[])];
                }
                let Some(touch) = state.touches.front_mut() else {
                    return vec![Frame::answer(result::NO_FINGER, &[])];
                };
                if touch.image_errors > 0 {
                    touch.image_errors -= 1;
                    return vec![Frame::answer(result::IMAGE_ERROR, &[])];
                }

                let touch = state.touches.pop_front();
                state.down = touch;
                state.image = touch;
                vec![Frame::answer(result::SUCCESS, &[])]
            }

            Command::GenFeature => {
                let buffer = params.first().copied().unwrap_or(1);
                let Some(image) = state.image.as_mut() else {
                    return vec![Frame::answer(result::FAIL, &[])];
                };
                if image.messy {
                    image.messy = false;
                    return vec![Frame::answer(result::FEATURE_MESSY, &[])];
                }
                let finger = image.finger;
                state.buffers.insert(buffer, finger);
                vec![Frame::answer(result::SUCCESS, &[])]
            }

            Command::DupAreaTest => {
                if state.area_rejects > 0 {
                    state.area_rejects -= 1;
                    return vec![Frame::answer(result::FAIL, &[])];
                }
                vec![Frame::answer(result::SUCCESS, &[])]
            }

            Command::Search => {
                let buffer = params.first().copied().unwrap_or(1);
                let start = id_param(1);
                let count = id_param(3);
                let Some(finger) = state.buffers.get(&buffer).copied() else {
                    return vec![Frame::answer(result::FAIL, &[])];
                };

                let hit = state
                    .slots
                    .range(start..start.saturating_add(count))
                    .find(|(_, stored)| **stored == finger)
                    .map(|(id, _)| *id);
                match hit {
                    Some(id) => {
                        let mut data = id.to_be_bytes().to_vec();
                        data.extend_from_slice(&100u16.to_be_bytes());
                        vec![Frame::answer(result::SUCCESS, &data)]
                    }
                    None => vec![Frame::answer(result::NOT_FOUND, &[])],
                }
            }

            Command::MatchWithFid => {
                let buffer = params.first().copied().unwrap_or(1);
                let id = id_param(1);
                let scanned = state.buffers.get(&buffer).copied();
                match (scanned, state.slots.get(&id)) {
                    (Some(finger), Some(stored)) if finger == *stored => {
                        vec![Frame::answer(result::SUCCESS, &100u16.to_be_bytes())]
                    }
                    (_, None) => vec![Frame::answer(result::NOT_FOUND, &[])],
                    _ => vec![Frame::answer(result::NO_MATCH, &[])],
                }
            }

            Command::GenTemplate => {
                state.merged = state.buffers.get(&1).copied();
                if state.merged.is_none() {
                    return vec![Frame::answer(result::FAIL, &[])];
                }
                vec![Frame::answer(result::SUCCESS, &[])]
            }

            Command::SaveTemplate => {
                let id = id_param(0);
                let Some(finger) = state.merged.take() else {
                    return vec![Frame::answer(result::FAIL, &[])];
                };
                state.slots.insert(id, finger);
                state.buffers.clear();
                vec![Frame::answer(result::SUCCESS, &[])]
            }

            Command::ReadTemplate => {
                let id = id_param(0);
                let code = if state.slots.contains_key(&id) {
                    result::SUCCESS
                } else {
                    result::NOT_FOUND
                };
                vec![Frame::answer(code, &[])]
            }

            Command::DeleteTemplate => {
                let start = id_param(0);
                let count = id_param(2).max(1);
                for id in start..start.saturating_add(count) {
                    state.slots.remove(&id);
                    state.infos.remove(&id);
                }
                vec![Frame::answer(result::SUCCESS, &[])]
            }

            Command::Empty => {
                state.slots.clear();
                state.infos.clear();
                vec![Frame::answer(result::SUCCESS, &[])]
            }

            Command::Cancel | Command::Sleep => {
                state.down = None;
                vec![Frame::answer(result::SUCCESS, &[])]
            }
        }
    }

    /// Successful answer followed by a data transfer
    fn with_data(&self, data: Vec<u8>) -> Vec<Frame> {
        let mut frames = vec![Frame::answer(result::SUCCESS, &[])];
        frames.extend(split_data(DEFAULT_ADDRESS, &data, self.config.data_chunk));
        frames
    }
}
