//! Recording adapters and fixtures for tests.

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};

use crate::bridge::media::MediaFetcher;
use crate::common::error::{MediaError, MediaResult};
use crate::common::{AdapterError, AdapterResult, InboundEvent};
use crate::network::{EventSink, RoomNetwork, RoomRef, SessionNetwork, SessionRef};

/// Outbound call observed by [`FakeRoomNetwork`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomCall {
    EnsureIdentity(String),
    Join(String),
    Leave(String),
    Send { identity: String, body: String },
}

fn refused(operation: &'static str) -> AdapterError {
    AdapterError::Status {
        operation,
        status: 403,
        message: "refused by test".to_string(),
    }
}

/// Network A double: records every call, failures are switchable.
#[derive(Default)]
pub struct FakeRoomNetwork {
    calls: Mutex<Vec<RoomCall>>,
    sink: Mutex<Option<EventSink>>,
    pub fail_room: AtomicBool,
    pub fail_identity: AtomicBool,
    pub fail_join: AtomicBool,
    pub fail_leave: AtomicBool,
    pub fail_send: AtomicBool,
    /// Extra latency of `ensure_identity`, in milliseconds.
    pub identity_delay_ms: AtomicUsize,
    pub cleaned_up: AtomicBool,
}

impl FakeRoomNetwork {
    pub fn calls(&self) -> Vec<RoomCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, matches: impl Fn(&RoomCall) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| matches(c)).count()
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter_map(|c| match c {
                RoomCall::Send { identity, body } => Some((identity.clone(), body.clone())),
                _ => None,
            })
            .collect()
    }

    /// Raise an inbound event as if it came from the network.
    pub fn emit(&self, event: InboundEvent) {
        let sink = self.sink.lock().unwrap();
        sink.as_ref().expect("sink registered").send(event).unwrap();
    }

    pub fn is_registered(&self) -> bool {
        self.sink.lock().unwrap().is_some()
    }

    fn record(&self, call: RoomCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl RoomNetwork for FakeRoomNetwork {
    async fn initialize(&self) -> AdapterResult<()> {
        Ok(())
    }

    async fn cleanup(&self) {
        self.cleaned_up.store(true, Ordering::SeqCst);
    }

    async fn ensure_bridge_room(&self, alias: &str) -> AdapterResult<RoomRef> {
        if self.fail_room.load(Ordering::SeqCst) {
            return Err(refused("create room"));
        }
        Ok(RoomRef(format!("!{}:example.org", alias)))
    }

    fn register(&self, sink: EventSink) {
        *self.sink.lock().unwrap() = Some(sink);
    }

    async fn send_text(&self, identity: &str, _room: &RoomRef, body: &str) -> AdapterResult<()> {
        if self.fail_send.load(Ordering::SeqCst) {
            return Err(refused("send"));
        }
        self.record(RoomCall::Send {
            identity: identity.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }

    async fn ensure_identity(&self, name: &str) -> AdapterResult<()> {
        self.record(RoomCall::EnsureIdentity(name.to_string()));
        let delay = self.identity_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay as u64)).await;
        }
        if self.fail_identity.load(Ordering::SeqCst) {
            return Err(refused("register"));
        }
        Ok(())
    }

    async fn join_room(&self, identity: &str, _room: &RoomRef) -> AdapterResult<()> {
        self.record(RoomCall::Join(identity.to_string()));
        if self.fail_join.load(Ordering::SeqCst) {
            return Err(refused("join"));
        }
        Ok(())
    }

    async fn leave_room(&self, identity: &str, _room: &RoomRef) -> AdapterResult<()> {
        self.record(RoomCall::Leave(identity.to_string()));
        if self.fail_leave.load(Ordering::SeqCst) {
            return Err(refused("leave"));
        }
        Ok(())
    }
}

/// Network B double.
#[derive(Default)]
pub struct FakeSessionNetwork {
    sent: Mutex<Vec<String>>,
    sink: Mutex<Option<EventSink>>,
    pub fail_select: AtomicBool,
    pub fail_send: AtomicBool,
    pub cleaned_up: AtomicBool,
}

impl FakeSessionNetwork {
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub fn emit(&self, event: InboundEvent) {
        let sink = self.sink.lock().unwrap();
        sink.as_ref().expect("sink registered").send(event).unwrap();
    }

    pub fn is_registered(&self) -> bool {
        self.sink.lock().unwrap().is_some()
    }
}

#[async_trait]
impl SessionNetwork for FakeSessionNetwork {
    async fn initialize(&self) -> AdapterResult<()> {
        Ok(())
    }

    async fn cleanup(&self) {
        self.cleaned_up.store(true, Ordering::SeqCst);
    }

    async fn select_session(&self) -> AdapterResult<SessionRef> {
        if self.fail_select.load(Ordering::SeqCst) {
            return Err(AdapterError::Other("server does not exist".to_string()));
        }
        Ok(SessionRef("1".to_string()))
    }

    fn register(&self, sink: EventSink) {
        *self.sink.lock().unwrap() = Some(sink);
    }

    async fn send_to_channel(&self, body: &str) -> AdapterResult<()> {
        if self.fail_send.load(Ordering::SeqCst) {
            return Err(refused("send to channel"));
        }
        self.sent.lock().unwrap().push(body.to_string());
        Ok(())
    }
}

/// Serves fixed bytes, or fails every fetch.
pub struct FakeFetcher {
    bytes: Option<Bytes>,
    calls: AtomicUsize,
}

impl FakeFetcher {
    pub fn serving(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Some(Bytes::from(bytes)),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            bytes: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaFetcher for FakeFetcher {
    async fn fetch(&self, locator: &str) -> MediaResult<Bytes> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.bytes.clone().ok_or_else(|| MediaError::Fetch {
            locator: locator.to_string(),
            message: "connection refused".to_string(),
        })
    }
}

/// Solid-colour PNG of the given size.
pub fn png_fixture(width: u32, height: u32) -> Vec<u8> {
    let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([40, 90, 160])));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
}
