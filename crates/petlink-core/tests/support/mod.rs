// Scripted STOMP broker on the in-process transport.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use url::Url;

use petlink_api::stomp::{Frame, FrameDecoder, Incoming, StompCommand};
use petlink_api::transport::{MemoryConnector, MemoryListener, MemorySender};
use petlink_api::{MemoryTokenStore, SessionConfig, StompSession};
use petlink_core::DeviceChannel;

#[derive(Default)]
struct State {
    live: Option<Live>,
    connections: usize,
    /// Every SUBSCRIBE destination ever received, in order.
    subscribed: Vec<String>,
}

struct Live {
    sender: MemorySender,
    subs: BTreeMap<String, String>,
    kill: Option<oneshot::Sender<()>>,
}

/// Accepts one connection at a time, answers CONNECT, tracks subscriptions.
pub struct FakeBroker {
    state: Arc<Mutex<State>>,
    task: JoinHandle<()>,
}

impl FakeBroker {
    pub fn spawn(mut listener: MemoryListener) -> Self {
        let state = Arc::new(Mutex::new(State::default()));
        let shared = state.clone();
        let task = tokio::spawn(async move {
            while let Some(mut peer) = listener.accept().await {
                let (_idle, mut kill_rx) = oneshot::channel::<()>();
                let mut decoder = FrameDecoder::default();

                loop {
                    let text = tokio::select! {
                        _ = &mut kill_rx => break,
                        text = peer.recv() => match text {
                            Some(text) => text,
                            None => break,
                        },
                    };
                    for item in decoder.push(&text).unwrap() {
                        let Incoming::Frame(frame) = item else { continue };
                        let mut st = shared.lock().unwrap();
                        match frame.command {
                            StompCommand::Connect => {
                                st.connections += 1;
                                st.live = Some(Live {
                                    sender: peer.sender(),
                                    subs: BTreeMap::new(),
                                    kill: None,
                                });
                                peer.send(
                                    Frame::new(StompCommand::Connected)
                                        .header("version", "1.2")
                                        .header("heart-beat", "0,0")
                                        .encode(),
                                );
                            }
                            StompCommand::Subscribe => {
                                let id = frame.get("id").unwrap().to_owned();
                                let dest = frame.get("destination").unwrap().to_owned();
                                st.subscribed.push(dest.clone());
                                if let Some(live) = st.live.as_mut() {
                                    live.subs.insert(id, dest);
                                }
                            }
                            StompCommand::Unsubscribe => {
                                let id = frame.get("id").unwrap();
                                if let Some(live) = st.live.as_mut() {
                                    live.subs.remove(id);
                                }
                            }
                            _ => {}
                        }
                    }
                    // Hand the kill switch over once the session is live.
                    let mut st = shared.lock().unwrap();
                    if let Some(live) = st.live.as_mut() {
                        if live.kill.is_none() {
                            let (tx, rx) = oneshot::channel();
                            live.kill = Some(tx);
                            kill_rx = rx;
                        }
                    }
                }

                shared.lock().unwrap().live = None;
            }
        });
        Self { state, task }
    }

    /// Deliver `body` as a MESSAGE to every live subscription on `destination`.
    /// Returns how many subscriptions received it.
    pub fn publish(&self, destination: &str, body: &str) -> usize {
        let st = self.state.lock().unwrap();
        let Some(live) = st.live.as_ref() else {
            return 0;
        };
        let mut delivered = 0;
        for (id, dest) in &live.subs {
            if dest == destination {
                let frame = Frame::new(StompCommand::Message)
                    .header("subscription", id.clone())
                    .header("destination", dest.clone())
                    .header("message-id", format!("m-{delivered}"))
                    .header("content-type", "application/json")
                    .body(body);
                if live.sender.send(frame.encode()) {
                    delivered += 1;
                }
            }
        }
        delivered
    }

    /// Send raw MESSAGE frames to a given subscription id, live or not.
    pub fn publish_to(&self, subscription: &str, destination: &str, body: &str) {
        let st = self.state.lock().unwrap();
        if let Some(live) = st.live.as_ref() {
            live.sender.send(
                Frame::new(StompCommand::Message)
                    .header("subscription", subscription)
                    .header("destination", destination)
                    .body(body)
                    .encode(),
            );
        }
    }

    /// Drop the current connection as if the network failed.
    pub fn kill(&self) {
        let mut st = self.state.lock().unwrap();
        if let Some(kill) = st.live.as_mut().and_then(|l| l.kill.take()) {
            let _ = kill.send(());
        }
    }

    pub fn is_live(&self) -> bool {
        self.state.lock().unwrap().live.is_some()
    }

    pub fn connections(&self) -> usize {
        self.state.lock().unwrap().connections
    }

    /// Destinations with a live subscription, sorted.
    pub fn live_destinations(&self) -> Vec<String> {
        let st = self.state.lock().unwrap();
        let mut dests: Vec<String> = st
            .live
            .as_ref()
            .map(|l| l.subs.values().cloned().collect())
            .unwrap_or_default();
        dests.sort();
        dests
    }

    /// Live subscription ids for `destination`.
    pub fn subscription_ids(&self, destination: &str) -> Vec<String> {
        let st = self.state.lock().unwrap();
        st.live
            .as_ref()
            .map(|l| {
                l.subs
                    .iter()
                    .filter(|(_, d)| *d == destination)
                    .map(|(id, _)| id.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn subscribed_history(&self) -> Vec<String> {
        self.state.lock().unwrap().subscribed.clone()
    }
}

impl Drop for FakeBroker {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Session over the in-process transport plus a broker serving it.
pub fn memory_session() -> (StompSession<MemoryConnector>, FakeBroker) {
    let (connector, listener) = MemoryConnector::pair();
    let session = StompSession::new(
        connector,
        Url::parse("http://memory/ws").unwrap(),
        SessionConfig::default(),
        Arc::new(MemoryTokenStore::default()),
    );
    (session, FakeBroker::spawn(listener))
}

pub fn memory_channel() -> (DeviceChannel<MemoryConnector>, FakeBroker) {
    let (session, broker) = memory_session();
    (DeviceChannel::new(session, "/topic"), broker)
}

/// Poll `cond` until it holds, advancing (paused) time in small steps.
pub async fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    for _ in 0..2000 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {what}");
}
