//! Test doubles shared by the integration tests: an in-memory device, an
//! in-memory artifact host and a localhost capture socket.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use stfcap_core::protocol::Quirks;
use stfcap_core::{
    ArtifactSource, Banner, CaptureError, CommandOutput, DeviceAgent, FileStat, ForwardTarget,
    Result, SessionConfig,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub const FAST: &str = "/data/local/tmp/minicap";
pub const FAST_LIB: &str = "/data/local/tmp/minicap.so";
pub const SLOW: &str = "/data/local/tmp/slow-minicap";

pub const INFO_JSON: &str = r#"{"id":0,"width":1080,"height":1920,"xdpi":403.4,"ydpi":403.0,
"size":5.5,"density":3.0,"fps":60.0,"secure":false,"rotation":0}"#;

// ── FakeDevice ───────────────────────────────────────────────────

#[derive(Default)]
struct FakeState {
    files: HashSet<String>,
    props: HashMap<String, String>,
    probe_output: String,
    probe_failures: u32,
    probes: u32,
    control_script: Vec<u8>,
    launches: Vec<Vec<String>>,
    pushes: Vec<(String, u32)>,
    kills: Vec<String>,
    forwards: Vec<ForwardTarget>,
    forward_addr: Option<SocketAddr>,
    /// How long a killed process's stdout stays open, like `adb shell`
    /// after `kill -9`.
    kill_delay: Option<Duration>,
    /// Write ends of the running capture processes' stdout.
    live: Vec<DuplexStream>,
}

/// In-memory device. Launched processes stay alive until killed or
/// crashed, like the real binary.
pub struct FakeDevice {
    state: Mutex<FakeState>,
}

impl FakeDevice {
    pub fn new() -> Self {
        let mut props = HashMap::new();
        props.insert("ro.product.cpu.abi".to_string(), "arm64-v8a".to_string());
        props.insert("ro.build.version.sdk".to_string(), "29".to_string());
        Self {
            state: Mutex::new(FakeState {
                props,
                probe_output: INFO_JSON.to_string(),
                control_script: b"PID: 1234\nINFO: Using projection\n".to_vec(),
                ..FakeState::default()
            }),
        }
    }

    pub fn with_files(self, files: &[&str]) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state.files.extend(files.iter().map(|f| f.to_string()));
        }
        self
    }

    pub fn with_forward(self, addr: SocketAddr) -> Self {
        self.state.lock().unwrap().forward_addr = Some(addr);
        self
    }

    pub fn with_control_script(self, script: &[u8]) -> Self {
        self.state.lock().unwrap().control_script = script.to_vec();
        self
    }

    pub fn with_kill_delay(self, delay: Duration) -> Self {
        self.state.lock().unwrap().kill_delay = Some(delay);
        self
    }

    pub fn with_probe_failures(self, failures: u32) -> Self {
        self.state.lock().unwrap().probe_failures = failures;
        self
    }

    pub fn without_property(self, key: &str) -> Self {
        self.state.lock().unwrap().props.remove(key);
        self
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn launches(&self) -> Vec<Vec<String>> {
        self.state.lock().unwrap().launches.clone()
    }

    pub fn launch_count(&self) -> usize {
        self.state.lock().unwrap().launches.len()
    }

    /// `-P` argument of the n-th launch.
    pub fn projection(&self, n: usize) -> String {
        let launches = self.launches();
        let args = &launches[n];
        let at = args.iter().position(|a| a == "-P").expect("no -P");
        args[at + 1].clone()
    }

    pub fn pushes(&self) -> Vec<(String, u32)> {
        self.state.lock().unwrap().pushes.clone()
    }

    pub fn probes(&self) -> u32 {
        self.state.lock().unwrap().probes
    }

    pub fn kills(&self) -> Vec<String> {
        self.state.lock().unwrap().kills.clone()
    }

    pub fn forwards(&self) -> Vec<ForwardTarget> {
        self.state.lock().unwrap().forwards.clone()
    }

    pub fn live_processes(&self) -> usize {
        self.state.lock().unwrap().live.len()
    }

    /// The capture process dies on its own.
    pub fn crash(&self) {
        self.state.lock().unwrap().live.clear();
    }

    /// Poll until at least `n` launches happened.
    pub async fn wait_for_launches(&self, n: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.launch_count() < n {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("timed out waiting for launches");
    }
}

#[async_trait]
impl DeviceAgent for FakeDevice {
    async fn run_command(&self, args: &[&str]) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        if args.contains(&"-i") {
            state.probes += 1;
            let binary = args.get(1).copied().unwrap_or_default();
            if !state.files.contains(binary) {
                return Err(CaptureError::Device {
                    command: args.join(" "),
                    message: format!("{binary}: not found"),
                });
            }
            if state.probe_failures > 0 {
                state.probe_failures -= 1;
                return Err(CaptureError::Device {
                    command: args.join(" "),
                    message: "resource busy".into(),
                });
            }
            return Ok(state.probe_output.clone());
        }
        Ok(String::new())
    }

    async fn open_command(&self, args: &[&str]) -> Result<CommandOutput> {
        let script = self.state.lock().unwrap().control_script.clone();
        let (mut writer, reader) = tokio::io::duplex(64 * 1024);
        writer.write_all(&script).await?;
        // Record only once the process is live, so a test that saw the
        // launch can also kill or crash it.
        let mut state = self.state.lock().unwrap();
        state.launches.push(args.iter().map(|a| a.to_string()).collect());
        state.live.push(writer);
        Ok(Box::new(reader))
    }

    async fn stat(&self, path: &str) -> Result<Option<FileStat>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .files
            .contains(path)
            .then_some(FileStat { size: 1, mode: 0o755 }))
    }

    async fn push(&self, _data: Bytes, path: &str, mode: u32) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.pushes.push((path.to_string(), mode));
        state.files.insert(path.to_string());
        Ok(())
    }

    async fn properties(&self) -> Result<HashMap<String, String>> {
        Ok(self.state.lock().unwrap().props.clone())
    }

    async fn forward(&self, target: &ForwardTarget) -> Result<SocketAddr> {
        let mut state = self.state.lock().unwrap();
        state.forwards.push(target.clone());
        state.forward_addr.ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotConnected, "no forward configured").into()
        })
    }

    async fn kill_by_name(&self, name: &str) -> Result<usize> {
        let (dying, delay) = {
            let mut state = self.state.lock().unwrap();
            state.kills.push(name.to_string());
            (std::mem::take(&mut state.live), state.kill_delay)
        };
        let killed = dying.len();
        if let Some(delay) = delay.filter(|_| killed > 0) {
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                drop(dying);
            });
        }
        Ok(killed)
    }
}

// ── FakeArtifacts ────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeArtifacts {
    fetched: Mutex<Vec<String>>,
}

impl FakeArtifacts {
    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }
}

#[async_trait]
impl ArtifactSource for FakeArtifacts {
    async fn fetch(&self, path: &str) -> Result<Bytes> {
        self.fetched.lock().unwrap().push(path.to_string());
        Ok(Bytes::from(format!("contents of {path}")))
    }
}

// ── Capture socket ───────────────────────────────────────────────

pub fn banner() -> Banner {
    Banner {
        version: 1,
        reserved: 24,
        pid: 1234,
        real_width: 1080,
        real_height: 1920,
        virtual_width: 720,
        virtual_height: 1280,
        orientation: 0,
        quirks: Quirks::empty(),
    }
}

pub fn jpeg(tag: u8) -> Vec<u8> {
    vec![0xFF, 0xD8, 0xFF, 0xE0, tag, tag, 0xFF, 0xD9]
}

/// Banner followed by each payload with its length prefix.
pub fn capture_stream(payloads: &[Vec<u8>]) -> Vec<u8> {
    let mut out = banner().encode().to_vec();
    for payload in payloads {
        out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        out.extend_from_slice(payload);
    }
    out
}

/// A localhost stand-in for the forwarded capture socket.
pub struct CaptureServer {
    pub addr: SocketAddr,
    accepted: Arc<Mutex<u32>>,
    handle: JoinHandle<()>,
}

impl CaptureServer {
    /// Every connection receives `stream`, then is held open until the
    /// client closes it.
    pub async fn serving(stream: Vec<u8>) -> Self {
        Self::spawn(stream, true).await
    }

    /// Every connection is closed right after accept.
    pub async fn hanging_up() -> Self {
        Self::spawn(Vec::new(), false).await
    }

    async fn spawn(stream: Vec<u8>, hold: bool) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&accepted);
        let handle = tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                *counter.lock().unwrap() += 1;
                if !hold {
                    drop(socket);
                    continue;
                }
                let stream = stream.clone();
                tokio::spawn(async move {
                    if socket.write_all(&stream).await.is_err() {
                        return;
                    }
                    let mut buf = [0u8; 1];
                    let _ = socket.read(&mut buf).await;
                });
            }
        });
        Self {
            addr,
            accepted,
            handle,
        }
    }

    pub fn accepted(&self) -> u32 {
        *self.accepted.lock().unwrap()
    }
}

impl Drop for CaptureServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Session settings with short pauses so failure paths run quickly.
pub fn fast_config() -> SessionConfig {
    let mut config = SessionConfig::default();
    config.supervisor.probe_backoff_ms = 5;
    config.reader.retry_backoff_ms = 20;
    config
}
