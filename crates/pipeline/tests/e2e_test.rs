//! End-to-end scenarios over real sockets
//!
//! Wires receivers, links and sinks the way the builder does and drives
//! them from a plain TCP client.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use relay_core::{
    Cmd, CmdCode, Context, CoreError, Link, Message, Meta, MetaValue, MsgStatus, SendError,
};
use relay_links::Mpx;
use relay_pipeline::Pipeline;
use relay_receivers::{TcpReceiver, TcpReceiverConfig};

/// Terminal stub with a scripted verdict
struct ScriptedSink {
    name: String,
    verdict: Option<MsgStatus>,
    delay: Option<Duration>,
    held: Mutex<Vec<Message>>,
}

impl ScriptedSink {
    fn new(name: &str, verdict: Option<MsgStatus>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            verdict,
            delay: None,
            held: Mutex::new(Vec::new()),
        })
    }

    fn delayed(name: &str, verdict: MsgStatus, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            verdict: Some(verdict),
            delay: Some(delay),
            held: Mutex::new(Vec::new()),
        })
    }
}

impl Link for ScriptedSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn recv(&self, msg: Message) -> Result<(), SendError> {
        match (self.verdict, self.delay) {
            (Some(verdict), Some(delay)) => {
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    msg.ack().emit(verdict);
                });
            }
            (Some(verdict), None) => {
                msg.ack().emit(verdict);
            }
            (None, _) => self.held.lock().push(msg),
        }
        Ok(())
    }

    fn connect_to(&self, _next: Arc<dyn Link>) -> relay_core::Result<()> {
        Err(CoreError::IllegalWiring("sink is terminal"))
    }

    fn link_to(&self, _next: Vec<Arc<dyn Link>>) -> relay_core::Result<()> {
        Err(CoreError::IllegalWiring("sink is terminal"))
    }

    fn exec_cmd(&self, _cmd: &Cmd) -> relay_core::Result<()> {
        Ok(())
    }
}

fn sync_meta() -> Meta {
    let mut meta = Meta::new();
    meta.insert("sync".into(), MetaValue::from("true"));
    meta
}

/// Bind a receiver on an OS-assigned port and hand back a connected client
async fn start_receiver(config: TcpReceiverConfig, downstream: Arc<dyn Link>) -> (TcpReceiver, TcpStream) {
    let receiver = TcpReceiver::new("tcp-in", config);
    receiver.connect_to(downstream).unwrap();
    receiver.exec_cmd(&Cmd::new(CmdCode::SetUp)).unwrap();
    let addr = receiver.local_addr().expect("listener bound");
    let client = TcpStream::connect(addr).await.unwrap();
    (receiver, client)
}

async fn read_token(stream: &mut TcpStream, expected: &[u8]) {
    let mut buf = vec![0u8; expected.len()];
    timeout(Duration::from_secs(2), stream.read_exact(&mut buf))
        .await
        .expect("no reply before deadline")
        .expect("connection closed while awaiting reply");
    assert_eq!(buf, expected);
}

#[tokio::test]
async fn happy_path_sync_reports_sent() {
    let mut config = TcpReceiverConfig::new("127.0.0.1:0");
    config.meta = sync_meta();
    let sink = ScriptedSink::new("ok", Some(MsgStatus::Done));

    let (receiver, mut client) = start_receiver(config, sink).await;

    client.write_all(b"hello\n").await.unwrap();
    read_token(&mut client, b"SENT").await;

    receiver.exec_cmd(&Cmd::new(CmdCode::TearDown)).unwrap();
}

#[tokio::test]
async fn async_default_accepts_regardless_of_downstream_latency() {
    let sink = ScriptedSink::delayed("slow", MsgStatus::Done, Duration::from_millis(500));
    let (receiver, mut client) = start_receiver(TcpReceiverConfig::new("127.0.0.1:0"), sink).await;

    client.write_all(b"hello\n").await.unwrap();
    let started = Instant::now();
    read_token(&mut client, b"ACCEPTED").await;
    assert!(started.elapsed() < Duration::from_millis(100));

    receiver.exec_cmd(&Cmd::new(CmdCode::TearDown)).unwrap();
}

#[tokio::test]
async fn fanout_partial_surfaces_on_the_original_ack() {
    let a = ScriptedSink::new("a", Some(MsgStatus::Done));
    let b = ScriptedSink::new("b", Some(MsgStatus::Failed));

    let mpx = Mpx::new("fanout");
    mpx.link_to(vec![a as Arc<dyn Link>, b as Arc<dyn Link>]).unwrap();
    mpx.exec_cmd(&Cmd::new(CmdCode::SetUp)).unwrap();

    let (msg, ack) = Message::new("payload");
    mpx.recv(msg).unwrap();

    let status = timeout(Duration::from_secs(1), ack.recv())
        .await
        .expect("fan-out did not settle");
    assert_eq!(status, Some(MsgStatus::PartialSend));
}

#[tokio::test]
async fn fanout_timeout_settles_failed_within_the_window() {
    let slow = ScriptedSink::delayed("slow", MsgStatus::Done, Duration::from_millis(200));

    let mpx = Mpx::new("fanout");
    mpx.link_to(vec![slow as Arc<dyn Link>]).unwrap();
    mpx.exec_cmd(&Cmd::new(CmdCode::SetUp)).unwrap();

    let (msg, ack) = Message::new("payload");
    mpx.recv(msg).unwrap();

    let status = timeout(Duration::from_millis(60), ack.recv())
        .await
        .expect("aggregate verdict arrived too late");
    assert_eq!(status, Some(MsgStatus::Failed));
}

#[tokio::test]
async fn sync_through_mpx_with_mute_downstream_reports_failed() {
    // The fan-out gives up on the mute downstream at 50 ms, inside the
    // receiver's 100 ms sync window, so the client sees the aggregate.
    let mute = ScriptedSink::new("mute", None);
    let mpx = Arc::new(Mpx::new("fanout"));
    mpx.link_to(vec![mute as Arc<dyn Link>]).unwrap();
    mpx.exec_cmd(&Cmd::new(CmdCode::SetUp)).unwrap();

    let mut config = TcpReceiverConfig::new("127.0.0.1:0");
    config.meta = sync_meta();
    let (receiver, mut client) = start_receiver(config, mpx).await;

    client.write_all(b"hello\n").await.unwrap();
    read_token(&mut client, b"FAILED").await;

    receiver.exec_cmd(&Cmd::new(CmdCode::TearDown)).unwrap();
}

#[tokio::test]
async fn toml_built_pipeline_carries_lines_to_the_dump_file() {
    // Reserve a port for the receiver; the gap between drop and bind is
    // small enough for a loopback test.
    let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = probe.local_addr().unwrap();
    drop(probe);

    let dir = tempfile::tempdir().unwrap();
    let dump_path = dir.path().join("dump.log");

    let toml = format!(
        r#"
        [components.tcp_in]
        module = "receiver.tcp"
        params = {{ bind_addr = "{addr}" }}

        [components.fanout]
        module = "link.mux"

        [components.dump]
        module = "sink.dumper"
        params = {{ out = "{}" }}

        [topology.tcp_in]
        connect_to = "fanout"

        [topology.fanout]
        link_to = ["dump"]
        "#,
        dump_path.display()
    );

    let config: relay_config::Config = toml.parse().unwrap();
    let pipeline = Pipeline::build(&config, Context::new()).unwrap();
    pipeline.start().unwrap();

    let mut client = TcpStream::connect(addr).await.unwrap();
    client.write_all(b"first\nsecond\n").await.unwrap();
    read_token(&mut client, b"ACCEPTED").await;
    read_token(&mut client, b"ACCEPTED").await;

    // The dump write happens after the reply; poll briefly.
    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        let contents = std::fs::read_to_string(&dump_path).unwrap_or_default();
        if contents == "first\nsecond\n" {
            break;
        }
        assert!(Instant::now() < deadline, "dump file never caught up: {contents:?}");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    pipeline.stop();
}
