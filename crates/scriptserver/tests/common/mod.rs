//! Fake Minecraft server: an `sh` script for the console plus a loopback
//! RCON listener

use scriptserver::LaunchSpec;
use scriptserver_core::ScriptServerConfig;
use scriptserver_rcon::codec::{AUTH_FAILED_ID, FrameBuffer, encode, packet_type};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

pub const PASSWORD: &str = "s3cret";

pub const HELP_TEXT: &str = "/advancement (grant|revoke)/ban <targets> [<reason>]/help [<command>]";

pub const READY_LINE: &str = "[12:00:05] [Server thread/INFO]: RCON running on 0.0.0.0:25575";

/// Prints a vanilla-looking startup log, echoes stdin back as chat from
/// Alice, and exits cleanly on `stop`
pub const SERVER_SCRIPT: &str = r#"
echo '[12:00:00] [Server thread/INFO]: Starting minecraft server version 1.20.4'
echo '[12:00:05] [Server thread/INFO]: RCON running on 0.0.0.0:25575'
echo '[12:00:06] [Server thread/INFO]: Done (6.012s)! For help, type "help"'
while read line; do
  case "$line" in
    stop) echo '[12:30:00] [Server thread/INFO]: Stopping server'; exit 0 ;;
    *) echo "[12:00:07] [Server thread/INFO]: <Alice> $line" ;;
  esac
done
"#;

pub struct FakeRcon {
    pub port: u16,
    pub commands: mpsc::UnboundedReceiver<String>,
}

impl FakeRcon {
    pub async fn spawn() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (tx, commands) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve(stream, tx.clone()));
            }
        });

        Self { port, commands }
    }

    pub async fn next_command(&mut self) -> String {
        tokio::time::timeout(Duration::from_secs(5), self.commands.recv())
            .await
            .expect("no RCON command received")
            .expect("fake RCON server gone")
    }
}

/// Config pointing RCON at `rcon` with a fast dispatch tick
pub fn config(rcon: &FakeRcon) -> ScriptServerConfig {
    let mut config = ScriptServerConfig::default();
    config.rcon.host = "127.0.0.1".to_string();
    config.rcon.port = rcon.port;
    config.rcon.password = PASSWORD.to_string();
    config.rcon.buffer_ms = 10;
    config
}

pub fn launch(script: &str) -> LaunchSpec {
    LaunchSpec::new("sh", ["-c", script]).stop_command("stop", Duration::from_secs(5))
}

async fn serve(mut stream: TcpStream, commands: mpsc::UnboundedSender<String>) {
    let mut frames = FrameBuffer::new();
    let mut buf = [0u8; 1024];

    loop {
        let len = match stream.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(len) => len,
        };
        frames.extend(&buf[..len]);

        while let Ok(Some(packet)) = frames.next_packet() {
            let reply = match packet.packet_type {
                packet_type::AUTH if packet.body == PASSWORD => {
                    encode(packet_type::AUTH_RESPONSE, packet.request_id, "")
                }
                packet_type::AUTH => encode(packet_type::AUTH_RESPONSE, AUTH_FAILED_ID, ""),
                packet_type::EXEC_COMMAND => {
                    let _ = commands.send(packet.body.clone());
                    let body = match packet.body.as_str() {
                        "help" => HELP_TEXT.to_string(),
                        other => format!("ran {}", other),
                    };
                    encode(packet_type::RESPONSE_VALUE, packet.request_id, &body)
                }
                _ => continue,
            };
            if stream.write_all(&reply).await.is_err() {
                return;
            }
        }
    }
}
