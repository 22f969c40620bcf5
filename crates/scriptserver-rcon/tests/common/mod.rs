//! Loopback RCON server for integration tests

use scriptserver_core::RconConfig;
use scriptserver_rcon::codec::{AUTH_FAILED_ID, FrameBuffer, RconPacket, encode, packet_type};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

pub const PASSWORD: &str = "hunter2";

/// How the fake answers exec packets
#[derive(Debug, Clone, Copy)]
pub enum Mode {
    /// Reply `ran <command>` right away
    Echo,
    /// Hold replies until `n` commands arrived, then answer newest first
    Reverse(usize),
    /// Never reply
    Silent,
    /// Send a packet of unknown type before each reply
    NoiseFirst,
    /// Deliver the auth response in two writes
    SplitWrites,
    /// Drop the connection on the first command
    CloseOnExec,
    /// Answer auth with an id the client never sent
    StrayAuthId,
}

pub struct FakeServer {
    pub port: u16,
    /// Exec bodies in the order the server received them
    pub commands: mpsc::UnboundedReceiver<String>,
}

impl FakeServer {
    pub async fn spawn(mode: Mode) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        Self::spawn_on(listener, mode)
    }

    pub fn spawn_on(listener: TcpListener, mode: Mode) -> Self {
        let port = listener.local_addr().unwrap().port();
        let (tx, commands) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve(stream, mode, tx.clone()));
            }
        });

        Self { port, commands }
    }

    pub fn config(&self, password: &str) -> RconConfig {
        client_config(self.port, password)
    }

    pub async fn next_command(&mut self) -> String {
        tokio::time::timeout(Duration::from_secs(5), self.commands.recv())
            .await
            .expect("no command received")
            .expect("fake server gone")
    }
}

pub fn client_config(port: u16, password: &str) -> RconConfig {
    RconConfig {
        host: "127.0.0.1".to_string(),
        port,
        password: password.to_string(),
        buffer_ms: 10,
        retry_delay_ms: 50,
        request_timeout_ms: 5_000,
    }
}

fn reply(packet: &RconPacket) -> Vec<u8> {
    encode(
        packet_type::RESPONSE_VALUE,
        packet.request_id,
        &format!("ran {}", packet.body),
    )
}

async fn serve(mut stream: TcpStream, mode: Mode, commands: mpsc::UnboundedSender<String>) {
    let mut frames = FrameBuffer::new();
    let mut held = Vec::new();
    let mut buf = [0u8; 1024];

    loop {
        let len = match stream.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(len) => len,
        };
        frames.extend(&buf[..len]);

        while let Ok(Some(packet)) = frames.next_packet() {
            match packet.packet_type {
                packet_type::AUTH => {
                    let id = if let Mode::StrayAuthId = mode {
                        packet.request_id + 1
                    } else if packet.body == PASSWORD {
                        packet.request_id
                    } else {
                        AUTH_FAILED_ID
                    };
                    let bytes = encode(packet_type::AUTH_RESPONSE, id, "");
                    if let Mode::SplitWrites = mode {
                        stream.write_all(&bytes[..5]).await.unwrap();
                        stream.flush().await.unwrap();
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        stream.write_all(&bytes[5..]).await.unwrap();
                    } else {
                        stream.write_all(&bytes).await.unwrap();
                    }
                }
                packet_type::EXEC_COMMAND => {
                    let _ = commands.send(packet.body.clone());
                    match mode {
                        Mode::Silent => {}
                        Mode::CloseOnExec => return,
                        Mode::Reverse(n) => {
                            held.push(packet);
                            if held.len() == n {
                                for packet in held.drain(..).rev() {
                                    stream.write_all(&reply(&packet)).await.unwrap();
                                }
                            }
                        }
                        Mode::NoiseFirst => {
                            let noise = encode(99, packet.request_id, "noise");
                            stream.write_all(&noise).await.unwrap();
                            stream.write_all(&reply(&packet)).await.unwrap();
                        }
                        Mode::Echo | Mode::SplitWrites | Mode::StrayAuthId => {
                            stream.write_all(&reply(&packet)).await.unwrap();
                        }
                    }
                }
                _ => {}
            }
        }
    }
}
