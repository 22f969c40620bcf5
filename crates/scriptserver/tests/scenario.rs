mod common;

use common::{FakeRcon, HELP_TEXT, READY_LINE, SERVER_SCRIPT, config, launch};
use scriptserver::{ConnectionState, RconEvent, ScriptServer, ServerEvent};
use scriptserver_core::{CommandEvent, EventPayload, ScriptServerError};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::timeout;

/// Collect events up to and including the first one matching `done`
async fn events_until(
    events: &mut broadcast::Receiver<ServerEvent>,
    done: impl Fn(&ServerEvent) -> bool,
) -> Vec<ServerEvent> {
    let mut seen = Vec::new();
    loop {
        let event = timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timed out waiting for server event")
            .expect("event bus closed");
        let finished = done(&event);
        seen.push(event);
        if finished {
            return seen;
        }
    }
}

fn is_rcon(event: &ServerEvent, expected: RconEvent) -> bool {
    matches!(event, ServerEvent::Rcon(e) if *e == expected)
}

#[tokio::test]
async fn rcon_connects_after_ready_line() {
    let rcon = FakeRcon::spawn().await;
    let server = ScriptServer::with_launch_spec(config(&rcon), launch(SERVER_SCRIPT)).unwrap();
    let mut events = server.subscribe();

    server.start().await.unwrap();
    let seen = events_until(&mut events, |e| is_rcon(e, RconEvent::Connected)).await;

    let ready_at = seen
        .iter()
        .position(|e| *e == ServerEvent::Console(READY_LINE.to_string()))
        .expect("ready line not forwarded");
    let connecting_at = seen
        .iter()
        .position(|e| is_rcon(e, RconEvent::Connecting))
        .expect("no connecting event");
    assert!(ready_at < connecting_at);
    assert_eq!(server.rcon().state(), ConnectionState::Connected);

    let help = server.submit_command("help").await.unwrap();
    assert_eq!(help, HELP_TEXT);

    server.stop().await;
}

#[tokio::test]
async fn console_lines_become_game_events() {
    let rcon = FakeRcon::spawn().await;
    let server = ScriptServer::with_launch_spec(config(&rcon), launch(SERVER_SCRIPT)).unwrap();
    let mut events = server.subscribe();

    server.start().await.unwrap();
    let seen = events_until(&mut events, |e| {
        matches!(e, ServerEvent::Game(event) if event.payload == EventPayload::Started)
    })
    .await;
    let game_events = seen
        .iter()
        .filter(|e| matches!(e, ServerEvent::Game(_)))
        .count();
    assert_eq!(game_events, 1);

    server.send_raw("hello world").await.unwrap();
    let seen = events_until(&mut events, |e| matches!(e, ServerEvent::Game(_))).await;
    let Some(ServerEvent::Game(chat)) = seen.last() else {
        panic!("expected a game event, got {:?}", seen.last());
    };
    assert_eq!(
        chat.payload,
        EventPayload::Chat {
            player: "Alice".into(),
            message: "hello world".into(),
        }
    );

    server.stop().await;
}

#[tokio::test]
async fn chat_command_runs_every_handler() {
    let mut rcon = FakeRcon::spawn().await;
    let server = ScriptServer::with_launch_spec(config(&rcon), launch(SERVER_SCRIPT)).unwrap();
    let mut events = server.subscribe();

    server.register_command("greet", |_server: ScriptServer, _event: CommandEvent| async {
        Err::<(), _>(ScriptServerError::Rcon("handler failure".into()))
    });
    server.register_command("greet", |_server: ScriptServer, event: CommandEvent| async move {
        assert!(event.args.is_empty(), "handler panic");
        Ok::<(), ScriptServerError>(())
    });
    server.register_command("GREET", |server: ScriptServer, event: CommandEvent| async move {
        let target = event.args.join(" ");
        server
            .submit_command(format!("say hello {}", target))
            .await
            .map(|_| ())
    });

    server.start().await.unwrap();
    events_until(&mut events, |e| is_rcon(e, RconEvent::Connected)).await;

    server.send_raw("~Greet Bob").await.unwrap();
    let seen = events_until(&mut events, |e| matches!(e, ServerEvent::Command(_))).await;
    assert_eq!(
        seen.last(),
        Some(&ServerEvent::Command(CommandEvent {
            player: "Alice".into(),
            command: "greet".into(),
            args: vec!["Bob".into()],
            timestamp: match &seen[seen.len() - 2] {
                ServerEvent::Game(event) => event.timestamp,
                other => panic!("expected chat event before command, got {:?}", other),
            },
        }))
    );

    assert_eq!(rcon.next_command().await, "say hello Bob");
    server.stop().await;
}

#[tokio::test]
async fn stop_cascades_to_rcon_and_process() {
    let rcon = FakeRcon::spawn().await;
    let server = ScriptServer::with_launch_spec(config(&rcon), launch(SERVER_SCRIPT)).unwrap();
    let mut events = server.subscribe();

    server.start().await.unwrap();
    events_until(&mut events, |e| is_rcon(e, RconEvent::Connected)).await;
    assert!(matches!(
        server.start().await,
        Err(ScriptServerError::AlreadyRunning)
    ));

    server.stop().await;
    assert!(!server.is_running().await);
    assert_eq!(server.rcon().state(), ConnectionState::Disconnected);

    // Everything is on the bus once stop() returns
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert!(seen.iter().any(|e| is_rcon(e, RconEvent::Disconnected)));
    assert!(seen.iter().any(
        |e| matches!(e, ServerEvent::Game(event) if event.payload == EventPayload::Stopped)
    ));
    assert!(seen.contains(&ServerEvent::ProcessExited { code: Some(0) }));

    server.stop().await;
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn process_exit_disconnects_rcon() {
    let rcon = FakeRcon::spawn().await;
    let script = "echo '[12:00:05] [Server thread/INFO]: RCON running on 0.0.0.0:25575'; \
                  sleep 0.5; \
                  echo '[12:00:09] [Server thread/ERROR]: Encountered an unexpected exception'; \
                  exit 1";
    let server = ScriptServer::with_launch_spec(config(&rcon), launch(script)).unwrap();
    let mut events = server.subscribe();

    server.start().await.unwrap();
    let seen = events_until(&mut events, |e| matches!(e, ServerEvent::ProcessExited { .. })).await;
    assert_eq!(seen.last(), Some(&ServerEvent::ProcessExited { code: Some(1) }));

    events_until(&mut events, |e| is_rcon(e, RconEvent::Disconnected)).await;
    assert_eq!(server.rcon().state(), ConnectionState::Disconnected);
    assert!(!server.is_running().await);

    server.stop().await;
}
