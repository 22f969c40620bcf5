//! Orchestrator tying the process, the event parser and RCON together

use crate::command::{CommandHandler, CommandParser, CommandRegistry};
use scriptserver_core::{
    Clock, CommandEvent, ConsoleEvent, Result, ScriptServerConfig, ScriptServerError, SystemClock,
};
use scriptserver_events::{EventParser, FlavorMatcherSet, FlavorRegistry};
use scriptserver_process::{LaunchSpec, ProcessEvent, ProcessSupervisor};
use scriptserver_rcon::{RconClient, RconEvent, ResponseFuture};
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Everything a collaborator can observe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// Raw console line
    Console(String),
    /// Event derived from a console line
    Game(ConsoleEvent),
    /// Chat message addressed to a command
    Command(CommandEvent),
    /// RCON connection lifecycle
    Rcon(RconEvent),
    /// The server process is gone
    ProcessExited { code: Option<i32> },
}

/// Handle to a supervised server. Cheap to clone.
#[derive(Clone)]
pub struct ScriptServer {
    inner: Arc<Inner>,
}

struct Inner {
    config: ScriptServerConfig,
    launch: LaunchSpec,
    supervisor: ProcessSupervisor,
    rcon: RconClient,
    flavors: RwLock<FlavorRegistry>,
    commands: RwLock<CommandRegistry>,
    command_parser: CommandParser,
    clock: Arc<dyn Clock>,
    events: broadcast::Sender<ServerEvent>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl ScriptServer {
    /// Server launched as `java ... -jar <jar> nogui` from `config.java`.
    /// Must be called within a Tokio runtime.
    pub fn new(config: ScriptServerConfig) -> Result<Self> {
        let launch = LaunchSpec::java(&config.java);
        Self::with_launch_spec(config, launch)
    }

    /// Server launched from an explicit spec instead of `config.java`
    pub fn with_launch_spec(config: ScriptServerConfig, launch: LaunchSpec) -> Result<Self> {
        Self::with_clock(config, launch, Arc::new(SystemClock))
    }

    /// Like [`ScriptServer::with_launch_spec`], stamping events with `clock`
    pub fn with_clock(
        config: ScriptServerConfig,
        launch: LaunchSpec,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        let flavors = FlavorRegistry::from_config(&config)?;
        let command_parser = CommandParser::new(&config.command.prefix)?;
        let rcon = RconClient::new(config.rcon.clone())?;
        let (events, _) = broadcast::channel(1024);

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                launch,
                supervisor: ProcessSupervisor::new(),
                rcon,
                flavors: RwLock::new(flavors),
                commands: RwLock::new(CommandRegistry::new()),
                command_parser,
                clock,
                events,
                pump: Mutex::new(None),
            }),
        })
    }

    /// Start the process. RCON connects once the flavor's readiness line
    /// shows up on the console.
    pub async fn start(&self) -> Result<()> {
        let mut pump = self.inner.pump.lock().await;
        if self.inner.supervisor.is_running().await {
            return Err(ScriptServerError::AlreadyRunning);
        }

        let parser = {
            let flavors = self
                .inner
                .flavors
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            EventParser::with_clock(flavors.clone(), self.inner.clock.clone())
        };

        // Subscribe first so no early line is missed
        let process_events = self.inner.supervisor.subscribe();
        let rcon_events = self.inner.rcon.subscribe();
        self.inner.supervisor.start(self.inner.launch.clone()).await?;

        info!("Server starting, flavor {:?}", self.inner.config.flavor);
        *pump = Some(tokio::spawn(
            self.clone().forward_events(parser, process_events, rcon_events),
        ));
        Ok(())
    }

    /// Disconnect RCON, then stop the process. Safe to call repeatedly.
    pub async fn stop(&self) {
        self.inner.rcon.disconnect().await;
        self.inner.supervisor.stop().await;

        let pump = self.inner.pump.lock().await.take();
        if let Some(pump) = pump {
            if let Err(e) = pump.await {
                error!("Event pump failed: {}", e);
            }
        }
    }

    /// Queue a command for RCON. Resolves with the server's reply.
    pub fn submit_command(&self, command: impl Into<String>) -> ResponseFuture {
        self.inner.rcon.submit(command)
    }

    /// Write a line straight to the server console, bypassing RCON
    pub async fn send_raw(&self, text: &str) -> Result<()> {
        self.inner.supervisor.send_raw(text).await
    }

    /// Run `handler` whenever a player types `<prefix><name>`. Names are
    /// case-insensitive, and every handler registered under a name runs.
    pub fn register_command<F, Fut>(&self, name: &str, handler: F)
    where
        F: Fn(ScriptServer, CommandEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.register_handler(name, Arc::new(handler));
    }

    /// Like [`ScriptServer::register_command`], for handler types other than
    /// closures
    pub fn register_handler(&self, name: &str, handler: Arc<dyn CommandHandler>) {
        self.inner
            .commands
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .register(name, handler);
        debug!("Registered command {:?}", name);
    }

    /// Add or extend a flavor. Takes effect on the next [`ScriptServer::start`].
    pub fn register_flavor(&self, name: &str, matchers: FlavorMatcherSet) {
        self.inner
            .flavors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .register(name, matchers);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.inner.events.subscribe()
    }

    pub fn rcon(&self) -> &RconClient {
        &self.inner.rcon
    }

    pub fn config(&self) -> &ScriptServerConfig {
        &self.inner.config
    }

    pub async fn is_running(&self) -> bool {
        self.inner.supervisor.is_running().await
    }

    /// Forward process and RCON events until the process exits
    async fn forward_events(
        self,
        mut parser: EventParser,
        mut process_events: broadcast::Receiver<ProcessEvent>,
        mut rcon_events: broadcast::Receiver<RconEvent>,
    ) {
        let mut ready = false;
        let mut rcon_open = true;

        loop {
            tokio::select! {
                event = process_events.recv() => match event {
                    Ok(ProcessEvent::Console(line)) => {
                        if !ready && parser.is_ready_line(&line) {
                            ready = true;
                            info!("Server ready, connecting RCON");
                            self.inner.rcon.connect();
                        }
                        self.handle_line(&mut parser, line);
                    }
                    Ok(ProcessEvent::Stopped { code }) => {
                        self.emit(ServerEvent::ProcessExited { code });
                        self.inner.rcon.disconnect().await;
                        break;
                    }
                    Err(RecvError::Lagged(missed)) => {
                        warn!("Event pump lagged, {} console events dropped", missed);
                    }
                    Err(RecvError::Closed) => break,
                },

                event = rcon_events.recv(), if rcon_open => match event {
                    Ok(event) => self.emit(ServerEvent::Rcon(event)),
                    Err(RecvError::Lagged(missed)) => {
                        warn!("Event pump lagged, {} RCON events dropped", missed);
                    }
                    Err(RecvError::Closed) => rcon_open = false,
                },
            }
        }

        // Lifecycle changes caused by the exit itself
        while let Ok(event) = rcon_events.try_recv() {
            self.emit(ServerEvent::Rcon(event));
        }
        debug!("Event pump finished");
    }

    fn handle_line(&self, parser: &mut EventParser, line: String) {
        let event = parser.parse(&line);
        self.emit(ServerEvent::Console(line));

        let Some(event) = event else {
            return;
        };
        let command = self.inner.command_parser.parse(&event);
        self.emit(ServerEvent::Game(event));

        if let Some(command) = command {
            self.emit(ServerEvent::Command(command.clone()));
            self.dispatch_command(command);
        }
    }

    /// Run every handler for the command in its own task
    fn dispatch_command(&self, event: CommandEvent) {
        let handlers = self
            .inner
            .commands
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .handlers_for(&event.command);
        if handlers.is_empty() {
            debug!("No handler for command {:?}", event.command);
            return;
        }

        for handler in handlers {
            let server = self.clone();
            let event = event.clone();
            let name = event.command.clone();
            tokio::spawn(async move {
                let run = tokio::spawn(async move { handler.handle(server, event).await });
                match run.await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!("Command {:?} handler failed: {}", name, e),
                    Err(e) if e.is_panic() => error!("Command {:?} handler panicked", name),
                    Err(e) => debug!("Command {:?} handler cancelled: {}", name, e),
                }
            });
        }
    }

    fn emit(&self, event: ServerEvent) {
        let _ = self.inner.events.send(event);
    }
}
