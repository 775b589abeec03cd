use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use console_core::{
    events::{ConsoleEvent, LogLevel, PacketKind},
    router::SubsystemReadout,
    session::DeviceSession,
    upgrade::{AutoConfirm, ConfirmGate, HttpUpgradeService, UpgradeOrchestrator},
    CommandLink,
};
use shared::domain::DeviceId;
use tokio::sync::{broadcast::error::RecvError, Mutex};
use tracing::debug;

mod command;
mod config;

use command::{confirmation_prompt, help_text, parse_line, ConsoleCommand};
use config::{load_settings, validate_server_url, Settings};

type UpgradeSlot = Arc<Mutex<Option<Arc<UpgradeOrchestrator>>>>;

#[derive(Parser, Debug)]
#[command(about = "Operator console for remote tracking devices")]
struct Args {
    /// Device to attach to
    #[arg(long)]
    device_id: String,
    /// Console server base url (http or https)
    #[arg(long)]
    server_url: Option<String>,
    /// Upgrade API base url
    #[arg(long)]
    api_base: Option<String>,
    /// Answer yes to every confirmation prompt
    #[arg(long)]
    yes: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().init();
    let args = Args::parse();

    let mut settings = load_settings();
    if let Some(url) = args.server_url {
        settings.server_url = url;
    }
    if let Some(url) = args.api_base {
        settings.api_base = url;
    }
    validate_server_url(&settings.server_url)?;

    let session = DeviceSession::new(&settings.server_url, DeviceId::new(args.device_id))?;
    spawn_event_printer(&session);

    let gate: Arc<dyn ConfirmGate> = if args.yes {
        Arc::new(AutoConfirm)
    } else {
        Arc::new(TerminalGate)
    };
    let upgrades: UpgradeSlot = Arc::new(Mutex::new(None));
    spawn_upgrade_bootstrap(
        Arc::clone(&session),
        settings.clone(),
        Arc::clone(&gate),
        Arc::clone(&upgrades),
    );

    session
        .connect()
        .await
        .context("opening the device channel")?;
    print_log(LogLevel::Info, "Requesting network parameters");
    session.request("wifi").await?;
    print_log(LogLevel::Info, "Requesting device drivers");
    session.command("hal", Vec::new()).await?;

    repl(session, upgrades, gate).await
}

fn spawn_event_printer(session: &Arc<DeviceSession>) {
    let mut events = session.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => print_event(&event),
                Err(RecvError::Lagged(missed)) => {
                    print_log(LogLevel::Error, &format!("display lagged; {missed} events dropped"));
                }
                Err(RecvError::Closed) => return,
            }
        }
    });
}

/// The upgrade orchestrator can only be built once the device has
/// reported its type over the channel.
fn spawn_upgrade_bootstrap(
    session: Arc<DeviceSession>,
    settings: Settings,
    gate: Arc<dyn ConfirmGate>,
    upgrades: UpgradeSlot,
) {
    tokio::spawn(async move {
        let mut events = session.subscribe();
        let kind = loop {
            if let Some(kind) = session.device_kind().await {
                break kind;
            }
            match events.recv().await {
                Ok(ConsoleEvent::DeviceKindChanged(kind)) => break kind,
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => return,
            }
        };

        let service = Arc::new(HttpUpgradeService::new(settings.api_base));
        let orchestrator = UpgradeOrchestrator::with_poll_interval(
            kind,
            session.device_id().clone(),
            service,
            Arc::clone(&session) as Arc<dyn CommandLink>,
            gate,
            session.event_sender(),
            Duration::from_millis(settings.poll_interval_ms),
        );
        // Initial check; failures are already surfaced on the event log.
        let _ = orchestrator.check().await;
        *upgrades.lock().await = Some(orchestrator);
    });
}

async fn repl(
    session: Arc<DeviceSession>,
    upgrades: UpgradeSlot,
    gate: Arc<dyn ConfirmGate>,
) -> Result<()> {
    loop {
        let Some(line) = read_line("> ").await else {
            return Ok(());
        };
        let command = match parse_line(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(problems) => {
                for problem in problems {
                    print_log(LogLevel::Error, &problem);
                }
                continue;
            }
        };

        match command {
            ConsoleCommand::Help => println!("{}", help_text()),
            ConsoleCommand::Quit => return Ok(()),
            ConsoleCommand::Status => print_status(&session, &upgrades).await,
            ConsoleCommand::Device(device) => {
                if let Some(prompt) = confirmation_prompt(&device) {
                    if !gate.confirm(prompt).await {
                        print_log(LogLevel::Info, "not confirmed");
                        continue;
                    }
                }
                if let Err(err) = session.send(device).await {
                    // The channel notice is already on the event log.
                    debug!(%err, "device command not transmitted");
                }
            }
            ConsoleCommand::UpgradeCheck => {
                if let Some(orchestrator) = upgrade_slot(&upgrades).await {
                    let _ = orchestrator.check().await;
                }
            }
            ConsoleCommand::UpgradeCreate => {
                if let Some(orchestrator) = upgrade_slot(&upgrades).await {
                    let _ = orchestrator.create().await;
                }
            }
            ConsoleCommand::UpgradePerform => {
                if let Some(orchestrator) = upgrade_slot(&upgrades).await {
                    let _ = orchestrator.perform().await;
                }
            }
            ConsoleCommand::UpgradeStop => {
                if let Some(orchestrator) = upgrade_slot(&upgrades).await {
                    orchestrator.stop().await;
                }
            }
        }
    }
}

async fn upgrade_slot(upgrades: &UpgradeSlot) -> Option<Arc<UpgradeOrchestrator>> {
    let slot = upgrades.lock().await.clone();
    if slot.is_none() {
        print_log(
            LogLevel::Error,
            "device type not discovered yet; upgrade commands unavailable",
        );
    }
    slot
}

async fn print_status(session: &Arc<DeviceSession>, upgrades: &UpgradeSlot) {
    println!("channel: {:?}", session.channel_state().await);
    match session.device_kind().await {
        Some(kind) => println!("device: {kind}"),
        None => println!("device: (type not reported yet)"),
    }
    println!("queued commands: {}", session.queued_commands().await);

    let readout = session.readout().await;
    println!("gps:  {}", subsystem_line(&readout.gps));
    println!("rb:   {}", subsystem_line(&readout.iridium));
    println!("lora: {}", subsystem_line(&readout.lora));

    if let Some(orchestrator) = upgrades.lock().await.clone() {
        let snapshot = orchestrator.snapshot().await;
        match snapshot.status {
            Some(_) => println!(
                "upgrade: job={} state={} progress={} available={}{}",
                snapshot
                    .job_id
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| "-".into()),
                snapshot.state_name,
                snapshot.progress,
                snapshot.availability,
                if snapshot.can_perform {
                    " (ready to perform)"
                } else {
                    ""
                }
            ),
            None => println!("upgrade: no status yet"),
        }
        if orchestrator.watching().await {
            println!("upgrade: watch task running");
        }
    }
}

fn subsystem_line(readout: &SubsystemReadout) -> String {
    fn flag(value: Option<bool>) -> &'static str {
        match value {
            Some(true) => "yes",
            Some(false) => "no",
            None => "-",
        }
    }
    format!(
        "running={} enabled={}",
        flag(readout.running),
        flag(readout.enabled)
    )
}

fn print_event(event: &ConsoleEvent) {
    match event {
        ConsoleEvent::Log { level, message } => print_log(*level, message),
        ConsoleEvent::Packet { kind, body } => {
            let label = match kind {
                PacketKind::Lora => "lora",
                PacketKind::Iridium => "iridium",
            };
            println!("--- {label} packet ---");
            println!("{body}");
        }
        ConsoleEvent::FieldChanged { field, value } => println!("[field] {field} = {value}"),
        ConsoleEvent::DeviceKindChanged(kind) => println!("[info] device type: {kind}"),
        ConsoleEvent::ChannelStateChanged(state) => println!("[info] channel {state:?}"),
        ConsoleEvent::UpgradeStatusChanged {
            job_id,
            state_name,
            progress,
            availability,
            can_perform,
            ..
        } => {
            println!(
                "[upgrade] job={} state={} progress={} available={}{}",
                job_id.map(|id| id.to_string()).unwrap_or_else(|| "-".into()),
                state_name,
                progress,
                availability,
                if *can_perform { " (ready to perform)" } else { "" }
            );
        }
    }
}

fn print_log(level: LogLevel, message: &str) {
    match level {
        LogLevel::Info => println!("[info] {message}"),
        LogLevel::Error => eprintln!("[error] {message}"),
    }
}

async fn read_line(prompt: &'static str) -> Option<String> {
    tokio::task::spawn_blocking(move || {
        use std::io::Write;
        let mut out = std::io::stdout();
        let _ = out.write_all(prompt.as_bytes());
        let _ = out.flush();
        let mut line = String::new();
        match std::io::stdin().read_line(&mut line) {
            Ok(0) => None,
            Ok(_) => Some(line),
            Err(_) => None,
        }
    })
    .await
    .ok()
    .flatten()
}

struct TerminalGate;

#[async_trait]
impl ConfirmGate for TerminalGate {
    async fn confirm(&self, prompt: &str) -> bool {
        println!("{prompt}");
        let Some(line) = read_line("[y/N] ").await else {
            return false;
        };
        matches!(line.trim(), "y" | "Y" | "yes")
    }
}
