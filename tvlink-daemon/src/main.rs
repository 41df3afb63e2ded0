mod cli;
mod config;
mod store;

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tvlink_protocol::{
    AndroidTvPlatform, DeviceHandle, DeviceIdentity, DeviceMachine, DeviceRuntime, DeviceStore,
    MachineSnapshot, MachineState, Observer, PlatformKind, TracingObserver,
};

use cli::{Cli, Command};
use config::Config;
use store::FileStore;

/// Main daemon state
struct Daemon {
    config: Config,
    store: Arc<FileStore>,
    observer: Arc<dyn Observer>,
}

impl Daemon {
    fn new(config: Config) -> Result<Self> {
        config
            .ensure_directories()
            .context("Failed to create directories")?;

        let store = FileStore::open(config.registry_path(), config.credentials_dir())
            .context("Failed to open device registry")?;

        Ok(Self {
            config,
            store: Arc::new(store),
            observer: TracingObserver::shared(),
        })
    }

    fn platform(&self) -> AndroidTvPlatform {
        AndroidTvPlatform::new(
            self.config.pairing_config(),
            self.config.remote_config(),
            self.observer.clone(),
        )
    }

    fn spawn(&self, machine: DeviceMachine) -> (DeviceHandle, JoinHandle<()>) {
        let store: Arc<dyn DeviceStore> = self.store.clone();
        DeviceRuntime::spawn(machine, self.platform(), store, self.observer.clone())
    }

    /// Rebuild a paired device's machine from the registry
    async fn restore(&self, device: &str) -> Result<DeviceMachine> {
        let registry = self.store.registry().await;
        let entry = registry
            .find(device)
            .ok_or_else(|| anyhow!("Unknown device '{}'", device))?;
        if entry.platform != PlatformKind::AndroidTv {
            bail!("Device '{}' uses unsupported platform {}", entry.name, entry.platform);
        }

        let identity = DeviceIdentity {
            id: entry.id.clone(),
            name: entry.name.clone(),
            ip: entry
                .ip
                .parse()
                .with_context(|| format!("Invalid IP address '{}' in registry", entry.ip))?,
        };
        let credentials = self.store.load_credentials(&entry.id).await;
        Ok(DeviceMachine::new(
            self.config.machine_config(),
            Some(identity),
            credentials,
        ))
    }

    /// Keep every paired device connected until ctrl-c
    async fn run(&self) -> Result<()> {
        let registry = self.store.registry().await;
        let mut devices = Vec::new();

        for entry in &registry.devices {
            let machine = match self.restore(&entry.id).await {
                Ok(machine) => machine,
                Err(e) => {
                    warn!("Skipping {}: {:#}", entry.name, e);
                    continue;
                }
            };
            if !machine.can_connect() {
                info!("Skipping {}: not paired", entry.name);
                continue;
            }

            let (handle, task) = self.spawn(machine);
            handle.connect().await?;
            info!("Connecting to {} at {}", entry.name, entry.ip);
            devices.push((handle, task));
        }

        if devices.is_empty() {
            warn!("No paired devices; use `tvlink-daemon pair` first");
            return Ok(());
        }

        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for ctrl-c")?;
        info!("Shutting down {} device(s)", devices.len());

        for (handle, task) in devices {
            if let Err(e) = handle.disconnect().await {
                warn!("Disconnect failed: {}", e);
            }
            drop(handle);
            if let Err(e) = task.await {
                error!("Device task failed: {}", e);
            }
        }
        Ok(())
    }

    async fn pair(&self, name: &str, ip: &str) -> Result<()> {
        let machine = DeviceMachine::new(self.config.machine_config(), None, None);
        let (handle, task) = self.spawn(machine);

        handle.set_device_info(name, ip).await?;
        let snapshot = handle
            .wait_for(|s| {
                s.state.matches("pairing.active.waitingForUser")
                    || pairing_settled(s)
                    || (s.state == MachineState::Setup && s.last_error.is_some())
            })
            .await?;
        if !snapshot.state.matches("pairing.active.waitingForUser") {
            bail!(failure(&snapshot, "Pairing did not start"));
        }

        eprint!("Enter the code shown on {}: ", name);
        let mut line = String::new();
        BufReader::new(tokio::io::stdin())
            .read_line(&mut line)
            .await
            .context("Failed to read pairing code")?;

        handle.submit_code(line.trim()).await?;
        let snapshot = handle.wait_for(pairing_settled).await?;

        drop(handle);
        task.await.context("Device task failed")?;

        if snapshot.state != MachineState::Disconnected {
            bail!(failure(&snapshot, "Pairing failed"));
        }
        let identity = snapshot
            .identity
            .ok_or_else(|| anyhow!("Paired device has no identity"))?;
        println!("Paired with {} ({})", identity.name, identity.id);
        Ok(())
    }

    async fn list_devices(&self, verbose: bool) {
        let registry = self.store.registry().await;
        if registry.devices.is_empty() {
            println!("No devices registered");
            return;
        }

        for entry in &registry.devices {
            let status = if entry.is_paired() { "paired" } else { "unpaired" };
            if verbose {
                println!("{} ({})", entry.name, entry.id);
                println!("  platform: {}", entry.platform);
                println!("  address:  {}", entry.ip);
                println!("  status:   {}", status);
                if let Some(credentials) = self.store.load_credentials(&entry.id).await {
                    println!("  server:   {}", credentials.server_fingerprint());
                }
            } else {
                println!("{:<24} {:<16} {}", entry.name, entry.ip, status);
            }
        }
    }

    async fn forget(&self, device: &str, remove: bool) -> Result<()> {
        let machine = self.restore(device).await?;
        let name = machine
            .identity()
            .map(|identity| identity.name.clone())
            .unwrap_or_default();
        let id = machine
            .identity()
            .map(|identity| identity.id.clone())
            .unwrap_or_default();

        if remove {
            self.store.remove_device(&id).await?;
            println!("Removed {}", name);
            return Ok(());
        }

        // Unreadable credentials leave the machine unpaired, so FORGET would be ignored
        if !machine.can_connect() {
            if self.store.purge_credentials(&id).await? {
                println!("Deleted unreadable credentials for {}", name);
            } else {
                println!("{} has no stored credentials", name);
            }
            return Ok(());
        }

        let (handle, task) = self.spawn(machine);
        handle.forget().await?;
        handle
            .wait_for(|s| !s.has_credentials)
            .await?;
        drop(handle);
        task.await.context("Device task failed")?;
        println!("Forgot credentials for {}", name);
        Ok(())
    }

    async fn send(
        &self,
        device: &str,
        key: Option<String>,
        text: Option<String>,
        app_link: Option<String>,
        timeout: Duration,
    ) -> Result<()> {
        let machine = self.restore(device).await?;
        if !machine.can_connect() {
            bail!("Device '{}' is not paired", device);
        }

        let (handle, task) = self.spawn(machine);
        handle.connect().await?;
        let snapshot = tokio::time::timeout(
            timeout,
            handle.wait_for(|s| {
                s.state.matches("session.connection.connected") || s.state == MachineState::Error
            }),
        )
        .await
        .map_err(|_| anyhow!("Timed out waiting for {}", device))??;
        if snapshot.state == MachineState::Error {
            bail!(failure(&snapshot, "Connection failed"));
        }

        if let Some(key) = key {
            handle.send_key(key).await?;
        }
        if let Some(text) = text {
            handle.send_text(text).await?;
        }
        if let Some(link) = app_link {
            handle.send_app_link(link).await?;
        }

        // Let the session flush before tearing it down
        tokio::time::sleep(Duration::from_millis(300)).await;
        handle.disconnect().await?;
        handle
            .wait_for(|s| s.state == MachineState::Disconnected)
            .await?;
        drop(handle);
        task.await.context("Device task failed")?;
        Ok(())
    }

    fn dump_config(&self) -> Result<()> {
        let rendered =
            toml::to_string_pretty(&self.config).context("Failed to serialize config")?;
        println!("{}", rendered);
        println!("# registry:    {}", self.config.registry_path().display());
        println!("# credentials: {}", self.config.credentials_dir().display());
        Ok(())
    }
}

/// Pairing finished one way or the other
fn pairing_settled(snapshot: &MachineSnapshot) -> bool {
    matches!(snapshot.state, MachineState::Disconnected)
        || snapshot.state.matches("pairing.active.error")
}

fn failure(snapshot: &MachineSnapshot, context: &str) -> String {
    match &snapshot.last_error {
        Some(error) => format!("{}: {}", context, error),
        None => format!("{} ({})", context, snapshot.state),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    cli::init_logging(&cli)?;

    let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    let daemon = Daemon::new(config)?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => daemon.run().await,
        Command::Pair { name, ip } => daemon.pair(&name, &ip).await,
        Command::ListDevices { verbose } => {
            daemon.list_devices(verbose).await;
            Ok(())
        }
        Command::Forget { device, remove } => daemon.forget(&device, remove).await,
        Command::Send {
            device,
            key,
            text,
            app_link,
            timeout,
        } => {
            daemon
                .send(&device, key, text, app_link, Duration::from_secs(timeout))
                .await
        }
        Command::DumpConfig => daemon.dump_config(),
    }
}
