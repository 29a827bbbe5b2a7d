//! Run coordinator: builds the runtime set and relays control signals.
//!
//! A runtime set is one bus, its device workers, and the runner context
//! derived from a loaded [`RunConfig`]. `CONFIGPICK` replaces the whole set:
//! the old device loops are cancelled and joined before the new ones start.
//!
//! Device loops run under child tokens of the set's token, which is itself a
//! child of the coordinator's root token, so a single `shutdown()` stops all.

use std::ops::ControlFlow;
use std::path::Path;
use std::sync::Arc;

use checkerbox_store::{LogEntry, LogLevel, RecordStore, Verdict};
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

use crate::bus::{EventBus, Inbox};
use crate::config::{load_run_config, AppSettings, RunConfig, SettingsSource};
use crate::device::{resolve_declaration, Device, DeviceWorker, TimingDevice};
use crate::domain::{DeviceInitError, Outcome, Result};
use crate::event::{ControlEvent, Notification, NOTIFICATION_TOPIC, SEQUENCE_TOPIC};
use crate::notify::Notifier;
use crate::obs;
use crate::runner::{RunPolicy, RunnerContext, SequenceRunner, SiteOutcome, RUNNER_SOURCE};

struct RuntimeSet {
    config: RunConfig,
    ctx: RunnerContext,
    cancel: CancellationToken,
    devices: JoinSet<()>,
    device_names: Vec<String>,
}

pub struct RunCoordinator {
    settings: AppSettings,
    settings_source: Option<SettingsSource>,
    store: Arc<dyn RecordStore>,
    policy: Arc<RunPolicy>,
    root: CancellationToken,
    watchers: Vec<Inbox>,
    runtime: Option<RuntimeSet>,
    runners: JoinSet<SiteOutcome>,
}

impl RunCoordinator {
    pub fn new(settings: AppSettings, store: Arc<dyn RecordStore>) -> Self {
        Self {
            settings,
            settings_source: None,
            store,
            policy: Arc::new(RunPolicy::default()),
            root: CancellationToken::new(),
            watchers: Vec::new(),
            runtime: None,
            runners: JoinSet::new(),
        }
    }

    /// Re-read settings from `source` whenever a configuration is picked.
    pub fn with_settings_source(mut self, source: SettingsSource) -> Self {
        self.settings_source = Some(source);
        self
    }

    pub fn settings(&self) -> &AppSettings {
        &self.settings
    }

    pub fn policy(&self) -> &Arc<RunPolicy> {
        &self.policy
    }

    /// Configuration of the current runtime set.
    pub fn active_config(&self) -> Option<&RunConfig> {
        self.runtime.as_ref().map(|rt| &rt.config)
    }

    /// Descriptions of the devices in the current runtime set.
    pub fn device_names(&self) -> &[String] {
        self.runtime
            .as_ref()
            .map(|rt| rt.device_names.as_slice())
            .unwrap_or_default()
    }

    /// Whether any runner is still working.
    pub fn is_running(&self) -> bool {
        !self.runners.is_empty()
    }

    /// Register a UI inbox for notifications. It survives reconfiguration.
    pub async fn subscribe_notifications(&mut self, inbox: Inbox) {
        if let Some(rt) = &self.runtime {
            rt.ctx.notifier.bus().subscribe(NOTIFICATION_TOPIC, inbox.clone()).await;
        }
        self.watchers.push(inbox);
    }

    /// Load `path` and replace the runtime set with it.
    pub async fn load_and_install(&mut self, path: &Path) -> Result<Vec<DeviceInitError>> {
        let config = load_run_config(path)?;
        Ok(self.install(config).await)
    }

    /// Tear down the current runtime set and build one from `config`.
    ///
    /// Returns every device-init problem, fatal or not. No-error mode is
    /// reset: a new configuration always starts strict.
    pub async fn install(&mut self, config: RunConfig) -> Vec<DeviceInitError> {
        self.teardown().await;
        self.policy.set_permissive(false);

        let bus = Arc::new(EventBus::new());
        for inbox in &self.watchers {
            bus.subscribe(NOTIFICATION_TOPIC, inbox.clone()).await;
        }
        let notifier = Notifier::new(Arc::clone(&bus), Arc::clone(&self.store));
        notifier
            .log(LogEntry::info(RUNNER_SOURCE, None, "Configuration loading started"))
            .await;

        let sites = self.settings.sites;
        let mut devices: Vec<Box<dyn Device>> = (0..sites)
            .map(|site| Box::new(TimingDevice::new(site)) as Box<dyn Device>)
            .collect();
        let mut problems = Vec::new();

        for declaration in &config.hardware {
            let build = resolve_declaration(declaration, sites);
            let site = build.site.or_else(|| declaration.site_hint());
            let details = build
                .errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            obs::emit_device_init(&declaration.device, site, build.is_built(), build.errors.len());

            let (outcome, entry) = match build.device {
                Some(device) => {
                    devices.push(device);
                    let entry = if build.errors.is_empty() {
                        LogEntry::info(&declaration.device, site, "Device initiated")
                    } else {
                        LogEntry::new(
                            LogLevel::Warning,
                            &declaration.device,
                            site,
                            format!("Device initiated with warnings: {details}"),
                        )
                    };
                    (Outcome::Pass, entry)
                }
                None => (
                    Outcome::Error,
                    LogEntry::error(
                        &declaration.device,
                        site,
                        format!("Error while initializing device: {details}"),
                    ),
                ),
            };

            notifier
                .emit(Notification::DeviceInit {
                    outcome,
                    site,
                    label: declaration.device.clone(),
                })
                .await;
            notifier.log(entry).await;
            problems.extend(build.errors);
        }

        let cancel = self.root.child_token();
        let mut device_set = JoinSet::new();
        let mut device_names = Vec::with_capacity(devices.len());
        for device in devices {
            let worker = DeviceWorker::new(device, self.settings.inbox_capacity);
            bus.subscribe(SEQUENCE_TOPIC, worker.inbox()).await;
            device_names.push(worker.describe());
            device_set.spawn(worker.run_loop(cancel.child_token()));
        }

        info!(
            config = %config.name,
            sites,
            devices = device_names.len(),
            problems = problems.len(),
            "Runtime set installed"
        );

        self.runtime = Some(RuntimeSet {
            config,
            ctx: RunnerContext::new(notifier, Arc::clone(&self.policy)),
            cancel,
            devices: device_set,
            device_names,
        });
        problems
    }

    /// Spawn one runner per site. Returns how many were started.
    pub fn start(&mut self) -> usize {
        let Some(rt) = &self.runtime else {
            warn!("Start requested without a loaded configuration");
            return 0;
        };
        while let Some(joined) = self.runners.try_join_next() {
            Self::reap(joined);
        }
        if !self.runners.is_empty() {
            warn!(active = self.runners.len(), "Start ignored, a run is already in progress");
            return 0;
        }

        for site in 0..self.settings.sites {
            let runner = SequenceRunner::new(
                site,
                rt.config.name.clone(),
                rt.config.plan_for_site(site),
                rt.ctx.clone(),
            );
            self.runners
                .spawn(runner.run().instrument(obs::site_span(site)));
        }
        info!(sites = self.settings.sites, "Sequence runners started");
        self.settings.sites
    }

    /// Await every active runner. Outcomes are ordered by site.
    pub async fn wait(&mut self) -> Result<Vec<SiteOutcome>> {
        let mut outcomes = Vec::with_capacity(self.runners.len());
        while let Some(joined) = self.runners.join_next().await {
            outcomes.push(joined?);
        }
        outcomes.sort_by_key(|o| o.site);
        Ok(outcomes)
    }

    /// Start every site and wait for all of them.
    pub async fn run_headless(&mut self) -> Result<Vec<SiteOutcome>> {
        self.start();
        self.wait().await
    }

    /// Flip permissive mode and return the new value.
    pub async fn toggle_no_error(&self) -> bool {
        let permissive = self.policy.toggle();
        self.log(LogEntry::info(
            RUNNER_SOURCE,
            None,
            format!("No-error mode {}", if permissive { "enabled" } else { "disabled" }),
        ))
        .await;
        permissive
    }

    /// Apply one control signal.
    pub async fn handle(&mut self, control: ControlEvent) -> ControlFlow<()> {
        debug!(?control, "Control signal received");
        match control {
            ControlEvent::Start => {
                self.start();
            }
            ControlEvent::Quit => return ControlFlow::Break(()),
            ControlEvent::NoError => {
                self.toggle_no_error().await;
            }
            ControlEvent::ConfigPick(name) => {
                if let Err(e) = self.pick(&name).await {
                    // The current runtime set stays in place.
                    self.log(LogEntry::error(
                        RUNNER_SOURCE,
                        None,
                        format!("Configuration loading failed: {e}"),
                    ))
                    .await;
                }
            }
        }
        ControlFlow::Continue(())
    }

    /// Reload settings (when a source is set) and the named plan, then install.
    /// Nothing changes unless both load.
    async fn pick(&mut self, name: &str) -> Result<()> {
        let settings = match &self.settings_source {
            Some(source) => source.reload(&self.settings)?,
            None => self.settings.clone(),
        };
        let config = load_run_config(&settings.config_path(name))?;
        if settings != self.settings {
            info!(sites = settings.sites, "Application settings reloaded");
            self.settings = settings;
        }
        self.install(config).await;
        Ok(())
    }

    /// Relay control signals until `QUIT` or the channel closes, then shut down.
    pub async fn serve(&mut self, mut controls: mpsc::Receiver<ControlEvent>) -> Result<()> {
        loop {
            tokio::select! {
                control = controls.recv() => {
                    let Some(control) = control else { break };
                    if self.handle(control).await.is_break() {
                        break;
                    }
                }
                Some(joined) = self.runners.join_next(), if !self.runners.is_empty() => {
                    Self::reap(joined);
                }
            }
        }
        self.shutdown().await;
        Ok(())
    }

    /// Abort runners, stop every device loop, and cancel the root token.
    pub async fn shutdown(&mut self) {
        self.runners.abort_all();
        while self.runners.join_next().await.is_some() {}
        self.teardown().await;
        self.root.cancel();
        info!("Coordinator stopped");
    }

    fn reap(joined: std::result::Result<SiteOutcome, JoinError>) {
        match joined {
            Ok(outcome) => {
                info!(site = outcome.site, verdict = %outcome.verdict, "Site finished")
            }
            Err(e) => warn!(error = %e, "Runner task ended without an outcome"),
        }
    }

    async fn teardown(&mut self) {
        let Some(mut rt) = self.runtime.take() else {
            return;
        };
        if !self.runners.is_empty() {
            warn!(active = self.runners.len(), "Reconfiguring during a run, aborting runners");
            self.runners.abort_all();
            while self.runners.join_next().await.is_some() {}
        }
        rt.cancel.cancel();
        while rt.devices.join_next().await.is_some() {}
        debug!(config = %rt.config.name, "Runtime set torn down");
    }

    async fn log(&self, entry: LogEntry) {
        match &self.runtime {
            Some(rt) => rt.ctx.notifier.log(entry).await,
            None => {
                if let Err(e) = self.store.append_log(entry).await {
                    obs::emit_store_error("log", &e);
                }
            }
        }
    }
}

/// Overall verdict across sites: `Fail` when any site failed.
pub fn overall_verdict(outcomes: &[SiteOutcome]) -> Verdict {
    if outcomes.iter().any(|o| o.verdict == Verdict::Fail) {
        Verdict::Fail
    } else {
        Verdict::Pass
    }
}

impl std::fmt::Debug for RunCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunCoordinator")
            .field("settings", &self.settings)
            .field("config", &self.active_config().map(|c| c.name.as_str()))
            .field("runners", &self.runners.len())
            .finish_non_exhaustive()
    }
}
