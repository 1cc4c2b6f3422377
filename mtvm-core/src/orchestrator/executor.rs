//! Performs machine effects and feeds their completions back as events.
//!
//! Completions from spawned work arrive over one unbounded event channel.
//! Progress arrives over the progress pipe of the active download, with
//! exactly one receive outstanding at a time. The loop handles a single event
//! per iteration: user interrupt first, then progress, then completions.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::anyhow;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{Effect, Event, Machine, Outcome, Phase};
use crate::context::Context;
use crate::download::{
    progress_pipe, Finished, Progress, ProgressReceiver, ProgressSender, Sink,
};
use crate::error::{Error, Result};
use crate::fs::FileSystem;
use crate::plugins::{plugin_path, remove_plugin_binary, resolve_manifest, Plugin};

// =============================================================================
// Channel Types
// =============================================================================

type EventSender = mpsc::UnboundedSender<Event>;

fn send(events: &EventSender, event: Event) {
    if events.send(event).is_err() {
        debug!("Command finished before a completion was delivered");
    }
}

/// Per-run bookkeeping.
struct Run {
    events: EventSender,
    progress: Option<ProgressReceiver>,
    download_cancel: Option<CancellationToken>,
}

enum Wake {
    Interrupt,
    Progress(Option<Progress>),
    Event(Option<Event>),
}

async fn next_progress(progress: &mut Option<ProgressReceiver>) -> Option<Progress> {
    match progress {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

// =============================================================================
// Executor
// =============================================================================

/// Runs command machines against a [`Context`].
pub struct Executor {
    ctx: Context,
    tool: Option<(String, Arc<dyn Plugin>)>,
}

impl Executor {
    /// An executor for plugin commands.
    pub fn new(ctx: Context) -> Self {
        Self { ctx, tool: None }
    }

    /// An executor for commands on `tool`, served by `plugin`.
    pub fn for_tool(ctx: Context, tool: impl Into<String>, plugin: Arc<dyn Plugin>) -> Self {
        Self {
            ctx,
            tool: Some((tool.into(), plugin)),
        }
    }

    /// Drives `machine` to its outcome.
    ///
    /// `observe` sees the phase after every transition. Cancelling `interrupt`
    /// delivers one [`Event::CancelRequested`].
    pub async fn run<M: Machine>(
        &self,
        machine: M,
        interrupt: &CancellationToken,
        mut observe: impl FnMut(&Phase),
    ) -> Outcome {
        let (events_tx, mut events) = mpsc::unbounded_channel();
        let mut run = Run {
            events: events_tx,
            progress: None,
            download_cancel: None,
        };
        let mut interrupted = false;

        let (mut machine, effects) = machine.start();
        observe(&machine.phase());
        self.perform_all(effects, &mut run);

        loop {
            machine = match machine.into_outcome() {
                Ok(outcome) => {
                    debug!("Command finished: {:?}", outcome);
                    return outcome;
                }
                Err(machine) => machine,
            };

            let wake = tokio::select! {
                biased;
                _ = interrupt.cancelled(), if !interrupted => Wake::Interrupt,
                progress = next_progress(&mut run.progress) => Wake::Progress(progress),
                event = events.recv() => Wake::Event(event),
            };

            let event = match wake {
                Wake::Interrupt => {
                    interrupted = true;
                    info!("Cancellation requested");
                    Event::CancelRequested
                }
                Wake::Progress(Some(progress)) => Event::Progress(progress),
                Wake::Progress(None) => {
                    run.progress = None;
                    continue;
                }
                Wake::Event(Some(event)) => event,
                Wake::Event(None) => {
                    return Outcome::Failed(anyhow!("event channel closed unexpectedly").into())
                }
            };

            if matches!(event, Event::DownloadFinished(_) | Event::ManifestFetched(_)) {
                run.download_cancel = None;
            }

            let (next, effects) = machine.step(event);
            machine = next;
            observe(&machine.phase());
            self.perform_all(effects, &mut run);
        }
    }

    fn perform_all(&self, effects: Vec<Effect>, run: &mut Run) {
        for effect in effects {
            self.perform(effect, run);
        }
    }

    fn tool(&self) -> Result<(String, Arc<dyn Plugin>)> {
        self.tool
            .clone()
            .ok_or_else(|| anyhow!("no tool plugin is bound to this command").into())
    }

    /// Starts a cancellable download whose progress feeds this run.
    fn begin_download(&self, run: &mut Run) -> (ProgressSender, CancellationToken) {
        let (tx, rx) = progress_pipe();
        let cancel = CancellationToken::new();
        run.progress = Some(rx);
        run.download_cancel = Some(cancel.clone());
        (tx, cancel)
    }

    fn perform(&self, effect: Effect, run: &mut Run) {
        debug!("Performing {:?}", effect);
        let events = run.events.clone();
        let config = &self.ctx.config;

        match effect {
            Effect::DownloadTool { version } => {
                let plugin = match self.tool() {
                    Ok((_, plugin)) => plugin,
                    Err(e) => return send(&events, Event::DownloadFinished(Err(e))),
                };
                let (progress, cancel) = self.begin_download(run);
                tokio::spawn(async move {
                    let result = plugin.download(&version, progress, cancel).await;
                    send(&events, Event::DownloadFinished(result));
                });
            }

            Effect::InstallTool { version } => {
                let (tool, plugin) = match self.tool() {
                    Ok(tool) => tool,
                    Err(e) => return send(&events, Event::Installed(Err(e))),
                };
                let target = config.version_dir(&tool, &version);
                tokio::spawn(async move {
                    send(&events, Event::Installed(plugin.install(&target).await));
                });
            }

            Effect::ActivateTool { version } => {
                let (tool, plugin) = match self.tool() {
                    Ok(tool) => tool,
                    Err(e) => return send(&events, Event::Activated(Err(e))),
                };
                let version_dir = config.version_dir(&tool, &version);
                let path_dir = config.path_dir.clone();
                let fs = Arc::clone(&self.ctx.fs);
                tokio::spawn(async move {
                    let result = match fs.create_dir_all(&path_dir) {
                        Ok(()) => plugin.activate(&version_dir, &path_dir).await,
                        Err(e) => Err(Error::io(&path_dir, e)),
                    };
                    send(&events, Event::Activated(result));
                });
            }

            Effect::FetchManifest { url } => {
                let cancel = CancellationToken::new();
                run.download_cancel = Some(cancel.clone());
                let task = self.ctx.downloader.start(&url, Sink::Memory, None, cancel);
                tokio::spawn(async move {
                    send(&events, Event::ManifestFetched(task.finished().await));
                });
            }

            Effect::ResolveManifest { data, force } => {
                let registry = &self.ctx.registry;
                let result = resolve_manifest(
                    &data,
                    &self.ctx.platform,
                    |name| registry.lookup_version(name),
                    force,
                );
                send(&events, Event::ManifestResolved(result));
            }

            Effect::DownloadPlugin { name, url } => {
                let plugin_dir = &config.plugin_dir;
                if let Err(e) = self.ctx.fs.create_dir_all(plugin_dir) {
                    return send(
                        &events,
                        Event::DownloadFinished(Err(Error::io(plugin_dir, e))),
                    );
                }
                let (progress, cancel) = self.begin_download(run);
                let target = plugin_path(plugin_dir, &name);
                let staged = staging_path(&target);
                let sink = Sink::File(staged.clone());
                let task = self.ctx.downloader.start(&url, sink, Some(progress), cancel);
                let fs = Arc::clone(&self.ctx.fs);
                tokio::spawn(async move {
                    let result = match task.finished().await {
                        Ok(Finished::Completed(done)) => {
                            move_into_place(fs.as_ref(), &staged, &target)
                                .map(|()| Finished::Completed(done))
                        }
                        other => other,
                    };
                    send(&events, Event::DownloadFinished(result));
                });
            }

            Effect::RegisterPlugin(entry) => {
                send(&events, Event::Registered(self.ctx.registry.upsert(entry)));
            }

            Effect::RemovePluginFile { name } => {
                let fs = Arc::clone(&self.ctx.fs);
                let plugin_dir = config.plugin_dir.clone();
                tokio::spawn(async move {
                    let result = remove_plugin_binary(fs.as_ref(), &plugin_dir, &name);
                    send(&events, Event::FileRemoved(result));
                });
            }

            Effect::RemovePluginEntry { name } => {
                let registry = self.ctx.registry.clone();
                tokio::spawn(async move {
                    send(&events, Event::EntryRemoved(registry.remove(&name)));
                });
            }

            Effect::QueryCurrentVersion => {
                let (tool, plugin) = match self.tool() {
                    Ok(tool) => tool,
                    Err(e) => return send(&events, Event::CurrentVersion(Err(e))),
                };
                let tool_dir = config.tool_dir(&tool);
                let path_dir = config.path_dir.clone();
                tokio::spawn(async move {
                    let result = plugin.current_version(&tool_dir, &path_dir).await;
                    send(&events, Event::CurrentVersion(result));
                });
            }

            Effect::RemoveToolVersion { version, is_active } => {
                let (tool, plugin) = match self.tool() {
                    Ok(tool) => tool,
                    Err(e) => return send(&events, Event::VersionRemoved(Err(e))),
                };
                let version_dir = config.version_dir(&tool, &version);
                let path_dir = config.path_dir.clone();
                tokio::spawn(async move {
                    let result = plugin.remove(&version_dir, &path_dir, is_active).await;
                    send(&events, Event::VersionRemoved(result));
                });
            }

            Effect::CancelDownload => match &run.download_cancel {
                Some(cancel) => cancel.cancel(),
                None => debug!("No download in flight to cancel"),
            },
        }
    }
}

/// `<target>.part`, where a plugin module is written until it is complete.
fn staging_path(target: &Path) -> PathBuf {
    let mut staged = target.as_os_str().to_owned();
    staged.push(".part");
    PathBuf::from(staged)
}

/// Replaces `target` with the completed download at `staged`.
fn move_into_place(fs: &dyn FileSystem, staged: &Path, target: &Path) -> Result<()> {
    if let Err(e) = fs.rename(staged, target) {
        if let Err(cleanup) = fs.remove_file(staged) {
            warn!("Failed to remove {}: {}", staged.display(), cleanup);
        }
        return Err(Error::io(target, e));
    }
    debug!("Moved {} into place", target.display());
    Ok(())
}
