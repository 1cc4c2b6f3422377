//! Plugin install from a manifest URL.
//!
//! `fetchingMetadata → resolving → {upToDate | noBuild | downloading →
//! registering → installed}`.

use tracing::debug;

use super::{download_result, DownloadResult, Effect, Event, Machine, Outcome, Phase};
use crate::download::{Finished, Progress};
use crate::plugins::{PluginEntry, Release, Resolution};

#[derive(Debug)]
enum State {
    Idle,
    FetchingMetadata,
    Resolving,
    Downloading {
        release: Release,
        progress: Option<Progress>,
    },
    Canceling,
    Registering {
        release: Release,
    },
    Done(Outcome),
}

/// Installs or updates the plugin described by the manifest at `url`.
#[derive(Debug)]
pub struct PluginInstall {
    url: String,
    force: bool,
    state: State,
}

impl PluginInstall {
    pub fn new(url: impl Into<String>, force: bool) -> Self {
        Self {
            url: url.into(),
            force,
            state: State::Idle,
        }
    }

    fn to(self, state: State, effects: Vec<Effect>) -> (Self, Vec<Effect>) {
        (Self { state, ..self }, effects)
    }

    fn done(self, outcome: Outcome) -> (Self, Vec<Effect>) {
        self.to(State::Done(outcome), Vec::new())
    }

    fn resolved(self, resolution: Resolution) -> (Self, Vec<Effect>) {
        match resolution {
            Resolution::UpToDate { name, installed } => self.done(Outcome::UpToDate {
                name,
                version: installed.to_string(),
            }),
            Resolution::NoBuild { name, version } => self.done(Outcome::NoBuildForPlatform {
                name,
                version: version.to_string(),
            }),
            Resolution::Install(release) => {
                let effects = vec![Effect::DownloadPlugin {
                    name: release.name.clone(),
                    url: release.url.clone(),
                }];
                self.to(
                    State::Downloading {
                        release,
                        progress: None,
                    },
                    effects,
                )
            }
        }
    }
}

impl Machine for PluginInstall {
    fn start(self) -> (Self, Vec<Effect>) {
        let effects = vec![Effect::FetchManifest {
            url: self.url.clone(),
        }];
        self.to(State::FetchingMetadata, effects)
    }

    fn step(mut self, event: Event) -> (Self, Vec<Effect>) {
        let state = std::mem::replace(&mut self.state, State::Idle);
        match (state, event) {
            (State::FetchingMetadata, Event::CancelRequested)
            | (State::Downloading { .. }, Event::CancelRequested) => {
                self.to(State::Canceling, vec![Effect::CancelDownload])
            }
            (State::Canceling, Event::ManifestFetched(_) | Event::DownloadFinished(_)) => {
                self.done(Outcome::Canceled)
            }
            (State::FetchingMetadata, Event::ManifestFetched(result)) => {
                match result {
                    Ok(Finished::Completed(manifest)) => {
                        let effects = vec![Effect::ResolveManifest {
                            data: manifest.into_data(),
                            force: self.force,
                        }];
                        self.to(State::Resolving, effects)
                    }
                    Ok(Finished::Canceled) => self.done(Outcome::Canceled),
                    Err(e) => self.done(Outcome::Failed(e)),
                }
            }
            (State::Resolving, Event::ManifestResolved(Ok(resolution))) => {
                self.resolved(resolution)
            }
            (State::Resolving, Event::ManifestResolved(Err(e))) => self.done(Outcome::Failed(e)),
            (State::Downloading { release, .. }, Event::Progress(p)) => self.to(
                State::Downloading {
                    release,
                    progress: Some(p),
                },
                Vec::new(),
            ),
            (State::Downloading { release, .. }, Event::DownloadFinished(result)) => {
                match download_result(result, false) {
                    DownloadResult::Completed => {
                        let entry = PluginEntry::new(
                            release.name.clone(),
                            release.version.to_string(),
                            self.url.clone(),
                        );
                        self.to(
                            State::Registering { release },
                            vec![Effect::RegisterPlugin(entry)],
                        )
                    }
                    DownloadResult::Canceled => self.done(Outcome::Canceled),
                    DownloadResult::Failed(e) => self.done(Outcome::Failed(e)),
                }
            }
            (State::Registering { release }, Event::Registered(Ok(()))) => {
                self.done(Outcome::Installed {
                    name: release.name,
                    version: release.version.to_string(),
                })
            }
            (State::Registering { .. }, Event::Registered(Err(e))) => {
                self.done(Outcome::Failed(e))
            }
            (state, event) => {
                debug!("Plugin install ignoring {:?}", event);
                self.to(state, Vec::new())
            }
        }
    }

    fn phase(&self) -> Phase {
        match &self.state {
            State::Idle | State::FetchingMetadata => Phase::FetchingMetadata,
            State::Resolving => Phase::Resolving,
            State::Downloading { progress, .. } => Phase::Downloading {
                progress: *progress,
            },
            State::Canceling => Phase::Canceling,
            State::Registering { .. } => Phase::Registering,
            State::Done(_) => Phase::Done,
        }
    }

    fn into_outcome(self) -> Result<Outcome, Self> {
        match self.state {
            State::Done(outcome) => Ok(outcome),
            state => Err(Self { state, ..self }),
        }
    }
}
