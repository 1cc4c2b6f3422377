//! Tool install, optionally followed by activation.
//!
//! `downloading → installing → installed`, or with activation
//! `downloading → installing → settingActive → activated`.

use tracing::debug;

use super::{download_result, DownloadResult, Effect, Event, Machine, Outcome, Phase};
use crate::download::Progress;

#[derive(Debug)]
enum State {
    Idle,
    Downloading { progress: Option<Progress> },
    Canceling,
    Installing,
    SettingActive,
    Done(Outcome),
}

/// Downloads and installs one tool version.
#[derive(Debug)]
pub struct ToolInstall {
    tool: String,
    version: String,
    activate: bool,
    state: State,
}

impl ToolInstall {
    /// Plain install.
    pub fn new(tool: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            version: version.into(),
            activate: false,
            state: State::Idle,
        }
    }

    /// Install and then make the version active (`use --install`).
    pub fn then_activate(mut self) -> Self {
        self.activate = true;
        self
    }

    fn to(self, state: State, effects: Vec<Effect>) -> (Self, Vec<Effect>) {
        (Self { state, ..self }, effects)
    }

    fn done(self, outcome: Outcome) -> (Self, Vec<Effect>) {
        self.to(State::Done(outcome), Vec::new())
    }
}

impl Machine for ToolInstall {
    fn start(self) -> (Self, Vec<Effect>) {
        let effects = vec![Effect::DownloadTool {
            version: self.version.clone(),
        }];
        self.to(State::Downloading { progress: None }, effects)
    }

    fn step(mut self, event: Event) -> (Self, Vec<Effect>) {
        let state = std::mem::replace(&mut self.state, State::Idle);
        match (state, event) {
            (State::Downloading { .. }, Event::Progress(p)) => {
                self.to(State::Downloading { progress: Some(p) }, Vec::new())
            }
            (State::Downloading { .. }, Event::CancelRequested) => {
                self.to(State::Canceling, vec![Effect::CancelDownload])
            }
            (
                state @ (State::Downloading { .. } | State::Canceling),
                Event::DownloadFinished(result),
            ) => {
                let canceling = matches!(state, State::Canceling);
                match download_result(result, canceling) {
                    DownloadResult::Completed => {
                        let effects = vec![Effect::InstallTool {
                            version: self.version.clone(),
                        }];
                        self.to(State::Installing, effects)
                    }
                    DownloadResult::Canceled => self.done(Outcome::Canceled),
                    DownloadResult::Failed(e) => self.done(Outcome::Failed(e)),
                }
            }
            (State::Installing, Event::Installed(Ok(()))) if self.activate => {
                let effects = vec![Effect::ActivateTool {
                    version: self.version.clone(),
                }];
                self.to(State::SettingActive, effects)
            }
            (State::Installing, Event::Installed(Ok(()))) => {
                let outcome = Outcome::Installed {
                    name: self.tool.clone(),
                    version: self.version.clone(),
                };
                self.done(outcome)
            }
            (State::SettingActive, Event::Activated(Ok(()))) => {
                let outcome = Outcome::Activated {
                    name: self.tool.clone(),
                    version: self.version.clone(),
                };
                self.done(outcome)
            }
            (State::Installing, Event::Installed(Err(e)))
            | (State::SettingActive, Event::Activated(Err(e))) => self.done(Outcome::Failed(e)),
            (state, event) => {
                debug!("Tool install ignoring {:?}", event);
                self.to(state, Vec::new())
            }
        }
    }

    fn phase(&self) -> Phase {
        match &self.state {
            State::Idle | State::Downloading { progress: None } => {
                Phase::Downloading { progress: None }
            }
            State::Downloading { progress } => Phase::Downloading {
                progress: *progress,
            },
            State::Canceling => Phase::Canceling,
            State::Installing => Phase::Installing,
            State::SettingActive => Phase::SettingActive,
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

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    use crate::download::{Downloaded, Finished};

    fn completed() -> Event {
        Event::DownloadFinished(Ok(Finished::Completed(Downloaded::default())))
    }

    fn drive(machine: ToolInstall, events: Vec<Event>) -> (ToolInstall, Vec<Effect>) {
        let (mut machine, mut all) = machine.start();
        for event in events {
            let (next, effects) = machine.step(event);
            machine = next;
            all.extend(effects);
        }
        (machine, all)
    }

    #[test]
    fn test_install_sequence() {
        let (machine, effects) = drive(
            ToolInstall::new("go", "1.22.0"),
            vec![
                Event::Progress(Progress::new(0.5).unwrap()),
                completed(),
                Event::Installed(Ok(())),
            ],
        );

        assert_eq!(
            effects,
            vec![
                Effect::DownloadTool {
                    version: "1.22.0".into()
                },
                Effect::InstallTool {
                    version: "1.22.0".into()
                },
            ]
        );
        assert!(matches!(
            machine.into_outcome(),
            Ok(Outcome::Installed { ref name, ref version }) if name == "go" && version == "1.22.0"
        ));
    }

    #[test]
    fn test_progress_is_reflected_in_phase() {
        let (machine, _) = ToolInstall::new("go", "1.22.0").start();
        assert_eq!(machine.phase(), Phase::Downloading { progress: None });

        let (machine, _) = machine.step(Event::Progress(Progress::new(0.25).unwrap()));
        assert_eq!(
            machine.phase(),
            Phase::Downloading {
                progress: Progress::new(0.25)
            }
        );
    }

    #[test]
    fn test_use_with_install_activates() {
        let (machine, effects) = drive(
            ToolInstall::new("go", "1.22.0").then_activate(),
            vec![completed(), Event::Installed(Ok(())), Event::Activated(Ok(()))],
        );

        assert_eq!(
            effects.last(),
            Some(&Effect::ActivateTool {
                version: "1.22.0".into()
            })
        );
        assert!(matches!(
            machine.into_outcome(),
            Ok(Outcome::Activated { .. })
        ));
    }

    #[test]
    fn test_cancel_waits_for_download_acknowledgement() {
        let (machine, effects) = drive(
            ToolInstall::new("go", "1.22.0"),
            vec![Event::CancelRequested],
        );
        assert_eq!(effects.last(), Some(&Effect::CancelDownload));
        assert_eq!(machine.phase(), Phase::Canceling);

        let machine = match machine.into_outcome() {
            Ok(outcome) => panic!("terminal before acknowledgement: {:?}", outcome),
            Err(machine) => machine,
        };

        // Even a transfer that completed just before the cancel landed.
        let (machine, effects) = machine.step(completed());
        assert!(effects.is_empty());
        assert!(matches!(machine.into_outcome(), Ok(Outcome::Canceled)));
    }

    #[test]
    fn test_cancel_outside_download_is_ignored() {
        let (machine, effects) = drive(
            ToolInstall::new("go", "1.22.0"),
            vec![completed(), Event::CancelRequested, Event::Installed(Ok(()))],
        );
        assert!(!effects.contains(&Effect::CancelDownload));
        assert!(matches!(
            machine.into_outcome(),
            Ok(Outcome::Installed { .. })
        ));
    }

    #[test]
    fn test_download_error_is_fatal() {
        let (machine, effects) = drive(
            ToolInstall::new("go", "1.22.0"),
            vec![Event::DownloadFinished(Err(anyhow!("reset").into()))],
        );
        assert_eq!(effects.len(), 1);
        assert_eq!(machine.phase(), Phase::Done);
        assert!(matches!(machine.into_outcome(), Ok(Outcome::Failed(_))));
    }

    #[test]
    fn test_install_error_is_fatal() {
        let (machine, _) = drive(
            ToolInstall::new("go", "1.22.0").then_activate(),
            vec![completed(), Event::Installed(Err(anyhow!("disk full").into()))],
        );
        assert!(matches!(machine.into_outcome(), Ok(Outcome::Failed(_))));
    }
}
