//! Plugin removal and tool version removal.

use tracing::debug;

use super::{Effect, Event, Machine, Outcome, Phase};
use crate::error::Result;

// =============================================================================
// Plugin remove
// =============================================================================

/// Result of one half of a plugin removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Removal {
    Removed,
    NotFound,
}

#[derive(Debug)]
enum PluginState {
    Idle,
    Removing {
        file: Option<Removal>,
        entry: Option<Removal>,
    },
    Done(Outcome),
}

/// Deletes a plugin's module file and its registry entry concurrently.
///
/// Terminal once both halves have reported. Not-found on both means there was
/// nothing to remove; any other error fails the command immediately.
#[derive(Debug)]
pub struct PluginRemove {
    name: String,
    state: PluginState,
}

impl PluginRemove {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: PluginState::Idle,
        }
    }

    fn to(self, state: PluginState) -> (Self, Vec<Effect>) {
        (Self { state, ..self }, Vec::new())
    }

    fn report(
        self,
        file: Option<Removal>,
        entry: Option<Removal>,
        result: Result<()>,
        is_file: bool,
    ) -> (Self, Vec<Effect>) {
        let removal = match result {
            Ok(()) => Removal::Removed,
            Err(e) if e.is_not_found() => {
                debug!("{}", e);
                Removal::NotFound
            }
            Err(e) => return self.to(PluginState::Done(Outcome::Failed(e))),
        };

        let (file, entry) = if is_file {
            (Some(removal), entry)
        } else {
            (file, Some(removal))
        };

        match (file, entry) {
            (Some(Removal::NotFound), Some(Removal::NotFound)) => {
                let outcome = Outcome::NothingToRemove {
                    name: self.name.clone(),
                };
                self.to(PluginState::Done(outcome))
            }
            (Some(_), Some(_)) => {
                let outcome = Outcome::Removed {
                    name: self.name.clone(),
                };
                self.to(PluginState::Done(outcome))
            }
            (file, entry) => self.to(PluginState::Removing { file, entry }),
        }
    }
}

impl Machine for PluginRemove {
    fn start(self) -> (Self, Vec<Effect>) {
        let effects = vec![
            Effect::RemovePluginFile {
                name: self.name.clone(),
            },
            Effect::RemovePluginEntry {
                name: self.name.clone(),
            },
        ];
        (
            Self {
                state: PluginState::Removing {
                    file: None,
                    entry: None,
                },
                ..self
            },
            effects,
        )
    }

    fn step(mut self, event: Event) -> (Self, Vec<Effect>) {
        let state = std::mem::replace(&mut self.state, PluginState::Idle);
        match (state, event) {
            (PluginState::Removing { file: None, entry }, Event::FileRemoved(result)) => {
                self.report(None, entry, result, true)
            }
            (PluginState::Removing { file, entry: None }, Event::EntryRemoved(result)) => {
                self.report(file, None, result, false)
            }
            (state, event) => {
                debug!("Plugin remove ignoring {:?}", event);
                self.to(state)
            }
        }
    }

    fn phase(&self) -> Phase {
        match self.state {
            PluginState::Done(_) => Phase::Done,
            _ => Phase::Removing,
        }
    }

    fn into_outcome(self) -> std::result::Result<Outcome, Self> {
        match self.state {
            PluginState::Done(outcome) => Ok(outcome),
            state => Err(Self { state, ..self }),
        }
    }
}

// =============================================================================
// Version remove
// =============================================================================

#[derive(Debug)]
enum VersionState {
    Idle,
    QueryingCurrent,
    Removing,
    Done(Outcome),
}

/// Removes one installed version of a tool, unlinking it if it is active.
#[derive(Debug)]
pub struct VersionRemove {
    tool: String,
    version: String,
    state: VersionState,
}

impl VersionRemove {
    pub fn new(tool: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            version: version.into(),
            state: VersionState::Idle,
        }
    }

    fn to(self, state: VersionState, effects: Vec<Effect>) -> (Self, Vec<Effect>) {
        (Self { state, ..self }, effects)
    }
}

impl Machine for VersionRemove {
    fn start(self) -> (Self, Vec<Effect>) {
        self.to(VersionState::QueryingCurrent, vec![Effect::QueryCurrentVersion])
    }

    fn step(mut self, event: Event) -> (Self, Vec<Effect>) {
        let state = std::mem::replace(&mut self.state, VersionState::Idle);
        match (state, event) {
            (VersionState::QueryingCurrent, Event::CurrentVersion(Ok(current))) => {
                let is_active = current.as_deref() == Some(self.version.as_str());
                let effects = vec![Effect::RemoveToolVersion {
                    version: self.version.clone(),
                    is_active,
                }];
                self.to(VersionState::Removing, effects)
            }
            (VersionState::Removing, Event::VersionRemoved(Ok(()))) => {
                let outcome = Outcome::Removed {
                    name: format!("{} {}", self.tool, self.version),
                };
                self.to(VersionState::Done(outcome), Vec::new())
            }
            (VersionState::QueryingCurrent, Event::CurrentVersion(Err(e)))
            | (VersionState::Removing, Event::VersionRemoved(Err(e))) => {
                self.to(VersionState::Done(Outcome::Failed(e)), Vec::new())
            }
            (state, event) => {
                debug!("Version remove ignoring {:?}", event);
                self.to(state, Vec::new())
            }
        }
    }

    fn phase(&self) -> Phase {
        match self.state {
            VersionState::Done(_) => Phase::Done,
            _ => Phase::Removing,
        }
    }

    fn into_outcome(self) -> std::result::Result<Outcome, Self> {
        match self.state {
            VersionState::Done(outcome) => Ok(outcome),
            state => Err(Self { state, ..self }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    use crate::error::{Error, Missing};

    fn missing(thing: Missing) -> Result<()> {
        Err(Error::not_found(thing, "x", "test"))
    }

    fn remove_plugin(events: Vec<Event>) -> std::result::Result<Outcome, PluginRemove> {
        let (mut machine, effects) = PluginRemove::new("x").start();
        assert_eq!(effects.len(), 2);
        for event in events {
            machine = machine.step(event).0;
        }
        machine.into_outcome()
    }

    #[test]
    fn test_both_not_found_is_nothing_to_remove() {
        let outcome = remove_plugin(vec![
            Event::EntryRemoved(missing(Missing::RegistryFile)),
            Event::FileRemoved(missing(Missing::PluginBinary)),
        ]);
        assert!(matches!(outcome, Ok(Outcome::NothingToRemove { .. })));
    }

    #[test]
    fn test_either_success_is_removed() {
        let outcome = remove_plugin(vec![
            Event::FileRemoved(Ok(())),
            Event::EntryRemoved(missing(Missing::Entry)),
        ]);
        assert!(matches!(outcome, Ok(Outcome::Removed { .. })));

        let outcome = remove_plugin(vec![
            Event::FileRemoved(missing(Missing::PluginBinary)),
            Event::EntryRemoved(Ok(())),
        ]);
        assert!(matches!(outcome, Ok(Outcome::Removed { .. })));
    }

    #[test]
    fn test_waits_for_both_halves() {
        let outcome = remove_plugin(vec![Event::FileRemoved(Ok(()))]);
        let machine = match outcome {
            Ok(outcome) => panic!("terminal after one half: {:?}", outcome),
            Err(machine) => machine,
        };
        assert_eq!(machine.phase(), Phase::Removing);
    }

    #[test]
    fn test_real_error_is_fatal() {
        let outcome = remove_plugin(vec![Event::EntryRemoved(Err(anyhow!(
            "permission denied"
        )
        .into()))]);
        assert!(matches!(outcome, Ok(Outcome::Failed(_))));
    }

    #[test]
    fn test_cancel_is_ignored_while_removing() {
        let outcome = remove_plugin(vec![
            Event::CancelRequested,
            Event::FileRemoved(Ok(())),
            Event::EntryRemoved(Ok(())),
        ]);
        assert!(matches!(outcome, Ok(Outcome::Removed { .. })));
    }

    #[test]
    fn test_version_remove_unlinks_active_version() {
        let (machine, effects) = VersionRemove::new("go", "1.22.0").start();
        assert_eq!(effects, vec![Effect::QueryCurrentVersion]);

        let (machine, effects) = machine.step(Event::CurrentVersion(Ok(Some("1.22.0".into()))));
        assert_eq!(
            effects,
            vec![Effect::RemoveToolVersion {
                version: "1.22.0".into(),
                is_active: true
            }]
        );

        let (machine, _) = machine.step(Event::VersionRemoved(Ok(())));
        assert!(matches!(machine.into_outcome(), Ok(Outcome::Removed { .. })));
    }

    #[test]
    fn test_version_remove_inactive_version() {
        let (machine, _) = VersionRemove::new("go", "1.21.0").start();
        let (_, effects) = machine.step(Event::CurrentVersion(Ok(Some("1.22.0".into()))));
        assert_eq!(
            effects,
            vec![Effect::RemoveToolVersion {
                version: "1.21.0".into(),
                is_active: false
            }]
        );
    }
}
