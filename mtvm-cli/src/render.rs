//! Terminal rendering of command phases and outcomes.

use std::io::{self, Write};

use mtvm_core::{Outcome, Phase};

/// Prints one line per phase, rewriting the download line in place as
/// progress arrives.
#[derive(Default)]
pub struct PhaseRenderer {
    last: Option<Phase>,
}

impl PhaseRenderer {
    pub fn observe(&mut self, phase: &Phase) {
        if self.last.as_ref() == Some(phase) {
            return;
        }
        let was_downloading = matches!(self.last, Some(Phase::Downloading { .. }));
        self.last = Some(*phase);

        // Write errors on stdout are not worth failing a command over.
        let mut out = io::stdout().lock();
        if was_downloading && !matches!(phase, Phase::Downloading { .. }) {
            let _ = writeln!(out);
        }
        let _ = match phase {
            Phase::Downloading { .. } => write!(out, "\r{}", phase),
            Phase::Done => Ok(()),
            _ => writeln!(out, "{}", phase),
        };
        let _ = out.flush();
    }
}

/// Prints the final outcome and maps it to the process exit status.
pub fn report(outcome: &Outcome) -> u8 {
    match outcome {
        Outcome::Failed(e) if e.is_not_found() => {
            println!("{}", e);
            1
        }
        Outcome::Failed(e) => {
            eprintln!("Error: {}", e);
            1
        }
        Outcome::Canceled => {
            println!("{}", outcome);
            130
        }
        outcome => {
            println!("{}", outcome);
            if outcome.is_success() {
                0
            } else {
                1
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mtvm_core::Error;

    #[test]
    fn test_exit_codes() {
        let installed = Outcome::Installed {
            name: "go".into(),
            version: "1.22.0".into(),
        };
        assert_eq!(report(&installed), 0);
        assert_eq!(report(&Outcome::NothingToRemove { name: "x".into() }), 0);
        assert_eq!(report(&Outcome::Canceled), 130);
        assert_eq!(
            report(&Outcome::AlreadyInstalled {
                name: "go".into(),
                version: "1.22.0".into()
            }),
            1
        );
        assert_eq!(
            report(&Outcome::Failed(Error::validation("url", "must be http(s)"))),
            1
        );
    }
}
