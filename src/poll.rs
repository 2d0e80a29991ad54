//! The indefinite top-level loop: wait for a tag, run one session,
//! pace the next attempt.

use crate::block;
use crate::cancellation_token::CancellationToken;
use crate::link::{CardLink, LinkError};
use crate::session::{SessionController, SessionOutcome, Target};
use crate::RppalMifareLog;
use crate::{output, warning};
use std::thread;
use std::time::Duration;

/// The only timing contracts in the program.  Fixed configuration, not
/// adaptive: a short yield while the field is empty, a longer cooldown
/// after a session so a tag resting on the reader is not immediately
/// re-processed, and a pause after a fault to let the bus settle.
#[derive(Debug, Clone, Copy)]
pub struct Pacing {
    pub poll_interval: Duration,
    pub cooldown: Duration,
    pub recovery_delay: Duration,
}

pub struct PollLoop<L: CardLink> {
    link: L,
    pacing: Pacing,
    token: CancellationToken,
}

impl<L: CardLink> PollLoop<L> {
    pub fn new(link: L, pacing: Pacing, token: CancellationToken) -> PollLoop<L> {
        PollLoop {
            link,
            pacing,
            token,
        }
    }

    /// Poll until the cancellation token fires.  Every failure below the
    /// loop boundary is logged and absorbed; nothing short of Ctrl+C
    /// (or a fatal startup error, which never reaches this point)
    /// stops the process.
    pub fn run(&mut self, target: &Target, log: &dyn RppalMifareLog) {
        while !self.token.is_canceled() {
            match self.cycle(target, log) {
                Ok(SessionOutcome::NoTag) => thread::sleep(self.pacing.poll_interval),
                Ok(outcome) => {
                    Self::report(&outcome, log);
                    thread::sleep(self.pacing.cooldown);
                }
                Err(err) => {
                    warning!(log, "poll cycle failed: {}", err);
                    thread::sleep(self.pacing.recovery_delay);
                }
            }
        }
    }

    /// One full cycle: probe, anti-collision, session.  A request
    /// timeout just means an empty field; any other link error escapes
    /// to the recovery arm in `run`.
    fn cycle(
        &mut self,
        target: &Target,
        log: &dyn RppalMifareLog,
    ) -> Result<SessionOutcome, LinkError> {
        let tag_type = match self.link.request() {
            Ok(tag_type) => tag_type,
            Err(LinkError::Timeout) => return Ok(SessionOutcome::NoTag),
            Err(err) => return Err(err),
        };

        let uid = self.link.anticollision()?;

        output!(
            log,
            "new card: uid {} (type {:#06x})",
            hex::encode(uid),
            tag_type
        );

        Ok(SessionController::new(&mut self.link).run(&uid, target))
    }

    fn report(outcome: &SessionOutcome, log: &dyn RppalMifareLog) {
        match outcome {
            SessionOutcome::Success(payload) => output!(
                log,
                "block content: {} ({:?})",
                block::to_hex(payload),
                block::decode(payload)
            ),
            failed => warning!(log, "{}", failed),
        }
    }
}
