//! The event loop: owns a capture source plus the dissector chain and
//! storage, and drives them frame by frame (spec.md S5).
//!
//! Scheduling is single-threaded cooperative: [`Engine::step`] pulls exactly
//! one frame from the capture source, runs it through the [`Chain`], and
//! returns. There is no executor and no locking — the out-of-scope UI layer
//! is expected to call `step()` from its own timer tick (or `run()` to drain
//! an offline file to completion), matching "the loop blocks only on the
//! capture source ... and on UI input" from spec.md S5.

use crate::capture::{Frame, FrameSource};
use crate::config::Config;
use crate::dissect::{Chain, DissectCtx};
use crate::error::Result;
use crate::packet::{Packet, ProtocolTag};
use crate::storage::Storage;
use crate::telemetry::Telemetry;

/// Outcome of a single [`Engine::step`] call.
pub enum StepOutcome {
    /// A frame was dissected.
    Dissected,
    /// The capture source has nothing more to offer right now (offline EOF,
    /// or a live source with no frame currently ready).
    Idle,
}

/// Owns one capture source, the dissector chain, and the call table.
///
/// Constructed once at startup with an explicit [`Config`] value (spec.md
/// S9: replacing the original's process-wide capture-manager singleton with
/// a plain owned context), torn down at shutdown.
pub struct Engine {
    source: Box<dyn FrameSource>,
    chain: Chain,
    storage: Storage,
    telemetry: Telemetry,
    config: Config,
    tick: u64,
}

impl Engine {
    /// Build an engine around an already-opened capture source.
    pub fn new(source: Box<dyn FrameSource>, config: Config) -> Self {
        let mut chain = Chain::new();
        chain.configure_link(source.link_type());
        let capacity = config.call_table_capacity;
        Self {
            source,
            chain,
            storage: Storage::new(capacity),
            telemetry: Telemetry::default(),
            config,
            tick: 0,
        }
    }

    /// Pull and dissect exactly one frame.
    ///
    /// Per-frame errors never propagate: parse/session/crypto/storage
    /// failures are caught inside the chain walk and tallied in
    /// [`Telemetry`]; only a capture-source read failure (`InputError`)
    /// surfaces here, per spec.md S7's propagation policy.
    pub fn step(&mut self) -> Result<StepOutcome> {
        let Some(frame) = self.source.next_frame()? else {
            return Ok(StepOutcome::Idle);
        };
        self.dissect_frame(frame);
        Ok(StepOutcome::Dissected)
    }

    fn dissect_frame(&mut self, frame: Frame) {
        self.tick += 1;
        self.telemetry.frames_seen += 1;

        let mut packet = Packet::new(frame.timestamp_us, frame.data.clone());
        {
            let mut ctx = DissectCtx {
                config: &self.config,
                telemetry: &mut self.telemetry,
                storage: &mut self.storage,
                tick: self.tick,
            };
            self.chain.run(&mut ctx, &mut packet, ProtocolTag::Link, &frame.data);
        }

        let evicted = self.chain.age_tcp_flows();
        if evicted > 0 {
            self.telemetry.tcp_flows_evicted += evicted as u64;
        }
        self.storage.sweep_expectations(frame.timestamp_us);
    }

    /// Drain the capture source to completion, dissecting every frame. For
    /// a live source this blocks until the source itself ends (rare); for
    /// an offline source this is the normal way to replay a whole file.
    pub fn run(&mut self) -> Result<()> {
        loop {
            match self.step()? {
                StepOutcome::Dissected => continue,
                StepOutcome::Idle => return Ok(()),
            }
        }
    }

    /// Read-only access to the call table (spec.md S6 query API).
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Read-only access to run telemetry.
    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    /// Capture-source progress, forwarded for the out-of-scope UI's
    /// progress bar.
    pub fn progress(&self) -> (u64, u64) {
        self.source.progress()
    }
}
