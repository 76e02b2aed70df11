//! Epoch command protocol and the render pipeline behind it.
//!
//! The sequencer sends one [`EpochCommand`] per epoch. Each epoch name maps
//! through the [`EpochTable`] to a `clear_queue` flag, an [`InitFn`] run once
//! on receipt and an optional [`UpdateFn`] that keeps the frame queue filled
//! until the next command arrives.

pub mod display;
pub mod dots;
pub mod queue;
pub mod renderer;

use serde::{Deserialize, Serialize};

use crate::core::sign::Sign;
use crate::task::scheduler::Outcome;

pub type Rgb = [u8; 3];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpochKind {
    Fixation,
    Stimulus,
    Reinforcement,
    Delay,
    MustRespond,
    Intertrial,
}

impl EpochKind {
    pub const ALL: [EpochKind; 6] = [
        EpochKind::Fixation,
        EpochKind::Stimulus,
        EpochKind::Reinforcement,
        EpochKind::Delay,
        EpochKind::MustRespond,
        EpochKind::Intertrial,
    ];

    pub fn name(self) -> &'static str {
        match self {
            EpochKind::Fixation => "fixation",
            EpochKind::Stimulus => "stimulus",
            EpochKind::Reinforcement => "reinforcement",
            EpochKind::Delay => "delay",
            EpochKind::MustRespond => "must_respond",
            EpochKind::Intertrial => "intertrial",
        }
    }
}

impl std::fmt::Display for EpochKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One-shot work done when an epoch command is received.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitFn {
    /// Paint the background colour.
    FillBackground,
    /// Seed a new dot field from the trial parameters and paint its first frame.
    StimulusOnset,
    /// Paint the colour associated with the trial outcome.
    OutcomeFeedback,
    /// Leave whatever is on screen.
    Nothing,
}

/// Continuous frame producer for an epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateFn {
    /// Advance the dot field one frame per instruction.
    DotMotion,
    /// Re-emit the static frame.
    Hold,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochSpec {
    pub clear_queue: bool,
    pub init: InitFn,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update: Option<UpdateFn>,
}

impl EpochSpec {
    pub const fn new(clear_queue: bool, init: InitFn, update: Option<UpdateFn>) -> Self {
        Self {
            clear_queue,
            init,
            update,
        }
    }
}

/// Renderer behaviour per epoch. An epoch without an entry cannot be used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EpochTable {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixation: Option<EpochSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stimulus: Option<EpochSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reinforcement: Option<EpochSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<EpochSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub must_respond: Option<EpochSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intertrial: Option<EpochSpec>,
}

impl EpochTable {
    /// The stock table: everything clears except must-respond, and only the
    /// stimulus epoch streams frames.
    pub fn standard() -> Self {
        Self {
            fixation: Some(EpochSpec::new(true, InitFn::FillBackground, None)),
            stimulus: Some(EpochSpec::new(
                true,
                InitFn::StimulusOnset,
                Some(UpdateFn::DotMotion),
            )),
            reinforcement: Some(EpochSpec::new(true, InitFn::OutcomeFeedback, None)),
            delay: Some(EpochSpec::new(true, InitFn::FillBackground, None)),
            must_respond: Some(EpochSpec::new(false, InitFn::Nothing, None)),
            intertrial: Some(EpochSpec::new(true, InitFn::FillBackground, None)),
        }
    }

    pub fn get(&self, epoch: EpochKind) -> Option<&EpochSpec> {
        match epoch {
            EpochKind::Fixation => self.fixation.as_ref(),
            EpochKind::Stimulus => self.stimulus.as_ref(),
            EpochKind::Reinforcement => self.reinforcement.as_ref(),
            EpochKind::Delay => self.delay.as_ref(),
            EpochKind::MustRespond => self.must_respond.as_ref(),
            EpochKind::Intertrial => self.intertrial.as_ref(),
        }
    }

    pub fn command(&self, epoch: EpochKind, args: EpochArgs) -> Option<EpochCommand> {
        self.get(epoch).map(|spec| EpochCommand {
            epoch,
            clear_queue: spec.clear_queue,
            init: spec.init,
            update: spec.update,
            args,
        })
    }
}

impl Default for EpochTable {
    fn default() -> Self {
        Self::standard()
    }
}

/// Typed replacement for a free-form argument map.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EpochArgs {
    pub seed: Option<u64>,
    pub signed_coherence: Option<f64>,
    pub target: Option<Sign>,
    pub outcome: Option<Outcome>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochCommand {
    pub epoch: EpochKind,
    pub clear_queue: bool,
    pub init: InitFn,
    pub update: Option<UpdateFn>,
    pub args: EpochArgs,
}

/// One frame's worth of drawing, opaque to the queue.
#[derive(Debug, Clone, PartialEq)]
pub enum DrawInstruction {
    Fill {
        color: Rgb,
    },
    Dots {
        background: Rgb,
        color: Rgb,
        radius: f32,
        positions: Vec<[f32; 2]>,
    },
}

/// A draw instruction tagged with the epoch that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub epoch: EpochKind,
    /// Queue generation at the time the frame was produced.
    pub generation: u64,
    pub instruction: DrawInstruction,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_table_covers_every_epoch() {
        let table = EpochTable::standard();
        for epoch in EpochKind::ALL {
            assert!(table.get(epoch).is_some(), "{epoch} missing");
        }
        assert!(!table.get(EpochKind::MustRespond).unwrap().clear_queue);
        assert_eq!(
            table.get(EpochKind::Stimulus).unwrap().update,
            Some(UpdateFn::DotMotion)
        );
    }

    #[test]
    fn unknown_function_names_are_rejected() {
        let text = r#"
            [fixation]
            clear_queue = true
            init = "draw_spiral"
        "#;
        assert!(toml::from_str::<EpochTable>(text).is_err());

        let text = r#"
            [flashing]
            clear_queue = true
            init = "nothing"
        "#;
        assert!(toml::from_str::<EpochTable>(text).is_err());
    }

    #[test]
    fn partial_table_leaves_other_epochs_unset() {
        let text = r#"
            [stimulus]
            clear_queue = false
            init = "stimulus_onset"
            update = "dot_motion"
        "#;
        let table: EpochTable = toml::from_str(text).unwrap();
        assert!(table.get(EpochKind::Fixation).is_none());
        let cmd = table
            .command(EpochKind::Stimulus, EpochArgs::default())
            .unwrap();
        assert!(!cmd.clear_queue);
    }
}
