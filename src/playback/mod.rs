//! Playback subsystem
//!
//! Two interchangeable render backends behind one feed/render contract:
//!
//! * worklet: decoded chunks are moved to the render thread over a channel;
//!   the render side owns its queue outright.
//! * fallback: a shared queue filled by the control flow and drained by the
//!   device callback.
//!
//! The engine picks one at initialization and keeps it for the session.

pub mod engine;
pub mod fallback;
pub mod output;
pub mod worklet;

pub use engine::{EngineState, PlaybackBackend, PlaybackEngine};
pub use fallback::{FallbackBackend, FallbackRenderer};
pub use output::{AudioOutput, CpalOutput};
pub use worklet::{WorkletPort, WorkletProcessor};

use std::fmt;

/// Render backend variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Worklet,
    Fallback,
}

impl BackendKind {
    pub fn name(self) -> &'static str {
        match self {
            BackendKind::Worklet => "worklet",
            BackendKind::Fallback => "fallback",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Map one source frame onto an output frame.
///
/// Matching channels are copied; extra output channels repeat the last
/// source channel, so mono fans out to every speaker.
#[inline]
pub(crate) fn mix_frame(src: &[f32], dst: &mut [f32]) {
    let Some(last) = src.len().checked_sub(1) else {
        dst.fill(0.0);
        return;
    };
    for (ch, out) in dst.iter_mut().enumerate() {
        *out = src[ch.min(last)];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mix_frame() {
        let mut stereo = [0.0f32; 2];
        mix_frame(&[0.25], &mut stereo);
        assert_eq!(stereo, [0.25, 0.25]);

        let mut mono = [0.0f32; 1];
        mix_frame(&[0.1, 0.9], &mut mono);
        assert_eq!(mono, [0.1]);

        let mut quad = [1.0f32; 4];
        mix_frame(&[0.1, 0.2], &mut quad);
        assert_eq!(quad, [0.1, 0.2, 0.2, 0.2]);

        mix_frame(&[], &mut quad);
        assert_eq!(quad, [0.0; 4]);
    }
}
