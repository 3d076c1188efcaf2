//! Temporal state carried between frames

use glam::Mat4;

use crate::pool::TargetTag;

/// Ping-pong accumulation pair.
///
/// Each frame writes the `current` slot and reads history from `previous`,
/// which is always `current ^ 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferPair {
    active: usize,
}

impl BufferPair {
    pub fn new(active: usize) -> Self {
        Self { active: active & 1 }
    }

    pub fn current(&self) -> usize {
        self.active
    }

    pub fn previous(&self) -> usize {
        self.active ^ 1
    }

    /// The pair with roles swapped
    pub fn flipped(&self) -> Self {
        Self::new(self.active ^ 1)
    }

    pub fn current_tag(&self) -> TargetTag {
        TargetTag::Accumulation(self.current())
    }

    pub fn previous_tag(&self) -> TargetTag {
        TargetTag::Accumulation(self.previous())
    }
}

/// State committed at the end of every rendered frame
#[derive(Debug, Clone, PartialEq)]
pub struct TemporalState {
    previous_view: Mat4,
    first_frame: bool,
    buffers: BufferPair,
    frames: u64,
}

impl TemporalState {
    pub fn new() -> Self {
        Self {
            previous_view: Mat4::IDENTITY,
            first_frame: true,
            // Flipped before use, so the first frame writes slot 0
            buffers: BufferPair::new(1),
            frames: 0,
        }
    }

    /// True until the first frame is committed
    pub fn first_frame(&self) -> bool {
        self.first_frame
    }

    /// World-to-camera matrix of the last committed frame
    pub fn previous_view(&self) -> Mat4 {
        self.previous_view
    }

    /// Buffer assignment of the last committed frame
    pub fn buffers(&self) -> BufferPair {
        self.buffers
    }

    /// Buffer assignment for the frame about to render
    pub fn next_buffers(&self) -> BufferPair {
        self.buffers.flipped()
    }

    /// Number of committed frames
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Record a fully rendered frame
    pub fn commit(&mut self, view: Mat4, buffers: BufferPair) {
        self.previous_view = view;
        self.first_frame = false;
        self.buffers = buffers;
        self.frames += 1;
    }

    /// Forget all history, as when the effect is re-enabled
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

impl Default for TemporalState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_roles_are_complementary() {
        for active in 0..2 {
            let pair = BufferPair::new(active);
            assert_eq!(pair.previous(), pair.current() ^ 1);
            assert_eq!(pair.flipped().current(), pair.previous());
        }
    }

    #[test]
    fn first_frame_writes_slot_zero() {
        let state = TemporalState::new();
        assert!(state.first_frame());
        assert_eq!(state.next_buffers().current(), 0);
    }

    #[test]
    fn commit_clears_first_frame_and_alternates() {
        let mut state = TemporalState::new();
        let view = Mat4::from_translation(glam::Vec3::X);

        let frame = state.next_buffers();
        state.commit(view, frame);
        assert!(!state.first_frame());
        assert_eq!(state.previous_view(), view);
        assert_eq!(state.next_buffers().current(), 1);
        assert_eq!(state.next_buffers().previous(), frame.current());
    }

    #[test]
    fn reset_restores_first_frame() {
        let mut state = TemporalState::new();
        let frame = state.next_buffers();
        state.commit(Mat4::IDENTITY, frame);
        state.reset();
        assert!(state.first_frame());
        assert_eq!(state.frames(), 0);
    }
}
