//! Frame state machine and per-frame pass plan.
//!
//! Everything here is plain data: no GPU objects. [`FramePlan::build`] turns the
//! frame's toggles into the exact list of passes, each naming the resources it
//! reads and writes, and [`FramePlan::validate`] checks the buffer rules before
//! anything is recorded. The pipeline then executes the plan state by state and
//! keeps the executed records as the frame trace.
//!
//! # Buffer Rules
//!
//! 1. A pass never reads a resource it writes.
//! 2. Every read sees a resource written earlier in the same frame.
//! 3. Passes before the tonemap state touch only the GBuffer and the wide pool;
//!    passes after it touch only the display pool and the screen. Tonemap reads
//!    the wide pool and writes the display pool or the screen.
//! 4. The deferred resolve and every wide effect end by writing
//!    [`WideSlot::CurrentResult`], and every state after the resolve up to and
//!    including tonemap starts by reading it.
//! 5. The screen is written exactly once, by the last pass.

use std::fmt;

use super::buffer_pool::{DisplaySlot, WideSlot};
use super::gbuffer::GBufferChannel;
use crate::error::{PipelineError, Result};

/// Per-frame states, in the only order they may occur.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FrameState {
    ClearGBuffer,
    GeometryPass,
    DeferredResolve,
    Bloom,
    DepthOfField,
    Tonemap,
    StylizedFilter,
    Presented,
}

impl FrameState {
    /// States in frame order.
    pub const ORDER: [Self; 8] = [
        Self::ClearGBuffer,
        Self::GeometryPass,
        Self::DeferredResolve,
        Self::Bloom,
        Self::DepthOfField,
        Self::Tonemap,
        Self::StylizedFilter,
        Self::Presented,
    ];

    fn rank(self) -> usize {
        self as usize
    }

    /// Whether a feature toggle can elide this state.
    pub fn is_optional(self) -> bool {
        matches!(self, Self::Bloom | Self::DepthOfField | Self::StylizedFilter)
    }

    /// Whether the state works on wide-range data.
    pub fn is_wide_tier(self) -> bool {
        self < Self::Tonemap
    }

    /// Whether `next` may follow `self`.
    ///
    /// `Presented` only leads to a new frame's `ClearGBuffer`. Otherwise `next`
    /// must come later in [`ORDER`](Self::ORDER), and every state skipped on
    /// the way must be optional with `has_work` returning false for it.
    pub fn can_advance_to(self, next: Self, has_work: impl Fn(Self) -> bool) -> bool {
        if self == Self::Presented {
            return next == Self::ClearGBuffer;
        }
        if next.rank() <= self.rank() {
            return false;
        }
        Self::ORDER[self.rank() + 1..next.rank()]
            .iter()
            .all(|&skipped| skipped.is_optional() && !has_work(skipped))
    }

    /// Returns `next` if the transition is legal, `OutOfOrder` otherwise.
    pub fn advance(self, next: Self, has_work: impl Fn(Self) -> bool) -> Result<Self> {
        if self.can_advance_to(next, has_work) {
            Ok(next)
        } else {
            Err(PipelineError::OutOfOrder {
                from: self,
                to: next,
            })
        }
    }
}

/// Something a pass can read or write.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Resource {
    GBuffer(GBufferChannel),
    GBufferDepth,
    Wide(WideSlot),
    Display(DisplaySlot),
    Screen,
}

/// Which side of the tonemap a resource lives on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tier {
    /// Scene-referred data: the GBuffer and the wide pool.
    Wide,
    /// Display-referred data: the display pool.
    Display,
    /// The frame's output.
    Screen,
}

impl Resource {
    pub fn tier(self) -> Tier {
        match self {
            Self::GBuffer(_) | Self::GBufferDepth | Self::Wide(_) => Tier::Wide,
            Self::Display(_) => Tier::Display,
            Self::Screen => Tier::Screen,
        }
    }
}

/// What a pass does.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PassKind {
    ClearGBuffer,
    Geometry,
    DeferredResolve,
    BloomExtract,
    BloomComposite,
    DepthOfField,
    /// Copies an effect's scratch output back into the current result.
    CopyBack,
    Tonemap,
    /// The `stage`-th enabled display-range stage.
    Display { stage: usize },
}

impl fmt::Display for PassKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Display { stage } => write!(f, "Display[{}]", stage),
            other => write!(f, "{:?}", other),
        }
    }
}

/// One planned (or executed) pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PassRecord {
    pub state: FrameState,
    pub kind: PassKind,
    pub reads: Vec<Resource>,
    pub writes: Vec<Resource>,
}

impl PassRecord {
    fn new(state: FrameState, kind: PassKind, reads: &[Resource], writes: &[Resource]) -> Self {
        Self {
            state,
            kind,
            reads: reads.to_vec(),
            writes: writes.to_vec(),
        }
    }

    fn hazard(&self, reason: impl Into<String>) -> PipelineError {
        PipelineError::Hazard {
            pass: self.kind.to_string(),
            reason: reason.into(),
        }
    }
}

const CURRENT: Resource = Resource::Wide(WideSlot::CurrentResult);
const SCRATCH: Resource = Resource::Wide(WideSlot::Scratch);
const HIGHLIGHTS: Resource = Resource::Wide(WideSlot::HighlightExtract);

/// The ordered passes of one frame.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FramePlan {
    passes: Vec<PassRecord>,
}

impl FramePlan {
    /// Plans a frame with the given wide effects and number of enabled display stages.
    pub fn build(bloom: bool, depth_of_field: bool, display_stages: usize) -> Self {
        use FrameState as S;
        use PassKind as K;

        let gbuffer_colors = GBufferChannel::ALL.map(Resource::GBuffer);
        let mut gbuffer_all = gbuffer_colors.to_vec();
        gbuffer_all.push(Resource::GBufferDepth);

        let mut passes = vec![
            PassRecord::new(S::ClearGBuffer, K::ClearGBuffer, &[], &gbuffer_all),
            PassRecord::new(S::GeometryPass, K::Geometry, &[], &gbuffer_all),
            PassRecord::new(S::DeferredResolve, K::DeferredResolve, &gbuffer_colors, &[CURRENT]),
        ];

        if bloom {
            passes.push(PassRecord::new(S::Bloom, K::BloomExtract, &[CURRENT], &[HIGHLIGHTS]));
            passes.push(PassRecord::new(
                S::Bloom,
                K::BloomComposite,
                &[CURRENT, HIGHLIGHTS],
                &[SCRATCH],
            ));
            passes.push(PassRecord::new(S::Bloom, K::CopyBack, &[SCRATCH], &[CURRENT]));
        }

        if depth_of_field {
            passes.push(PassRecord::new(
                S::DepthOfField,
                K::DepthOfField,
                &[CURRENT, Resource::GBuffer(GBufferChannel::Position)],
                &[SCRATCH],
            ));
            passes.push(PassRecord::new(S::DepthOfField, K::CopyBack, &[SCRATCH], &[CURRENT]));
        }

        let tonemap_out = if display_stages == 0 {
            Resource::Screen
        } else {
            Resource::Display(DisplaySlot::read_by(0))
        };
        passes.push(PassRecord::new(S::Tonemap, K::Tonemap, &[CURRENT], &[tonemap_out]));

        for stage in 0..display_stages {
            let write = if stage + 1 == display_stages {
                Resource::Screen
            } else {
                Resource::Display(DisplaySlot::written_by(stage))
            };
            passes.push(PassRecord::new(
                S::StylizedFilter,
                K::Display { stage },
                &[Resource::Display(DisplaySlot::read_by(stage))],
                &[write],
            ));
        }

        Self { passes }
    }

    pub fn passes(&self) -> &[PassRecord] {
        &self.passes
    }

    /// Passes belonging to `state`, in execution order.
    pub fn passes_for(&self, state: FrameState) -> impl Iterator<Item = &PassRecord> {
        self.passes.iter().filter(move |p| p.state == state)
    }

    /// Whether any pass runs in `state`.
    pub fn has_work(&self, state: FrameState) -> bool {
        self.passes.iter().any(|p| p.state == state)
    }

    /// Whether any pass writes `resource`.
    pub fn writes_to(&self, resource: Resource) -> bool {
        self.passes.iter().any(|p| p.writes.contains(&resource))
    }

    /// Checks every buffer rule, returning the first violation as a `Hazard`.
    pub fn validate(&self) -> Result<()> {
        let mut written: Vec<Resource> = Vec::new();
        for pass in &self.passes {
            if let Some(r) = pass.reads.iter().find(|r| pass.writes.contains(r)) {
                return Err(pass.hazard(format!("reads and writes {:?}", r)));
            }
            if let Some(r) = pass.reads.iter().find(|r| !written.contains(r)) {
                return Err(pass.hazard(format!("reads {:?} before anything wrote it", r)));
            }
            self.check_tiers(pass)?;
            written.extend(pass.writes.iter().copied());
        }

        self.check_current_result()?;

        let screen_writes: Vec<_> = self
            .passes
            .iter()
            .enumerate()
            .filter(|(_, p)| p.writes.contains(&Resource::Screen))
            .collect();
        match screen_writes.as_slice() {
            [(i, _)] if *i + 1 == self.passes.len() => Ok(()),
            [(_, pass)] => Err(pass.hazard("writes the screen before the last pass")),
            [] => Err(PipelineError::Hazard {
                pass: "frame".to_string(),
                reason: "nothing writes the screen".to_string(),
            }),
            [_, (_, pass), ..] => Err(pass.hazard("writes the screen a second time")),
        }
    }

    fn check_tiers(&self, pass: &PassRecord) -> Result<()> {
        let touched = pass.reads.iter().chain(&pass.writes);
        match pass.state {
            FrameState::Tonemap => {
                if pass.reads.iter().any(|r| r.tier() != Tier::Wide) {
                    return Err(pass.hazard("tonemap must read only wide-range data"));
                }
                if pass.writes.iter().any(|r| r.tier() == Tier::Wide) {
                    return Err(pass.hazard("tonemap must write display-range data"));
                }
            }
            state if state.is_wide_tier() => {
                if let Some(r) = touched.clone().find(|r| r.tier() != Tier::Wide) {
                    return Err(pass.hazard(format!("touches {:?} before tonemap", r)));
                }
            }
            _ => {
                if let Some(r) = touched.clone().find(|r| r.tier() == Tier::Wide) {
                    return Err(pass.hazard(format!("touches {:?} after tonemap", r)));
                }
            }
        }
        Ok(())
    }

    fn check_current_result(&self) -> Result<()> {
        for state in [FrameState::DeferredResolve, FrameState::Bloom, FrameState::DepthOfField] {
            if let Some(last) = self.passes_for(state).last()
                && last.writes != [CURRENT]
            {
                return Err(last.hazard("does not leave its result in the current-result slot"));
            }
        }
        for state in [FrameState::Bloom, FrameState::DepthOfField, FrameState::Tonemap] {
            if let Some(first) = self.passes_for(state).next()
                && first.reads.first() != Some(&CURRENT)
            {
                return Err(first.hazard("does not start from the current-result slot"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_work(_: FrameState) -> bool {
        false
    }

    fn kinds(plan: &FramePlan) -> Vec<PassKind> {
        plan.passes().iter().map(|p| p.kind).collect()
    }

    #[test]
    fn frame_starts_only_after_presented() {
        use FrameState as S;
        assert!(S::Presented.can_advance_to(S::ClearGBuffer, no_work));
        assert!(!S::Presented.can_advance_to(S::GeometryPass, no_work));
        assert!(!S::GeometryPass.can_advance_to(S::ClearGBuffer, no_work));
        assert!(!S::Tonemap.can_advance_to(S::Tonemap, no_work));
    }

    #[test]
    fn only_idle_optional_states_can_be_skipped() {
        use FrameState as S;
        assert!(S::DeferredResolve.can_advance_to(S::Tonemap, no_work));
        assert!(!S::DeferredResolve.can_advance_to(S::Tonemap, |s| s == S::Bloom));
        assert!(!S::ClearGBuffer.can_advance_to(S::DeferredResolve, no_work));
        assert!(S::Tonemap.can_advance_to(S::Presented, no_work));
        assert!(!S::Tonemap.can_advance_to(S::Presented, |s| s == S::StylizedFilter));
    }

    #[test]
    fn illegal_advance_reports_both_states() {
        let err = FrameState::Presented
            .advance(FrameState::Tonemap, no_work)
            .unwrap_err();
        match err {
            PipelineError::OutOfOrder { from, to } => {
                assert_eq!(from, FrameState::Presented);
                assert_eq!(to, FrameState::Tonemap);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn all_effects_off_goes_straight_to_screen() {
        let plan = FramePlan::build(false, false, 0);
        plan.validate().unwrap();
        assert_eq!(
            kinds(&plan),
            vec![
                PassKind::ClearGBuffer,
                PassKind::Geometry,
                PassKind::DeferredResolve,
                PassKind::Tonemap
            ]
        );
        let tonemap = plan.passes().last().unwrap();
        assert_eq!(tonemap.reads, vec![CURRENT]);
        assert_eq!(tonemap.writes, vec![Resource::Screen]);
        assert!(!plan.writes_to(SCRATCH));
        assert!(!plan.writes_to(HIGHLIGHTS));
        assert!(!plan.writes_to(Resource::Display(DisplaySlot::Ping)));
    }

    #[test]
    fn bloom_routes_through_highlights_and_back() {
        let plan = FramePlan::build(true, false, 0);
        plan.validate().unwrap();
        let bloom: Vec<_> = plan.passes_for(FrameState::Bloom).collect();
        assert_eq!(bloom.len(), 3);
        assert_eq!(bloom[0].reads, vec![CURRENT]);
        assert_eq!(bloom[0].writes, vec![HIGHLIGHTS]);
        assert_eq!(bloom[1].reads, vec![CURRENT, HIGHLIGHTS]);
        assert_eq!(bloom[1].writes, vec![SCRATCH]);
        assert_eq!(bloom[2].reads, vec![SCRATCH]);
        assert_eq!(bloom[2].writes, vec![CURRENT]);
    }

    #[test]
    fn depth_of_field_reads_the_position_channel() {
        let plan = FramePlan::build(false, true, 0);
        plan.validate().unwrap();
        let dof: Vec<_> = plan.passes_for(FrameState::DepthOfField).collect();
        assert_eq!(dof[0].reads, vec![CURRENT, Resource::GBuffer(GBufferChannel::Position)]);
        assert_eq!(dof[0].writes, vec![SCRATCH]);
        assert_eq!(dof[1].writes, vec![CURRENT]);
    }

    #[test]
    fn every_stage_after_resolve_reads_current_result() {
        for (bloom, dof) in [(false, false), (true, false), (false, true), (true, true)] {
            let plan = FramePlan::build(bloom, dof, 1);
            plan.validate().unwrap();
            for state in [FrameState::Bloom, FrameState::DepthOfField, FrameState::Tonemap] {
                if let Some(first) = plan.passes_for(state).next() {
                    assert_eq!(first.reads[0], CURRENT, "{:?}", state);
                }
            }
        }
    }

    #[test]
    fn display_stages_ping_pong_then_hit_the_screen() {
        for n in 1..=5 {
            let plan = FramePlan::build(true, true, n);
            plan.validate().unwrap();
            let stages: Vec<_> = plan.passes_for(FrameState::StylizedFilter).collect();
            assert_eq!(stages.len(), n);
            for (i, pass) in stages.iter().enumerate() {
                assert_eq!(pass.kind, PassKind::Display { stage: i });
                assert_eq!(pass.reads, vec![Resource::Display(DisplaySlot::read_by(i))]);
                assert_eq!(pass.reads[0], Resource::Display(if i % 2 == 0 {
                    DisplaySlot::Ping
                } else {
                    DisplaySlot::Pong
                }));
                let expected = if i == n - 1 {
                    Resource::Screen
                } else {
                    Resource::Display(DisplaySlot::written_by(i))
                };
                assert_eq!(pass.writes, vec![expected]);
            }
        }
    }

    #[test]
    fn tonemap_feeds_the_first_display_slot() {
        let plan = FramePlan::build(false, false, 2);
        let tonemap = plan.passes_for(FrameState::Tonemap).next().unwrap();
        assert_eq!(tonemap.writes, vec![Resource::Display(DisplaySlot::Ping)]);
    }

    #[test]
    fn validation_rejects_in_place_writes() {
        let mut plan = FramePlan::build(true, false, 0);
        plan.passes[4].reads = vec![CURRENT];
        plan.passes[4].writes = vec![CURRENT];
        assert!(matches!(plan.validate(), Err(PipelineError::Hazard { .. })));
    }

    #[test]
    fn validation_rejects_wide_reads_after_tonemap() {
        let mut plan = FramePlan::build(false, false, 1);
        let last = plan.passes.len() - 1;
        plan.passes[last].reads = vec![CURRENT];
        let err = plan.validate().unwrap_err();
        assert!(err.to_string().contains("after tonemap"), "{err}");
    }

    #[test]
    fn validation_rejects_effect_left_in_scratch() {
        let mut plan = FramePlan::build(false, true, 0);
        let copy = plan
            .passes
            .iter()
            .position(|p| p.state == FrameState::DepthOfField && p.kind == PassKind::CopyBack)
            .unwrap();
        plan.passes.remove(copy);
        assert!(plan.validate().is_err());
    }

    #[test]
    fn validation_rejects_reads_of_unwritten_slots() {
        let mut plan = FramePlan::build(false, false, 0);
        plan.passes[2].reads.push(SCRATCH);
        let err = plan.validate().unwrap_err();
        assert!(err.to_string().contains("before anything wrote it"), "{err}");
    }

    #[test]
    fn validation_requires_a_single_final_screen_write() {
        let mut plan = FramePlan::build(false, false, 1);
        let tonemap = plan
            .passes
            .iter()
            .position(|p| p.kind == PassKind::Tonemap)
            .unwrap();
        plan.passes[tonemap].writes = vec![Resource::Screen];
        assert!(plan.validate().is_err());
    }

    #[test]
    fn has_work_follows_toggles() {
        let plan = FramePlan::build(true, false, 0);
        assert!(plan.has_work(FrameState::Bloom));
        assert!(!plan.has_work(FrameState::DepthOfField));
        assert!(!plan.has_work(FrameState::StylizedFilter));
    }
}
