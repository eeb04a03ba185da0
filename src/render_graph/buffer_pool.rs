//! Fixed rings of same-format render targets addressed by role.
//!
//! Effects never index slots by number; they ask for a role and the role
//! resolves to a slot. The wide pool's roles are fixed ([`WideSlot`]); the
//! display pool alternates between its two slots ([`DisplaySlot`]).

use std::marker::PhantomData;

use super::render_target::{PixelFormat, RenderTarget};
use crate::error::Result;
use crate::gpu::GpuContext;

/// A named slot in a [`BufferPool`].
pub trait SlotRole: Copy + Eq + std::fmt::Debug + 'static {
    /// Precision tier every slot of the pool uses.
    const FORMAT: PixelFormat;
    /// Label prefix for the pool's textures.
    const LABEL: &'static str;

    /// Every role, ordered by slot index.
    fn all() -> &'static [Self];

    fn index(self) -> usize;
}

/// Roles in the wide-range (HDR) pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WideSlot {
    /// Holds the authoritative HDR image between stages.
    CurrentResult,
    /// Destination of the active effect before it is copied back.
    Scratch,
    /// Auxiliary intermediate, such as extracted highlights.
    HighlightExtract,
}

impl SlotRole for WideSlot {
    const FORMAT: PixelFormat = PixelFormat::WideF32;
    const LABEL: &'static str = "Wide";

    fn all() -> &'static [Self] {
        &[Self::CurrentResult, Self::Scratch, Self::HighlightExtract]
    }

    fn index(self) -> usize {
        match self {
            Self::CurrentResult => 0,
            Self::Scratch => 1,
            Self::HighlightExtract => 2,
        }
    }
}

/// Slots in the display-range (LDR) pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DisplaySlot {
    Ping,
    Pong,
}

impl DisplaySlot {
    /// Slot the `i`-th display stage reads.
    pub fn read_by(stage: usize) -> Self {
        if stage % 2 == 0 { Self::Ping } else { Self::Pong }
    }

    /// Slot the `i`-th display stage writes when it is not the last.
    pub fn written_by(stage: usize) -> Self {
        Self::read_by(stage + 1)
    }
}

impl SlotRole for DisplaySlot {
    const FORMAT: PixelFormat = PixelFormat::NarrowU8Srgb;
    const LABEL: &'static str = "Display";

    fn all() -> &'static [Self] {
        &[Self::Ping, Self::Pong]
    }

    fn index(self) -> usize {
        match self {
            Self::Ping => 0,
            Self::Pong => 1,
        }
    }
}

/// One render target per role of `R`, all sized alike.
#[derive(Debug)]
pub struct BufferPool<R: SlotRole> {
    slots: Vec<RenderTarget>,
    _role: PhantomData<R>,
}

/// The three-slot HDR pool.
pub type WidePool = BufferPool<WideSlot>;
/// The two-slot LDR pool.
pub type DisplayPool = BufferPool<DisplaySlot>;

impl<R: SlotRole> BufferPool<R> {
    pub fn allocate(gpu: &GpuContext, width: u32, height: u32) -> Result<Self> {
        let slots = R::all()
            .iter()
            .map(|role| {
                let label = format!("{} Slot {} ({:?})", R::LABEL, role.index(), role);
                RenderTarget::new(gpu, &label, width, height, R::FORMAT)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            slots,
            _role: PhantomData,
        })
    }

    pub fn slot(&self, role: R) -> &RenderTarget {
        &self.slots[role.index()]
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RenderTarget> {
        self.slots.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_cover_every_slot_once() {
        let wide: Vec<_> = WideSlot::all().iter().map(|r| r.index()).collect();
        assert_eq!(wide, vec![0, 1, 2]);
        let display: Vec<_> = DisplaySlot::all().iter().map(|r| r.index()).collect();
        assert_eq!(display, vec![0, 1]);
    }

    #[test]
    fn display_slots_alternate() {
        for stage in 0..6 {
            assert_eq!(DisplaySlot::read_by(stage).index(), stage % 2);
            assert_eq!(DisplaySlot::written_by(stage).index(), (stage + 1) % 2);
            assert_ne!(DisplaySlot::read_by(stage), DisplaySlot::written_by(stage));
        }
    }

    #[test]
    fn pools_use_their_tier() {
        assert!(WideSlot::FORMAT.is_wide());
        assert!(!DisplaySlot::FORMAT.is_wide());
    }
}
