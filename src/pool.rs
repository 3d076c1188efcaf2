//! Render target pool
//!
//! Every offscreen buffer the cloud renderer owns lives here under a [`TargetTag`].
//! [`RenderTargetPool::ensure`] is the single provisioning path: it either hands back
//! the existing target untouched or replaces it with one matching the request.

use std::collections::HashMap;

use crate::backend::{BackendResult, GraphicsBackend, TextureDescriptor, TextureHandle};

/// Identifies a pooled render target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TargetTag {
    /// Slot 0 or 1 of the ping-pong accumulation pair
    Accumulation(usize),
    Undersample,
    DownsampledDepth,
    /// Height lookup written by the preprocess compute pass
    HeightLut,
    /// Hierarchical height map with the full mip chain
    HiHeight,
    /// Scratch level of the height map chain
    HiHeightLevel(u32),
    /// Cloud shadow output, published as the light cookie
    Shadow,
}

/// Result of [`RenderTargetPool::ensure`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Provisioned {
    pub handle: TextureHandle,
    /// True when the texture was created by this call and holds no previous content
    pub allocated: bool,
}

#[derive(Debug, Clone)]
struct PooledTarget {
    handle: TextureHandle,
    desc: TextureDescriptor,
}

/// Lazily allocated, lazily resized set of render targets
#[derive(Debug, Default)]
pub struct RenderTargetPool {
    targets: HashMap<TargetTag, PooledTarget>,
}

impl RenderTargetPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the target under `tag`, (re)allocating it when it is missing, released,
    /// or no longer matches `desc`. A stale target is released before the new one is
    /// created.
    pub fn ensure<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        tag: TargetTag,
        desc: &TextureDescriptor,
    ) -> BackendResult<Provisioned> {
        if let Some(existing) = self.targets.get(&tag) {
            if existing.desc.matches(desc) && backend.is_resident(existing.handle) {
                return Ok(Provisioned {
                    handle: existing.handle,
                    allocated: false,
                });
            }
        }

        if let Some(stale) = self.targets.remove(&tag) {
            log::debug!(
                "Replacing {:?}: {}x{} -> {}x{}",
                tag,
                stale.desc.width,
                stale.desc.height,
                desc.width,
                desc.height
            );
            backend.release_texture(stale.handle);
        }

        let handle = backend.create_texture(desc)?;
        log::debug!(
            "Allocated {:?} ({}x{}, {:?}, {} mips)",
            tag,
            desc.width,
            desc.height,
            desc.format,
            desc.mip_levels
        );
        self.targets.insert(
            tag,
            PooledTarget {
                handle,
                desc: desc.clone(),
            },
        );
        Ok(Provisioned {
            handle,
            allocated: true,
        })
    }

    /// Handle currently registered under `tag`, resident or not
    pub fn get(&self, tag: TargetTag) -> Option<TextureHandle> {
        self.targets.get(&tag).map(|t| t.handle)
    }

    pub fn descriptor(&self, tag: TargetTag) -> Option<&TextureDescriptor> {
        self.targets.get(&tag).map(|t| &t.desc)
    }

    /// Drop GPU residency of one target but keep its registration, so the next
    /// `ensure` recreates it with the same descriptor.
    pub fn release<B: GraphicsBackend>(&mut self, backend: &mut B, tag: TargetTag) {
        if let Some(target) = self.targets.get(&tag) {
            backend.release_texture(target.handle);
        }
    }

    /// Release and forget every target. Safe to call repeatedly.
    pub fn release_all<B: GraphicsBackend>(&mut self, backend: &mut B) {
        for (tag, target) in self.targets.drain() {
            log::debug!("Releasing {:?}", tag);
            backend.release_texture(target.handle);
        }
    }

    /// Number of registered targets
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Number of registered targets currently backed by GPU memory
    pub fn resident_count<B: GraphicsBackend>(&self, backend: &B) -> usize {
        self.targets
            .values()
            .filter(|t| backend.is_resident(t.handle))
            .count()
    }
}

/// Run `f` with a scratch texture that is returned to the backend afterwards,
/// whether or not `f` succeeds.
pub fn with_temporary<B, T, F>(backend: &mut B, desc: &TextureDescriptor, f: F) -> BackendResult<T>
where
    B: GraphicsBackend,
    F: FnOnce(&mut B, TextureHandle) -> BackendResult<T>,
{
    let temporary = backend.acquire_temporary(desc)?;
    let result = f(backend, temporary);
    backend.release_temporary(temporary);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendError, Command, DummyBackend, TextureFormat};

    fn desc(size: u32) -> TextureDescriptor {
        TextureDescriptor::render_target("pooled", size, size, TextureFormat::Rgba32Float)
    }

    #[test]
    fn ensure_reuses_matching_target() {
        let mut backend = DummyBackend::new();
        let mut pool = RenderTargetPool::new();

        let first = pool.ensure(&mut backend, TargetTag::Undersample, &desc(64)).unwrap();
        assert!(first.allocated);
        backend.set_content(first.handle, 99);

        let second = pool.ensure(&mut backend, TargetTag::Undersample, &desc(64)).unwrap();
        assert!(!second.allocated);
        assert_eq!(first.handle, second.handle);
        assert_eq!(backend.content(second.handle), Some(99));
    }

    #[test]
    fn ensure_recreates_released_target() {
        let mut backend = DummyBackend::new();
        let mut pool = RenderTargetPool::new();

        let first = pool.ensure(&mut backend, TargetTag::Shadow, &desc(32)).unwrap();
        pool.release(&mut backend, TargetTag::Shadow);
        assert!(!backend.is_resident(first.handle));
        assert_eq!(pool.get(TargetTag::Shadow), Some(first.handle));

        let second = pool.ensure(&mut backend, TargetTag::Shadow, &desc(32)).unwrap();
        assert!(second.allocated);
        assert!(backend.is_resident(second.handle));
    }

    #[test]
    fn release_all_is_idempotent() {
        let mut backend = DummyBackend::new();
        let mut pool = RenderTargetPool::new();
        pool.ensure(&mut backend, TargetTag::Accumulation(0), &desc(8)).unwrap();
        pool.ensure(&mut backend, TargetTag::Accumulation(1), &desc(8)).unwrap();

        pool.release_all(&mut backend);
        pool.release_all(&mut backend);
        assert!(pool.is_empty());
        assert_eq!(backend.resident_count(), 0);
    }

    #[test]
    fn temporary_is_released_on_error() {
        let mut backend = DummyBackend::new();
        let result: BackendResult<()> = with_temporary(&mut backend, &desc(16), |_, _| {
            Err(BackendError::DeviceLost)
        });
        assert_eq!(result, Err(BackendError::DeviceLost));
        assert_eq!(backend.temporaries_in_use(), 0);
        assert!(backend
            .commands()
            .iter()
            .any(|c| matches!(c, Command::ReleaseTemporary(_))));
    }
}
