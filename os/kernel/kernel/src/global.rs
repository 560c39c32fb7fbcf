//! # Global Kernel Memory
//!
//! [`GlobalMemory`] wraps a [`KernelMemory`] in a [`SpinLock`] that is always
//! taken with interrupts disabled. Failures are fatal here: the wrappers log
//! the error and [`halt`](crate::halt).

use crate::fatal;
use crate::interrupts::page_fault::{PAGE_FAULT_VECTOR, page_fault_handler};
use crate::interrupts::InterruptHooks;
use core::ptr::NonNull;
use kernel_alloc::bootstrap::PlacementAlloc;
use kernel_alloc::memory::{KernelMemory, MemoryConfig, MemoryError};
use kernel_memory_addresses::PhysicalAddress;
use kernel_sync::SpinLock;
use kernel_vmem::{AddressSpace, PagingControl, PhysMemory};

/// The kernel memory context behind an interrupt-safe lock.
pub struct GlobalMemory<P, C> {
    inner: SpinLock<Option<KernelMemory<P, C>>>,
}

impl<P, C> Default for GlobalMemory<P, C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P, C> GlobalMemory<P, C> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            inner: SpinLock::new(None),
        }
    }
}

impl<P: PhysMemory, C: PagingControl> GlobalMemory<P, C> {
    /// Bring up paging and the heap.
    ///
    /// The page fault handler is registered before paging is switched on.
    ///
    /// # Errors
    /// Any allocation failure during setup. The context is not installed.
    ///
    /// # Safety
    /// Same as [`KernelMemory::new`], [`KernelMemory::enable_paging`] and
    /// [`KernelMemory::create_heap`]. Must be called once.
    pub unsafe fn init_paging<H: InterruptHooks + ?Sized>(
        &self,
        config: &MemoryConfig,
        placement: PlacementAlloc,
        phys: P,
        paging: C,
        hooks: &mut H,
    ) -> Result<(), MemoryError> {
        let mut memory = unsafe { KernelMemory::new(config, placement, phys, paging) }?;
        hooks.register_handler(PAGE_FAULT_VECTOR, page_fault_handler);

        let mut guard = self.inner.lock_irq();
        unsafe { memory.enable_paging() };
        let memory = guard.insert(memory);
        if let Err(e) = unsafe { memory.create_heap() } {
            *guard = None;
            return Err(e);
        }

        log::info!(
            "kernel heap ready: {:#x} bytes, {} frames in use",
            memory.heap().map_or(0, kernel_alloc::heap::Heap::size),
            memory.used_frames()
        );
        Ok(())
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.inner.lock_irq().is_some()
    }

    /// Run `f` on the context, with interrupts disabled.
    ///
    /// Returns `None` before [`init_paging`](Self::init_paging).
    pub fn try_with<R>(&self, f: impl FnOnce(&mut KernelMemory<P, C>) -> R) -> Option<R> {
        self.inner.with_lock_irq(|memory| memory.as_mut().map(f))
    }

    /// Like [`try_with`](Self::try_with), but halts when uninitialized and on
    /// error.
    fn with<R>(
        &self,
        context: &str,
        f: impl FnOnce(&mut KernelMemory<P, C>) -> Result<R, MemoryError>,
    ) -> R {
        match self.try_with(f) {
            Some(Ok(value)) => value,
            Some(Err(e)) => fatal(context, &e),
            None => fatal(context, &"kernel memory is not initialized"),
        }
    }

    #[must_use]
    pub fn kmalloc(&self, size: usize) -> NonNull<u8> {
        self.with("kmalloc", |m| m.kmalloc(size))
    }

    #[must_use]
    pub fn kmalloc_aligned(&self, size: usize) -> NonNull<u8> {
        self.with("kmalloc_aligned", |m| m.kmalloc_aligned(size))
    }

    #[must_use]
    pub fn kmalloc_physical(&self, size: usize) -> (NonNull<u8>, PhysicalAddress) {
        self.with("kmalloc_physical", |m| m.kmalloc_physical(size))
    }

    #[must_use]
    pub fn kmalloc_aligned_physical(&self, size: usize) -> (NonNull<u8>, PhysicalAddress) {
        self.with("kmalloc_aligned_physical", |m| m.kmalloc_aligned_physical(size))
    }

    /// Release heap memory. Null is ignored; corruption halts.
    pub fn kfree(&self, ptr: *mut u8) {
        self.with("kfree", |m| m.kfree(ptr));
    }

    /// A fresh address space sharing the kernel's tables.
    #[must_use]
    pub fn create_address_space(&self) -> AddressSpace {
        self.with("create_address_space", KernelMemory::create_address_space)
    }

    /// Clone the current address space for a new process.
    #[must_use]
    pub fn clone_current_address_space(&self) -> AddressSpace {
        self.with("clone_current_address_space", KernelMemory::clone_current)
    }

    /// Load `space` into the MMU.
    ///
    /// # Safety
    /// `space` must come from [`create_address_space`](Self::create_address_space)
    /// or [`clone_current_address_space`](Self::clone_current_address_space).
    pub unsafe fn switch_address_space(&self, space: AddressSpace) {
        self.with("switch_address_space", |m| {
            unsafe { m.switch_to(space) };
            Ok(())
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interrupts::InterruptHandler;
    use crate::tests::{CountingPhys, HEAP_START, RecordingPaging, test_setup};
    use kernel_info::memory::PAGE_SIZE;
    use kernel_memory_addresses::VirtualAddress;

    type TestGlobal = GlobalMemory<CountingPhys, RecordingPaging>;

    #[derive(Default)]
    struct RecordingHooks {
        registered: Vec<(u8, InterruptHandler)>,
    }

    impl InterruptHooks for RecordingHooks {
        fn register_handler(&mut self, vector: u8, handler: InterruptHandler) {
            self.registered.push((vector, handler));
        }
    }

    fn initialized() -> (&'static TestGlobal, RecordingHooks) {
        let global: &'static TestGlobal = Box::leak(Box::new(GlobalMemory::new()));
        let (config, placement) = test_setup();
        let mut hooks = RecordingHooks::default();
        unsafe {
            global.init_paging(
                &config,
                placement,
                CountingPhys::default(),
                RecordingPaging::default(),
                &mut hooks,
            )
        }
        .unwrap();
        (global, hooks)
    }

    #[test]
    fn init_registers_the_fault_handler_and_activates_the_kernel_space() {
        let (global, hooks) = initialized();
        assert!(global.is_initialized());
        assert_eq!(hooks.registered.len(), 1);
        assert_eq!(hooks.registered[0].0, 14);

        let (kernel, loaded) = global
            .try_with(|m| (m.kernel_space(), m.paging().loaded.clone()))
            .unwrap();
        assert_eq!(loaded, [kernel.physical_address()]);
        assert!(global.try_with(|m| m.heap().is_some()).unwrap());
    }

    #[test]
    fn uninitialized_context_is_reported() {
        let global = TestGlobal::new();
        assert!(!global.is_initialized());
        assert_eq!(global.try_with(|_| ()), None);
    }

    #[test]
    #[should_panic(expected = "kernel halted")]
    fn kmalloc_before_init_halts() {
        let global = TestGlobal::new();
        let _ = global.kmalloc(16);
    }

    #[test]
    fn kmalloc_family_serves_from_the_heap() {
        let (global, _) = initialized();

        let a = global.kmalloc(24);
        let b = global.kmalloc_aligned(100);
        let (c, c_phys) = global.kmalloc_physical(8);
        let (d, d_phys) = global.kmalloc_aligned_physical(PAGE_SIZE);

        assert_eq!(b.as_ptr() as usize % PAGE_SIZE, 0);
        assert_eq!(d.as_ptr() as usize % PAGE_SIZE, 0);
        assert!(d_phys.is_page_aligned());
        assert_ne!(c_phys, d_phys);

        global.try_with(|m| {
            let heap = m.heap().unwrap();
            for ptr in [a, b, c, d] {
                assert!(heap.contains(ptr.as_ptr() as usize));
            }
        });

        for ptr in [a, b, c, d] {
            global.kfree(ptr.as_ptr());
        }
        global.kfree(core::ptr::null_mut());
        global.try_with(|m| m.heap().unwrap().check().unwrap());
    }

    #[test]
    #[should_panic(expected = "kernel halted")]
    fn double_free_halts() {
        let (global, _) = initialized();
        let ptr = global.kmalloc(32);
        global.kfree(ptr.as_ptr());
        global.kfree(ptr.as_ptr());
    }

    #[test]
    #[should_panic(expected = "kernel halted")]
    fn heap_exhaustion_halts() {
        let (global, _) = initialized();
        let _ = global.kmalloc(64 * PAGE_SIZE);
    }

    #[test]
    fn address_spaces_share_kernel_tables() {
        let (global, _) = initialized();
        let kernel = global.try_with(|m| m.kernel_space()).unwrap();
        let heap_table = VirtualAddress::new(u32::try_from(HEAP_START).unwrap()).table_index();

        let space = global.create_address_space();
        assert!(space.shares_table_with(&kernel, heap_table));

        unsafe { global.switch_address_space(space) };
        let clone = global.clone_current_address_space();
        assert!(clone.shares_table_with(&kernel, heap_table));
        assert!(clone.shares_table_with(&kernel, 0));

        let (current, copies, last) = global
            .try_with(|m| {
                (
                    m.current_space(),
                    m.phys_mut().copies,
                    m.paging().loaded.last().copied(),
                )
            })
            .unwrap();
        assert_eq!(current, space);
        assert_eq!(copies, 0);
        assert_eq!(last, Some(space.physical_address()));
    }
}
