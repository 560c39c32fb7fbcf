//! Copying physical frames that are not mapped anywhere.
//!
//! With paging switched off for the duration of the copy, physical addresses
//! can be used directly. Interrupts stay disabled throughout, and the code,
//! stack and the copy loop must live in identity mapped memory.

#[cfg(all(target_arch = "x86", target_os = "none"))]
pub use hardware::PagingOffCopy;

#[cfg(all(target_arch = "x86", target_os = "none"))]
mod hardware {
    use kernel_info::memory::PAGE_SIZE;
    use kernel_memory_addresses::PhysicalAddress;
    use kernel_sync::IrqGuard;
    use kernel_vmem::PhysMemory;

    const WORDS_PER_FRAME: usize = PAGE_SIZE / 4;

    /// Copies frames with CR0.PG briefly cleared.
    #[derive(Debug, Default, Copy, Clone)]
    pub struct PagingOffCopy;

    impl PhysMemory for PagingOffCopy {
        unsafe fn copy_frame(&mut self, src: PhysicalAddress, dst: PhysicalAddress) {
            let _irq = IrqGuard::new();
            unsafe {
                core::arch::asm!(
                    "mov {cr0}, cr0",
                    "and {cr0}, 0x7FFFFFFF",
                    "mov cr0, {cr0}",
                    "cld",
                    "rep movsd",
                    "or {cr0}, 0x80000000",
                    "mov cr0, {cr0}",
                    cr0 = out(reg) _,
                    inout("esi") src.as_usize() => _,
                    inout("edi") dst.as_usize() => _,
                    inout("ecx") WORDS_PER_FRAME => _,
                    options(nostack),
                );
            }
        }
    }
}
