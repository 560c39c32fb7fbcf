//! Hardware [`PagingControl`](crate::PagingControl) for bare-metal IA-32.
//!
//! Loading a directory writes its physical address to CR3 and then sets
//! CR0.PG. Setting PG when it is already set is harmless, so the same call
//! serves both the first activation and later address space switches.

#[cfg(all(target_arch = "x86", target_os = "none"))]
pub use hardware::ControlRegisters;

#[cfg(all(target_arch = "x86", target_os = "none"))]
mod hardware {
    use crate::PagingControl;
    use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
    use kernel_registers::cr0::Cr0;
    use kernel_registers::cr3::Cr3;
    use kernel_registers::{LoadRegisterUnsafe, StoreRegisterUnsafe};

    /// Drives paging through CR0, CR3 and `invlpg`.
    #[derive(Debug, Default, Copy, Clone)]
    pub struct ControlRegisters;

    impl ControlRegisters {
        /// Physical address of the directory currently in CR3.
        ///
        /// # Safety
        /// Ring 0 only.
        #[must_use]
        pub unsafe fn current_directory() -> PhysicalAddress {
            unsafe { Cr3::load_unsafe() }.directory_phys()
        }
    }

    impl PagingControl for ControlRegisters {
        unsafe fn load_directory(&mut self, directory: PhysicalAddress) {
            unsafe {
                Cr3::from_directory_phys(directory).store_unsafe();
                Cr0::load_unsafe().with_pg_paging(true).store_unsafe();
            }
        }

        fn flush_page(&mut self, va: VirtualAddress) {
            unsafe {
                core::arch::asm!(
                    "invlpg [{}]",
                    in(reg) va.as_usize(),
                    options(nostack, preserves_flags)
                );
            }
        }
    }
}
