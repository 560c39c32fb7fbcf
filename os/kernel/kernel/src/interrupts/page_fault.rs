use crate::halt;
use crate::interrupts::InterruptFrame;
use bitfield_struct::bitfield;
use core::fmt;
use kernel_memory_addresses::VirtualAddress;
use kernel_qemu::qemu_trace;

pub const PAGE_FAULT_VECTOR: u8 = 0x0E; // 14

/// Page faults are always fatal: log what happened and halt.
pub fn page_fault_handler(frame: &InterruptFrame) {
    let report = PageFaultReport::new(faulting_address(), frame);
    fatal_page_fault(&report);
}

/// The address that faulted, from CR2.
#[cfg(all(target_arch = "x86", target_os = "none"))]
fn faulting_address() -> VirtualAddress {
    use kernel_registers::LoadRegisterUnsafe;
    use kernel_registers::cr2::Cr2;

    // SAFETY: runs in the ring 0 fault handler before another fault can occur.
    unsafe { Cr2::load_unsafe() }.fault_address()
}

#[cfg(not(all(target_arch = "x86", target_os = "none")))]
const fn faulting_address() -> VirtualAddress {
    VirtualAddress::zero()
}

fn fatal_page_fault(report: &PageFaultReport) -> ! {
    qemu_trace!("{report}\n");
    log::error!("{report}");
    log::error!("{}", report.error.explain());
    halt()
}

/// Page-fault error code layout (IA-32).
///
/// Reference: Intel SDM Vol. 3A, §4.7 "Page-Fault Exceptions".
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct PageFaultError {
    /// 0 = non-present page.
    /// 1 = protection violation.
    pub present: bool, // bit 0

    /// 0 = read, 1 = write.
    pub write: bool, // bit 1

    /// 0 = supervisor, 1 = user mode.
    pub user: bool, // bit 2

    /// Reserved bit set in a paging structure.
    pub reserved_write: bool, // bit 3

    /// Instruction fetch.
    pub instruction_fetch: bool, // bit 4

    #[bits(27)]
    __: u32,
}

impl PageFaultError {
    #[must_use]
    pub const fn explain(&self) -> &'static str {
        if self.reserved_write() {
            "Reserved bit set in a paging structure"
        } else if !self.present() {
            "Non-present page (page not mapped)"
        } else if self.write() {
            if self.user() {
                "User-mode write to a read-only or supervisor page"
            } else {
                "Kernel write to a read-only page"
            }
        } else if self.user() {
            "User-mode access to a supervisor page"
        } else {
            "Read access to protected page"
        }
    }
}

/// Everything known about a page fault.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct PageFaultReport {
    pub address: VirtualAddress,
    pub error: PageFaultError,
    pub eip: u32,
}

impl PageFaultReport {
    #[must_use]
    pub const fn new(address: VirtualAddress, frame: &InterruptFrame) -> Self {
        Self {
            address,
            error: PageFaultError::from_bits(frame.error_code),
            eip: frame.eip,
        }
    }
}

impl fmt::Display for PageFaultReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Page fault! (")?;
        if !self.error.present() {
            f.write_str(" not-present")?;
        }
        if self.error.write() {
            f.write_str(" read-only")?;
        }
        if self.error.user() {
            f.write_str(" user-mode")?;
        }
        if self.error.reserved_write() {
            f.write_str(" reserved")?;
        }
        write!(f, " ) at {} (eip {:#010x})", self.address, self.eip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(error_code: u32) -> InterruptFrame {
        InterruptFrame {
            vector: PAGE_FAULT_VECTOR.into(),
            error_code,
            eip: 0x0010_2000,
            ..InterruptFrame::default()
        }
    }

    #[test]
    fn error_code_layout() {
        let error = PageFaultError::from_bits(0b1_0111);
        assert!(error.present());
        assert!(error.write());
        assert!(error.user());
        assert!(!error.reserved_write());
        assert!(error.instruction_fetch());
    }

    #[test]
    fn report_names_the_cause() {
        let report = PageFaultReport::new(VirtualAddress::new(0xA000_0000), &frame(0b110));
        assert_eq!(
            report.to_string(),
            "Page fault! ( not-present read-only user-mode ) at 0xA0000000 (eip 0x00102000)"
        );
        assert_eq!(report.error.explain(), "Non-present page (page not mapped)");

        let report = PageFaultReport::new(VirtualAddress::new(0x1000), &frame(0b1001));
        assert_eq!(
            report.to_string(),
            "Page fault! ( reserved ) at 0x00001000 (eip 0x00102000)"
        );
    }

    #[test]
    fn protection_faults_are_explained() {
        assert_eq!(
            PageFaultError::from_bits(0b011).explain(),
            "Kernel write to a read-only page"
        );
        assert_eq!(
            PageFaultError::from_bits(0b101).explain(),
            "User-mode access to a supervisor page"
        );
        assert_eq!(
            PageFaultError::from_bits(0b001).explain(),
            "Read access to protected page"
        );
    }

    #[test]
    #[should_panic(expected = "kernel halted")]
    fn page_faults_always_halt() {
        page_fault_handler(&frame(0));
    }
}
