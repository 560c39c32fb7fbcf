//! # Typed IA-32 Control Registers
//!
//! Bitfield models of the control registers the paging layer touches:
//!
//! - [`Cr0`](cr0::Cr0): bit 31 turns paging on.
//! - [`Cr2`](cr2::Cr2): the faulting linear address after a page fault.
//! - [`Cr3`](cr3::Cr3): the physical base of the active page directory.
//!
//! Loading and storing goes through [`LoadRegisterUnsafe`] and
//! [`StoreRegisterUnsafe`]. The implementations use privileged `mov`
//! instructions and are only compiled with the `asm` feature on a 32-bit x86
//! target; the bitfield types themselves are available everywhere.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

#[cfg(feature = "cr0")]
pub mod cr0;

#[cfg(feature = "cr2")]
pub mod cr2;

#[cfg(feature = "cr3")]
pub mod cr3;

pub trait LoadRegisterUnsafe {
    /// # Safety
    /// The caller must uphold the implementation-specific safety requirements.
    /// For example, the register access might be privileged and require kernel mode (Ring 0).
    unsafe fn load_unsafe() -> Self;
}

pub trait StoreRegisterUnsafe {
    /// # Safety
    /// The caller must uphold the implementation-specific safety requirements.
    /// For example, the register access might be privileged and require kernel mode (Ring 0).
    unsafe fn store_unsafe(self);
}
