//! # Kernel synchronization primitives
//!
//! The memory-management core runs on a single hardware thread; its only
//! source of re-entrancy is an interrupt arriving in the middle of a heap or
//! page-table mutation. [`SpinLock::lock_irq`] pairs the lock with an
//! [`IrqGuard`] so the critical section runs with interrupts disabled and
//! restores the previous interrupt state when the guard drops.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod irq;
mod spin_lock;

pub use irq::{IrqGuard, IrqSpinLockGuard};
pub use spin_lock::{SpinLock, SpinLockGuard};
