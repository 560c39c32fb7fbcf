//! # Kernel Memory Configuration
//!
//! This crate defines the memory layout constants that the bootstrap
//! allocator, the paging layer and the kernel heap agree on. It is the single
//! source of truth for where the heap lives, how much physical memory is
//! managed, and which sentinel values tag heap metadata.
//!
//! ## Virtual Memory Architecture
//!
//! The kernel runs in a single 4 GiB IA-32 address space per process:
//!
//! ```text
//! Virtual Address Space Layout (32-bit):
//!
//! 0x0000_0000 ┌─────────────────────────────────┐
//!             │   Identity-mapped low memory    │
//!             │ (kernel image, bootstrap data)  │
//!             ├─────────────────────────────────┤
//!             │                                 │
//!             │         User Space              │
//!             │                                 │
//! KERNEL_HEAP_START ─────────────────────────────┤ 0xC000_0000
//!             │          Kernel Heap            │
//!             │  (grows up to KERNEL_HEAP_MAX)  │
//! KERNEL_HEAP_MAX ───────────────────────────────┤ 0xCFFF_F000
//!             │           Unused                │
//! 0xFFFF_FFFF └─────────────────────────────────┘
//! ```
//!
//! Page tables covering the identity region and the whole heap range belong
//! to the kernel directory and are shared by every address space cloned from
//! it.
//!
//! ## Physical Memory Layout
//!
//! ```text
//! 0x0000_0000 ┌─────────────────────────────────┐
//!             │     Low Memory (< 1MiB)         │
//! 0x0010_0000 ├─────────────────────────────────┤
//!             │       Kernel Image              │
//!             ├─────────────────────────────────┤ ← placement address
//!             │  Bootstrap allocations          │
//!             ├─────────────────────────────────┤
//!             │    Frames handed out by the     │
//!             │       frame allocator           │
//! MEMORY_END  └─────────────────────────────────┘ 0x0100_0000 (16 MiB)
//! ```
//!
//! All values are `const`; invalid combinations are rejected at compile time.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod memory;
