//! Virtual address pool.
//!
//! Hands out sequential host addresses inside the configured CIDR block.
//! Offsets 0 and 1 are reserved for the network and interface (gateway)
//! addresses. Addresses are never reclaimed: once handed out, an offset stays
//! retired for the lifetime of the pool so a stale route or cached DNS answer
//! can never point at a different hostname.

use crate::error::{InterceptError, Result};
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{debug, info, instrument};

/// First offset handed out by [`AddressPool::allocate`].
pub const FIRST_HOST_OFFSET: u32 = 2;

/// Largest prefix that still leaves an allocatable offset.
pub const MAX_PREFIX_LEN: u8 = 30;

/// Sequential allocator over a CIDR block.
#[derive(Debug)]
pub struct AddressPool {
    base: u32,
    prefix_len: u8,
    /// Exclusive upper bound on offsets (the broadcast offset).
    limit: u32,
    next_offset: AtomicU32,
}

impl AddressPool {
    /// Create a pool for `network/prefix_len`.
    ///
    /// Host bits in `network` are masked off, so `100.64.0.1/24` and
    /// `100.64.0.0/24` describe the same pool.
    ///
    /// # Errors
    ///
    /// Returns `InterceptError::InvalidConfig` if the prefix leaves no room
    /// for host addresses.
    #[instrument]
    pub fn new(network: Ipv4Addr, prefix_len: u8) -> Result<Self> {
        if prefix_len > MAX_PREFIX_LEN {
            return Err(InterceptError::InvalidConfig {
                reason: format!(
                    "prefix length /{} leaves no allocatable addresses (maximum is /{})",
                    prefix_len, MAX_PREFIX_LEN
                ),
            });
        }

        let base = u32::from(network) & Self::mask_bits(prefix_len);
        let limit = ((1u64 << (32 - prefix_len)) - 1) as u32;

        info!(
            network = %Ipv4Addr::from(base),
            prefix_len,
            capacity = limit - FIRST_HOST_OFFSET,
            "Creating address pool"
        );

        Ok(Self { base, prefix_len, limit, next_offset: AtomicU32::new(FIRST_HOST_OFFSET) })
    }

    /// Create a pool from a textual network address.
    pub fn parse(network: &str, prefix_len: u8) -> Result<Self> {
        let network: Ipv4Addr = network.trim().parse().map_err(|e| InterceptError::InvalidConfig {
            reason: format!("Invalid network address '{}': {}", network, e),
        })?;
        Self::new(network, prefix_len)
    }

    /// Allocate the next address.
    ///
    /// Claiming the offset is a single atomic step, so concurrent callers
    /// never observe the same offset.
    ///
    /// # Errors
    ///
    /// Returns `InterceptError::AddressPoolExhausted` once every offset has
    /// been handed out. The counter is not advanced in that case.
    pub fn allocate(&self) -> Result<Ipv4Addr> {
        let limit = self.limit;
        let offset = self
            .next_offset
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |offset| {
                (offset < limit).then(|| offset + 1)
            })
            .map_err(|_| InterceptError::AddressPoolExhausted {
                network: self.base_network(),
                prefix_len: self.prefix_len,
            })?;

        let addr = Ipv4Addr::from(self.base | offset);
        debug!(addr = %addr, offset, "Allocated virtual address");
        metrics::gauge!("intercept_pool_available").set(self.remaining() as f64);
        Ok(addr)
    }

    /// The masked network address.
    pub fn base_network(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.base)
    }

    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// The reserved interface address (offset 1).
    pub fn gateway(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.base | 1)
    }

    pub fn netmask(&self) -> Ipv4Addr {
        Ipv4Addr::from(Self::mask_bits(self.prefix_len))
    }

    /// Total number of addresses this pool can ever hand out.
    pub fn capacity(&self) -> usize {
        (self.limit - FIRST_HOST_OFFSET) as usize
    }

    /// Number of addresses handed out so far.
    pub fn allocated(&self) -> usize {
        (self.next_offset.load(Ordering::Acquire) - FIRST_HOST_OFFSET) as usize
    }

    pub fn remaining(&self) -> usize {
        self.capacity() - self.allocated()
    }

    /// Whether `addr` falls inside this pool's CIDR block.
    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        u32::from(addr) & Self::mask_bits(self.prefix_len) == self.base
    }

    fn mask_bits(prefix_len: u8) -> u32 {
        u32::MAX.checked_shl(32 - u32::from(prefix_len)).unwrap_or(0)
    }
}
