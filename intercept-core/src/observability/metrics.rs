//! Core metrics definitions.
//!
//! All metrics follow Prometheus naming conventions:
//! - `_total` suffix for counters
//! - plain names for gauges

use metrics::{describe_counter, describe_gauge};

/// Register all core metrics with descriptions.
///
/// This ensures metrics appear in `/metrics` with proper metadata.
pub fn register_core_metrics() {
    // Allocation
    describe_counter!(
        "intercept_hostnames_mapped_total",
        "Total number of hostnames assigned a virtual address"
    );
    describe_gauge!("intercept_pool_available", "Virtual addresses left in the pool");

    // Registration
    describe_counter!(
        "intercept_service_registrations_total",
        "Service registrations (by result: success, conflict, exhausted)"
    );
    describe_counter!(
        "intercept_mapping_conflicts_total",
        "Rejected registrations (by kind: network, service)"
    );
    describe_counter!(
        "intercept_service_deregistrations_total",
        "Service deregistrations (by result: success, not_found)"
    );
    describe_gauge!("intercept_services_active", "Current number of hostname:port mappings");

    // Resolution
    describe_counter!("intercept_resolve_total", "Directory lookups (by result: hit, miss)");
    describe_counter!(
        "intercept_dns_queries_total",
        "DNS queries (by result: answered, nodata, nxdomain, forwarded, malformed)"
    );
}
