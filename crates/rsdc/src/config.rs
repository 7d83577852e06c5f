// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Global configuration - single source of truth.
//!
//! This module centralizes ALL wire constants and runtime configuration.
//! **NEVER hardcode elsewhere!**
//!
//! - **Level 1 (Static)**: compile-time constants (WS-Discovery group/port,
//!   timing rules from the standard).
//! - **Level 2 (Dynamic)**: [`SdcConfig`] for per-instance tunables
//!   (subscription caps, reorder window, waveform cadence). The config object
//!   is passed down explicitly; nothing in this crate is process-global.

use serde::{Deserialize, Serialize};
use std::time::Duration;

// =======================================================================
// WS-Discovery (SOAP-over-UDP, 2005/04 profile)
// =======================================================================

/// WS-Discovery IPv4 multicast group (WS-Discovery 2005/04 Sec.2.4).
pub const DISCOVERY_MULTICAST_IP: [u8; 4] = [239, 255, 255, 250];

/// String version of [`DISCOVERY_MULTICAST_IP`] (for fast parsing).
pub const DISCOVERY_MULTICAST_GROUP: &str = "239.255.255.250";

/// WS-Discovery UDP port (IANA registered).
pub const DISCOVERY_MULTICAST_PORT: u16 = 3702;

/// TTL for outbound multicast datagrams.
///
/// SDC deployments span routed hospital networks; a TTL of 1 (link-local)
/// is too small in practice.
pub const DISCOVERY_MULTICAST_TTL: u32 = 15;

/// `APP_MAX_DELAY` - upper bound for the random delay before answering a
/// multicast Probe/Resolve (WS-Discovery 2005/04 Sec.3.1.3).
pub const APP_MAX_DELAY: Duration = Duration::from_millis(500);

/// `MATCH_TIMEOUT` - window during which ProbeMatch/ResolveMatch answers
/// are collected after an active Probe/Resolve send.
pub const MATCH_TIMEOUT: Duration = Duration::from_secs(3);

/// Number of transmissions for a unicast discovery message (SOAP-over-UDP
/// repeat rule: the original send plus one repeat).
pub const UNICAST_UDP_REPEAT: u32 = 2;

/// Number of transmissions for a multicast discovery message.
pub const MULTICAST_UDP_REPEAT: u32 = 4;

/// Minimum delay before the first repeat of a discovery datagram.
pub const UDP_MIN_DELAY: Duration = Duration::from_millis(50);

/// Maximum delay before the first repeat of a discovery datagram.
pub const UDP_MAX_DELAY: Duration = Duration::from_millis(250);

/// Cap for the (doubling) gap between further repeats.
pub const UDP_UPPER_DELAY: Duration = Duration::from_millis(500);

/// Receive timeout of the discovery socket. Bounds shutdown latency of the
/// receive thread; no protocol meaning.
pub const DISCOVERY_RECV_TIMEOUT: Duration = Duration::from_millis(100);

// =======================================================================
// WS-Eventing / subscriptions
// =======================================================================

/// Default cap for granted subscription durations. Requested values above
/// the cap are silently clamped (WS-Eventing allows the source to grant
/// less than requested).
pub const MAX_SUBSCRIPTION_DURATION: Duration = Duration::from_secs(7000);

/// Poll period of the subscription expiration sweeper.
pub const SUBSCRIPTION_SWEEP_PERIOD: Duration = Duration::from_secs(1);

/// Bounded depth of a per-subscription delivery lane. On overflow the oldest
/// waveform notification is dropped first; if none is queued the
/// subscription is terminated with `DeliveryFailure`.
pub const DELIVERY_LANE_DEPTH: usize = 64;

/// Safety margin subtracted from the granted expiration when scheduling
/// an automatic renew.
pub const RENEW_SAFETY_MARGIN: Duration = Duration::from_secs(30);

// =======================================================================
// Consumer report processing
// =======================================================================

/// Maximum number of out-of-order reports held while waiting for the
/// missing `mdib_version`.
pub const REORDER_BUFFER_DEPTH: usize = 50;

/// How long a hole in the report stream may stay open before gap recovery
/// (GetMdib refetch) is triggered.
pub const REORDER_WINDOW: Duration = Duration::from_millis(50);

// =======================================================================
// Provider defaults
// =======================================================================

/// Default cadence of the waveform source pump. Not protocol-visible.
pub const WAVEFORM_PERIOD: Duration = Duration::from_millis(100);

/// Default poll period of the alert source pump.
pub const ALERT_POLL_PERIOD: Duration = Duration::from_millis(500);

/// Per-stage deadline of the graceful shutdown sequence
/// (drain queues -> Bye/SubscriptionEnd -> close sockets).
pub const SHUTDOWN_STAGE_DEADLINE: Duration = Duration::from_secs(2);

/// Runtime configuration for providers and consumers.
///
/// Constructed once, passed down explicitly. All fields have working
/// defaults mirroring the constants above.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SdcConfig {
    /// Cap for granted subscription durations.
    pub max_subscription_duration: Duration,
    /// Per-subscription delivery queue depth.
    pub delivery_lane_depth: usize,
    /// Consumer reorder buffer depth.
    pub reorder_buffer_depth: usize,
    /// Consumer reorder window before gap recovery.
    pub reorder_window: Duration,
    /// Safety margin for automatic subscription renewal.
    pub renew_safety_margin: Duration,
    /// Waveform pump cadence.
    pub waveform_period: Duration,
    /// Alert source poll period.
    pub alert_poll_period: Duration,
    /// When true, return `InvocationState::Fin` directly from the set-service
    /// response instead of `Wait` followed by asynchronous reports.
    pub operation_fast_path: bool,
    /// Strict envelope validation: reject unknown mustUnderstand headers and
    /// requests without the mandatory addressing headers.
    pub strict_envelopes: bool,
    /// Per-stage deadline during graceful shutdown.
    pub shutdown_stage_deadline: Duration,
}

impl Default for SdcConfig {
    fn default() -> Self {
        Self {
            max_subscription_duration: MAX_SUBSCRIPTION_DURATION,
            delivery_lane_depth: DELIVERY_LANE_DEPTH,
            reorder_buffer_depth: REORDER_BUFFER_DEPTH,
            reorder_window: REORDER_WINDOW,
            renew_safety_margin: RENEW_SAFETY_MARGIN,
            waveform_period: WAVEFORM_PERIOD,
            alert_poll_period: ALERT_POLL_PERIOD,
            operation_fast_path: false,
            strict_envelopes: false,
            shutdown_stage_deadline: SHUTDOWN_STAGE_DEADLINE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_constants() {
        let cfg = SdcConfig::default();
        assert_eq!(cfg.max_subscription_duration, MAX_SUBSCRIPTION_DURATION);
        assert_eq!(cfg.delivery_lane_depth, DELIVERY_LANE_DEPTH);
        assert_eq!(cfg.reorder_window, REORDER_WINDOW);
        assert!(!cfg.operation_fast_path);
    }

    #[test]
    fn test_repeat_parameters() {
        // SOAP-over-UDP: unicast messages go out twice, multicast four times.
        assert_eq!(UNICAST_UDP_REPEAT, 2);
        assert_eq!(MULTICAST_UDP_REPEAT, 4);
        assert!(UDP_MIN_DELAY < UDP_MAX_DELAY);
        assert!(UDP_MAX_DELAY <= UDP_UPPER_DELAY);
    }
}
