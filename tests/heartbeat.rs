// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Integration tests for heartbeat probing.

mod common;

use std::sync::Arc;
use std::time::Duration;

use blelink::event::{HeartbeatStateChanged, LinkStatusChanged};
use blelink::registry::MessageKind;
use blelink::{Address, DeviceLinkState, DeviceRecord, Host, HostConfig, LinkStatus, MessageQuery};
use common::{FakeDevice, FakeRadio, host, run_for, t0};

const DEVICE: Address = Address::new(0x00AA_BBCC_DDEE);

/// Builds a host with `DEVICE` known to the registry and connected.
async fn connected_host() -> (Arc<FakeRadio>, FakeDevice, Host<FakeRadio>) {
    let radio = Arc::new(FakeRadio::new());
    let device = radio.add(FakeDevice::new(DEVICE));
    let host = host(&radio, HostConfig::default());
    host.registry().upsert(DeviceRecord::new(DEVICE, t0()));

    host.orchestrator().request_connect(DEVICE);
    run_for(Duration::from_secs(1)).await;
    assert_eq!(host.registry().link_status(DEVICE), LinkStatus::Connected);
    (radio, device, host)
}

// ============================================================================
// Manual probes
// ============================================================================

mod probe_now {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn success_records_latency() {
        let (_radio, _device, host) = connected_host().await;

        let result = host.heartbeat().probe_now(DEVICE).await;
        assert!(result.succeeded);
        assert!(result.latency_ms >= 20 && result.latency_ms < 100, "{}", result.latency_ms);
        assert_eq!(result.error, None);

        let snapshot = host.heartbeat().snapshot(DEVICE);
        assert!(!snapshot.is_probing);
        assert_eq!(snapshot.consecutive_failures, 0);
        assert_eq!(snapshot.last_success, Some(result.timestamp));
        assert!(snapshot.last_attempt.is_some());

        host.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn three_failures_keep_link_up() {
        let (_radio, device, host) = connected_host().await;
        let mut events = host.bus().subscribe_channel::<HeartbeatStateChanged>();
        device.set_reachable(false);

        for _ in 0..3 {
            let result = host.heartbeat().probe_now(DEVICE).await;
            assert!(!result.succeeded);
            assert_eq!(result.latency_ms, 0);
        }

        let snapshot = host.heartbeat().snapshot(DEVICE);
        assert_eq!(snapshot.consecutive_failures, 3);
        assert_eq!(snapshot.last_error_code.as_deref(), Some("error.unreachable"));
        assert!(snapshot.last_failure.is_some());
        assert_eq!(
            host.orchestrator().snapshot(DEVICE).state,
            DeviceLinkState::Connected
        );
        assert_eq!(host.registry().link_status(DEVICE), LinkStatus::Connected);

        let mut completions = Vec::new();
        while let Ok(event) = events.try_recv() {
            if !event.snapshot.is_probing {
                completions.push(event.snapshot.consecutive_failures);
            }
        }
        assert_eq!(completions, vec![1, 2, 3]);

        let errors = host.message_log().query(
            &MessageQuery::for_address(DEVICE).with_kinds([MessageKind::OperationError]),
        );
        assert_eq!(errors.len(), 3);
        assert!(errors.iter().all(|message| message.text == "error.unreachable"));

        host.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn slow_device_times_out() {
        let (_radio, device, host) = connected_host().await;
        device.set_session_delay(Duration::from_secs(5));

        let result = host.heartbeat().probe_now(DEVICE).await;
        assert!(!result.succeeded);
        assert_eq!(result.error.as_deref(), Some("error.timeout"));
        assert_eq!(
            host.heartbeat().snapshot(DEVICE).last_error_code.as_deref(),
            Some("error.timeout")
        );

        host.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn success_resets_failures() {
        let (_radio, device, host) = connected_host().await;
        device.set_reachable(false);
        host.heartbeat().probe_now(DEVICE).await;
        host.heartbeat().probe_now(DEVICE).await;

        device.set_reachable(true);
        host.heartbeat().probe_now(DEVICE).await;

        let snapshot = host.heartbeat().snapshot(DEVICE);
        assert_eq!(snapshot.consecutive_failures, 0);
        assert_eq!(snapshot.last_error_code, None);

        host.stop().await;
    }
}

// ============================================================================
// Periodic probing
// ============================================================================

mod periodic {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn enabling_probes_connected_device() {
        let (_radio, device, host) = connected_host().await;
        let before = device.session_probes();

        host.heartbeat().set_enabled(DEVICE, true);
        assert!(host.heartbeat().is_enabled(DEVICE));
        run_for(Duration::from_millis(500)).await;

        assert_eq!(device.session_probes(), before + 1);
        let snapshot = host.heartbeat().snapshot(DEVICE);
        assert!(snapshot.last_success.is_some());
        assert_eq!(snapshot.period, Duration::from_secs(10));

        host.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn probes_follow_period() {
        let (_radio, device, host) = connected_host().await;
        host.heartbeat().set_period(DEVICE, Duration::from_secs(2));
        host.heartbeat().set_enabled(DEVICE, true);
        run_for(Duration::from_millis(500)).await;
        let after_first = device.session_probes();

        run_for(Duration::from_secs(10)).await;
        let periodic = device.session_probes() - after_first;
        assert!((4..=6).contains(&periodic), "{periodic} periodic probes");

        host.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn period_is_at_least_one_second() {
        let (_radio, _device, host) = connected_host().await;
        host.heartbeat().set_period(DEVICE, Duration::from_millis(10));
        assert_eq!(host.heartbeat().period(DEVICE), Duration::from_secs(1));

        host.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_monitor_stays_idle() {
        let (_radio, device, host) = connected_host().await;
        let before = device.session_probes();

        host.heartbeat().set_period(DEVICE, Duration::from_secs(1));
        run_for(Duration::from_secs(10)).await;

        assert_eq!(device.session_probes(), before);
        assert!(!host.heartbeat().is_enabled(DEVICE));

        host.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn disconnected_device_is_not_probed() {
        let radio = Arc::new(FakeRadio::new());
        let device = radio.add(FakeDevice::new(DEVICE));
        let host = host(&radio, HostConfig::default());
        host.registry().upsert(DeviceRecord::new(DEVICE, t0()));

        host.heartbeat().set_period(DEVICE, Duration::from_secs(1));
        host.heartbeat().set_enabled(DEVICE, true);
        run_for(Duration::from_secs(10)).await;

        assert_eq!(device.session_probes(), 0);
        assert_eq!(host.heartbeat().snapshot(DEVICE).last_attempt, None);

        host.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn link_up_triggers_probe() {
        let radio = Arc::new(FakeRadio::new());
        let device = radio.add(FakeDevice::new(DEVICE));
        let host = host(&radio, HostConfig::default());
        host.registry().upsert(DeviceRecord::new(DEVICE, t0()));
        host.heartbeat().start();
        host.heartbeat().set_enabled(DEVICE, true);

        host.orchestrator().request_connect(DEVICE);
        run_for(Duration::from_secs(1)).await;

        // One session read while connecting, one from the heartbeat.
        assert_eq!(device.session_probes(), 2);
        assert!(host.heartbeat().snapshot(DEVICE).last_success.is_some());

        host.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn link_up_during_probe_is_ignored() {
        let (_radio, device, host) = connected_host().await;
        host.heartbeat().start();
        device.set_session_delay(Duration::from_secs(2));
        let before = device.session_probes();

        host.heartbeat().set_enabled(DEVICE, true);
        run_for(Duration::from_millis(100)).await;
        assert!(host.heartbeat().snapshot(DEVICE).is_probing);

        for _ in 0..2 {
            host.bus().publish(LinkStatusChanged {
                address: DEVICE,
                status: LinkStatus::Connected,
                timestamp: host.clock().now(),
            });
        }
        run_for(Duration::from_secs(3)).await;

        assert_eq!(device.session_probes(), before + 1);
        let snapshot = host.heartbeat().snapshot(DEVICE);
        assert!(!snapshot.is_probing);
        assert!(snapshot.last_success.is_some());

        host.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_monitors() {
        let (_radio, device, host) = connected_host().await;
        host.heartbeat().set_period(DEVICE, Duration::from_secs(1));
        host.heartbeat().set_enabled(DEVICE, true);
        run_for(Duration::from_secs(3)).await;

        host.heartbeat().stop().await;
        let probes = device.session_probes();
        run_for(Duration::from_secs(10)).await;

        assert_eq!(device.session_probes(), probes);
        assert!(!host.heartbeat().snapshot(DEVICE).is_probing);

        host.stop().await;
    }
}
