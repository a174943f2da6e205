//! Provisioning dialog: RPC write → Wi-Fi attempt → status/error notifies.
//!
//! Jobs are drained with `run_pending_job` on the test thread so the
//! notify sequence is deterministic.

use std::time::{Duration, Instant};

use improv_ble::improv::codec::encode_wifi_settings;
use improv_ble::{
    AttError, CharacteristicId, HostEvent, ProvisioningError, ProvisioningState, ServerConfig,
    WifiError,
};

use crate::mock_host::{Call, Fixture, MockHost, ScriptedWifi};

const CONN: u16 = 3;

fn frame(ssid: &str, password: &str) -> Vec<u8> {
    encode_wifi_settings(ssid, password).unwrap().to_vec()
}

fn connected(wifi: ScriptedWifi) -> Fixture {
    let f = Fixture::new(wifi);
    f.sync();
    f.connect(CONN);
    f
}

// ── Success path ─────────────────────────────────────────────

#[test]
fn successful_attempt_notifies_provisioning_then_provisioned() {
    let f = connected(ScriptedWifi::ok());
    f.server
        .write(CharacteristicId::RpcCommand, &frame("HomeNet", "hunter22"))
        .unwrap();
    assert_eq!(f.server.state(), ProvisioningState::Provisioning);
    assert_eq!(f.status_notifications(), vec![0x03]);

    assert!(f.server.run_pending_job());
    assert_eq!(f.server.state(), ProvisioningState::Provisioned);
    assert_eq!(f.status_notifications(), vec![0x03, 0x04]);
    assert!(f.error_notifications().is_empty());
    assert_eq!(
        f.wifi.seen.lock().unwrap().as_slice(),
        &[("HomeNet".to_owned(), "hunter22".to_owned())]
    );
}

#[test]
fn notifies_target_the_connected_peer() {
    let f = connected(ScriptedWifi::ok());
    f.server
        .write(CharacteristicId::RpcCommand, &frame("Net", ""))
        .unwrap();
    let status = f.handle(CharacteristicId::Status);
    assert!(f.host().calls().contains(&Call::Notify {
        conn: CONN,
        attr: status,
        value: vec![0x03],
    }));
}

#[test]
fn settle_disconnects_peer_and_returns_to_authorized() {
    let f = connected(ScriptedWifi::ok());
    f.server
        .write(CharacteristicId::RpcCommand, &frame("HomeNet", "hunter22"))
        .unwrap();
    f.server.run_pending_job();

    let mut delay = f.delay();
    let start = f.clock.now();
    f.tick(&mut delay);

    assert!(f.clock.now() - start >= u64::from(f.server.config().settle_delay_ms));
    assert!(f.host().calls().contains(&Call::Terminate(CONN)));
    assert_eq!(f.server.state(), ProvisioningState::Authorized);
    // Status notifies stop at Provisioned; the reset is not pushed.
    assert_eq!(f.status_notifications(), vec![0x03, 0x04]);
}

#[test]
fn settle_skipped_when_peer_leaves_first() {
    let f = connected(ScriptedWifi::ok());
    f.server
        .write(CharacteristicId::RpcCommand, &frame("HomeNet", "hunter22"))
        .unwrap();
    f.server.run_pending_job();

    let mut delay = f.delay();
    let server = f.server.clone();
    delay.at(100, move || {
        server.handle_event(HostEvent::Disconnect {
            conn: CONN,
            reason: 0x13,
        })
    });
    f.tick(&mut delay);

    assert!(!f.host().calls().iter().any(|c| matches!(c, Call::Terminate(_))));
    assert_eq!(f.server.state(), ProvisioningState::Authorized);
}

#[test]
fn newer_provisioning_gets_its_own_settle_window() {
    let f = connected(ScriptedWifi::ok());
    let rpc = frame("HomeNet", "hunter22");
    f.server.write(CharacteristicId::RpcCommand, &rpc).unwrap();
    f.server.run_pending_job();

    let settle = u64::from(f.server.config().settle_delay_ms);
    let mut delay = f.delay();
    let server = f.server.clone();
    // First peer leaves just before its window ends; a second one
    // provisions in its place.
    delay.at(settle - 100, move || {
        server.handle_event(HostEvent::Disconnect {
            conn: CONN,
            reason: 0x13,
        });
        server.handle_event(HostEvent::Connect { conn: 4, status: 0 });
        server.write(CharacteristicId::RpcCommand, &rpc).unwrap();
        assert!(server.run_pending_job());
    });
    f.tick(&mut delay);

    assert!(!f.host().calls().iter().any(|c| matches!(c, Call::Terminate(_))));
    assert_eq!(f.server.state(), ProvisioningState::Provisioned);

    f.tick(&mut delay);
    let terminated_at = f
        .host()
        .timed_calls()
        .into_iter()
        .find(|t| t.call == Call::Terminate(4))
        .map(|t| t.at_ms)
        .unwrap();
    assert!(terminated_at >= settle - 100 + settle);
    assert_eq!(f.server.state(), ProvisioningState::Authorized);
}

// ── Failure paths ────────────────────────────────────────────

#[test]
fn failed_attempt_notifies_unable_to_connect() {
    let f = connected(ScriptedWifi::failing());
    f.server
        .write(CharacteristicId::RpcCommand, &frame("HomeNet", "wrongpass"))
        .unwrap();
    f.server.run_pending_job();

    assert_eq!(f.server.error(), ProvisioningError::UnableToConnect);
    assert_eq!(f.server.state(), ProvisioningState::Provisioning);
    assert_eq!(f.error_notifications(), vec![0x03]);
    assert_eq!(f.status_notifications(), vec![0x03]);
}

#[test]
fn retry_after_failure_is_accepted() {
    let f = connected(ScriptedWifi::failing());
    let rpc = frame("HomeNet", "wrongpass");
    f.server.write(CharacteristicId::RpcCommand, &rpc).unwrap();
    f.server.run_pending_job();

    f.server.write(CharacteristicId::RpcCommand, &rpc).unwrap();
    assert!(f.server.run_pending_job());
    assert_eq!(f.wifi.call_count(), 2);
    assert_eq!(f.error_notifications(), vec![0x03, 0x03]);
}

#[test]
fn provisioner_timeout_maps_to_unable_to_connect() {
    let config = ServerConfig {
        provision_timeout_ms: 50,
        ..ServerConfig::default()
    };
    let f = Fixture::with_config(ScriptedWifi::ok().slow(400), config);
    f.sync();
    f.connect(CONN);

    f.server
        .write(CharacteristicId::RpcCommand, &frame("SlowNet", ""))
        .unwrap();
    f.server.run_pending_job();

    assert_eq!(f.server.error(), ProvisioningError::UnableToConnect);
    assert_eq!(f.error_notifications(), vec![0x03]);
}

#[test]
fn retry_waits_for_timed_out_provisioner_to_return() {
    let config = ServerConfig {
        provision_timeout_ms: 50,
        ..ServerConfig::default()
    };
    let f = Fixture::with_config(ScriptedWifi::ok().slow(400), config);
    f.sync();
    f.connect(CONN);
    let rpc = frame("SlowNet", "");

    f.server.write(CharacteristicId::RpcCommand, &rpc).unwrap();
    f.server.run_pending_job();
    assert_eq!(f.server.error(), ProvisioningError::UnableToConnect);
    assert_eq!(f.wifi.call_count(), 1);

    // The first call is still blocked; no second helper is started.
    f.server.write(CharacteristicId::RpcCommand, &rpc).unwrap();
    assert!(f.server.run_pending_job());
    assert_eq!(f.server.error(), ProvisioningError::UnableToConnect);
    assert_eq!(f.wifi.call_count(), 1);
    assert_eq!(f.error_notifications(), vec![0x03, 0x03]);

    std::thread::sleep(Duration::from_millis(600));
    f.server.write(CharacteristicId::RpcCommand, &rpc).unwrap();
    f.server.run_pending_job();
    let deadline = Instant::now() + Duration::from_secs(5);
    while f.wifi.call_count() < 2 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(f.wifi.call_count(), 2);
}

#[test]
fn timeout_error_variant_maps_like_connect_failure() {
    let f = connected(ScriptedWifi::with(Err(WifiError::Timeout)));
    f.server
        .write(CharacteristicId::RpcCommand, &frame("Net", ""))
        .unwrap();
    f.server.run_pending_job();
    assert_eq!(f.server.error(), ProvisioningError::UnableToConnect);
}

// ── Rejected writes ──────────────────────────────────────────

#[test]
fn invalid_rpc_notifies_error_once_and_keeps_state() {
    let f = connected(ScriptedWifi::ok());
    let mut bad = frame("HomeNet", "hunter22");
    let last = bad.len() - 1;
    bad[last] ^= 0xFF;

    let r = f.server.write(CharacteristicId::RpcCommand, &bad);
    assert_eq!(r, Err(AttError::Unlikely));
    assert_eq!(f.server.state(), ProvisioningState::Authorized);
    assert_eq!(f.server.error(), ProvisioningError::InvalidRpc);
    assert_eq!(f.error_notifications(), vec![0x01]);
    assert!(f.status_notifications().is_empty());
    assert!(!f.server.run_pending_job());
    assert_eq!(f.wifi.call_count(), 0);
}

#[test]
fn write_without_connection_is_rejected_silently() {
    let f = Fixture::new(ScriptedWifi::ok());
    f.sync();
    let r = f
        .server
        .write(CharacteristicId::RpcCommand, &frame("HomeNet", "hunter22"));
    assert_eq!(r, Err(AttError::Unlikely));
    assert_eq!(f.server.state(), ProvisioningState::Authorized);
    assert_eq!(f.server.error(), ProvisioningError::None);
    assert_eq!(f.host().count(|c| matches!(c, Call::Notify { .. })), 0);
    assert!(!f.server.run_pending_job());
}

#[test]
fn second_write_while_attempt_outstanding_is_busy() {
    let f = connected(ScriptedWifi::ok());
    let rpc = frame("HomeNet", "hunter22");
    f.server.write(CharacteristicId::RpcCommand, &rpc).unwrap();
    assert_eq!(
        f.server.write(CharacteristicId::RpcCommand, &rpc),
        Err(AttError::Unlikely)
    );
    assert_eq!(f.status_notifications(), vec![0x03]);

    assert!(f.server.run_pending_job());
    assert!(!f.server.run_pending_job());
    assert_eq!(f.wifi.call_count(), 1);
}

#[test]
fn missing_notify_handles_are_skipped_silently() {
    let f = Fixture::with_host(ScriptedWifi::ok(), ServerConfig::default(), |clock| {
        MockHost::new(clock)
            .without_handles(&[CharacteristicId::Status, CharacteristicId::Error])
    });
    f.sync();
    f.connect(CONN);
    assert!(f.server.handles().unwrap().get(CharacteristicId::Status).is_none());

    let r = f.server.write(CharacteristicId::RpcCommand, &[0x01, 0x00, 0x00]);
    assert_eq!(r, Err(AttError::Unlikely));
    assert_eq!(f.server.error(), ProvisioningError::InvalidRpc);

    f.server
        .write(CharacteristicId::RpcCommand, &frame("HomeNet", "hunter22"))
        .unwrap();
    assert_eq!(f.server.state(), ProvisioningState::Provisioning);
    assert!(f.server.run_pending_job());
    assert_eq!(f.server.state(), ProvisioningState::Provisioned);
    assert_eq!(f.host().count(|c| matches!(c, Call::Notify { .. })), 0);
}

#[test]
fn empty_write_is_accepted_without_effect() {
    let f = connected(ScriptedWifi::ok());
    assert_eq!(f.server.write(CharacteristicId::RpcCommand, &[]), Ok(()));
    assert_eq!(f.server.state(), ProvisioningState::Authorized);
    assert_eq!(f.server.error(), ProvisioningError::None);
    assert!(!f.server.run_pending_job());
}

#[test]
fn oversized_write_rejected_before_decoding() {
    let config = ServerConfig {
        max_rpc_len: 16,
        ..ServerConfig::default()
    };
    let f = Fixture::with_config(ScriptedWifi::ok(), config);
    f.connect(CONN);
    let r = f
        .server
        .write(CharacteristicId::RpcCommand, &frame("a-long-network", "password1"));
    assert_eq!(r, Err(AttError::InsufficientResources));
    assert_eq!(f.server.error(), ProvisioningError::None);
    assert!(f.error_notifications().is_empty());
}

#[test]
fn write_to_read_only_characteristic_not_permitted() {
    let f = connected(ScriptedWifi::ok());
    assert_eq!(
        f.server.write(CharacteristicId::Status, &[0x04]),
        Err(AttError::WriteNotPermitted)
    );
    assert_eq!(
        f.server.read(CharacteristicId::RpcCommand).map(|_| ()),
        Err(AttError::ReadNotPermitted)
    );
}

// ── Stale results ────────────────────────────────────────────

#[test]
fn result_after_disconnect_is_discarded() {
    let f = connected(ScriptedWifi::ok());
    f.server
        .write(CharacteristicId::RpcCommand, &frame("HomeNet", "hunter22"))
        .unwrap();
    f.disconnect(CONN);
    f.host().clear();

    assert!(f.server.run_pending_job());
    assert_eq!(f.server.state(), ProvisioningState::Authorized);
    assert_eq!(f.host().count(|c| matches!(c, Call::Notify { .. })), 0);
}

#[test]
fn result_after_reconnect_on_same_handle_is_discarded() {
    let f = connected(ScriptedWifi::ok());
    f.server
        .write(CharacteristicId::RpcCommand, &frame("HomeNet", "hunter22"))
        .unwrap();
    f.disconnect(CONN);
    f.connect(CONN);
    f.host().clear();

    f.server.run_pending_job();
    assert_eq!(f.server.state(), ProvisioningState::Authorized);
    assert!(f.status_notifications().is_empty());
}

// ── Reads ────────────────────────────────────────────────────

#[test]
fn reads_follow_dialog() {
    let config = ServerConfig {
        capabilities: 0x01,
        ..ServerConfig::default()
    };
    let f = Fixture::with_config(ScriptedWifi::failing(), config);
    f.connect(CONN);
    let read = |id| f.server.read(id).unwrap().to_vec();

    assert_eq!(read(CharacteristicId::Status), vec![0x02]);
    assert_eq!(read(CharacteristicId::Error), vec![0x00]);
    assert_eq!(read(CharacteristicId::Capabilities), vec![0x01]);
    assert_eq!(read(CharacteristicId::RpcResult), vec![0x00, 0x00]);
    assert_eq!(read(CharacteristicId::Manufacturer), b"Acme".to_vec());
    assert_eq!(read(CharacteristicId::Model), b"Widget".to_vec());

    f.server
        .write(CharacteristicId::RpcCommand, &frame("Net", ""))
        .unwrap();
    assert_eq!(read(CharacteristicId::Status), vec![0x03]);
    f.server.run_pending_job();
    assert_eq!(read(CharacteristicId::Error), vec![0x03]);
}
