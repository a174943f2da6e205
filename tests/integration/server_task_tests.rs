//! Controller with its background tasks on real threads.

use std::sync::mpsc;
use std::time::{Duration, Instant};

use improv_ble::improv::codec::encode_wifi_settings;
use improv_ble::{CharacteristicId, HostEvent, ProvisioningState, ServerConfig};

use crate::mock_host::{Call, Fixture, ScriptedWifi};

fn fast_config() -> ServerConfig {
    ServerConfig {
        name_every_ms: 50,
        name_for_ms: 10,
        poll_interval_ms: 5,
        settle_delay_ms: 50,
        provision_timeout_ms: 2_000,
        ..ServerConfig::default()
    }
}

fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    false
}

#[test]
fn advertising_task_waits_for_sync() {
    let f = Fixture::with_config(ScriptedWifi::ok(), fast_config());
    f.server.start_advertising();
    let tasks = f.server.spawn().unwrap();

    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(f.host().starts(), 0);

    f.server.handle_event(HostEvent::Synced { address: None });
    assert!(wait_for(|| f.server.is_advertising()));
    tasks.shutdown().unwrap();
    // Stopped on the way out.
    assert_eq!(f.host().calls().last(), Some(&Call::Stop));
}

#[test]
fn full_dialog_on_background_tasks() {
    let f = Fixture::with_config(ScriptedWifi::ok(), fast_config());
    let tasks = f.server.spawn().unwrap();
    f.sync();
    f.server.start_advertising();
    f.connect(7);

    f.server
        .write(
            CharacteristicId::RpcCommand,
            &encode_wifi_settings("HomeNet", "hunter22").unwrap(),
        )
        .unwrap();
    assert!(wait_for(|| {
        f.host().calls().contains(&Call::Terminate(7))
            && f.server.state() == ProvisioningState::Authorized
    }));
    assert_eq!(f.status_notifications(), vec![0x03, 0x04]);
    tasks.shutdown().unwrap();
}

#[test]
fn shutdown_waits_for_inflight_attempt() {
    let f = Fixture::with_config(ScriptedWifi::ok().slow(100), fast_config());
    let tasks = f.server.spawn().unwrap();
    f.connect(7);
    f.server
        .write(
            CharacteristicId::RpcCommand,
            &encode_wifi_settings("HomeNet", "hunter22").unwrap(),
        )
        .unwrap();
    tasks.shutdown().unwrap();
    assert_eq!(f.wifi.call_count(), 1);
    assert_eq!(f.server.state(), ProvisioningState::Provisioned);
}

#[test]
fn reads_from_inside_a_notify_do_not_block() {
    let f = Fixture::new(ScriptedWifi::ok());
    f.host().read_during_notify();
    f.sync();
    f.connect(7);

    let server = f.server.clone();
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let bad = server.write(CharacteristicId::RpcCommand, &[0x01, 0x00, 0x00]);
        let good = server.write(
            CharacteristicId::RpcCommand,
            &encode_wifi_settings("HomeNet", "hunter22").unwrap(),
        );
        let ran = server.run_pending_job();
        let _ = tx.send((bad, good, ran));
    });

    let (bad, good, ran) = rx
        .recv_timeout(Duration::from_secs(2))
        .expect("write path blocked on the state lock");
    assert!(bad.is_err());
    assert_eq!(good, Ok(()));
    assert!(ran);
    assert_eq!(f.status_notifications(), vec![0x03, 0x04]);
    assert_eq!(f.error_notifications(), vec![0x01]);
}
