//! Fuzz target: RPC characteristic write path
//!
//! Feeds arbitrary bytes through a connected controller, as a peer write
//! would, and checks the dialog never leaves its legal states.
//!
//! cargo fuzz run fuzz_rpc_write

#![no_main]

use improv_ble::adapters::nimble::NimbleHost;
use improv_ble::{
    CharacteristicId, DeviceIdentity, HostEvent, ImprovServer, ProvisioningState, ServerConfig,
    WifiError,
};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let identity = DeviceIdentity::new("improv-fuzz", "Acme", "Widget").unwrap();
    let server = ImprovServer::initialize(
        identity,
        ServerConfig::default(),
        NimbleHost::new(),
        |_: &str, _: &str| -> Result<(), WifiError> { Ok(()) },
    )
    .unwrap();
    server.handle_event(HostEvent::Connect { conn: 1, status: 0 });

    let accepted = server.write(CharacteristicId::RpcCommand, data).is_ok();
    let state = server.state();
    if accepted && !data.is_empty() {
        assert_eq!(state, ProvisioningState::Provisioning);
        assert!(server.run_pending_job());
    } else {
        assert_eq!(state, ProvisioningState::Authorized);
    }
});
