//! Fuzz target: `ImprovCodec::decode`
//!
//! Drives arbitrary bytes into the RPC command decoder and asserts that
//! accepted frames carry bounded, non-empty credentials that re-encode to
//! the same bytes.
//!
//! cargo fuzz run fuzz_rpc_decode

#![no_main]

use improv_ble::improv::codec::{
    ImprovCodec, MAX_PASSWORD_LEN, MAX_SSID_LEN, RpcCodec, encode_wifi_settings,
};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(creds) = ImprovCodec.decode(data) {
        assert!(!creds.ssid.is_empty(), "decoder accepted empty SSID");
        assert!(creds.ssid.len() <= MAX_SSID_LEN);
        assert!(creds.password.len() <= MAX_PASSWORD_LEN);

        let frame = encode_wifi_settings(&creds.ssid, &creds.password)
            .expect("decoded credentials must re-encode");
        assert_eq!(frame.as_slice(), data);
    }
});
