#![no_main]

use chat_transport::core::codec;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok((message, consumed)) = codec::decode(data) {
        assert!(consumed <= data.len());
        if let Ok(encoded) = codec::encode(&message) {
            assert_eq!(&encoded[..], &data[..consumed]);
        }
    }
});
