#![no_main]

use bytes::BytesMut;
use chat_transport::core::codec::MessageCodec;
use libfuzzer_sys::fuzz_target;
use tokio_util::codec::Decoder;

// First byte picks the chunk size the rest of the input is fed in
fuzz_target!(|data: &[u8]| {
    let Some((&chunk, rest)) = data.split_first() else {
        return;
    };
    let mut decoder = MessageCodec::new(4096);
    let mut buf = BytesMut::new();
    for piece in rest.chunks(usize::from(chunk).max(1)) {
        buf.extend_from_slice(piece);
        loop {
            match decoder.decode(&mut buf) {
                Ok(Some(_)) => continue,
                Ok(None) => break,
                Err(_) => return,
            }
        }
    }
});
