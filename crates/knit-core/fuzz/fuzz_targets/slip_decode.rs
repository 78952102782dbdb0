#![no_main]

use knit_core::{
    decode, decode_into, encode, protocol, FrameAccumulator, MachineFamily, Mcu,
    ReferenceFirmware, FRAME_CAPACITY,
};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let decoded = decode(data);
    assert!(decoded.len() <= data.len());

    let mut bounded = [0u8; FRAME_CAPACITY];
    let written = decode_into(data, &mut bounded);
    assert!(written <= FRAME_CAPACITY);

    assert_eq!(decode(&encode(data)), data);

    let mut frames = FrameAccumulator::new();
    for &byte in data {
        if let Some(frame) = frames.push(byte) {
            let _ = protocol::describe(&frame);
        }
    }

    let mut firmware = ReferenceFirmware::new(MachineFamily::Kh930);
    for &byte in data {
        firmware.inject_serial(byte);
    }
    while firmware.poll_event().is_some() {}
});
