use dvb_psi::{packetize, pid, psi_payload, PatTable, TsPacket, TS_PACKET_SIZE};

#[test]
fn two_cell_packetization() {
    let _ = env_logger::builder().is_test(true).try_init();

    let payload: Vec<u8> = (0..300u16).map(|i| i as u8).collect();
    let cells = packetize(&payload, 0x0100, Some(0));
    assert_eq!(cells.len(), 2 * TS_PACKET_SIZE);

    let mut recovered = Vec::new();
    for (i, cell) in cells.chunks(TS_PACKET_SIZE).enumerate() {
        let (packet, body) = TsPacket::decode_cell(cell).unwrap();
        assert_eq!(packet.header.payload_unit_start, i == 0);
        assert_eq!(packet.header.pid, 0x0100);
        assert_eq!(packet.header.continuity_counter, i as u8);
        recovered.extend_from_slice(body);
    }
    assert_eq!(&recovered[..payload.len()], &payload[..]);
    assert!(recovered[payload.len()..].iter().all(|&b| b == 0xFF));
}

#[test]
fn section_through_packets() {
    let mut pat = PatTable::new();
    for n in 0..60u16 {
        pat.add_program(0x0100 + n, n + 1);
    }
    let section = pat.encode().unwrap();
    assert!(section.len() > 184);

    let mut payload = vec![0x00];
    payload.extend_from_slice(&section);
    let cells = packetize(&payload, pid::PAT, Some(7));

    let mut assembled = Vec::new();
    let mut start = None;
    for cell in cells.chunks(TS_PACKET_SIZE) {
        let (packet, body) = TsPacket::decode_cell(cell).unwrap();
        if packet.header.payload_unit_start {
            packet.dump();
            let af = packet.adaptation_field.as_ref().unwrap();
            assert_eq!(af.length, 7);
            start = Some(packet.header.continuity_counter);
            assembled.extend_from_slice(psi_payload(body, true).unwrap());
        } else {
            assembled.extend_from_slice(body);
        }
    }
    assert_eq!(start, Some(0));

    let (decoded, _) = PatTable::decode(&assembled).unwrap();
    assert_eq!(decoded.programs(), pat.programs());
}
