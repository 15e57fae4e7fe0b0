use rtp_pipe::packet::{ExtensionsForm, FIXED_HEADER_SIZE};
use rtp_pipe::PacketView;

mod common;
use common::{init_log, rtp};

#[test]
pub fn minimal_header_scenario() {
    init_log();

    let p = PacketView::from_vec(vec![0x80, 0x00, 0x00, 0x01, 0, 0, 0, 100, 0, 0, 0, 42]);

    assert!(!p.is_invalid());
    assert_eq!(p.len(), FIXED_HEADER_SIZE);
    assert_eq!(p.sequence_number(), 1);
    assert_eq!(p.timestamp(), 100);
    assert_eq!(p.ssrc(), 42);
}

#[test]
pub fn extension_add_remove_restores_packet() {
    init_log();

    for _ in 0..500 {
        let payload: Vec<u8> = (0..fastrand::usize(0..200)).map(|_| fastrand::u8(..)).collect();
        let original = rtp(fastrand::u16(..), fastrand::u32(..), fastrand::u32(..), &payload);

        let mut p = PacketView::from_vec(original.clone());
        let header_len = p.header_length();

        let id = fastrand::u8(1..=20);
        let len = fastrand::usize(1..=20);
        let data: Vec<u8> = (0..len).map(|_| fastrand::u8(..)).collect();

        p.add_extension(id, &data).unwrap();
        assert!(p.has_extension());
        assert_eq!(p.header_extension(id), Some(&data[..]));
        assert_eq!(p.payload(), &payload[..]);

        let expected = if id <= 14 && len <= 16 {
            ExtensionsForm::OneByte
        } else {
            ExtensionsForm::TwoByte
        };
        assert_eq!(p.extension_form(), Some(expected));

        p.remove_extension();
        assert!(!p.has_extension());
        assert_eq!(p.header_length(), header_len);
        assert_eq!(p.as_slice(), &original[..]);
    }
}

#[test]
pub fn extension_inside_larger_buffer() {
    init_log();

    // packet at offset 8 of a buffer with spare room at the end
    let data = rtp(5, 6, 7, &[1, 2, 3, 4]);
    let mut buffer = vec![0xaa; 8];
    buffer.extend_from_slice(&data);
    buffer.extend_from_slice(&[0; 64]);

    let mut p = PacketView::with_range(buffer, 8, data.len()).unwrap();
    p.add_extension(3, &[0x42]).unwrap();

    assert_eq!(p.sequence_number(), 5);
    assert_eq!(p.header_extension(3), Some(&[0x42][..]));
    assert_eq!(p.payload(), &[1, 2, 3, 4]);

    p.remove_extension();
    assert_eq!(p.as_slice(), &data[..]);
}
