use std::sync::Arc;
use std::time::Duration;

use rtp_pipe::{is_newer_u16, PacketPool, PacketView, SendConfig, SendPipeline, StreamRewriter};

mod common;
use common::{addr, init_log, rtp, MockSocket};

#[test]
pub fn forwarded_numbering_is_contiguous() {
    init_log();

    for _ in 0..20 {
        let mut rewriter = StreamRewriter::new();
        let mut seq = fastrand::u16(..);
        let mut ts = fastrand::u32(..);
        let mut forwarded: Vec<(u16, u32)> = vec![];

        for _ in 0..5000 {
            // Runs of forwarded and dropped packets, like a layer switch.
            let accept = fastrand::u8(..10) < 7;
            let mut packet = PacketView::from_vec(rtp(seq, ts, 1, &[0; 20]));

            rewriter.rewrite_rtp_packet(accept, &mut packet);
            if accept {
                forwarded.push((packet.sequence_number(), packet.timestamp()));
            } else {
                // dropped packets keep their numbering
                assert_eq!(packet.sequence_number(), seq);
            }

            seq = seq.wrapping_add(1);
            ts = ts.wrapping_add(960);
        }

        for w in forwarded.windows(2) {
            assert_eq!(w[1].0, w[0].0.wrapping_add(1));
            assert_eq!(w[1].1, w[0].1.wrapping_add(960));
            assert!(is_newer_u16(w[1].0, w[0].0));
        }
    }
}

#[test]
pub fn restore_gives_back_original() {
    init_log();

    let mut rewriter = StreamRewriter::new();
    let mut last = None;

    // ends on a forwarded packet, 1097 % 7 != 0
    for seq in 1000_u16..1098 {
        let ts = seq as u32 * 3000;
        let accept = seq % 7 != 0;
        let mut packet = PacketView::from_vec(rtp(seq, ts, 1, &[]));
        rewriter.rewrite_rtp_packet(accept, &mut packet);
        if accept {
            last = Some((seq, ts, packet));
        }
    }

    let (seq, ts, mut packet) = last.unwrap();
    assert_ne!(packet.sequence_number(), seq);

    rewriter.restore_rtp_packet(&mut packet);
    assert_eq!(packet.sequence_number(), seq);
    assert_eq!(packet.timestamp(), ts);
}

#[test]
pub fn rewritten_packets_through_send_pipeline() {
    init_log();

    let socket = MockSocket::new();
    let pool = Arc::new(PacketPool::default());
    let send = SendPipeline::new(socket.clone(), pool.clone(), SendConfig::new());
    send.add_target(addr(5000));

    let mut rewriter = StreamRewriter::new();

    for seq in 0..10_u16 {
        let mut packet = pool.checkout(12);
        packet.set_data(&rtp(seq, 0, 1, &[]));

        let accept = !(3..6).contains(&seq);
        rewriter.rewrite_rtp_packet(accept, &mut packet);

        if accept {
            send.send_packet(packet).unwrap();
        } else {
            pool.return_(packet);
        }
    }

    assert!(socket.wait_sent(7, Duration::from_secs(1)));
    let seqs: Vec<_> = socket
        .sent()
        .iter()
        .map(|(d, _)| u16::from_be_bytes([d[2], d[3]]))
        .collect();
    assert_eq!(seqs, (0..7).collect::<Vec<_>>());
    assert_eq!(rewriter.seq_delta(), 3);
}
