//! Record encoding properties that matter across restarts: logical content
//! survives the compact representations, and persisted images never carry
//! in-memory-only state.

use std::sync::Arc;

use treeline::entry::state;
use treeline::log::codec::{self, DecodedNode};
use treeline::log::{obsolete, LogManager, MemLog, NullLockManager};
use treeline::node::{In, Ln, NodeKind};
use treeline::{Env, EngineConfig, Lsn};

fn decode_in(buf: &[u8]) -> In {
    match codec::decode_node(buf).unwrap() {
        DecodedNode::In(in_) => in_,
        other => panic!("expected a full image, got {:?}", other.kind()),
    }
}

#[test]
fn full_image_preserves_entries_and_drops_transient_state() {
    let config = EngineConfig::default();
    let mut in_ = In::new(NodeKind::Bottom, &config);
    for (i, key) in ["user:0001", "user:0002", "user:0400"].iter().enumerate() {
        in_.insert_entry(key.as_bytes(), Lsn::new(2, 100 + i as u32), 0, &config)
            .unwrap();
    }
    in_.update_entry_state(1, state::PENDING_DELETED, 0);
    in_.update_entry(2, Lsn::NULL, 0, state::KNOWN_DELETED, 0);

    let round = decode_in(&codec::encode_in(&in_));
    assert_eq!(round.kind(), NodeKind::Bottom);
    assert_eq!(round.n_entries(), 3);
    for idx in 0..3 {
        assert_eq!(round.key(idx), in_.key(idx), "key {idx}");
        assert_eq!(round.entry_lsn(idx), in_.entry_lsn(idx), "lsn {idx}");
        assert!(
            !state::is_dirty(round.entry_state(idx)),
            "dirty bit persisted at {idx}"
        );
    }
    assert!(state::is_pending_deleted(round.entry_state(1)));
    assert!(state::is_known_deleted(round.entry_state(2)));
    assert!(round.entry_lsn(2).is_null());
}

#[test]
fn lsn_representation_does_not_leak_into_decoded_values() {
    // The same entries logged under compact and under full per-slot LSNs
    // must decode to identical logical content.
    let compact_config = EngineConfig::default();
    let full_config = EngineConfig {
        disable_compact_lsns: true,
        ..Default::default()
    };
    let lsns = [Lsn::new(7, 10), Lsn::new(7, 900), Lsn::new(8, 4)];

    let mut images = Vec::new();
    for config in [&compact_config, &full_config] {
        let mut in_ = In::new(NodeKind::Bottom, config);
        for (i, lsn) in lsns.iter().enumerate() {
            in_.insert_entry(format!("k{i}").as_bytes(), *lsn, 0, config)
                .unwrap();
        }
        images.push(codec::encode_in(&in_));
    }

    let (a, b) = (decode_in(&images[0]), decode_in(&images[1]));
    for idx in 0..lsns.len() {
        assert_eq!(a.entry_lsn(idx), b.entry_lsn(idx));
        assert_eq!(a.entry_lsn(idx), lsns[idx]);
        assert_eq!(a.key(idx), b.key(idx));
    }
}

#[test]
fn offsets_beyond_the_compact_window_round_trip() {
    let config = EngineConfig::default();
    let mut in_ = In::new(NodeKind::Bottom, &config);
    in_.insert_entry(b"near", Lsn::new(3, 5), 0, &config).unwrap();
    in_.insert_entry(b"wide", Lsn::new(3, 0x0100_0000), 0, &config)
        .unwrap();

    let round = decode_in(&codec::encode_in(&in_));
    assert_eq!(round.entry_lsn(0), Lsn::new(3, 5));
    assert_eq!(round.entry_lsn(1), Lsn::new(3, 0x0100_0000));
}

#[test]
fn leaf_records_round_trip() {
    let payload = codec::encode_ln(&Ln::new(b"payload bytes".to_vec()));
    let DecodedNode::Ln(ln) = codec::decode_node(&payload).unwrap() else {
        panic!("expected a leaf");
    };
    assert_eq!(ln.data(), Some(&b"payload bytes"[..]));

    let marker = codec::encode_ln(&Ln::new_deleted());
    let DecodedNode::Ln(ln) = codec::decode_node(&marker).unwrap() else {
        panic!("expected a leaf");
    };
    assert!(ln.is_deleted());

    let versioned = codec::encode_ln(&Ln::new_versioned(b"v".to_vec(), 42));
    let DecodedNode::Ln(ln) = codec::decode_node(&versioned).unwrap() else {
        panic!("expected a leaf");
    };
    assert_eq!(ln.kind(), NodeKind::LeafVersioned);
    assert_eq!(ln.vlsn(), Some(42));
}

#[test]
fn delta_written_through_the_log_reads_back() {
    let log = Arc::new(MemLog::new(1 << 20));
    let env = Env::new(
        EngineConfig {
            bin_max_entries: 8,
            ..Default::default()
        },
        Arc::clone(&log) as Arc<dyn LogManager>,
        Arc::new(NullLockManager),
    );
    let config = env.config().clone();

    let mut in_ = In::new(NodeKind::Bottom, &config);
    for (i, key) in [b"a", b"b", b"c", b"d"].iter().enumerate() {
        in_.insert_entry(&key[..], Lsn::new(1, i as u32), 0, &config)
            .unwrap();
    }
    obsolete::log_in(&env, &mut in_, false).unwrap();
    let base = in_.last_full_lsn();

    in_.update_entry_lsn(2, Lsn::new(9, 77), 13);
    let logged = obsolete::log_in(&env, &mut in_, false).unwrap();
    assert_eq!(in_.last_delta_lsn(), logged.lsn, "second write was a delta");

    let DecodedNode::Delta(delta) = codec::decode_node(&log.read(logged.lsn).unwrap()).unwrap()
    else {
        panic!("expected a delta record");
    };
    assert_eq!(delta.full_lsn(), base);
    assert_eq!(delta.n_slots(), 1, "only the dirty slot is carried");
    assert_eq!(delta.slot_key(0), b"c");
    assert_eq!(delta.slot_lsn(0), Lsn::new(9, 77));
    assert!(delta.has_filter());
    assert!(!delta.proves_absent(b"a"), "filter covers base keys");
    assert!(delta.proves_absent(b"nope"));
}

#[test]
fn truncated_records_are_rejected() {
    let config = EngineConfig::default();
    let mut in_ = In::new(NodeKind::Bottom, &config);
    in_.insert_entry(b"k", Lsn::new(1, 1), 0, &config).unwrap();
    let payload = codec::encode_in(&in_);

    assert!(codec::decode_node(&payload[..payload.len() - 1]).is_err());
    assert!(codec::decode_node(&[]).is_err());
}
