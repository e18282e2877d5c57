#![forbid(unsafe_code)]

use sqsh_harness::{
    DirSpec, Event, FileSpec, ImageBuilder, MemorySink, NodeSpec, SymlinkSpec, XattrPairSpec,
};
use sqsh::{CacheStats, ExtractOptions, ExtractReport, SqfsError, SquashImage, Traversal};
use std::ffi::OsString;
use std::path::PathBuf;

fn extract(bytes: Vec<u8>, lenient: bool) -> (MemorySink, ExtractReport, CacheStats) {
    let image = SquashImage::from_bytes(bytes).expect("open image");
    let mut sink = MemorySink::new();
    let options = ExtractOptions {
        lenient,
        ..ExtractOptions::default()
    };
    let report = Traversal::new(&image, &options)
        .run(&mut sink)
        .expect("extraction");
    let stats = image.fragment_cache_stats();
    (sink, report, stats)
}

#[test]
fn s1_minimal_image_emits_the_expected_event_sequence() {
    let built = ImageBuilder::new()
        .build(DirSpec::new(0o755).child("hello", FileSpec::new("hello")));
    let (sink, report, _) = extract(built.bytes, false);

    assert_eq!(
        sink.events,
        vec![
            Event::Dir {
                path: PathBuf::from("/"),
                mode: 0o755,
                uid: 0,
                gid: 0,
                mtime: 1_600_000_000,
                xattrs: Vec::new(),
            },
            Event::FileBegin {
                path: PathBuf::from("/hello"),
                size: 5,
                mode: 0o644,
                uid: 0,
                gid: 0,
                mtime: 1_600_000_000,
                xattrs: Vec::new(),
            },
            Event::FileChunk(b"hello".to_vec()),
            Event::FileEnd,
            Event::DirEnd {
                path: PathBuf::from("/"),
            },
        ]
    );
    assert_eq!(report.dirs, 1);
    assert_eq!(report.files, 1);
    assert_eq!(report.bytes_written, 5);
    assert_eq!(report.warnings, 0);
}

#[test]
fn s2_shared_tail_fragment_hits_the_cache() {
    let tail = b"0123456789";
    let mut big = vec![0xAB_u8; 4096];
    big.extend_from_slice(tail);

    let built = ImageBuilder::new().build(
        DirSpec::new(0o755)
            .child("a_big", FileSpec::new(big.clone()).tail_in_fragment())
            .child("b_tiny", FileSpec::new(&tail[..]).tail_in_fragment()),
    );
    let (sink, report, stats) = extract(built.bytes, false);

    let files = sink.files();
    assert_eq!(files.len(), 2);
    assert_eq!(files[0].0, PathBuf::from("/a_big"));
    assert_eq!(files[0].1, big);
    assert_eq!(files[1].1, tail.to_vec());
    assert_eq!(&files[0].1[4096..], &files[1].1[..]);

    // both tails come from one fragment block: second access must hit
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 1);
    assert_eq!(report.tail_fragments, 1);
}

#[test]
fn s3_sparse_middle_block_is_exactly_zeroes() {
    let mut content = vec![b'A'; 4096];
    content.extend_from_slice(&[0_u8; 4096]);
    content.extend_from_slice(&vec![b'B'; 4096]);

    let built = ImageBuilder::new()
        .build(DirSpec::new(0o755).child("holey", FileSpec::new(content.clone())));
    let (sink, report, _) = extract(built.bytes, false);

    let chunks: Vec<&Vec<u8>> = sink
        .events
        .iter()
        .filter_map(|event| match event {
            Event::FileChunk(data) => Some(data),
            _ => None,
        })
        .collect();
    assert_eq!(chunks.len(), 3);
    assert_eq!(chunks[1].len(), 4096);
    assert!(chunks[1].iter().all(|byte| *byte == 0));

    let files = sink.files();
    assert_eq!(files[0].1, content);
    assert_eq!(report.bytes_written, 3 * 4096);
}

#[test]
fn s4_symlink_round_trips_its_target() {
    let built = ImageBuilder::new().build(
        DirSpec::new(0o755).child("link", SymlinkSpec::new("../etc/passwd")),
    );
    let (sink, report, _) = extract(built.bytes, false);

    assert!(sink.events.contains(&Event::Symlink {
        path: PathBuf::from("/link"),
        target: OsString::from("../etc/passwd"),
        mode: 0o777,
    }));
    assert_eq!(report.symlinks, 1);
}

#[test]
fn s5_deep_tree_emits_in_pre_order() {
    let mut current = DirSpec::new(0o755).child("f7", FileSpec::new("file7"));
    for level in (2..=7).rev() {
        current = DirSpec::new(0o755)
            .child(&format!("d{level}"), current)
            .child(&format!("f{}", level - 1), FileSpec::new(format!("file{}", level - 1)));
    }
    let built = ImageBuilder::new().build(DirSpec::new(0o755).child("d1", current));
    let (sink, report, _) = extract(built.bytes, false);

    assert_eq!(report.max_depth, 7);
    assert_eq!(report.dirs, 8);
    assert_eq!(report.files, 7);

    // "d2" sorts before "f1", so the entire d2 subtree (down to f7) is
    // emitted before f1's first event.
    let position = |needle: &Event| {
        sink.events
            .iter()
            .position(|event| event == needle)
            .expect("event present")
    };
    let deepest_end = sink
        .events
        .iter()
        .position(|event| {
            matches!(event, Event::DirEnd { path } if path == &PathBuf::from("/d1/d2/d3/d4/d5/d6/d7"))
        })
        .expect("deepest dir closes");
    let f1_begin = sink
        .events
        .iter()
        .position(|event| {
            matches!(event, Event::FileBegin { path, .. } if path == &PathBuf::from("/d1/f1"))
        })
        .expect("f1 emitted");
    assert!(deepest_end < f1_begin);
    assert!(position(&Event::FileEnd) > 0);
}

#[cfg(not(feature = "lz4"))]
#[test]
fn s6_missing_codec_fails_at_first_decode_not_at_open() {
    let built = ImageBuilder::new()
        .compression_id(5)
        .build(DirSpec::new(0o755).child("x", FileSpec::new("payload")));

    // open only validates the id range
    let image = SquashImage::from_bytes(built.bytes).expect("open succeeds");
    assert_eq!(image.superblock().compression_id, 5);

    let mut sink = MemorySink::new();
    let err = Traversal::new(&image, &ExtractOptions::default())
        .run(&mut sink)
        .unwrap_err();
    assert!(matches!(err, SqfsError::UnsupportedCodec { id: 5, .. }));
    assert!(sink.events.is_empty());
}

#[test]
fn codec_swap_produces_identical_event_streams() {
    let tree = || {
        DirSpec::new(0o755)
            .child(
                "sub",
                DirSpec::new(0o700).child("inner", FileSpec::new("inner contents")),
            )
            .child("tail", {
                let mut content = vec![0x5A_u8; 4096];
                content.extend_from_slice(b"shorttail");
                FileSpec::new(content).tail_in_fragment()
            })
            .child("link", SymlinkSpec::new("sub/inner"))
    };

    let compressed = ImageBuilder::new().compress(true).build(tree());
    let stored = ImageBuilder::new().compress(false).build(tree());
    let (events_a, report_a, _) = extract(compressed.bytes, false);
    let (events_b, report_b, _) = extract(stored.bytes, false);

    assert_eq!(events_a.events, events_b.events);
    assert_eq!(report_a, report_b);
}

#[test]
fn xattrs_and_owners_flow_through_to_events() {
    let mut builder = ImageBuilder::new().ids(vec![1000, 1001]);
    let set = builder.xattr_set(vec![
        XattrPairSpec::user("comment", b"covered"),
        XattrPairSpec {
            entry_type: 2,
            name: b"selinux".to_vec(),
            value: b"ctx".to_vec(),
        },
    ]);
    let built = builder.build(
        DirSpec::new(0o750).owner(0, 1).child(
            "tagged",
            FileSpec::new("data").owner(1, 1).xattr_set(set),
        ),
    );
    let (sink, _, _) = extract(built.bytes, false);

    let Some(Event::Dir { uid, gid, .. }) = sink.events.first() else {
        panic!("first event is the root dir");
    };
    assert_eq!((*uid, *gid), (1000, 1001));

    let file_begin = sink
        .events
        .iter()
        .find_map(|event| match event {
            Event::FileBegin {
                uid, gid, xattrs, ..
            } => Some((*uid, *gid, xattrs.clone())),
            _ => None,
        })
        .expect("file event");
    assert_eq!((file_begin.0, file_begin.1), (1001, 1001));
    assert_eq!(
        file_begin.2,
        vec![
            (b"user.comment".to_vec(), b"covered".to_vec()),
            (b"security.selinux".to_vec(), b"ctx".to_vec()),
        ]
    );
}

#[test]
fn special_inodes_and_empty_dirs_are_reported() {
    let built = ImageBuilder::new().build(
        DirSpec::new(0o755)
            .child("empty", DirSpec::new(0o700))
            .child("null", NodeSpec::CharDevice {
                mode: 0o666,
                rdev: (1 << 8) | 3,
            })
            .child("pipe", NodeSpec::Fifo { mode: 0o644 }),
    );
    let (sink, report, _) = extract(built.bytes, false);

    assert!(sink.events.contains(&Event::Dir {
        path: PathBuf::from("/empty"),
        mode: 0o700,
        uid: 0,
        gid: 0,
        mtime: 1_600_000_000,
        xattrs: Vec::new(),
    }));
    assert!(sink.events.contains(&Event::Special {
        path: PathBuf::from("/null"),
        kind: "char device",
        rdev: (1 << 8) | 3,
    }));
    assert!(sink.events.contains(&Event::Special {
        path: PathBuf::from("/pipe"),
        kind: "fifo",
        rdev: 0,
    }));
    assert_eq!(report.dirs, 2);
    assert_eq!(report.specials, 2);
}

#[test]
fn lenient_mode_skips_a_corrupt_entry_and_continues() {
    let built = ImageBuilder::new().compress(false).build(
        DirSpec::new(0o755)
            .child("aaa", FileSpec::new("first"))
            .child("bbb", FileSpec::new("second")),
    );

    let mut bytes = built.bytes.clone();
    let record = built.inode_record_offsets["/aaa"];
    let position = (built.inode_table_start + 2 + record) as usize;
    bytes[position..position + 2].copy_from_slice(&15_u16.to_le_bytes());

    // strict: fatal on the first sibling
    let image = SquashImage::from_bytes(bytes.clone()).unwrap();
    let mut sink = MemorySink::new();
    let err = Traversal::new(&image, &ExtractOptions::default())
        .run(&mut sink)
        .unwrap_err();
    assert!(matches!(err, SqfsError::InodeTypeUnknown { raw: 15 }));

    // lenient: warning, then the next sibling extracts normally
    let (sink, report, _) = extract(bytes, true);
    assert_eq!(report.warnings, 1);
    assert_eq!(report.files, 1);
    let files = sink.files();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].0, PathBuf::from("/bbb"));
    assert_eq!(files[0].1, b"second".to_vec());
    assert!(sink.warnings()[0].contains("/aaa"));
}

#[test]
fn declared_sizes_always_match_streamed_bytes() {
    let built = ImageBuilder::new().build(
        DirSpec::new(0o755)
            .child("empty", FileSpec::new(""))
            .child("exact", FileSpec::new(vec![7_u8; 8192]))
            .child("frag", {
                let mut content = vec![1_u8; 4096];
                content.extend_from_slice(b"xyz");
                FileSpec::new(content).tail_in_fragment()
            })
            .child("extended", FileSpec::new("ext record").extended()),
    );
    let (sink, report, _) = extract(built.bytes, false);

    let mut sizes = Vec::new();
    let mut current = 0_u64;
    for event in &sink.events {
        match event {
            Event::FileBegin { size, .. } => current = *size,
            Event::FileChunk(chunk) => current -= chunk.len() as u64,
            Event::FileEnd => sizes.push(current),
            _ => {}
        }
    }
    assert!(sizes.iter().all(|leftover| *leftover == 0));
    assert_eq!(report.files, 4);
    assert_eq!(report.files_nonempty, 3);
}
