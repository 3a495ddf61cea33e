//! Extract/rebuild behaviour on synthetic multi-segment images.

mod helpers;

use helpers::{dir, file, gzip, meta, newc, pad, segment_dirs, tree_files, zstd, TestEnv};
use initramfs_split::segment::boundary::EndReason;
use initramfs_split::{extract_image, rebuild_image, scan_image, Config, ValidationError};
use std::fs;

/// Plain microcode segment, gzip main segment, zstd firmware segment.
fn mixed_image() -> Vec<u8> {
    let mut image = pad(newc(&[
        dir("kernel"),
        dir("kernel/x86"),
        dir("kernel/x86/microcode"),
        file("kernel/x86/microcode/GenuineIntel.bin", &[0x5a; 3000]),
    ]));
    image.extend(pad(gzip(
        &newc(&[
            dir("etc"),
            file("etc/hostname", b"initrd\n"),
            file("init", b"#!/bin/sh\nexec /sbin/init\n"),
        ]),
        6,
    )));
    image.extend(zstd(&newc(&[
        dir("lib"),
        dir("lib/firmware"),
        file("lib/firmware/blob.bin", &[7u8; 10_000]),
    ])));
    image
}

fn validation_error(err: &anyhow::Error) -> Option<&ValidationError> {
    err.chain().find_map(|cause| cause.downcast_ref::<ValidationError>())
}

#[test]
fn test_single_plain_segment() {
    let env = TestEnv::new();
    let image = env.write_image(
        "initrd.img",
        &pad(newc(&[dir("etc"), file("etc/hello.txt", b"hello world")])),
    );
    let out = env.empty_dir("out");

    let report = extract_image(&image, &out, &Config::default()).unwrap();
    assert_eq!(report.segments.len(), 1);
    assert_eq!(segment_dirs(&out), ["segment0"]);
    assert_eq!(
        fs::read_to_string(out.join("segment0/etc/hello.txt")).unwrap(),
        "hello world"
    );
    assert!(meta(&out, 0).contains("compression=none"));
}

#[test]
fn test_unpadded_single_archive() {
    let env = TestEnv::new();
    let archive = newc(&[dir("etc"), file("etc/hello.txt", b"hello world")]);
    assert!(archive.len() < helpers::BLOCK);
    let image = env.write_image("one.img", &archive);
    let out = env.empty_dir("out");

    let report = extract_image(&image, &out, &Config::default()).unwrap();
    assert_eq!(report.segments.len(), 1);
    assert_eq!(report.end, EndReason::EndOfInput);
    assert_eq!(
        fs::read_to_string(out.join("segment0/etc/hello.txt")).unwrap(),
        "hello world"
    );
    assert_eq!(meta(&out, 0), "compression=none\nextra_args=\n");
}

#[test]
fn test_small_compressed_tail_is_kept() {
    let env = TestEnv::new();
    let mut bytes = pad(newc(&[file("early", b"ucode")]));
    let tail = gzip(&newc(&[file("init", b"#!/bin/sh\n")]), 6);
    assert!(tail.len() < helpers::BLOCK);
    bytes.extend(&tail);
    let image = env.write_image("tail.img", &bytes);
    let out = env.empty_dir("out");

    let report = extract_image(&image, &out, &Config::default()).unwrap();
    assert_eq!(report.segments.len(), 2);
    assert_eq!(report.end, EndReason::EndOfInput);
    assert!(meta(&out, 1).contains("compression=gzip"));
    assert_eq!(fs::read(out.join("segment1/init")).unwrap(), b"#!/bin/sh\n");
}

#[test]
fn test_mixed_round_trip() {
    let env = TestEnv::new();
    let image = env.write_image("initrd.img", &mixed_image());
    let first = env.empty_dir("first");
    let config = Config::default();

    let report = extract_image(&image, &first, &config).unwrap();
    assert_eq!(report.segments.len(), 3);
    assert_eq!(segment_dirs(&first), ["segment0", "segment1", "segment2"]);
    assert!(meta(&first, 0).contains("compression=none"));
    assert!(meta(&first, 1).contains("compression=gzip"));
    assert!(meta(&first, 2).contains("compression=zstd"));

    let rebuilt = env.path("rebuilt.img");
    let rebuild = rebuild_image(&first, &rebuilt, &config).unwrap();
    assert_eq!(rebuild.segments.len(), 3);

    let second = env.empty_dir("second");
    let report = extract_image(&rebuilt, &second, &config).unwrap();
    assert_eq!(report.segments.len(), 3);
    for index in 0..3 {
        assert_eq!(meta(&first, index), meta(&second, index));
    }
    assert_eq!(tree_files(&first), tree_files(&second));
    assert_eq!(
        fs::read(second.join("segment2/lib/firmware/blob.bin")).unwrap(),
        vec![7u8; 10_000]
    );
}

#[test]
fn test_rebuild_is_repeatable() {
    let env = TestEnv::new();
    let image = env.write_image("initrd.img", &mixed_image());
    let tree = env.empty_dir("tree");
    let config = Config::default();
    extract_image(&image, &tree, &config).unwrap();

    let a = env.path("a.img");
    let b = env.path("b.img");
    rebuild_image(&tree, &a, &config).unwrap();
    rebuild_image(&tree, &b, &config).unwrap();
    assert_eq!(fs::read(&a).unwrap(), fs::read(&b).unwrap());

    let out_a = env.empty_dir("out_a");
    let out_b = env.empty_dir("out_b");
    extract_image(&a, &out_a, &config).unwrap();
    extract_image(&b, &out_b, &config).unwrap();
    assert_eq!(tree_files(&out_a), tree_files(&out_b));
    for index in 0..3 {
        assert_eq!(meta(&out_a, index), meta(&out_b, index));
    }
}

#[test]
fn test_trailing_zero_padding_is_ignored() {
    let env = TestEnv::new();
    let mut bytes = pad(newc(&[file("a", b"first")]));
    bytes.extend(pad(newc(&[file("b", b"second")])));
    bytes.extend(vec![0u8; 4096]);
    let image = env.write_image("padded.img", &bytes);
    let out = env.empty_dir("out");

    let report = extract_image(&image, &out, &Config::default()).unwrap();
    assert_eq!(report.segments.len(), 2);
    assert_eq!(segment_dirs(&out), ["segment0", "segment1"]);
    assert!(!out.join("segment2.meta").exists());
}

#[test]
fn test_short_tail_is_ignored() {
    let env = TestEnv::new();
    let mut bytes = pad(newc(&[file("a", b"only")]));
    bytes.extend(vec![0u8; 100]);
    let image = env.write_image("short.img", &bytes);
    let out = env.empty_dir("out");

    let report = extract_image(&image, &out, &Config::default()).unwrap();
    assert_eq!(report.segments.len(), 1);
    assert_eq!(report.end, EndReason::ShortTail { remaining: 100 });
}

#[test]
fn test_unpadded_segments_are_found() {
    let env = TestEnv::new();
    let mut bytes = newc(&[file("early", b"microcode")]);
    bytes.extend(newc(&[file("late", b"rootfs")]));
    let image = env.write_image("packed.img", &bytes);
    let out = env.empty_dir("out");

    let report = extract_image(&image, &out, &Config::default()).unwrap();
    assert_eq!(report.segments.len(), 2);
    assert_eq!(fs::read(out.join("segment1/late")).unwrap(), b"rootfs");
}

#[test]
fn test_non_empty_destination_is_rejected() {
    let env = TestEnv::new();
    let image = env.write_image("initrd.img", &mixed_image());
    let out = env.empty_dir("out");
    fs::write(out.join("keep.txt"), "mine").unwrap();

    let err = extract_image(&image, &out, &Config::default()).unwrap_err();
    assert!(matches!(
        validation_error(&err),
        Some(ValidationError::DestinationNotEmpty(_))
    ));
    assert_eq!(segment_dirs(&out), Vec::<String>::new());
    assert_eq!(fs::read_to_string(out.join("keep.txt")).unwrap(), "mine");
}

#[test]
fn test_text_file_is_rejected() {
    let env = TestEnv::new();
    let image = env.write_image("notes.txt", "plain text, not an archive\n".repeat(64).as_bytes());
    let out = env.empty_dir("out");

    let err = extract_image(&image, &out, &Config::default()).unwrap_err();
    assert!(matches!(
        validation_error(&err),
        Some(ValidationError::NotAnInitramfs(_))
    ));
    assert_eq!(fs::read_dir(&out).unwrap().count(), 0);
}

#[test]
fn test_corrupt_first_segment_is_rejected() {
    let env = TestEnv::new();
    let mut bytes = b"070701".to_vec();
    bytes.extend(vec![b'z'; 1024]);
    let image = env.write_image("broken.img", &bytes);
    let out = env.empty_dir("out");

    let err = extract_image(&image, &out, &Config::default()).unwrap_err();
    assert!(matches!(
        validation_error(&err),
        Some(ValidationError::NotAnInitramfs(_))
    ));
    assert_eq!(fs::read_dir(&out).unwrap().count(), 0);
}

#[test]
fn test_sparse_segments_stop_at_gap() {
    let env = TestEnv::new();
    let tree = env.empty_dir("tree");
    for index in [0, 1, 3] {
        let dir = tree.join(format!("segment{index}"));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(format!("file{index}")), format!("segment {index}")).unwrap();
    }

    let output = env.path("sparse.img");
    let report = rebuild_image(&tree, &output, &Config::default()).unwrap();
    assert_eq!(report.segments.len(), 2);

    let out = env.empty_dir("out");
    let extracted = extract_image(&output, &out, &Config::default()).unwrap();
    assert_eq!(extracted.segments.len(), 2);
    assert!(!out.join("segment2").exists());
    assert!(tree_files(&out).keys().all(|name| !name.contains("file3")));
}

#[test]
fn test_gzip_level_survives_round_trip() {
    let env = TestEnv::new();
    let mut bytes = pad(newc(&[file("early", b"ucode")]));
    bytes.extend(pad(gzip(&newc(&[file("init", b"#!/bin/sh\n")]), 9)));
    let image = env.write_image("best.img", &bytes);
    let config = Config::default();

    let first = env.empty_dir("first");
    extract_image(&image, &first, &config).unwrap();
    assert_eq!(meta(&first, 1), "compression=gzip\nextra_args=-9\n");

    let rebuilt = env.path("rebuilt.img");
    rebuild_image(&first, &rebuilt, &config).unwrap();
    let second = env.empty_dir("second");
    extract_image(&rebuilt, &second, &config).unwrap();
    assert_eq!(meta(&second, 1), "compression=gzip\nextra_args=-9\n");
}

#[test]
fn test_edited_tree_is_picked_up() {
    let env = TestEnv::new();
    let image = env.write_image("initrd.img", &mixed_image());
    let tree = env.empty_dir("tree");
    let config = Config::default();
    extract_image(&image, &tree, &config).unwrap();

    fs::write(tree.join("segment1/etc/hostname"), "edited\n").unwrap();
    fs::write(tree.join("segment1/etc/motd"), "welcome\n").unwrap();
    let rebuilt = env.path("edited.img");
    rebuild_image(&tree, &rebuilt, &config).unwrap();

    let listing = scan_image(&rebuilt, &config).unwrap();
    let names: Vec<&str> = listing.segments[1]
        .entries
        .iter()
        .map(|entry| entry.name.as_str())
        .collect();
    assert!(names.contains(&"etc/motd"));

    let out = env.empty_dir("out");
    extract_image(&rebuilt, &out, &config).unwrap();
    assert_eq!(
        fs::read_to_string(out.join("segment1/etc/hostname")).unwrap(),
        "edited\n"
    );
}
