//! End-to-end properties: build → recover round trips, determinism, and the
//! honesty of the central directory even when local headers lie.

use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::Path;

use noisyzip::config::{BuildConfig, Compression, Encoding};
use noisyzip::hooks::Hooks;
use noisyzip::{codec, recover, workers};

// ---------- helpers ----------

fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn write_tree(dir: &Path, files: &[(&str, &[u8])]) {
    for (rel, bytes) in files {
        let path = dir.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, bytes).unwrap();
    }
}

fn read_tree(dir: &Path) -> BTreeMap<String, Vec<u8>> {
    let mut out = BTreeMap::new();
    for entry in walkdir_files(dir) {
        let rel = entry
            .strip_prefix(dir)
            .unwrap()
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        out.insert(rel, fs::read(&entry).unwrap());
    }
    out
}

fn walkdir_files(dir: &Path) -> Vec<std::path::PathBuf> {
    let mut stack = vec![dir.to_path_buf()];
    let mut files = Vec::new();
    while let Some(cur) = stack.pop() {
        for entry in fs::read_dir(&cur).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                stack.push(path);
            } else {
                files.push(path);
            }
        }
    }
    files.sort();
    files
}

fn base_config(src: &Path, out: &Path) -> BuildConfig {
    let mut cfg = BuildConfig::clean(src.to_path_buf(), out.to_path_buf());
    cfg.workers = 2;
    cfg
}

fn le16(buf: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([buf[off], buf[off + 1]])
}

fn le32(buf: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

/// A deliberately strict CD-only reader: locates the one EOCD whose central
/// directory bounds are self-consistent, then extracts every member using
/// nothing but central-directory metadata. Poison EOCDs fail the
/// consistency check by construction.
fn strict_read(bytes: &[u8]) -> BTreeMap<String, Vec<u8>> {
    let mut eocd = None;
    for i in 0..bytes.len().saturating_sub(21) {
        if le32(bytes, i) == 0x0605_4B50 {
            let cd_size = le32(bytes, i + 12) as usize;
            let cd_offset = le32(bytes, i + 16) as usize;
            if cd_offset.checked_add(cd_size) == Some(i) {
                eocd = Some(i);
                break;
            }
        }
    }
    let eocd = eocd.expect("no self-consistent EOCD found");
    let count = le16(bytes, eocd + 8) as usize;
    let mut pos = le32(bytes, eocd + 16) as usize;

    let mut out = BTreeMap::new();
    for _ in 0..count {
        assert_eq!(le32(bytes, pos), 0x0201_4B50, "bad central header signature");
        let gp_flags = le16(bytes, pos + 8);
        let method = le16(bytes, pos + 10);
        let crc = le32(bytes, pos + 16);
        let csize = le32(bytes, pos + 20) as usize;
        let name_len = le16(bytes, pos + 28) as usize;
        let local_offset = le32(bytes, pos + 42) as usize;
        let name = codec::decode_name(&bytes[pos + 46..pos + 46 + name_len], gp_flags)
            .expect("undecodable member name");

        // The local header is only consulted for its variable-length fields.
        assert_eq!(le32(bytes, local_offset), 0x0403_4B50);
        let lh_name_len = le16(bytes, local_offset + 26) as usize;
        let lh_extra_len = le16(bytes, local_offset + 28) as usize;
        let data = local_offset + 30 + lh_name_len + lh_extra_len;

        let payload = &bytes[data..data + csize];
        let content = match method {
            0 => payload.to_vec(),
            8 => {
                let mut inflated = Vec::new();
                flate2::read::DeflateDecoder::new(payload)
                    .read_to_end(&mut inflated)
                    .unwrap();
                inflated
            }
            other => panic!("unexpected method {}", other),
        };
        assert_eq!(crc32fast::hash(&content), crc, "CRC mismatch for {}", name);
        out.insert(name, content);
        pos += 46 + name_len;
    }
    out
}

const TREE: &[(&str, &[u8])] = &[
    ("a.txt", b"hello"),
    ("docs/readme.md", b"# readme\nsome text\n"),
    ("docs/data.bin", &[0u8, 1, 2, 3, 4, 5, 250, 251, 252]),
    ("z/deep/nested.txt", b"nested payload nested payload nested payload"),
];

// ---------- properties ----------

#[test]
fn quiet_archive_matches_source_tree() {
    let src = tempfile::tempdir().unwrap();
    write_tree(src.path(), TREE);
    let out_dir = tempfile::tempdir().unwrap();
    let out = out_dir.path().join("plain.zip");

    let cfg = base_config(src.path(), &out);
    let count = workers::build_archive(&cfg, &Hooks::none()).unwrap();
    assert_eq!(count, TREE.len());

    let extracted = strict_read(&fs::read(&out).unwrap());
    assert_eq!(extracted, read_tree(src.path()));
}

#[test]
fn central_directory_stays_truthful_in_overwrite_mode() {
    let src = tempfile::tempdir().unwrap();
    write_tree(src.path(), TREE);
    let out_dir = tempfile::tempdir().unwrap();
    let out = out_dir.path().join("noisy.zip");

    let mut cfg = base_config(src.path(), &out);
    cfg.overwrite_central_dir = true;
    cfg.noise_files = 2;
    cfg.noise_size = 64;
    cfg.seed = Some(11);
    workers::build_archive(&cfg, &Hooks::none()).unwrap();

    let bytes = fs::read(&out).unwrap();
    let mut extracted = strict_read(&bytes);
    // The CD also lists the noise entries; drop them before comparing.
    extracted.retain(|name, _| !name.starts_with(".junk/"));
    assert_eq!(extracted, read_tree(src.path()));
}

#[test]
fn seeded_builds_are_byte_identical() {
    let src = tempfile::tempdir().unwrap();
    write_tree(src.path(), TREE);
    let out_dir = tempfile::tempdir().unwrap();

    let mut outputs = Vec::new();
    for run in 0..3 {
        let out = out_dir.path().join(format!("run{}.zip", run));
        let mut cfg = base_config(src.path(), &out);
        cfg.overwrite_central_dir = true;
        cfg.fixed_time = true;
        cfg.noise_files = 3;
        cfg.noise_size = 16;
        cfg.comment_size = 8;
        cfg.seed = Some(42);
        workers::build_archive(&cfg, &Hooks::none()).unwrap();
        outputs.push(fs::read(&out).unwrap());
    }
    assert_eq!(outputs[0], outputs[1]);
    assert_eq!(outputs[1], outputs[2]);
}

#[test]
fn recovery_roundtrips_across_modes() {
    init_logs();
    for compression in [Compression::Store, Compression::Deflate] {
        for overwrite in [false, true] {
            let src = tempfile::tempdir().unwrap();
            write_tree(src.path(), TREE);
            let out_dir = tempfile::tempdir().unwrap();
            let out = out_dir.path().join("t.zip");

            let mut cfg = base_config(src.path(), &out);
            cfg.compression = compression;
            cfg.overwrite_central_dir = overwrite;
            cfg.noise_files = 2;
            cfg.noise_size = 32;
            cfg.seed = Some(3);
            workers::build_archive(&cfg, &Hooks::none()).unwrap();

            let recovered_dir = tempfile::tempdir().unwrap();
            let recovered =
                recover::recover_files(&out, recovered_dir.path(), &Hooks::none()).unwrap();
            assert_eq!(
                recovered,
                TREE.len(),
                "compression={:?} overwrite={}",
                compression,
                overwrite
            );
            assert_eq!(read_tree(recovered_dir.path()), read_tree(src.path()));
        }
    }
}

#[test]
fn cp1251_names_survive_build_and_recovery() {
    let src = tempfile::tempdir().unwrap();
    write_tree(
        src.path(),
        &[("Документы/заметка.txt", b"privet"), ("plain.txt", b"ascii")],
    );
    let out_dir = tempfile::tempdir().unwrap();
    let out = out_dir.path().join("cyr.zip");

    let mut cfg = base_config(src.path(), &out);
    cfg.encoding = Encoding::Cp1251;
    cfg.overwrite_central_dir = true;
    workers::build_archive(&cfg, &Hooks::none()).unwrap();

    let recovered_dir = tempfile::tempdir().unwrap();
    recover::recover_files(&out, recovered_dir.path(), &Hooks::none()).unwrap();
    let tree = read_tree(recovered_dir.path());
    assert_eq!(tree.get("Документы/заметка.txt").map(Vec::as_slice), Some(&b"privet"[..]));
    assert_eq!(tree.get("plain.txt").map(Vec::as_slice), Some(&b"ascii"[..]));
}

#[test]
fn recovery_survives_prepended_garbage_and_missing_eocd() {
    init_logs();
    let src = tempfile::tempdir().unwrap();
    write_tree(src.path(), TREE);
    let out_dir = tempfile::tempdir().unwrap();
    let out = out_dir.path().join("t.zip");

    let mut cfg = base_config(src.path(), &out);
    cfg.seed = Some(8);
    workers::build_archive(&cfg, &Hooks::none()).unwrap();

    // Prepend 1 KiB of arbitrary bytes and truncate the EOCD entirely.
    let original = fs::read(&out).unwrap();
    let mut mangled = vec![0xA5u8; 1024];
    mangled.extend_from_slice(&original[..original.len() - 22]);
    let damaged = out_dir.path().join("damaged.zip");
    fs::write(&damaged, &mangled).unwrap();

    let recovered_dir = tempfile::tempdir().unwrap();
    let recovered =
        recover::recover_files(&damaged, recovered_dir.path(), &Hooks::none()).unwrap();
    assert_eq!(recovered, TREE.len());
    assert_eq!(read_tree(recovered_dir.path()), read_tree(src.path()));
}

#[test]
fn hostile_names_cannot_escape_the_output_directory() {
    // A handcrafted archive whose single member claims to live at
    // "../../escape.txt". Method 0, honest sizes, no data descriptor.
    let name = b"../../escape.txt";
    let payload = b"gotcha";
    let mut zip = Vec::new();
    zip.extend_from_slice(&[b'P', b'K', 3, 4]);
    zip.extend_from_slice(&20u16.to_le_bytes()); // version needed
    zip.extend_from_slice(&0u16.to_le_bytes()); // flags
    zip.extend_from_slice(&0u16.to_le_bytes()); // method: store
    zip.extend_from_slice(&0u16.to_le_bytes()); // dos time
    zip.extend_from_slice(&0x21u16.to_le_bytes()); // dos date
    zip.extend_from_slice(&crc32fast::hash(payload).to_le_bytes());
    zip.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    zip.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    zip.extend_from_slice(&(name.len() as u16).to_le_bytes());
    zip.extend_from_slice(&0u16.to_le_bytes()); // extra len
    zip.extend_from_slice(name);
    zip.extend_from_slice(payload);

    let dir = tempfile::tempdir().unwrap();
    let zip_path = dir.path().join("hostile.zip");
    fs::write(&zip_path, &zip).unwrap();

    let out_root = tempfile::tempdir().unwrap();
    let out_dir = out_root.path().join("stage/inner");
    fs::create_dir_all(&out_dir).unwrap();
    let recovered = recover::recover_files(&zip_path, &out_dir, &Hooks::none()).unwrap();
    assert_eq!(recovered, 1);

    // The traversal segments are dropped, not honoured.
    assert_eq!(fs::read(out_dir.join("escape.txt")).unwrap(), payload);
    assert!(!out_root.path().join("escape.txt").exists());
    assert!(!out_root.path().join("stage/escape.txt").exists());
}

#[test]
fn junk_entries_are_filtered_during_recovery() {
    init_logs();
    let src = tempfile::tempdir().unwrap();
    write_tree(src.path(), &[("a.txt", b"hello")]);
    let out_dir = tempfile::tempdir().unwrap();
    let out = out_dir.path().join("noisy.zip");

    let mut cfg = base_config(src.path(), &out);
    cfg.overwrite_central_dir = true;
    cfg.noise_files = 4;
    cfg.noise_size = 100;
    cfg.comment_size = 16;
    cfg.seed = Some(21);
    workers::build_archive(&cfg, &Hooks::none()).unwrap();

    let recovered_dir = tempfile::tempdir().unwrap();
    let names: std::sync::Mutex<Vec<String>> = std::sync::Mutex::new(Vec::new());
    let on_progress = |_done: usize, _total: usize, name: &str| {
        names.lock().unwrap().push(name.to_string());
    };
    let hooks = Hooks { on_progress: Some(&on_progress), on_log: None };
    let recovered = recover::recover_files(&out, recovered_dir.path(), &hooks).unwrap();

    assert_eq!(recovered, 1);
    assert_eq!(read_tree(recovered_dir.path()).keys().collect::<Vec<_>>(), ["a.txt"]);
    // Progress fired for every candidate, junk included.
    assert!(names.lock().unwrap().len() >= 5);
}

#[test]
fn recovery_to_zip_rebuilds_a_clean_archive() {
    let src = tempfile::tempdir().unwrap();
    write_tree(src.path(), TREE);
    let out_dir = tempfile::tempdir().unwrap();
    let noisy = out_dir.path().join("noisy.zip");

    let mut cfg = base_config(src.path(), &noisy);
    cfg.overwrite_central_dir = true;
    cfg.noise_files = 3;
    cfg.noise_size = 48;
    cfg.comment_size = 32;
    cfg.seed = Some(99);
    workers::build_archive(&cfg, &Hooks::none()).unwrap();

    let clean = out_dir.path().join("clean.zip");
    let (recovered, rebuilt) = recover::recover_to_zip(
        &noisy,
        &clean,
        &recover::RebuildOptions::default(),
        &Hooks::none(),
    )
    .unwrap();
    assert_eq!(recovered, TREE.len());
    assert_eq!(rebuilt, TREE.len());

    // The rebuilt archive is honest: a strict CD reader sees the tree, and
    // there are no trailing bytes after its EOCD.
    let bytes = fs::read(&clean).unwrap();
    assert_eq!(strict_read(&bytes), read_tree(src.path()));
    let eocd = bytes.len() - 22;
    assert_eq!(le32(&bytes, eocd), 0x0605_4B50);
}
